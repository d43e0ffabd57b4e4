use std::sync::Arc;

use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;

use super::model::{Frame, VideoAsset};
use crate::infrastructure::media::{MediaError, VideoBackend};

const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("video has no decodable frames")]
    NoFrame,
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("cannot encode a {0}-channel frame as JPEG")]
    Channels(u8),
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Pulls the representative frame that gets sent for captioning.
#[derive(Clone)]
pub struct FrameExtractor {
    backend: Arc<dyn VideoBackend>,
}

impl FrameExtractor {
    pub fn new(backend: Arc<dyn VideoBackend>) -> Self {
        Self { backend }
    }

    /// Decodes only the first frame; the decoder is released before returning.
    pub fn extract_first_frame(&self, asset: &VideoAsset) -> Result<Frame, ExtractError> {
        let mut reader = self.backend.open_reader(asset)?;
        let first = reader.next_frame();
        drop(reader);
        first?.ok_or(ExtractError::NoFrame)
    }

    /// First frame, JPEG-encoded.
    pub fn first_frame_jpeg(&self, asset: &VideoAsset) -> Result<Vec<u8>, ExtractError> {
        let frame = self.extract_first_frame(asset)?;
        encode_jpeg(&frame)
    }
}

pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>, ExtractError> {
    let color = match frame.channels {
        1 => ExtendedColorType::L8,
        3 => ExtendedColorType::Rgb8,
        other => return Err(ExtractError::Channels(other)),
    };

    let mut jpeg_data = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_data, JPEG_QUALITY);
    encoder.encode(&frame.data, frame.width, frame.height, color)?;
    Ok(jpeg_data)
}
