use std::path::Path;

use thiserror::Error;

use crate::modules::video::model::{Frame, VideoAsset};

pub mod ffmpeg;

pub use ffmpeg::FfmpegBackend;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("could not read video metadata: {0}")]
    Probe(String),
    #[error("decoder stopped mid-frame after {got} of {expected} bytes")]
    TruncatedFrame { expected: usize, got: usize },
    #[error("frame is {got_w}x{got_h}x{got_c}, writer expects {want_w}x{want_h}x1")]
    FrameShape {
        want_w: u32,
        want_h: u32,
        got_w: u32,
        got_h: u32,
        got_c: u8,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sequential decoded frames of one video.
pub trait FrameSource: Send {
    /// `Ok(None)` at end of stream; `Err` when the decoder fails.
    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError>;
}

/// Consumer of single-channel frames that ends up as a video file.
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError>;

    /// Flushes and closes the output. Must be called for the file to be valid.
    fn finish(self: Box<Self>) -> Result<(), MediaError>;
}

/// Opens videos for reading and writing. Implementations block.
pub trait VideoBackend: Send + Sync {
    fn probe(&self, path: &Path) -> Result<VideoAsset, MediaError>;

    fn open_reader(&self, asset: &VideoAsset) -> Result<Box<dyn FrameSource>, MediaError>;

    fn open_writer(&self, path: &Path, like: &VideoAsset) -> Result<Box<dyn FrameSink>, MediaError>;
}
