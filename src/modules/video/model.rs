use std::path::PathBuf;

/// A stored video as reported by the prober. Read-only once created.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoAsset {
    pub path: PathBuf,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

/// One decoded picture, row-major, `channels` bytes per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn expected_len(width: u32, height: u32, channels: u8) -> usize {
        width as usize * height as usize * channels as usize
    }

    /// Luminance of pixel `i`. Three-channel frames are treated as RGB.
    pub fn luma(&self, i: usize) -> f32 {
        match self.channels {
            1 => self.data[i] as f32,
            _ => {
                let px = &self.data[i * self.channels as usize..];
                0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionStatus {
    Success,
    SuccessWithFallback,
    RateLimited,
    Unavailable,
    Error,
    Exception,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionResult {
    pub text: String,
    pub status: CaptionStatus,
}

impl CaptionResult {
    pub fn new(text: impl Into<String>, status: CaptionStatus) -> Self {
        Self {
            text: text.into(),
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CaptionStatus::Success
    }
}
