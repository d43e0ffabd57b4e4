//! In-memory video backend for exercising the pipeline without ffmpeg.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::infrastructure::media::{FrameSink, FrameSource, MediaError, VideoBackend};
use crate::modules::video::model::{Frame, VideoAsset};

#[derive(Clone, Default)]
pub struct Recorder {
    pub written: Arc<Mutex<Vec<Frame>>>,
    pub readers_opened: Arc<AtomicUsize>,
    pub readers_live: Arc<AtomicUsize>,
    pub finished: Arc<AtomicUsize>,
    pub read_paths: Arc<Mutex<Vec<PathBuf>>>,
    pub write_paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl Recorder {
    pub fn written_count(&self) -> usize {
        self.written.lock().unwrap().len()
    }

    pub fn read_paths(&self) -> Vec<PathBuf> {
        self.read_paths.lock().unwrap().clone()
    }

    pub fn write_paths(&self) -> Vec<PathBuf> {
        self.write_paths.lock().unwrap().clone()
    }
}

/// Generates `decodable` RGB frames with a square moving one pixel per frame,
/// while reporting `reported` frames from `probe`.
#[derive(Clone)]
pub struct SyntheticBackend {
    pub width: u32,
    pub height: u32,
    pub reported: u64,
    pub decodable: usize,
    pub fail_at: Option<usize>,
    pub recorder: Recorder,
}

impl SyntheticBackend {
    pub fn new(width: u32, height: u32, frames: usize) -> Self {
        Self {
            width,
            height,
            reported: frames as u64,
            decodable: frames,
            fail_at: None,
            recorder: Recorder::default(),
        }
    }

    pub fn asset(&self) -> VideoAsset {
        VideoAsset {
            path: "synthetic.mp4".into(),
            frame_count: self.reported,
            width: self.width,
            height: self.height,
            frame_rate: 30.0,
        }
    }
}

struct SyntheticReader {
    width: u32,
    height: u32,
    next: usize,
    decodable: usize,
    fail_at: Option<usize>,
    live: Arc<AtomicUsize>,
}

impl FrameSource for SyntheticReader {
    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        if self.fail_at == Some(self.next) {
            return Err(MediaError::TruncatedFrame {
                expected: Frame::expected_len(self.width, self.height, 3),
                got: 1,
            });
        }
        if self.next >= self.decodable {
            return Ok(None);
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = vec![20u8; w * h * 3];
        let offset = self.next % w.max(1);
        for y in 0..h.min(8) {
            for x in offset..(offset + 8).min(w) {
                let i = (y * w + x) * 3;
                data[i..i + 3].copy_from_slice(&[240, 240, 240]);
            }
        }
        self.next += 1;
        Ok(Some(Frame::new(self.width, self.height, 3, data)))
    }
}

impl Drop for SyntheticReader {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SyntheticWriter {
    recorder: Recorder,
}

impl FrameSink for SyntheticWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError> {
        self.recorder.written.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), MediaError> {
        self.recorder.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl VideoBackend for SyntheticBackend {
    fn probe(&self, path: &Path) -> Result<VideoAsset, MediaError> {
        Ok(VideoAsset {
            path: path.to_path_buf(),
            ..self.asset()
        })
    }

    fn open_reader(&self, asset: &VideoAsset) -> Result<Box<dyn FrameSource>, MediaError> {
        self.recorder.read_paths.lock().unwrap().push(asset.path.clone());
        self.recorder.readers_opened.fetch_add(1, Ordering::SeqCst);
        self.recorder.readers_live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticReader {
            width: self.width,
            height: self.height,
            next: 0,
            decodable: self.decodable,
            fail_at: self.fail_at,
            live: self.recorder.readers_live.clone(),
        }))
    }

    fn open_writer(&self, path: &Path, _like: &VideoAsset) -> Result<Box<dyn FrameSink>, MediaError> {
        self.recorder.write_paths.lock().unwrap().push(path.to_path_buf());
        Ok(Box::new(SyntheticWriter {
            recorder: self.recorder.clone(),
        }))
    }
}
