use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use super::events::{ProgressEvent, percent_of};
use super::model::VideoAsset;
use super::transformer::{BackgroundSubtractor, SubtractorParams, TransformError};
use crate::infrastructure::media::{FrameSink, FrameSource, MediaError, VideoBackend};

/// The consumer stopped listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("could not open video: {0}")]
    Open(#[source] MediaError),
    #[error("decoding failed after {processed} frames: {source}")]
    Decode {
        processed: u64,
        #[source]
        source: MediaError,
    },
    #[error("writing the processed video failed: {0}")]
    Encode(#[source] MediaError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("progress consumer disconnected")]
    Disconnected,
}

impl From<Disconnected> for StreamError {
    fn from(_: Disconnected) -> Self {
        StreamError::Disconnected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSummary {
    pub processed: u64,
    pub expected: u64,
}

impl TransformSummary {
    pub fn stopped_early(&self) -> bool {
        self.processed < self.expected
    }
}

/// Runs background subtraction over a whole video, reporting after every frame.
///
/// Each `Progress` event is handed to `emit` before the next frame is decoded.
/// Terminal events are the caller's job.
pub struct ProgressStream<'a> {
    backend: &'a dyn VideoBackend,
    params: SubtractorParams,
}

impl<'a> ProgressStream<'a> {
    pub fn new(backend: &'a dyn VideoBackend, params: SubtractorParams) -> Self {
        Self { backend, params }
    }

    pub fn run<F>(&self, asset: &VideoAsset, output: &Path, mut emit: F) -> Result<TransformSummary, StreamError>
    where
        F: FnMut(ProgressEvent) -> Result<(), Disconnected>,
    {
        let total = asset.frame_count;
        if total == 0 {
            warn!("{} reports no frames, skipping transformation", asset.path.display());
            return Ok(TransformSummary {
                processed: 0,
                expected: 0,
            });
        }

        let mut source = self.backend.open_reader(asset).map_err(StreamError::Open)?;
        let mut sink = self
            .backend
            .open_writer(output, asset)
            .map_err(StreamError::Open)?;

        let pumped = self.pump(total, source.as_mut(), sink.as_mut(), &mut emit);
        drop(source);
        let finished = match pumped {
            Ok(processed) => sink.finish().map_err(StreamError::Encode).map(|_| processed),
            Err(e) => {
                drop(sink);
                Err(e)
            }
        };
        let processed = match finished {
            Ok(processed) => processed,
            Err(e) => {
                discard_partial(output);
                return Err(e);
            }
        };

        let summary = TransformSummary {
            processed,
            expected: total,
        };
        if summary.stopped_early() {
            warn!("Decoder ran out after {} of {} frames", processed, total);
        }
        info!("Background subtraction wrote {} frames to {}", processed, output.display());
        Ok(summary)
    }

    fn pump<F>(
        &self,
        total: u64,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        emit: &mut F,
    ) -> Result<u64, StreamError>
    where
        F: FnMut(ProgressEvent) -> Result<(), Disconnected>,
    {
        let mut subtractor = BackgroundSubtractor::new(self.params);
        let mut processed = 0u64;
        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(processed),
                Err(source) => return Err(StreamError::Decode { processed, source }),
            };

            let mask = subtractor.apply(&frame)?;
            sink.write_frame(&mask).map_err(StreamError::Encode)?;
            processed += 1;

            emit(ProgressEvent::Progress(percent_of(processed, total)))?;
        }
    }
}

/// Removes the half-written video of an aborted run.
fn discard_partial(output: &Path) {
    match std::fs::remove_file(output) {
        Ok(()) => info!("Removed partial output {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", output.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::video::testing::SyntheticBackend;
    use std::sync::atomic::Ordering;

    fn collect(backend: &SyntheticBackend) -> (Result<TransformSummary, StreamError>, Vec<ProgressEvent>) {
        let mut events = Vec::new();
        let result = ProgressStream::new(backend, SubtractorParams::default()).run(
            &backend.asset(),
            Path::new("out.mp4"),
            |event| {
                events.push(event);
                Ok(())
            },
        );
        (result, events)
    }

    fn percents(events: &[ProgressEvent]) -> Vec<u8> {
        events
            .iter()
            .map(|e| match e {
                ProgressEvent::Progress(p) => *p,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_one_event_per_frame_non_decreasing() {
        for n in [1usize, 3, 7, 10, 150] {
            let backend = SyntheticBackend::new(16, 12, n);
            let (result, events) = collect(&backend);

            let summary = result.unwrap();
            assert_eq!(summary.processed, n as u64);
            let p = percents(&events);
            assert_eq!(p.len(), n);
            assert!(p.windows(2).all(|w| w[0] <= w[1]));
            assert!(p.iter().all(|&v| v <= 100));
            assert_eq!(*p.last().unwrap(), 100);
            assert_eq!(backend.recorder.written_count(), n);
            assert_eq!(backend.recorder.finished.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_ten_frames_step_by_ten() {
        let backend = SyntheticBackend::new(640, 480, 10);
        let (_, events) = collect(&backend);
        assert_eq!(percents(&events), vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    }

    #[test]
    fn test_zero_frames_touches_nothing() {
        let backend = SyntheticBackend::new(16, 12, 0);
        let (result, events) = collect(&backend);
        assert_eq!(result.unwrap(), TransformSummary { processed: 0, expected: 0 });
        assert!(events.is_empty());
        assert_eq!(backend.recorder.readers_opened.load(Ordering::SeqCst), 0);
        assert_eq!(backend.recorder.written_count(), 0);
    }

    #[test]
    fn test_early_end_does_not_fabricate_progress() {
        let mut backend = SyntheticBackend::new(16, 12, 4);
        backend.reported = 10;
        let (result, events) = collect(&backend);

        let summary = result.unwrap();
        assert!(summary.stopped_early());
        assert_eq!(summary.processed, 4);
        assert_eq!(percents(&events), vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_decode_failure_aborts() {
        let mut backend = SyntheticBackend::new(16, 12, 10);
        backend.fail_at = Some(3);
        let (result, events) = collect(&backend);

        assert!(matches!(result, Err(StreamError::Decode { processed: 3, .. })));
        assert_eq!(events.len(), 3);
        assert_eq!(backend.recorder.finished.load(Ordering::SeqCst), 0);
        assert_eq!(backend.recorder.readers_live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disconnect_stops_the_loop() {
        let backend = SyntheticBackend::new(16, 12, 10);
        let mut sent = 0;
        let result = ProgressStream::new(&backend, SubtractorParams::default()).run(
            &backend.asset(),
            Path::new("out.mp4"),
            |_| {
                sent += 1;
                if sent > 2 { Err(Disconnected) } else { Ok(()) }
            },
        );

        assert!(matches!(result, Err(StreamError::Disconnected)));
        assert_eq!(backend.recorder.written_count(), 3);
    }

    fn leftover_output() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("vidstory-progress-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let output = dir.join("bgsub_uploaded_video.mp4");
        std::fs::write(&output, b"half an mp4").unwrap();
        output
    }

    #[test]
    fn test_decode_failure_removes_partial_output() {
        let mut backend = SyntheticBackend::new(16, 12, 10);
        backend.fail_at = Some(3);
        let output = leftover_output();

        let result = ProgressStream::new(&backend, SubtractorParams::default())
            .run(&backend.asset(), &output, |_| Ok(()));

        assert!(matches!(result, Err(StreamError::Decode { .. })));
        assert!(!output.exists());
    }

    #[test]
    fn test_disconnect_removes_partial_output() {
        let backend = SyntheticBackend::new(16, 12, 10);
        let output = leftover_output();

        let result = ProgressStream::new(&backend, SubtractorParams::default())
            .run(&backend.asset(), &output, |_| Err(Disconnected));

        assert!(matches!(result, Err(StreamError::Disconnected)));
        assert!(!output.exists());
    }

    #[test]
    fn test_completed_run_keeps_output() {
        let backend = SyntheticBackend::new(16, 12, 4);
        let output = leftover_output();

        let result = ProgressStream::new(&backend, SubtractorParams::default())
            .run(&backend.asset(), &output, |_| Ok(()));

        assert_eq!(result.unwrap().processed, 4);
        assert!(output.exists());
    }
}
