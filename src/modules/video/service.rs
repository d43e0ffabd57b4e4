use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_channel::Sender;
use thiserror::Error;
use tracing::{Span, debug, info, warn};

use super::events::ProgressEvent;
use super::frame_extractor::{ExtractError, FrameExtractor};
use super::model::{CaptionResult, CaptionStatus, VideoAsset};
use super::progress::{Disconnected, ProgressStream, StreamError, TransformSummary};
use super::transformer::SubtractorParams;
use crate::infrastructure::caption::CaptionClient;
use crate::infrastructure::caption::client::MYSTERY_FALLBACK;
use crate::infrastructure::media::{MediaError, VideoBackend};
use crate::infrastructure::story::{StoryError, StoryGenerator};

/// Fixed name the upload is stored under.
pub const UPLOAD_FILENAME: &str = "uploaded_video.mp4";

pub fn output_filename(input: &str) -> String {
    format!("bgsub_{input}")
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not read the uploaded video: {0}")]
    Probe(#[source] MediaError),
    #[error("video processing failed: {0}")]
    Transform(#[from] StreamError),
    #[error("story generation failed: {0}")]
    Story(#[from] StoryError),
    #[error("background task failed: {0}")]
    Task(String),
}

impl PipelineError {
    fn consumer_gone(&self) -> bool {
        matches!(self, PipelineError::Transform(StreamError::Disconnected))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub caption: CaptionResult,
    pub story: String,
    pub summary: TransformSummary,
}

/// Transform → caption → story, with progress pushed to a channel.
///
/// Built once at startup and shared through `AppState`.
pub struct PipelineOrchestrator {
    backend: Arc<dyn VideoBackend>,
    extractor: FrameExtractor,
    captioner: CaptionClient,
    storyteller: Arc<dyn StoryGenerator>,
    params: SubtractorParams,
}

impl PipelineOrchestrator {
    pub fn new(
        backend: Arc<dyn VideoBackend>,
        captioner: CaptionClient,
        storyteller: Arc<dyn StoryGenerator>,
    ) -> Self {
        Self {
            extractor: FrameExtractor::new(backend.clone()),
            backend,
            captioner,
            storyteller,
            params: SubtractorParams::default(),
        }
    }

    /// Runs the whole session and finishes the channel with exactly one
    /// terminal event, unless the consumer already went away.
    pub async fn run(
        &self,
        input: PathBuf,
        output: PathBuf,
        events: Sender<ProgressEvent>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let outcome = self.execute(input, output, &events).await;

        let terminal = match &outcome {
            Ok(done) => ProgressEvent::Done {
                caption: done.caption.text.clone(),
                story: done.story.clone(),
            },
            Err(e) if e.consumer_gone() => {
                warn!("Client disconnected, session aborted");
                return outcome;
            }
            Err(e) => {
                warn!("Pipeline failed: {}", e);
                ProgressEvent::Error(e.to_string())
            }
        };

        if events.send(terminal).await.is_err() {
            warn!("Client left before the final event");
        }
        outcome
    }

    /// Same pipeline without a live consumer; progress is only logged.
    pub async fn run_to_completion(
        &self,
        input: PathBuf,
        output: PathBuf,
    ) -> Result<PipelineOutcome, PipelineError> {
        let (tx, rx) = async_channel::bounded(1);
        let drain = async move {
            let mut seen = 0usize;
            while let Ok(event) = rx.recv().await {
                debug!("Session event: {:?}", event);
                seen += 1;
            }
            seen
        };
        let (outcome, seen) = tokio::join!(self.run(input, output, tx), drain);
        info!("Session finished after {} events", seen);
        outcome
    }

    async fn execute(
        &self,
        input: PathBuf,
        output: PathBuf,
        events: &Sender<ProgressEvent>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let asset = self.probe(input).await?;

        let backend = self.backend.clone();
        let params = self.params;
        let tx = events.clone();
        let span = Span::current();
        let transform_asset = asset.clone();
        let summary = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            ProgressStream::new(backend.as_ref(), params).run(&transform_asset, &output, |event| {
                tx.send_blocking(event).map_err(|_| Disconnected)
            })
        })
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))??;

        // Caption the original upload; foreground masks describe nothing.
        let caption = self.caption_original(&asset).await?;
        info!("Caption: {}", caption.text);

        let story = self.storyteller.generate(&caption.text).await?;

        Ok(PipelineOutcome {
            caption,
            story,
            summary,
        })
    }

    async fn probe(&self, input: PathBuf) -> Result<VideoAsset, PipelineError> {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || backend.probe(&input))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?
            .map_err(PipelineError::Probe)
    }

    async fn caption_original(&self, asset: &VideoAsset) -> Result<CaptionResult, PipelineError> {
        let extractor = self.extractor.clone();
        let original = asset.clone();
        let jpeg = tokio::task::spawn_blocking(move || extractor.first_frame_jpeg(&original))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?;

        match jpeg {
            Ok(bytes) => Ok(self.captioner.caption(&bytes).await),
            Err(ExtractError::NoFrame) => {
                warn!("No frame to caption in {}", asset.path.display());
                Ok(CaptionResult::new(MYSTERY_FALLBACK, CaptionStatus::Error))
            }
            Err(e) => {
                warn!("Frame extraction failed: {}", e);
                Ok(CaptionResult::new(MYSTERY_FALLBACK, CaptionStatus::Exception))
            }
        }
    }
}

pub fn output_path(output_dir: &Path, input_name: &str) -> PathBuf {
    output_dir.join(output_filename(input_name))
}
