use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::settings::AppConfig;
use crate::modules::video::service::{output_path, PipelineOrchestrator, UPLOAD_FILENAME};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Arc<PipelineOrchestrator>,
    /// Held for the whole lifetime of a processing session.
    pub session: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: PipelineOrchestrator) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
            session: Arc::new(Mutex::new(())),
        }
    }

    pub fn upload_path(&self) -> PathBuf {
        self.config.upload_dir.join(UPLOAD_FILENAME)
    }

    pub fn output_path(&self) -> PathBuf {
        output_path(&self.config.output_dir, UPLOAD_FILENAME)
    }
}

#[cfg(test)]
impl AppState {
    pub fn for_tests(
        backend: crate::modules::video::testing::SyntheticBackend,
        transport: Arc<crate::infrastructure::caption::client::tests::ScriptedTransport>,
        story: Arc<crate::modules::video::service::tests::FixedStory>,
    ) -> Self {
        use std::time::Duration;

        let root = std::env::temp_dir().join(format!("vidstory-{}", uuid::Uuid::new_v4()));
        let config = AppConfig {
            server_port: 0,
            hf_api_token: "test-token".to_string(),
            caption_api_url: "http://localhost/caption".parse().unwrap(),
            story_api_url: "http://localhost/story".parse().unwrap(),
            caption_timeout: Duration::from_secs(1),
            rate_limit_backoff: Duration::ZERO,
            unavailable_backoff: Duration::ZERO,
            upload_dir: root.join("uploads"),
            output_dir: root.join("output"),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            max_upload_bytes: 1024 * 1024,
        };
        std::fs::create_dir_all(&config.upload_dir).unwrap();
        std::fs::create_dir_all(&config.output_dir).unwrap();

        let pipeline = crate::modules::video::service::tests::orchestrator(backend, transport, story);
        Self::new(config, pipeline)
    }
}
