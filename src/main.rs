use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod modules;
mod routes;
mod state;

use config::settings::AppConfig;
use infrastructure::caption::{CaptionClient, HttpCaptionTransport, RetryPolicy};
use infrastructure::media::FfmpegBackend;
use infrastructure::story::HttpStoryGenerator;
use modules::video::service::PipelineOrchestrator;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Missing credentials stop us here, before anything is served.
    let config = AppConfig::new().context("Invalid configuration")?;

    tokio::fs::create_dir_all(&config.upload_dir).await?;
    tokio::fs::create_dir_all(&config.output_dir).await?;

    let transport = HttpCaptionTransport::new(
        config.caption_api_url.clone(),
        config.hf_api_token.clone(),
        config.caption_timeout,
    )?;
    let captioner = CaptionClient::new(
        Arc::new(transport),
        RetryPolicy {
            rate_limit_backoff: config.rate_limit_backoff,
            unavailable_backoff: config.unavailable_backoff,
        },
    );
    let storyteller = HttpStoryGenerator::new(
        config.story_api_url.clone(),
        config.hf_api_token.clone(),
        config.caption_timeout,
    )?;
    let backend = FfmpegBackend::new(config.ffmpeg_bin.clone(), config.ffprobe_bin.clone());

    let pipeline = PipelineOrchestrator::new(Arc::new(backend), captioner, Arc::new(storyteller));
    let port = config.server_port;
    let state = AppState::new(config, pipeline);

    info!("Starting server...");

    let app = app::create_app(state).await;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Server running on http://0.0.0.0:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}
