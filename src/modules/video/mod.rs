use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

pub mod dto;
pub mod events;
pub mod frame_extractor;
pub mod handler;
pub mod model;
pub mod progress;
pub mod service;
pub mod transformer;

#[cfg(test)]
pub(crate) mod testing;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(handler::upload_video))
        .route("/progress", get(handler::stream_progress))
        .route("/process", post(handler::process_video))
        .route("/download/{filename}", get(handler::download_video))
        .route("/result", get(handler::show_result))
}
