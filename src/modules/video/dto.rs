use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub filename: String,
    pub size_bytes: u64,
    pub progress_url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProcessResponse {
    pub caption: String,
    pub story: String,
    pub frames_processed: u64,
    pub download_url: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ResultQuery {
    pub caption: Option<String>,
    pub story: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResultResponse {
    pub caption: String,
    pub story: String,
    pub download_url: String,
}

pub fn download_url(filename: &str) -> String {
    format!("/api/v1/download/{filename}")
}
