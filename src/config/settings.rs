use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::env::{self, EnvKey, ProcessEnv, Vars};

const DEFAULT_CAPTION_API_URL: &str =
    "https://api-inference.huggingface.co/models/Salesforce/blip-image-captioning-large";
const DEFAULT_STORY_API_URL: &str = "https://api-inference.huggingface.co/models/gpt2";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{0} is set but empty")]
    Empty(&'static str),
    #[error("{key} is not a valid URL: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub hf_api_token: String,
    pub caption_api_url: Url,
    pub story_api_url: Url,
    pub caption_timeout: Duration,
    pub rate_limit_backoff: Duration,
    pub unavailable_backoff: Duration,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    /// Reads the whole configuration from the environment.
    ///
    /// The API token is mandatory: the server refuses to start without it.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_vars(&ProcessEnv)
    }

    pub fn from_vars(vars: &dyn Vars) -> Result<Self, ConfigError> {
        let token_key = EnvKey::HfApiToken.as_str();
        let hf_api_token = env::get(vars, EnvKey::HfApiToken).ok_or(ConfigError::Missing(token_key))?;
        if hf_api_token.trim().is_empty() {
            return Err(ConfigError::Empty(token_key));
        }

        Ok(Self {
            server_port: env::get_parsed(vars, EnvKey::ServerPort, 3000),
            hf_api_token,
            caption_api_url: parse_url(vars, EnvKey::CaptionApiUrl, DEFAULT_CAPTION_API_URL)?,
            story_api_url: parse_url(vars, EnvKey::StoryApiUrl, DEFAULT_STORY_API_URL)?,
            caption_timeout: Duration::from_secs(env::get_parsed(vars, EnvKey::CaptionTimeoutSecs, 30)),
            rate_limit_backoff: Duration::from_secs(env::get_parsed(vars, EnvKey::RateLimitBackoffSecs, 10)),
            unavailable_backoff: Duration::from_secs(env::get_parsed(vars, EnvKey::UnavailableBackoffSecs, 5)),
            upload_dir: PathBuf::from(env::get_or(vars, EnvKey::UploadDir, "static/uploads")),
            output_dir: PathBuf::from(env::get_or(vars, EnvKey::OutputDir, "output")),
            ffmpeg_bin: env::get_or(vars, EnvKey::FfmpegBin, "ffmpeg"),
            ffprobe_bin: env::get_or(vars, EnvKey::FfprobeBin, "ffprobe"),
            max_upload_bytes: env::get_parsed::<usize>(vars, EnvKey::MaxUploadMb, 512)
                .saturating_mul(1024 * 1024),
        })
    }
}

fn parse_url(vars: &dyn Vars, key: EnvKey, default: &str) -> Result<Url, ConfigError> {
    let name = key.as_str();
    let raw = env::get_or(vars, key, default);
    Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { key: name, source })
}
