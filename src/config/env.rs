use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    HfApiToken,
    CaptionApiUrl,
    StoryApiUrl,
    CaptionTimeoutSecs,
    RateLimitBackoffSecs,
    UnavailableBackoffSecs,
    UploadDir,
    OutputDir,
    FfmpegBin,
    FfprobeBin,
    MaxUploadMb,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::HfApiToken => "HF_API_TOKEN",
            EnvKey::CaptionApiUrl => "CAPTION_API_URL",
            EnvKey::StoryApiUrl => "STORY_API_URL",
            EnvKey::CaptionTimeoutSecs => "CAPTION_TIMEOUT_SECS",
            EnvKey::RateLimitBackoffSecs => "RATE_LIMIT_BACKOFF_SECS",
            EnvKey::UnavailableBackoffSecs => "UNAVAILABLE_BACKOFF_SECS",
            EnvKey::UploadDir => "UPLOAD_DIR",
            EnvKey::OutputDir => "OUTPUT_DIR",
            EnvKey::FfmpegBin => "FFMPEG_BIN",
            EnvKey::FfprobeBin => "FFPROBE_BIN",
            EnvKey::MaxUploadMb => "MAX_UPLOAD_MB",
        }
    }
}

/// Somewhere configuration values can be looked up by name.
pub trait Vars {
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment.
pub struct ProcessEnv;

impl Vars for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        env::var(name).ok()
    }
}

pub fn get(vars: &dyn Vars, key: EnvKey) -> Option<String> {
    vars.var(key.as_str())
}

pub fn get_or(vars: &dyn Vars, key: EnvKey, default: &str) -> String {
    get(vars, key).unwrap_or_else(|| default.to_string())
}

pub fn get_parsed<T: FromStr>(vars: &dyn Vars, key: EnvKey, default: T) -> T {
    match get(vars, key) {
        Some(val) => val.parse::<T>().unwrap_or(default),
        None => default,
    }
}
