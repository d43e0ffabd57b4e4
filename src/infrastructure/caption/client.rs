use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::modules::video::model::{CaptionResult, CaptionStatus};

pub const COMPLEX_SCENE_FALLBACK: &str = "A scene too complex for words.";
pub const RATE_LIMIT_FALLBACK: &str = "A scene too busy for words. API rate limit exceeded.";
pub const UNAVAILABLE_FALLBACK: &str = "API unavailable. Please try again later.";
pub const MYSTERY_FALLBACK: &str = "A mysterious scene with no visible details.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("caption request timed out")]
    Timeout,
    #[error("caption request failed: {0}")]
    Request(String),
}

/// One HTTP round trip to the captioning model.
pub trait CaptionTransport: Send + Sync {
    fn post_image<'a>(
        &'a self,
        image: &'a [u8],
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>>;
}

pub struct HttpCaptionTransport {
    client: reqwest::Client,
    url: Url,
    token: String,
}

impl HttpCaptionTransport {
    pub fn new(url: Url, token: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url, token })
    }
}

impl CaptionTransport for HttpCaptionTransport {
    fn post_image<'a>(
        &'a self,
        image: &'a [u8],
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            let to_transport = |e: reqwest::Error| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Request(e.to_string())
                }
            };

            let resp = self
                .client
                .post(self.url.clone())
                .bearer_auth(&self.token)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(image.to_vec())
                .send()
                .await
                .map_err(to_transport)?;

            let status = resp.status().as_u16();
            let body = resp.text().await.map_err(to_transport)?;
            Ok(TransportResponse { status, body })
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub rate_limit_backoff: Duration,
    pub unavailable_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_backoff: Duration::from_secs(10),
            unavailable_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryReason {
    RateLimited,
    Unavailable,
}

impl RetryReason {
    fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(RetryReason::RateLimited),
            503 => Some(RetryReason::Unavailable),
            _ => None,
        }
    }

    fn backoff(self, policy: &RetryPolicy) -> Duration {
        match self {
            RetryReason::RateLimited => policy.rate_limit_backoff,
            RetryReason::Unavailable => policy.unavailable_backoff,
        }
    }

    fn fallback(self) -> CaptionResult {
        match self {
            RetryReason::RateLimited => {
                CaptionResult::new(RATE_LIMIT_FALLBACK, CaptionStatus::RateLimited)
            }
            RetryReason::Unavailable => {
                CaptionResult::new(UNAVAILABLE_FALLBACK, CaptionStatus::Unavailable)
            }
        }
    }
}

#[derive(Deserialize)]
struct GeneratedText {
    generated_text: String,
}

fn parse_caption(body: &str) -> CaptionResult {
    match serde_json::from_str::<Vec<GeneratedText>>(body) {
        Ok(items) => match items.into_iter().next() {
            Some(item) if !item.generated_text.trim().is_empty() => {
                CaptionResult::new(item.generated_text.trim(), CaptionStatus::Success)
            }
            _ => CaptionResult::new(COMPLEX_SCENE_FALLBACK, CaptionStatus::SuccessWithFallback),
        },
        Err(e) => {
            warn!("Unexpected caption payload: {}", e);
            CaptionResult::new(COMPLEX_SCENE_FALLBACK, CaptionStatus::SuccessWithFallback)
        }
    }
}

/// Captions a single encoded image. Never fails: every error path degrades to
/// a descriptive string so the pipeline can keep going.
///
/// 429 and 503 are retried once after a fixed pause; any other status is
/// reported in the caption text.
#[derive(Clone)]
pub struct CaptionClient {
    transport: Arc<dyn CaptionTransport>,
    policy: RetryPolicy,
}

impl CaptionClient {
    pub fn new(transport: Arc<dyn CaptionTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn caption(&self, image: &[u8]) -> CaptionResult {
        if image.is_empty() {
            warn!("Refusing to caption an empty image");
            return CaptionResult::new(
                "Error: no image data to caption",
                CaptionStatus::Error,
            );
        }

        let mut retried: Option<RetryReason> = None;
        loop {
            let response = match self.transport.post_image(image).await {
                Ok(r) => r,
                Err(e) => {
                    error!("Caption request failed: {}", e);
                    return CaptionResult::new(MYSTERY_FALLBACK, CaptionStatus::Exception);
                }
            };

            if response.status == 200 {
                let result = parse_caption(&response.body);
                info!("Caption received ({:?})", result.status);
                return result;
            }

            if let Some(reason) = retried {
                warn!(
                    "Caption retry after {:?} got status {}, giving up",
                    reason, response.status
                );
                return reason.fallback();
            }

            match RetryReason::from_status(response.status) {
                Some(reason) => {
                    let wait = reason.backoff(&self.policy);
                    warn!("Caption API returned {}, retrying in {:?}", response.status, wait);
                    tokio::time::sleep(wait).await;
                    retried = Some(reason);
                }
                None => {
                    error!("Caption API returned {}", response.status);
                    return CaptionResult::new(
                        format!("Error: API returned status code {}", response.status),
                        CaptionStatus::Error,
                    );
                }
            }
        }
    }
}
