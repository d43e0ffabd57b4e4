use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

#[derive(Debug, Error)]
pub enum StoryError {
    #[error("story request failed: {0}")]
    Request(String),
    #[error("story API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("story API returned an unreadable payload: {0}")]
    Payload(String),
    #[error("story API returned no text")]
    Empty,
}

/// Turns a caption into a short piece of prose.
pub trait StoryGenerator: Send + Sync {
    fn generate<'a>(&'a self, caption: &'a str) -> BoxFuture<'a, Result<String, StoryError>>;
}

pub fn story_prompt(caption: &str) -> String {
    format!("Write a short, sad story inspired by this description: {caption}")
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    inputs: &'a str,
    parameters: GenerationParameters,
}

#[derive(Serialize)]
struct GenerationParameters {
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Deserialize)]
struct GeneratedText {
    generated_text: String,
}

/// Text-generation model behind a hosted inference endpoint.
pub struct HttpStoryGenerator {
    client: reqwest::Client,
    url: Url,
    token: String,
    max_new_tokens: u32,
}

impl HttpStoryGenerator {
    pub fn new(url: Url, token: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            token,
            max_new_tokens: 200,
        })
    }
}

fn parse_story(body: &str) -> Result<String, StoryError> {
    let items: Vec<GeneratedText> =
        serde_json::from_str(body).map_err(|e| StoryError::Payload(e.to_string()))?;
    items
        .into_iter()
        .map(|item| item.generated_text.trim().to_string())
        .find(|text| !text.is_empty())
        .ok_or(StoryError::Empty)
}

impl StoryGenerator for HttpStoryGenerator {
    fn generate<'a>(&'a self, caption: &'a str) -> BoxFuture<'a, Result<String, StoryError>> {
        Box::pin(async move {
            let prompt = story_prompt(caption);
            let request = GenerationRequest {
                inputs: &prompt,
                parameters: GenerationParameters {
                    max_new_tokens: self.max_new_tokens,
                    return_full_text: false,
                },
            };

            let resp = self
                .client
                .post(self.url.clone())
                .bearer_auth(&self.token)
                .json(&request)
                .send()
                .await
                .map_err(|e| StoryError::Request(e.to_string()))?;

            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .map_err(|e| StoryError::Request(e.to_string()))?;
            if status != 200 {
                return Err(StoryError::Status { status, body });
            }

            let story = parse_story(&body)?;
            info!("Story generated ({} chars)", story.len());
            Ok(story)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_caption() {
        assert_eq!(
            story_prompt("a lone swing"),
            "Write a short, sad story inspired by this description: a lone swing"
        );
    }

    #[test]
    fn test_parse_story_skips_blank_entries() {
        let story = parse_story(r#"[{"generated_text":"  "},{"generated_text":"Once, a swing."}]"#);
        assert_eq!(story.unwrap(), "Once, a swing.");
    }

    #[test]
    fn test_parse_story_errors() {
        assert!(matches!(parse_story("[]"), Err(StoryError::Empty)));
        assert!(matches!(parse_story(r#"{"error":"loading"}"#), Err(StoryError::Payload(_))));
    }
}
