use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Effort;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const CLAUDE_MODEL: &str = "claude-3-5-haiku-20241022";

/// Longest article text sent to the model, in bytes.
const MAX_CONTENT_BYTES: usize = 40_000;

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: Option<String>,
}

/// System prompt for an effort level.
pub fn system_prompt(effort: Effort) -> String {
    let length = match effort {
        Effort::Minimal => "Reply with a single sentence stating the article's main point.",
        Effort::Low => "Reply with a short TLDR: three to five bullet points covering the key facts.",
        Effort::Medium => {
            "Reply with a TLDR of two or three short paragraphs covering the key facts, \
             the main argument and any conclusions."
        }
        Effort::High => {
            "Reply with a thorough summary: a one-line TLDR, then sections for key facts, \
             arguments, evidence and open questions."
        }
    };
    format!(
        "You summarize articles from tech newsletters for a busy reader.\n\
         Use clear, plain language and Markdown formatting.\n\
         Do not add facts that are not in the article.\n{}",
        length
    )
}

#[async_trait]
pub trait Summarize: Send + Sync {
    async fn summarize(&self, url: &str, content: &str, effort: Effort) -> Result<String>;
}

pub struct Summarizer {
    client: Client,
    api_key: String,
}

impl Summarizer {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self { client, api_key })
    }
}

/// Cut `text` to at most `max` bytes without splitting a character.
fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[async_trait]
impl Summarize for Summarizer {
    async fn summarize(&self, url: &str, content: &str, effort: Effort) -> Result<String> {
        let user_message = format!(
            "Summarize the following article.\n\nURL: {}\n\nContent:\n{}",
            url,
            truncate(content, MAX_CONTENT_BYTES)
        );

        let request = MessageRequest {
            model: CLAUDE_MODEL.to_string(),
            max_tokens: effort.max_tokens(),
            messages: vec![Message {
                role: "user".to_string(),
                content: user_message,
            }],
            system: Some(system_prompt(effort)),
        };

        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AppError::Summarizer(format!("API error: {}", error_text)));
        }

        let message_response: MessageResponse = response.json().await?;

        let summary = message_response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if summary.trim().is_empty() {
            return Err(AppError::Summarizer("empty response".to_string()));
        }
        Ok(summary)
    }
}
