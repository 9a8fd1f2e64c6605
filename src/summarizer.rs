//! Summarization against a local Ollama server.

use crate::traits::Summarizer;
use crate::types::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are an expert investment analyst. Summarize the \
following news article for an investor audience. Respond with ONLY a JSON object \
with these fields: \"summary\" (2-3 sentence summary), \"investment_implications\" \
(what this means for investors), \"key_metrics\" (list of figures or data points \
mentioned), \"companies_mentioned\" (list of company names), \"sectors_affected\" \
(list of sectors), \"sentiment\" (one of: positive, negative, neutral), \
\"risk_factors\" (list of risks), \"opportunities\" (list of opportunities), \
\"time_horizon\" (one of: short-term, medium-term, long-term), \
\"confidence_score\" (0.0 to 1.0). No text outside the JSON object.";

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
    top_p: f64,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaSummarizer {
    client: reqwest::Client,
    base_url: String,
    /// Article text is cut near this length before prompting.
    max_article_chars: usize,
}

impl OllamaSummarizer {
    pub fn new(base_url: impl Into<String>, max_article_chars: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_article_chars,
        }
    }
}

/// Cut `text` to at most `max_chars`, preferring the last sentence boundary
/// in the back half of the window so the model never sees a half sentence.
fn truncate_at_sentence(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }

    // Clamp to a char boundary first.
    let mut cut = max_chars;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let window = &text[..cut];

    if let Some(pos) = window.rfind(['.', '!', '?']) {
        if pos >= max_chars / 2 {
            return &text[..=pos];
        }
    }
    window
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, text: &str, model: &str) -> Result<String> {
        let article = truncate_at_sentence(text, self.max_article_chars);
        let prompt = format!("{SYSTEM_PROMPT}\n\nArticle:\n{article}");

        debug!(
            "summarizing {} char(s) with model {model}",
            article.len()
        );

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&json!({
                "model": model,
                "prompt": prompt,
                "stream": false,
                "options": GenerateOptions {
                    temperature: 0.3,
                    top_p: 0.9,
                    num_predict: 1000,
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::General(format!(
                "model server returned {} for model {model}",
                response.status()
            )));
        }

        let body: GenerateResponse = response.json().await?;
        Ok(body.response)
    }
}
