//! Remote summarization backends and provider selection.

use std::time::Duration;

use gazette_core::summarize::{
  SummaryError, SummaryRequest, Summarizer, TruncatingSummarizer,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::{
  Result,
  settings::{SummaryProvider, SummarySettings},
};

pub fn prompt(request: &SummaryRequest) -> String {
  format!(
    "Summarise the following content in {language}.\n\
     Style: {style}. Length: {length} (at most {sentences} sentences). Tone: {tone}.\n\
     Reply with the summary only.\n\n\
     {content}",
    language = request.language,
    style = request.style,
    length = request.length.as_str(),
    sentences = request.length.sentences(),
    tone = request.tone,
    content = request.content,
  )
}

/// Summarise with `summarizer`, falling back to truncation when the backend
/// fails or answers with nothing.
pub async fn summarize_or_truncate<Z: Summarizer>(summarizer: &Z, request: &SummaryRequest) -> String {
  match summarizer.summarize(request).await {
    Ok(summary) if !summary.trim().is_empty() => summary.trim().to_owned(),
    Ok(_) => TruncatingSummarizer::truncate(request),
    Err(e) => {
      tracing::warn!(error = %e, "summarizer failed, truncating instead");
      TruncatingSummarizer::truncate(request)
    }
  }
}

// ─── Ollama ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OllamaSummarizer {
  client:   Client,
  base_url: String,
  model:    String,
}

#[derive(Deserialize)]
struct OllamaResponse {
  #[serde(default)]
  response: String,
}

impl OllamaSummarizer {
  pub fn new(client: Client, base_url: &str, model: impl Into<String>) -> Self {
    Self {
      client,
      base_url: base_url.trim_end_matches('/').to_owned(),
      model: model.into(),
    }
  }
}

impl Summarizer for OllamaSummarizer {
  async fn summarize(&self, request: &SummaryRequest) -> Result<String, SummaryError> {
    let body = json!({ "model": self.model, "prompt": prompt(request), "stream": false });
    let response: OllamaResponse = self
      .client
      .post(format!("{}/api/generate", self.base_url))
      .json(&body)
      .send()
      .await
      .and_then(reqwest::Response::error_for_status)
      .map_err(|e| SummaryError(e.to_string()))?
      .json()
      .await
      .map_err(|e| SummaryError(e.to_string()))?;
    Ok(response.response.trim().to_owned())
  }
}

// ─── OpenAI ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenAiSummarizer {
  client:   Client,
  base_url: String,
  api_key:  String,
  model:    String,
}

#[derive(Deserialize)]
struct ChatResponse {
  choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
  #[serde(default)]
  content: Option<String>,
}

impl OpenAiSummarizer {
  pub fn new(
    client: Client,
    base_url: &str,
    api_key: impl Into<String>,
    model: impl Into<String>,
  ) -> Self {
    Self {
      client,
      base_url: base_url.trim_end_matches('/').to_owned(),
      api_key: api_key.into(),
      model: model.into(),
    }
  }
}

impl Summarizer for OpenAiSummarizer {
  async fn summarize(&self, request: &SummaryRequest) -> Result<String, SummaryError> {
    let body = json!({
      "model": self.model,
      "temperature": 0.2,
      "messages": [
        { "role": "system", "content": "You write concise newsletter summaries." },
        { "role": "user", "content": prompt(request) },
      ],
    });
    let response: ChatResponse = self
      .client
      .post(format!("{}/chat/completions", self.base_url))
      .bearer_auth(&self.api_key)
      .json(&body)
      .send()
      .await
      .and_then(reqwest::Response::error_for_status)
      .map_err(|e| SummaryError(e.to_string()))?
      .json()
      .await
      .map_err(|e| SummaryError(e.to_string()))?;
    response
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .map(|s| s.trim().to_owned())
      .ok_or_else(|| SummaryError("response had no choices".to_owned()))
  }
}

// ─── Selection ───────────────────────────────────────────────────────────────

/// The summarizer chosen by `summary.provider`.
#[derive(Debug, Clone)]
pub enum ConfiguredSummarizer {
  Truncating(TruncatingSummarizer),
  Ollama(OllamaSummarizer),
  OpenAi(OpenAiSummarizer),
}

impl ConfiguredSummarizer {
  /// OpenAI without an API key falls back to truncation.
  pub fn from_settings(settings: &SummarySettings) -> Result<Self> {
    let client = || {
      Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()
    };
    let summarizer = match settings.provider {
      SummaryProvider::None => Self::Truncating(TruncatingSummarizer),
      SummaryProvider::Ollama => Self::Ollama(OllamaSummarizer::new(
        client()?,
        &settings.ollama_base_url,
        &settings.ollama_model,
      )),
      SummaryProvider::OpenAi => match settings.openai_api_key.as_deref() {
        Some(key) if !key.is_empty() => Self::OpenAi(OpenAiSummarizer::new(
          client()?,
          &settings.openai_base_url,
          key,
          &settings.openai_model,
        )),
        _ => {
          tracing::warn!("summary.provider is openai but no api key is set; truncating");
          Self::Truncating(TruncatingSummarizer)
        }
      },
    };
    Ok(summarizer)
  }
}

impl Summarizer for ConfiguredSummarizer {
  async fn summarize(&self, request: &SummaryRequest) -> Result<String, SummaryError> {
    match self {
      Self::Truncating(s) => s.summarize(request).await,
      Self::Ollama(s) => s.summarize(request).await,
      Self::OpenAi(s) => s.summarize(request).await,
    }
  }
}
