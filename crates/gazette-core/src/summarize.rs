//! The [`Summarizer`] seam and the truncating fallback.

use std::future::Future;

use crate::catalog::{SummaryLength, SummaryRules};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRequest {
  pub style:    String,
  pub length:   SummaryLength,
  pub tone:     String,
  pub language: String,
  pub content:  String,
}

impl SummaryRequest {
  pub fn new(rules: &SummaryRules, content: impl Into<String>) -> Self {
    Self {
      style:    rules.style.clone(),
      length:   rules.length,
      tone:     rules.tone.clone(),
      language: rules.language.clone(),
      content:  content.into(),
    }
  }
}

#[derive(Debug, thiserror::Error)]
#[error("summarizer failed: {0}")]
pub struct SummaryError(pub String);

pub trait Summarizer: Send + Sync {
  fn summarize<'a>(
    &'a self,
    request: &'a SummaryRequest,
  ) -> impl Future<Output = Result<String, SummaryError>> + Send + 'a;
}

/// Keeps the first few sentences of the content; the sentence budget comes
/// from [`SummaryLength::sentences`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TruncatingSummarizer;

impl TruncatingSummarizer {
  pub fn truncate(request: &SummaryRequest) -> String {
    let picked: Vec<&str> = request
      .content
      .split('.')
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .take(request.length.sentences())
      .collect();
    if picked.is_empty() {
      return String::new();
    }
    format!("{}.", picked.join(". "))
  }
}

impl Summarizer for TruncatingSummarizer {
  async fn summarize(&self, request: &SummaryRequest) -> Result<String, SummaryError> {
    Ok(Self::truncate(request))
  }
}
