//! Relevance classifier capability. The controller only sees the trait;
//! the bundled implementation calls an OpenAI-compatible chat endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::models::Verdict;

mod openai;

pub use openai::{ClassifierConfig, OpenAiClassifier};

/// Everything the classifier needs to judge one page against the goal.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub goal: String,
    pub page_title: String,
    pub page_url: String,
    /// Sampled snippet, already bounded by the configured word cap.
    pub page_text: String,
    /// Present only on manual revalidation.
    pub user_explanation: Option<String>,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Judge the page. Any transport, parse, or schema problem is an error;
    /// a returned verdict has already passed validation.
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Verdict>;
}

/// Decode and validate a raw classifier reply. Malformed JSON and schema
/// violations are classifier failures, not panics.
pub fn parse_verdict(raw: &str) -> Result<Verdict> {
    let verdict: Verdict =
        serde_json::from_str(raw).context("classifier returned malformed JSON")?;
    verdict.validate()
}
