use std::env;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use super::{parse_verdict, Classifier, EvaluationRequest};
use crate::models::Verdict;

const SYSTEM_PROMPT: &str = "You are an assistant that evaluates whether the current webpage content is relevant to the user's research goal.\n\
You also decide if the page is a *general-purpose page* (search engine, chatbot, aggregator, dashboard, etc.)\n\
based on its structure, function, and relation to the goal.\n\
Return strict JSON only.";

/// Configuration for the chat-completions classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// API key, read from `OPENAI_API_KEY` by default
    pub api_key: String,

    /// Model to use
    pub model: String,

    /// Chat-completions endpoint
    pub endpoint: String,

    /// Output token cap; the reply is a short JSON object
    pub max_output_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            model: "gpt-4o-mini".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            max_output_tokens: 128,
            temperature: 0.3,
        }
    }
}

/// Classifier backed by an OpenAI-compatible chat endpoint.
pub struct OpenAiClassifier {
    config: ClassifierConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            bail!("OPENAI_API_KEY not set");
        }

        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    pub fn with_default() -> Result<Self> {
        Self::new(ClassifierConfig::default())
    }

    fn build_user_prompt(request: &EvaluationRequest) -> String {
        let mut prompt = format!(
            "GOAL:\n{}\n\nPAGE_META:\ntitle: {}\nurl: {}\n\nPAGE_TEXT_SNIPPET (~500 words):\n{}\n",
            request.goal, request.page_title, request.page_url, request.page_text
        );

        if let Some(explanation) = &request.user_explanation {
            prompt.push_str(&format!("\nUSER_EXPLANATION:\n{explanation}\n"));
        }

        prompt.push_str(
            "\nTASK:\n\
             1. Decide if this page is a general-purpose page (true/false).\n\
             2. Score how related this page is to the GOAL on a 0\u{2013}100 scale.\n\
             3. Provide a short rationale and up to 5 matched terms.\n",
        );
        if request.user_explanation.is_some() {
            prompt.push_str(
                "Weigh the USER_EXPLANATION when scoring: the user is arguing this page serves the goal.\n",
            );
        }

        prompt.push_str(
            "\nReturn strict JSON:\n\n\
             {\n\
             \x20 \"general_purpose\": true | false,\n\
             \x20 \"goal_related_score\": <integer 0-100>,\n\
             \x20 \"verdict\": \"on_topic\" | \"borderline\" | \"off_topic\",\n\
             \x20 \"rationale\": \"<max 2 sentences>\",\n\
             \x20 \"matched_terms\": [\"<up to 5 terms>\"]\n\
             }",
        );

        prompt
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Verdict> {
        debug!("Requesting relevance verdict for {}", request.page_url);

        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::build_user_prompt(request),
                },
            ],
            max_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
            response_format: ResponseFormat {
                format: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("classifier request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("classifier API error: {status} {error_text}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("failed to decode classifier response envelope")?;

        let content = parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("no content in classifier response"))?;

        parse_verdict(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_goal_and_page_meta() {
        let request = EvaluationRequest {
            goal: "Learn about transformer attention mechanisms".into(),
            page_title: "Sourdough basics".into(),
            page_url: "https://bread.test/sourdough".into(),
            page_text: "flour water salt".into(),
            user_explanation: None,
        };

        let prompt = OpenAiClassifier::build_user_prompt(&request);
        assert!(prompt.contains("GOAL:\nLearn about transformer attention mechanisms"));
        assert!(prompt.contains("title: Sourdough basics"));
        assert!(prompt.contains("url: https://bread.test/sourdough"));
        assert!(!prompt.contains("USER_EXPLANATION"));
    }

    #[test]
    fn prompt_includes_explanation_on_revalidation() {
        let request = EvaluationRequest {
            goal: "Learn about transformer attention mechanisms".into(),
            page_title: "Sourdough basics".into(),
            page_url: "https://bread.test/sourdough".into(),
            page_text: "flour water salt".into(),
            user_explanation: Some("the recipe site's ads mention ML".into()),
        };

        let prompt = OpenAiClassifier::build_user_prompt(&request);
        assert!(prompt.contains("USER_EXPLANATION:\nthe recipe site's ads mention ML"));
    }

    #[test]
    fn rejects_missing_api_key() {
        let config = ClassifierConfig {
            api_key: String::new(),
            ..ClassifierConfig::default()
        };
        assert!(OpenAiClassifier::new(config).is_err());
    }
}
