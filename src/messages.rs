//! Wire types for the host messaging boundary. Tags and field casing match
//! the extension protocol the controller was built against, so existing
//! page-side scripts interoperate unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "SESSION_STARTED")]
    SessionStarted { goal: String },

    #[serde(rename = "SESSION_ENDED")]
    SessionEnded,

    /// Arm a one-shot retry-marked evaluation after `delay` milliseconds.
    #[serde(rename = "RETRY_EVALUATION")]
    RetryEvaluation { delay: u64 },

    #[serde(rename = "EVALUATE_PAGE", rename_all = "camelCase")]
    EvaluatePage {
        page_title: String,
        page_url: String,
        page_text: String,
        is_retry: bool,
    },

    #[serde(rename = "REVALIDATE_PAGE", rename_all = "camelCase")]
    RevalidatePage {
        page_title: String,
        page_url: String,
        page_text: String,
        user_explanation: String,
    },

    #[serde(rename = "PARK_PAGE")]
    ParkPage { url: String, title: String },

    #[serde(rename = "IGNORE_TAB")]
    IgnoreTab,
}

/// Envelope every request resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
