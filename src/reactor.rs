//! UI reaction capability. The controller decides *what* the user should
//! see; hosts decide how to render it.

use async_trait::async_trait;
use serde::Serialize;

use crate::models::TabId;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IndicatorKind {
    OnTopic,
    Borderline,
}

/// Reaction requested for a tab. `Indicator` and the revalidation variants
/// implicitly replace whatever was shown before.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "reaction")]
pub enum Reaction {
    /// Passive badge for on-topic or borderline pages.
    Indicator {
        kind: IndicatorKind,
        rationale: String,
    },
    /// Blocking alert offering return / explain / park / ignore.
    OffTopicAlert {
        rationale: String,
        matched_terms: Vec<String>,
    },
    /// Manual revalidation cleared the alert.
    RevalidationAccepted { score: u8, rationale: String },
    /// The alert stays up, with the refreshed rationale.
    RevalidationRejected { score: u8, rationale: String },
    /// Remove any visible reaction (navigation, session end).
    Clear,
}

#[async_trait]
pub trait Reactor: Send + Sync {
    async fn notify(&self, tab_id: TabId, reaction: Reaction);
}
