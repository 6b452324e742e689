use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::verdict::Verdict;
use super::TabId;

/// The active session as persisted: goal, generated id, and the running
/// evaluation counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub goal: String,
    pub eval_count: u32,
    pub started_at: DateTime<Utc>,
}

/// Latest classifier outcome recorded for a tab. Overwritten on every
/// evaluation; the URL is the one the verdict was produced for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabEvaluation {
    pub tab_id: TabId,
    pub verdict: Verdict,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

/// A page the user deferred for later review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkedPage {
    pub url: String,
    pub title: String,
    pub goal: String,
    pub timestamp: DateTime<Utc>,
}
