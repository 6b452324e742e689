mod controller;
mod state;

pub use controller::GuardController;
pub use state::{TabPhase, TabState};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{PageDocument, TabId};

/// Read access to the live page of a tab, consulted at evaluation time so
/// snippets always reflect the content as it is now, not as it was when
/// the timer was armed.
#[async_trait]
pub trait PageAccess: Send + Sync {
    async fn snapshot(&self, tab_id: TabId) -> Result<PageDocument>;
}
