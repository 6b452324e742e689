//! Admission gates run before any classifier dispatch: ignore window,
//! per-tab cooldown, session quota. Gates are AND-combined and the first
//! failing gate short-circuits with its reason.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::config::GuardConfig;
use crate::models::TabId;
use crate::store::StateStore;

/// Why an evaluation attempt was turned away. Denials are logged, never
/// surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// The tab is inside its ignore window.
    Ignored,
    /// Same URL evaluated too recently.
    Cooldown,
    /// The session already spent its evaluation allowance.
    QuotaExhausted,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Denial::Ignored => "tab ignored",
            Denial::Cooldown => "cooldown not elapsed",
            Denial::QuotaExhausted => "session quota exhausted",
        }
    }
}

#[derive(Clone)]
pub struct RateGuard {
    store: StateStore,
    config: Arc<GuardConfig>,
}

impl RateGuard {
    pub fn new(store: StateStore, config: Arc<GuardConfig>) -> Self {
        Self { store, config }
    }

    /// Run every gate for `tab_id`/`url` at logical time `now`. `None`
    /// means the evaluation may proceed.
    pub async fn check(&self, tab_id: TabId, url: &str, now: DateTime<Utc>) -> Result<Option<Denial>> {
        if self.is_ignored(tab_id, now).await? {
            return Ok(Some(Denial::Ignored));
        }

        if !self.cooldown_elapsed(tab_id, url, now).await? {
            return Ok(Some(Denial::Cooldown));
        }

        if self.store.eval_count().await? >= self.config.max_evals_per_session {
            return Ok(Some(Denial::QuotaExhausted));
        }

        Ok(None)
    }

    /// True while `now` is inside the tab's ignore window. Ignoring a tab
    /// overrides every other gate.
    pub async fn is_ignored(&self, tab_id: TabId, now: DateTime<Utc>) -> Result<bool> {
        let Some(ignored_at) = self.store.ignored_at(tab_id).await? else {
            return Ok(false);
        };
        let window = Duration::milliseconds(self.config.ignore_duration_ms as i64);
        Ok(now - ignored_at < window)
    }

    /// A tab that has never been evaluated, or whose URL changed since its
    /// last evaluation, is always admitted; otherwise the cooldown must
    /// have fully elapsed.
    async fn cooldown_elapsed(&self, tab_id: TabId, url: &str, now: DateTime<Utc>) -> Result<bool> {
        let Some(previous) = self.store.tab_evaluation(tab_id).await? else {
            return Ok(true);
        };

        if previous.url != url {
            return Ok(true);
        }

        let cooldown = Duration::milliseconds(self.config.tab_cooldown_ms as i64);
        Ok(now - previous.timestamp >= cooldown)
    }
}
