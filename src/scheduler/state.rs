use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Per-tab evaluation lifecycle.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TabPhase {
    Idle,
    Armed,
    InFlight,
    Settled,
    RetryPending,
}

/// Everything the controller tracks for one tab. Timers for the current
/// page view hang off `timers`; replacing the token on navigation cancels
/// them all at once.
#[derive(Debug)]
pub struct TabState {
    pub phase: TabPhase,
    pub url: String,
    /// Bumped on every navigation; in-flight completions carrying an older
    /// epoch are discarded.
    pub epoch: u64,
    pub fingerprint: Option<i32>,
    /// `None` until a verdict lands for the current page view.
    pub general_purpose: Option<bool>,
    pub periodic_armed: bool,
    pub timers: CancellationToken,
}

impl TabState {
    pub fn new(url: String) -> Self {
        Self {
            phase: TabPhase::Idle,
            url,
            epoch: 0,
            fingerprint: None,
            general_purpose: None,
            periodic_armed: false,
            timers: CancellationToken::new(),
        }
    }

    /// Cancel all pending timers and reset per-page-view state for a new
    /// URL. Returns the fresh token new timers should hang off.
    pub fn reset_for_navigation(&mut self, url: String) -> CancellationToken {
        self.timers.cancel();
        self.timers = CancellationToken::new();
        self.epoch += 1;
        self.url = url;
        self.phase = TabPhase::Idle;
        self.fingerprint = None;
        self.general_purpose = None;
        self.periodic_armed = false;
        self.timers.clone()
    }

    /// Claim the exclusive in-flight slot. Returns the dispatch epoch, or
    /// `None` when an evaluation is already running for this tab.
    pub fn begin_flight(&mut self) -> Option<u64> {
        if self.phase == TabPhase::InFlight {
            return None;
        }
        self.phase = TabPhase::InFlight;
        Some(self.epoch)
    }

    pub fn settle(&mut self, general_purpose: bool) {
        self.phase = TabPhase::Settled;
        self.general_purpose = Some(general_purpose);
    }
}
