//! Research-session focus guard.
//!
//! Tracks a user-declared research goal and schedules language-model
//! relevance checks for the pages a user visits: per-tab timers decide when
//! to ask, a rate/quota guard decides whether asking is allowed, a sampler
//! turns live markup into a bounded snippet, and verdicts map to UI
//! reactions the host renders. Hosts plug in three capabilities
//! ([`classifier::Classifier`], [`Reactor`], [`PageAccess`]) and drive the
//! controller through navigation/mutation events or the wire protocol in
//! [`messages`].

pub mod classifier;
pub mod config;
pub mod guard;
pub mod messages;
pub mod models;
pub mod reactor;
pub mod sampler;
pub mod scheduler;
pub mod store;
pub mod utils;

pub use config::GuardConfig;
pub use guard::{Denial, RateGuard};
pub use messages::{Request, Response};
pub use models::{
    PageDocument, ParkedPage, SessionSnapshot, TabEvaluation, TabId, Verdict, VerdictKind,
};
pub use reactor::{IndicatorKind, Reaction, Reactor};
pub use scheduler::{GuardController, PageAccess, TabPhase};
pub use store::StateStore;
pub use utils::init_logging;
