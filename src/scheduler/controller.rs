use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::classifier::{Classifier, EvaluationRequest};
use crate::config::GuardConfig;
use crate::guard::{Denial, RateGuard};
use crate::messages::{Request, Response};
use crate::models::{ParkedPage, SessionSnapshot, TabEvaluation, TabId, Verdict, VerdictKind};
use crate::reactor::{IndicatorKind, Reaction, Reactor};
use crate::sampler;
use crate::store::StateStore;

use super::state::{TabPhase, TabState};
use super::PageAccess;

// Set to false to silence controller logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// How one evaluation attempt ended. Scheduled attempts log and move on;
/// message-driven attempts surface the outcome in the response envelope.
enum EvalOutcome {
    Settled(Verdict),
    Denied(Denial),
    AlreadyInFlight,
    Stale,
    Failed(String),
}

/// Evaluation-lifecycle controller: owns the per-tab state machines and
/// every timer, funnels attempts through the rate guard, dispatches the
/// classifier, and maps verdicts to reactions.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct GuardController {
    config: Arc<GuardConfig>,
    store: StateStore,
    guard: RateGuard,
    classifier: Arc<dyn Classifier>,
    reactor: Arc<dyn Reactor>,
    pages: Arc<dyn PageAccess>,
    tabs: Arc<Mutex<HashMap<TabId, TabState>>>,
    sweep: Arc<Mutex<Option<CancellationToken>>>,
}

impl GuardController {
    pub fn new(
        config: GuardConfig,
        store: StateStore,
        classifier: Arc<dyn Classifier>,
        reactor: Arc<dyn Reactor>,
        pages: Arc<dyn PageAccess>,
    ) -> Self {
        let config = Arc::new(config);
        let guard = RateGuard::new(store.clone(), config.clone());

        Self {
            config,
            store,
            guard,
            classifier,
            reactor,
            pages,
            tabs: Arc::new(Mutex::new(HashMap::new())),
            sweep: Arc::new(Mutex::new(None)),
        }
    }

    // --- session lifecycle ---

    /// Install the session goal. Re-sending the current goal is a no-op so
    /// broadcast fan-out does not reset the counter; a different goal
    /// starts the session over.
    pub async fn start_session(&self, goal: &str) -> Result<()> {
        let goal = goal.trim();
        if goal.chars().count() < self.config.min_goal_len {
            bail!(
                "Please provide a more detailed goal (at least {} characters)",
                self.config.min_goal_len
            );
        }

        if self.store.goal().await?.as_deref() != Some(goal) {
            let session_id = Uuid::new_v4();
            self.store
                .start_session(session_id, goal.to_string(), Utc::now())
                .await?;
            log_info!("session {session_id} started");
        }

        self.spawn_ignore_sweep().await;
        Ok(())
    }

    /// Clear the goal and tear down every timer and visible reaction.
    pub async fn end_session(&self) -> Result<()> {
        if let Some(token) = self.sweep.lock().await.take() {
            token.cancel();
        }

        let tab_ids: Vec<TabId> = {
            let mut tabs = self.tabs.lock().await;
            for tab in tabs.values() {
                tab.timers.cancel();
            }
            let ids = tabs.keys().copied().collect();
            tabs.clear();
            ids
        };

        for tab_id in tab_ids {
            self.reactor.notify(tab_id, Reaction::Clear).await;
        }

        self.store.clear_session().await?;
        log_info!("session ended");
        Ok(())
    }

    pub async fn session(&self) -> Result<Option<SessionSnapshot>> {
        self.store.session().await
    }

    pub async fn session_count(&self) -> Result<u32> {
        self.store.eval_count().await
    }

    pub async fn parked_pages(&self) -> Result<Vec<ParkedPage>> {
        self.store.parked_pages().await
    }

    pub async fn clear_parked_pages(&self) -> Result<()> {
        self.store.clear_parked_pages().await
    }

    pub async fn unignore_tab(&self, tab_id: TabId) -> Result<()> {
        self.store.unignore_tab(tab_id).await
    }

    /// Current lifecycle phase for a tab, if tracked.
    pub async fn tab_phase(&self, tab_id: TabId) -> Option<TabPhase> {
        self.tabs.lock().await.get(&tab_id).map(|tab| tab.phase)
    }

    // --- navigation and mutation events ---

    /// A tab loaded or navigated to `url` (full loads and SPA URL changes
    /// alike): cancel its timers, discard cached verdict and fingerprint,
    /// clear any visible reaction, and arm the initial delay.
    pub async fn page_navigated(&self, tab_id: TabId, url: &str) -> Result<()> {
        if self.store.goal().await?.is_none() {
            return Ok(());
        }

        let token = {
            let mut tabs = self.tabs.lock().await;
            let tab = tabs
                .entry(tab_id)
                .or_insert_with(|| TabState::new(url.to_string()));
            let token = tab.reset_for_navigation(url.to_string());
            tab.phase = TabPhase::Armed;
            token
        };

        self.reactor.notify(tab_id, Reaction::Clear).await;

        log_info!("tab {tab_id} navigated to {url}, arming initial delay");
        self.spawn_one_shot(
            tab_id,
            token,
            Duration::from_millis(self.config.initial_delay_ms),
            false,
        );
        Ok(())
    }

    /// The host observed a content mutation. Debounced against the content
    /// fingerprint; a genuine change on a not-yet-judged page with enough
    /// text triggers an immediate attempt, skipping the initial delay.
    pub async fn content_mutated(&self, tab_id: TabId) -> Result<()> {
        if self.store.goal().await?.is_none() {
            return Ok(());
        }

        let doc = match self.pages.snapshot(tab_id).await {
            Ok(doc) => doc,
            Err(err) => {
                log_warn!("page snapshot failed for tab {tab_id}: {err:#}");
                return Ok(());
            }
        };

        let fingerprint_words = self.config.fingerprint_words;
        let html = doc.html.clone();
        let fingerprint =
            tokio::task::spawn_blocking(move || sampler::fingerprint(&html, fingerprint_words))
                .await
                .context("fingerprint worker join failed")?;

        let worth_checking = {
            let mut tabs = self.tabs.lock().await;
            let Some(tab) = tabs.get_mut(&tab_id) else {
                return Ok(());
            };
            if tab.fingerprint == Some(fingerprint) {
                return Ok(());
            }
            tab.fingerprint = Some(fingerprint);
            tab.general_purpose.is_none() && tab.phase != TabPhase::InFlight
        };

        if !worth_checking {
            return Ok(());
        }

        let max_words = self.config.max_sampled_words;
        let html = doc.html;
        let text = tokio::task::spawn_blocking(move || sampler::extract(&html, max_words))
            .await
            .context("sampler worker join failed")?;

        if text.len() > self.config.mutation_min_text_len {
            log_info!("tab {tab_id} content changed, evaluating now");
            self.run_attempt(tab_id, false).await;
        }
        Ok(())
    }

    // --- timer plumbing ---

    fn spawn_one_shot(
        &self,
        tab_id: TabId,
        token: CancellationToken,
        delay: Duration,
        is_retry: bool,
    ) {
        let ctrl = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = time::sleep(delay) => ctrl.run_attempt(tab_id, is_retry).await,
            }
        });
    }

    fn spawn_periodic_recheck(&self, tab_id: TabId, token: CancellationToken) {
        let ctrl = self.clone();
        let period = Duration::from_millis(self.config.recheck_interval_ms);
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick resolves immediately; the verdict that armed
            // this loop already covered the current content
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => ctrl.run_attempt(tab_id, false).await,
                }
            }
        });
    }

    async fn spawn_ignore_sweep(&self) {
        let mut sweep = self.sweep.lock().await;
        if sweep.is_some() {
            return;
        }

        let token = CancellationToken::new();
        *sweep = Some(token.clone());

        let ctrl = self.clone();
        let period = Duration::from_millis(self.config.ignore_sweep_interval_ms);
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let cutoff = Utc::now()
                            - chrono::Duration::milliseconds(ctrl.config.ignore_duration_ms as i64);
                        match ctrl.store.purge_expired_ignores(cutoff).await {
                            Ok(0) => {}
                            Ok(count) => log_info!("purged {count} expired ignored tabs"),
                            Err(err) => log_error!("ignore sweep failed: {err:#}"),
                        }
                    }
                }
            }
        });
    }

    // --- evaluation pipeline ---

    /// Timer-driven entry point: sample the live page, then run the gated
    /// evaluation. Skips and denials are silent by design.
    async fn run_attempt(&self, tab_id: TabId, is_retry: bool) {
        if let Err(err) = self.try_scheduled_attempt(tab_id, is_retry).await {
            log_error!("evaluation attempt failed for tab {tab_id}: {err:#}");
        }
    }

    async fn try_scheduled_attempt(&self, tab_id: TabId, is_retry: bool) -> Result<()> {
        let Some(goal) = self.store.goal().await? else {
            return Ok(());
        };

        let doc = match self.pages.snapshot(tab_id).await {
            Ok(doc) => doc,
            Err(err) => {
                log_warn!("page snapshot failed for tab {tab_id}: {err:#}");
                return Ok(());
            }
        };

        let max_words = self.config.max_sampled_words;
        let html = doc.html.clone();
        let text = tokio::task::spawn_blocking(move || sampler::extract(&html, max_words))
            .await
            .context("sampler worker join failed")?;

        if text.len() < self.config.min_text_len {
            log_info!(
                "skipping evaluation for tab {tab_id}: insufficient text ({} chars)",
                text.len()
            );
            return Ok(());
        }

        match self
            .evaluate_now(tab_id, goal, doc.title, doc.url, text, is_retry)
            .await?
        {
            EvalOutcome::Settled(_) => {}
            EvalOutcome::Denied(denial) => {
                log_info!("evaluation denied for tab {tab_id}: {}", denial.as_str());
            }
            EvalOutcome::AlreadyInFlight => {
                log_info!("tab {tab_id} already has an evaluation in flight");
            }
            EvalOutcome::Stale => {
                log_info!("discarded stale evaluation result for tab {tab_id}");
            }
            // failure details were logged where the retry was decided
            EvalOutcome::Failed(_) => {}
        }
        Ok(())
    }

    /// Gate, dispatch, and settle one evaluation. The tab holds the
    /// exclusive in-flight slot from dispatch until the outcome is applied
    /// or discarded; no path leaves it in flight.
    async fn evaluate_now(
        &self,
        tab_id: TabId,
        goal: String,
        page_title: String,
        page_url: String,
        page_text: String,
        is_retry: bool,
    ) -> Result<EvalOutcome> {
        if let Some(denial) = self.guard.check(tab_id, &page_url, Utc::now()).await? {
            return Ok(EvalOutcome::Denied(denial));
        }

        let epoch = {
            let mut tabs = self.tabs.lock().await;
            let tab = tabs
                .entry(tab_id)
                .or_insert_with(|| TabState::new(page_url.clone()));
            match tab.begin_flight() {
                Some(epoch) => {
                    tab.url = page_url.clone();
                    epoch
                }
                None => return Ok(EvalOutcome::AlreadyInFlight),
            }
        };

        let request = EvaluationRequest {
            goal,
            page_title,
            page_url: page_url.clone(),
            page_text,
            user_explanation: None,
        };

        match self.classifier.evaluate(&request).await {
            Ok(verdict) => self.settle_flight(tab_id, epoch, &page_url, verdict).await,
            Err(err) => Ok(self.fail_flight(tab_id, epoch, is_retry, err).await),
        }
    }

    async fn settle_flight(
        &self,
        tab_id: TabId,
        epoch: u64,
        url: &str,
        verdict: Verdict,
    ) -> Result<EvalOutcome> {
        let periodic_token = {
            let mut tabs = self.tabs.lock().await;
            let Some(tab) = tabs.get_mut(&tab_id) else {
                // session ended while the call was out
                return Ok(EvalOutcome::Stale);
            };
            if tab.epoch != epoch {
                log_info!("discarding verdict for tab {tab_id}: page left {url}");
                return Ok(EvalOutcome::Stale);
            }

            tab.settle(verdict.general_purpose);
            if verdict.general_purpose && !tab.periodic_armed {
                tab.periodic_armed = true;
                Some(tab.timers.clone())
            } else {
                None
            }
        };

        self.store
            .record_evaluation(&TabEvaluation {
                tab_id,
                verdict: verdict.clone(),
                url: url.to_string(),
                timestamp: Utc::now(),
            })
            .await?;
        let count = self
            .store
            .increment_eval_count(self.config.max_evals_per_session)
            .await?;

        log_info!(
            "tab {tab_id} settled: {} score={} general_purpose={} (session count {count})",
            verdict.verdict.as_str(),
            verdict.score,
            verdict.general_purpose
        );

        self.react(tab_id, &verdict).await;

        if let Some(token) = periodic_token {
            self.spawn_periodic_recheck(tab_id, token);
        }

        Ok(EvalOutcome::Settled(verdict))
    }

    /// Classifier failure: schedule exactly one automatic retry, then give
    /// up for this page view.
    async fn fail_flight(
        &self,
        tab_id: TabId,
        epoch: u64,
        was_retry: bool,
        err: anyhow::Error,
    ) -> EvalOutcome {
        let retry_token = {
            let mut tabs = self.tabs.lock().await;
            let Some(tab) = tabs.get_mut(&tab_id) else {
                return EvalOutcome::Stale;
            };
            if tab.epoch != epoch {
                return EvalOutcome::Stale;
            }

            if was_retry {
                tab.phase = TabPhase::Armed;
                None
            } else {
                tab.phase = TabPhase::RetryPending;
                Some(tab.timers.clone())
            }
        };

        match retry_token {
            Some(token) => {
                log_warn!(
                    "evaluation failed for tab {tab_id}, retrying in {}ms: {err:#}",
                    self.config.retry_delay_ms
                );
                self.spawn_one_shot(
                    tab_id,
                    token,
                    Duration::from_millis(self.config.retry_delay_ms),
                    true,
                );
            }
            None => {
                log_warn!("retry evaluation failed for tab {tab_id}, giving up: {err:#}");
            }
        }

        EvalOutcome::Failed(err.to_string())
    }

    async fn react(&self, tab_id: TabId, verdict: &Verdict) {
        let reaction = match verdict.verdict {
            VerdictKind::OnTopic => Reaction::Indicator {
                kind: IndicatorKind::OnTopic,
                rationale: verdict.rationale.clone(),
            },
            VerdictKind::Borderline => Reaction::Indicator {
                kind: IndicatorKind::Borderline,
                rationale: verdict.rationale.clone(),
            },
            VerdictKind::OffTopic => Reaction::OffTopicAlert {
                rationale: verdict.rationale.clone(),
                matched_terms: verdict.matched_terms.clone(),
            },
        };
        self.reactor.notify(tab_id, reaction).await;
    }

    /// Manual revalidation with the user's explanation. Bypasses the rate
    /// guard (this is an explicit user action) and never schedules an
    /// automatic retry; the user can simply try again.
    async fn revalidate(
        &self,
        tab_id: TabId,
        page_title: String,
        page_url: String,
        page_text: String,
        user_explanation: String,
    ) -> Result<Verdict> {
        let explanation = user_explanation.trim();
        if explanation.chars().count() < self.config.min_explanation_len {
            bail!(
                "Please provide a more detailed explanation (at least {} characters)",
                self.config.min_explanation_len
            );
        }

        let goal = self
            .store
            .goal()
            .await?
            .ok_or_else(|| anyhow!("No active goal"))?;

        let request = EvaluationRequest {
            goal,
            page_title,
            page_url: page_url.clone(),
            page_text,
            user_explanation: Some(explanation.to_string()),
        };

        let verdict = self.classifier.evaluate(&request).await?;

        self.store
            .record_evaluation(&TabEvaluation {
                tab_id,
                verdict: verdict.clone(),
                url: page_url,
                timestamp: Utc::now(),
            })
            .await?;

        if verdict.score >= self.config.on_topic_threshold {
            {
                let mut tabs = self.tabs.lock().await;
                if let Some(tab) = tabs.get_mut(&tab_id) {
                    tab.settle(verdict.general_purpose);
                }
            }
            log_info!(
                "tab {tab_id} validated on-topic by explanation (score {})",
                verdict.score
            );
            self.reactor
                .notify(
                    tab_id,
                    Reaction::RevalidationAccepted {
                        score: verdict.score,
                        rationale: verdict.rationale.clone(),
                    },
                )
                .await;
        } else {
            log_info!(
                "tab {tab_id} still off-topic after explanation (score {})",
                verdict.score
            );
            self.reactor
                .notify(
                    tab_id,
                    Reaction::RevalidationRejected {
                        score: verdict.score,
                        rationale: verdict.rationale.clone(),
                    },
                )
                .await;
        }

        Ok(verdict)
    }

    // --- host messaging boundary ---

    /// Resolve one protocol request for a tab into the response envelope.
    pub async fn handle_request(&self, tab_id: TabId, request: Request) -> Response {
        match self.dispatch(tab_id, request).await {
            Ok(data) => Response::ok(data),
            Err(err) => Response::error(err.to_string()),
        }
    }

    async fn dispatch(&self, tab_id: TabId, request: Request) -> Result<Value> {
        match request {
            Request::SessionStarted { goal } => {
                self.start_session(&goal).await?;
                // arm the receiving tab for its current page
                if let Ok(doc) = self.pages.snapshot(tab_id).await {
                    self.page_navigated(tab_id, &doc.url).await?;
                }
                Ok(Value::Null)
            }

            Request::SessionEnded => {
                if self.store.goal().await?.is_some() {
                    self.end_session().await?;
                }
                Ok(Value::Null)
            }

            Request::RetryEvaluation { delay } => {
                if self.store.goal().await?.is_none() {
                    bail!("No active goal");
                }
                let token = {
                    let mut tabs = self.tabs.lock().await;
                    let tab = tabs
                        .entry(tab_id)
                        .or_insert_with(|| TabState::new(String::new()));
                    tab.phase = TabPhase::RetryPending;
                    tab.timers.clone()
                };
                self.spawn_one_shot(tab_id, token, Duration::from_millis(delay), true);
                Ok(Value::Null)
            }

            Request::EvaluatePage {
                page_title,
                page_url,
                page_text,
                is_retry,
            } => {
                let goal = self
                    .store
                    .goal()
                    .await?
                    .ok_or_else(|| anyhow!("No active goal"))?;

                match self
                    .evaluate_now(tab_id, goal, page_title, page_url, page_text, is_retry)
                    .await?
                {
                    EvalOutcome::Settled(verdict) => Ok(serde_json::to_value(&verdict)?),
                    EvalOutcome::Denied(denial) => bail!("{}", self.denial_message(denial)),
                    EvalOutcome::AlreadyInFlight => bail!("Evaluation already in flight"),
                    EvalOutcome::Stale => bail!("Page changed during evaluation"),
                    EvalOutcome::Failed(message) => bail!("{message}"),
                }
            }

            Request::RevalidatePage {
                page_title,
                page_url,
                page_text,
                user_explanation,
            } => {
                let verdict = self
                    .revalidate(tab_id, page_title, page_url, page_text, user_explanation)
                    .await?;
                Ok(serde_json::to_value(&verdict)?)
            }

            Request::ParkPage { url, title } => {
                let goal = self.store.goal().await?.unwrap_or_default();
                self.store
                    .park_page(&ParkedPage {
                        url,
                        title,
                        goal,
                        timestamp: Utc::now(),
                    })
                    .await?;
                Ok(Value::Null)
            }

            Request::IgnoreTab => {
                self.store.ignore_tab(tab_id, Utc::now()).await?;
                log_info!(
                    "tab {tab_id} ignored for {}s",
                    self.config.ignore_duration_ms / 1000
                );
                Ok(Value::Null)
            }
        }
    }

    fn denial_message(&self, denial: Denial) -> String {
        match denial {
            Denial::Ignored => "Tab is ignored".to_string(),
            Denial::Cooldown => format!(
                "Rate limit: 1 evaluation per {}s per tab",
                self.config.tab_cooldown_ms / 1000
            ),
            Denial::QuotaExhausted => format!(
                "Session limit reached ({} evaluations)",
                self.config.max_evals_per_session
            ),
        }
    }
}
