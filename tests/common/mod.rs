#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use focus_guard::classifier::{Classifier, EvaluationRequest};
use focus_guard::{
    GuardConfig, GuardController, PageAccess, PageDocument, Reaction, Reactor, StateStore, TabId,
    Verdict, VerdictKind,
};

pub const GOAL: &str = "Learn about transformer attention mechanisms";

/// Defaults shrunk to test scale: timers fire within a few hundred
/// milliseconds and the per-tab cooldown is off unless a test needs it.
pub fn fast_config() -> GuardConfig {
    GuardConfig {
        initial_delay_ms: 250,
        recheck_interval_ms: 250,
        retry_delay_ms: 250,
        tab_cooldown_ms: 0,
        ..GuardConfig::default()
    }
}

pub fn verdict(kind: VerdictKind, score: u8, general_purpose: bool) -> Verdict {
    Verdict {
        general_purpose,
        score,
        verdict: kind,
        rationale: "stubbed rationale".into(),
        matched_terms: vec![],
    }
}

/// A page whose `<main>` carries `words` repetitions of `topic`.
pub fn article_html(topic: &str, words: usize) -> String {
    let body = std::iter::repeat(topic)
        .take(words)
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "<html><head><title>{topic}</title></head><body><main><p>{body}</p></main></body></html>"
    )
}

/// Scripted classifier. Replies are consumed front to back; once the
/// script runs dry it keeps answering with an on-topic verdict.
#[derive(Default)]
pub struct StubClassifier {
    script: Mutex<VecDeque<Result<Verdict, String>>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<EvaluationRequest>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl StubClassifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_ok(&self, verdict: Verdict) {
        self.script.lock().unwrap().push_back(Ok(verdict));
    }

    pub fn push_err(&self, message: &str) {
        self.script.lock().unwrap().push_back(Err(message.to_string()));
    }

    /// Make the next `evaluate` call block until the returned handle is
    /// notified. Lets tests navigate away mid-flight.
    pub fn hold_next(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<EvaluationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        match self.script.lock().unwrap().pop_front() {
            Some(Ok(verdict)) => Ok(verdict),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(verdict(VerdictKind::OnTopic, 90, false)),
        }
    }
}

/// Records every reaction the controller requests.
#[derive(Default)]
pub struct RecordingReactor {
    reactions: Mutex<Vec<(TabId, Reaction)>>,
}

impl RecordingReactor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reactions(&self) -> Vec<(TabId, Reaction)> {
        self.reactions.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Reaction> {
        self.reactions
            .lock()
            .unwrap()
            .last()
            .map(|(_, reaction)| reaction.clone())
    }
}

#[async_trait]
impl Reactor for RecordingReactor {
    async fn notify(&self, tab_id: TabId, reaction: Reaction) {
        self.reactions.lock().unwrap().push((tab_id, reaction));
    }
}

/// Static page source keyed by tab.
#[derive(Default)]
pub struct StubPages {
    pages: Mutex<HashMap<TabId, PageDocument>>,
}

impl StubPages {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_page(&self, tab_id: TabId, url: &str, html: &str) {
        let title = focus_guard::sampler::page_title(html).unwrap_or_default();
        self.pages.lock().unwrap().insert(
            tab_id,
            PageDocument {
                url: url.to_string(),
                title,
                html: html.to_string(),
            },
        );
    }
}

#[async_trait]
impl PageAccess for StubPages {
    async fn snapshot(&self, tab_id: TabId) -> Result<PageDocument> {
        self.pages
            .lock()
            .unwrap()
            .get(&tab_id)
            .cloned()
            .ok_or_else(|| anyhow!("no page for tab {tab_id}"))
    }
}

pub struct Harness {
    pub controller: GuardController,
    pub classifier: Arc<StubClassifier>,
    pub reactor: Arc<RecordingReactor>,
    pub pages: Arc<StubPages>,
    pub store: StateStore,
}

pub fn harness(config: GuardConfig) -> Harness {
    let store = StateStore::open_in_memory().expect("in-memory store");
    let classifier = StubClassifier::new();
    let reactor = RecordingReactor::new();
    let pages = StubPages::new();
    let controller = GuardController::new(
        config,
        store.clone(),
        classifier.clone(),
        reactor.clone(),
        pages.clone(),
    );

    Harness {
        controller,
        classifier,
        reactor,
        pages,
        store,
    }
}

/// Poll `cond` every 10 ms, panicking if it stays false for 5 s.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}
