use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;
use uuid::Uuid;

mod migrations;

use crate::models::{ParkedPage, SessionSnapshot, TabEvaluation, TabId, Verdict, VerdictKind};
use migrations::run_migrations;

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

enum StoreTarget {
    Path(PathBuf),
    Memory,
}

struct StateStoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StateStoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn verdict_from_str(value: &str) -> Result<VerdictKind> {
    match value {
        "on_topic" => Ok(VerdictKind::OnTopic),
        "borderline" => Ok(VerdictKind::Borderline),
        "off_topic" => Ok(VerdictKind::OffTopic),
        _ => Err(anyhow!("unknown verdict '{value}'")),
    }
}

/// Serialized persistent state: goal + session counter, per-tab evaluation
/// records, parked pages, ignored tabs.
///
/// All access funnels through a single worker thread, so every logical
/// update (counter increment included) is an atomic read-modify-write even
/// when independent timer callbacks land concurrently.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StateStoreInner>,
}

impl StateStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }
        Self::spawn_worker(StoreTarget::Path(db_path))
    }

    /// In-memory store for tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self> {
        Self::spawn_worker(StoreTarget::Memory)
    }

    fn spawn_worker(target: StoreTarget) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("focus-guard-store".into())
            .spawn(move || {
                let opened = match &target {
                    StoreTarget::Path(path) => Connection::open(path),
                    StoreTarget::Memory => Connection::open_in_memory(),
                };
                let mut conn = match opened {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let StoreTarget::Path(_) = target {
                    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                        error!("Failed to enable WAL mode: {err}");
                    }
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run store migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .context("failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        Ok(Self {
            inner: Arc::new(StateStoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    // --- session ---

    pub async fn session(&self) -> Result<Option<SessionSnapshot>> {
        self.execute(|conn| {
            conn.query_row(
                "SELECT session_id, goal, eval_count, started_at FROM session_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed to read session state")?
            .map(|(session_id, goal, eval_count, started_at)| {
                Ok(SessionSnapshot {
                    session_id: Uuid::parse_str(&session_id)
                        .with_context(|| format!("invalid session id '{session_id}'"))?,
                    goal,
                    eval_count: u32::try_from(eval_count)
                        .map_err(|_| anyhow!("eval_count {eval_count} is negative"))?,
                    started_at: parse_datetime(&started_at)?,
                })
            })
            .transpose()
        })
        .await
    }

    pub async fn goal(&self) -> Result<Option<String>> {
        Ok(self.session().await?.map(|s| s.goal))
    }

    /// Install a new goal and reset the evaluation counter.
    pub async fn start_session(
        &self,
        session_id: Uuid,
        goal: String,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO session_state (id, session_id, goal, eval_count, started_at)
                 VALUES (1, ?1, ?2, 0, ?3)",
                params![session_id.to_string(), goal, started_at.to_rfc3339()],
            )
            .context("failed to write session state")?;
            Ok(())
        })
        .await
    }

    pub async fn clear_session(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM session_state", [])
                .context("failed to clear session state")?;
            Ok(())
        })
        .await
    }

    pub async fn eval_count(&self) -> Result<u32> {
        Ok(self.session().await?.map(|s| s.eval_count).unwrap_or(0))
    }

    /// Bump the session counter, clamped at `max`. Runs as a single
    /// statement on the worker thread, so concurrent completions cannot
    /// push the counter past the cap or lose an update.
    pub async fn increment_eval_count(&self, max: u32) -> Result<u32> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE session_state SET eval_count = MIN(eval_count + 1, ?1) WHERE id = 1",
                params![i64::from(max)],
            )
            .context("failed to increment eval count")?;
            let count: i64 = conn
                .query_row(
                    "SELECT eval_count FROM session_state WHERE id = 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to read eval count")?
                .unwrap_or(0);
            Ok(count as u32)
        })
        .await
    }

    // --- tab evaluations ---

    pub async fn tab_evaluation(&self, tab_id: TabId) -> Result<Option<TabEvaluation>> {
        self.execute(move |conn| {
            conn.query_row(
                "SELECT general_purpose, score, verdict, rationale, matched_terms, url, timestamp
                 FROM tab_evaluations WHERE tab_id = ?1",
                params![tab_id],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .context("failed to read tab evaluation")?
            .map(
                |(general_purpose, score, verdict, rationale, matched_terms, url, timestamp)| {
                    Ok(TabEvaluation {
                        tab_id,
                        verdict: Verdict {
                            general_purpose,
                            score: u8::try_from(score)
                                .map_err(|_| anyhow!("stored score {score} out of range"))?,
                            verdict: verdict_from_str(&verdict)?,
                            rationale,
                            matched_terms: serde_json::from_str(&matched_terms)
                                .context("failed to decode matched_terms")?,
                        },
                        url,
                        timestamp: parse_datetime(&timestamp)?,
                    })
                },
            )
            .transpose()
        })
        .await
    }

    pub async fn record_evaluation(&self, record: &TabEvaluation) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO tab_evaluations
                 (tab_id, general_purpose, score, verdict, rationale, matched_terms, url, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.tab_id,
                    record.verdict.general_purpose,
                    i64::from(record.verdict.score),
                    record.verdict.verdict.as_str(),
                    record.verdict.rationale,
                    serde_json::to_string(&record.verdict.matched_terms)
                        .context("failed to encode matched_terms")?,
                    record.url,
                    record.timestamp.to_rfc3339(),
                ],
            )
            .context("failed to record evaluation")?;
            Ok(())
        })
        .await
    }

    pub async fn clear_tab_evaluation(&self, tab_id: TabId) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM tab_evaluations WHERE tab_id = ?1",
                params![tab_id],
            )
            .context("failed to clear tab evaluation")?;
            Ok(())
        })
        .await
    }

    // --- parked pages ---

    pub async fn park_page(&self, page: &ParkedPage) -> Result<()> {
        let page = page.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO parked_pages (url, title, goal, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![page.url, page.title, page.goal, page.timestamp.to_rfc3339()],
            )
            .context("failed to park page")?;
            Ok(())
        })
        .await
    }

    /// Parked pages, newest first.
    pub async fn parked_pages(&self) -> Result<Vec<ParkedPage>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT url, title, goal, timestamp FROM parked_pages ORDER BY timestamp DESC",
            )?;

            let mut rows = stmt.query([])?;
            let mut pages = Vec::new();
            while let Some(row) = rows.next()? {
                pages.push(ParkedPage {
                    url: row.get(0)?,
                    title: row.get(1)?,
                    goal: row.get(2)?,
                    timestamp: parse_datetime(&row.get::<_, String>(3)?)?,
                });
            }
            Ok(pages)
        })
        .await
    }

    pub async fn clear_parked_pages(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM parked_pages", [])
                .context("failed to clear parked pages")?;
            Ok(())
        })
        .await
    }

    // --- ignored tabs ---

    pub async fn ignore_tab(&self, tab_id: TabId, ignored_at: DateTime<Utc>) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO ignored_tabs (tab_id, ignored_at) VALUES (?1, ?2)",
                params![tab_id, ignored_at.to_rfc3339()],
            )
            .context("failed to ignore tab")?;
            Ok(())
        })
        .await
    }

    pub async fn unignore_tab(&self, tab_id: TabId) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM ignored_tabs WHERE tab_id = ?1", params![tab_id])
                .context("failed to unignore tab")?;
            Ok(())
        })
        .await
    }

    pub async fn ignored_at(&self, tab_id: TabId) -> Result<Option<DateTime<Utc>>> {
        self.execute(move |conn| {
            conn.query_row(
                "SELECT ignored_at FROM ignored_tabs WHERE tab_id = ?1",
                params![tab_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("failed to read ignored tab")?
            .map(|raw| parse_datetime(&raw))
            .transpose()
        })
        .await
    }

    /// Drop ignore rows older than `cutoff`. Returns how many were removed.
    pub async fn purge_expired_ignores(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM ignored_tabs WHERE ignored_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .context("failed to purge ignored tabs")
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_verdict(score: u8, kind: VerdictKind) -> Verdict {
        Verdict {
            general_purpose: false,
            score,
            verdict: kind,
            rationale: "because".into(),
            matched_terms: vec!["term".into()],
        }
    }

    #[tokio::test]
    async fn session_lifecycle_resets_counter() {
        let store = StateStore::open_in_memory().unwrap();
        let now = Utc::now();

        assert!(store.session().await.unwrap().is_none());

        store
            .start_session(Uuid::new_v4(), "Learn about transformer attention".into(), now)
            .await
            .unwrap();
        assert_eq!(store.eval_count().await.unwrap(), 0);

        for _ in 0..3 {
            store.increment_eval_count(10).await.unwrap();
        }
        assert_eq!(store.eval_count().await.unwrap(), 3);

        // New goal starts over
        store
            .start_session(Uuid::new_v4(), "Study Rust async runtimes".into(), now)
            .await
            .unwrap();
        assert_eq!(store.eval_count().await.unwrap(), 0);

        store.clear_session().await.unwrap();
        assert!(store.goal().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eval_count_clamps_at_max() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .start_session(Uuid::new_v4(), "A long enough goal".into(), Utc::now())
            .await
            .unwrap();

        for _ in 0..15 {
            store.increment_eval_count(10).await.unwrap();
        }
        assert_eq!(store.eval_count().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn tab_evaluations_overwrite_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let t0 = Utc::now();

        store
            .record_evaluation(&TabEvaluation {
                tab_id: 7,
                verdict: sample_verdict(15, VerdictKind::OffTopic),
                url: "https://example.com/a".into(),
                timestamp: t0,
            })
            .await
            .unwrap();

        store
            .record_evaluation(&TabEvaluation {
                tab_id: 7,
                verdict: sample_verdict(91, VerdictKind::OnTopic),
                url: "https://example.com/b".into(),
                timestamp: t0 + Duration::seconds(90),
            })
            .await
            .unwrap();

        let current = store.tab_evaluation(7).await.unwrap().unwrap();
        assert_eq!(current.verdict.score, 91);
        assert_eq!(current.url, "https://example.com/b");
        assert!(current.timestamp > t0);
    }

    #[tokio::test]
    async fn parked_pages_list_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        let t0 = Utc::now();

        for (i, url) in ["https://a.test", "https://b.test"].iter().enumerate() {
            store
                .park_page(&ParkedPage {
                    url: url.to_string(),
                    title: format!("page {i}"),
                    goal: "goal".into(),
                    timestamp: t0 + Duration::seconds(i as i64),
                })
                .await
                .unwrap();
        }

        let pages = store.parked_pages().await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].url, "https://b.test");

        store.clear_parked_pages().await.unwrap();
        assert!(store.parked_pages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ignore_rows_purge_by_cutoff() {
        let store = StateStore::open_in_memory().unwrap();
        let now = Utc::now();

        store.ignore_tab(1, now - Duration::seconds(700)).await.unwrap();
        store.ignore_tab(2, now - Duration::seconds(30)).await.unwrap();

        let removed = store
            .purge_expired_ignores(now - Duration::seconds(600))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.ignored_at(1).await.unwrap().is_none());
        assert!(store.ignored_at(2).await.unwrap().is_some());

        store.unignore_tab(2).await.unwrap();
        assert!(store.ignored_at(2).await.unwrap().is_none());
    }
}
