//! The dispatch loop and client surface (SPEC_FULL.md §4.E, §4.G).
//!
//! Grounded on the teacher's `schedule_runner.rs` (tick/spawn_run shape, structured
//! `tracing` at each lifecycle point) and `session_lock.rs` (acquire/refresh/release
//! orchestration), retargeted at SPEC_FULL.md's leader-lock + per-entry-lock protocol
//! instead of a single-process concurrency guard.

use std::collections::BTreeMap;
use std::sync::Arc;

use cd_core::entry::EntryKind;
use cd_core::{Error, EntryTypeRegistry, Result};
use cd_store::{acquire_with_retry, validate_lock_timeout, EntryStore, FireOutcome, LockToken};
use cd_sink::TaskSink;
use chrono::Duration;
use parking_lot::RwLock;

/// One page worth of client-visible entries: default entries shadow stored ones of
/// the same key, per SPEC_FULL.md §4.C "default entries shadow stored entries".
pub struct ListPage {
    pub items: Vec<EntryKind>,
    pub next_cursor: Option<String>,
}

/// The scheduler process: owns the default-entry overlay, wraps a store and a sink,
/// and drives the leader-lock-gated dispatch loop (SPEC_FULL.md §4.E). Also usable
/// purely as a client (§4.G) by calling `list`/`get`/`save`/`delete` without ever
/// calling `run`.
pub struct Scheduler {
    store: Arc<dyn EntryStore>,
    sink: Arc<dyn TaskSink>,
    registry: EntryTypeRegistry,
    default_entries: RwLock<BTreeMap<String, EntryKind>>,
    default_order: Vec<String>,
    max_interval: Duration,
    lock_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn EntryStore>,
        sink: Arc<dyn TaskSink>,
        registry: EntryTypeRegistry,
        default_entries: Vec<EntryKind>,
        max_interval: Duration,
        lock_timeout: Duration,
    ) -> Result<Self> {
        validate_lock_timeout(lock_timeout, max_interval)?;
        let default_order: Vec<String> = default_entries.iter().map(|e| e.key().to_string()).collect();
        let default_map = default_entries
            .into_iter()
            .map(|e| (e.key().to_string(), e))
            .collect();
        Ok(Self {
            store,
            sink,
            registry,
            default_entries: RwLock::new(default_map),
            default_order,
            max_interval,
            lock_timeout,
        })
    }

    fn is_default(&self, key: &str) -> bool {
        self.default_entries.read().contains_key(key)
    }

    // ---- Client surface (SPEC_FULL.md §4.G) ----

    pub async fn list(&self, cursor: Option<&str>, page_size: usize) -> Result<ListPage> {
        // Default entries have no cursor of their own; they're always returned in
        // full ahead of the stored page (SPEC_FULL.md §8 invariant 6).
        if cursor.is_none() {
            let defaults: Vec<EntryKind> = self
                .default_order
                .iter()
                .filter_map(|k| self.default_entries.read().get(k).cloned())
                .collect();
            let stored = self.store.list_stored_page(None, page_size, &self.registry).await?;
            let mut items = defaults;
            items.extend(stored.items);
            return Ok(ListPage {
                items,
                next_cursor: stored.next_cursor,
            });
        }
        let stored = self.store.list_stored_page(cursor, page_size, &self.registry).await?;
        Ok(ListPage {
            items: stored.items,
            next_cursor: stored.next_cursor,
        })
    }

    pub async fn get(&self, key: &str) -> Result<EntryKind> {
        if let Some(default) = self.default_entries.read().get(key).cloned() {
            return Ok(default);
        }
        self.store
            .get_stored(key, &self.registry)
            .await?
            .ok_or_else(|| Error::EntryNotFound(key.to_string()))
    }

    pub async fn save(&self, entry: EntryKind, preserve_read_only: bool) -> Result<EntryKind> {
        if self.is_default(entry.key()) {
            return Err(Error::OverwriteDefaultEntry(entry.key().to_string()));
        }
        self.store
            .save_stored(entry, preserve_read_only, &self.registry)
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        if self.is_default(key) {
            return Ok(());
        }
        self.store.delete_stored(key).await
    }

    // ---- Dispatch loop (SPEC_FULL.md §4.E) ----

    /// Run the leader-gated dispatch loop. `max_iterations = None` runs forever.
    pub async fn run(&self, max_iterations: Option<u64>) -> Result<()> {
        tracing::info!(max_interval_ms = self.max_interval.num_milliseconds(), "scheduler starting");
        let mut token = acquire_with_retry(self.store.as_ref(), self.lock_timeout, self.max_interval).await;

        let mut n: u64 = 0;
        let outcome = self.run_loop(&mut token, max_iterations, &mut n).await;

        tracing::info!("scheduler shutting down");
        self.store.release(&token).await?;

        // MaxIterationsReached is the expected way a bounded run ends (§4.E pseudocode
        // treats it like an interrupt — "pass", not a failure); anything else is logged
        // at critical severity but still falls through to the cleanup above rather than
        // aborting it, per the same pseudocode's `except Other as e: log; ...; finally`.
        match outcome {
            Ok(()) | Err(Error::MaxIterationsReached) => Ok(()),
            Err(err) => {
                tracing::error!(error = %err, "dispatch loop terminated by error");
                Ok(())
            }
        }
    }

    async fn run_loop(
        &self,
        token: &mut LockToken,
        max_iterations: Option<u64>,
        n: &mut u64,
    ) -> Result<()> {
        loop {
            let sleep_time = self.run_once().await?;
            *n += 1;
            if let Some(max) = max_iterations {
                if *n >= max {
                    return Err(Error::MaxIterationsReached);
                }
            }
            match self.store.refresh(token, self.lock_timeout).await {
                Ok(true) => {
                    let sleep_dur = sleep_time.to_std().unwrap_or(std::time::Duration::from_secs(0));
                    tokio::time::sleep(sleep_dur).await;
                }
                Ok(false) => {
                    tracing::warn!("leader lock lost, re-acquiring");
                    *token = acquire_with_retry(self.store.as_ref(), self.lock_timeout, self.max_interval).await;
                }
                Err(err) => {
                    tracing::error!(error = %err, "refresh failed, treating as lock loss");
                    *token = acquire_with_retry(self.store.as_ref(), self.lock_timeout, self.max_interval).await;
                }
            }
        }
    }

    /// Evaluate every entry once, firing due ones. Returns the minimum positive
    /// `due_in()` observed, bounded by `max_interval`.
    pub async fn run_once(&self) -> Result<Duration> {
        let mut sleep_time = self.max_interval;
        tracing::debug!("pulling entries");

        let default_keys = self.default_order.clone();
        for key in &default_keys {
            let mut entry = match self.default_entries.read().get(key).cloned() {
                Some(e) => e,
                None => continue,
            };
            if !entry.enabled() {
                continue;
            }
            let d = entry.due_in();
            if d <= Duration::zero() {
                entry.sent();
                self.default_entries.write().insert(key.clone(), entry.clone());
                self.dispatch(&entry).await;
            } else if d < sleep_time {
                sleep_time = d;
            }
        }

        let mut cursor = None;
        loop {
            let page = self
                .store
                .list_stored_page(cursor.as_deref(), 100, &self.registry)
                .await?;
            for entry in &page.items {
                match self.store.fire_if_due(entry.key(), &self.registry).await? {
                    FireOutcome::Gone | FireOutcome::Skipped => {}
                    FireOutcome::NotDue { due_in } => {
                        if due_in < sleep_time {
                            sleep_time = due_in;
                        }
                    }
                    FireOutcome::Fired(fresh) => {
                        self.dispatch(&fresh).await;
                    }
                }
            }
            if page.next_cursor.is_none() {
                break;
            }
            cursor = page.next_cursor;
        }

        Ok(sleep_time)
    }

    async fn dispatch(&self, entry: &EntryKind) {
        tracing::info!(key = entry.key(), "entry due, sending");
        if let Err(err) = self.sink.send(entry).await {
            tracing::error!(key = entry.key(), error = %err, "sink failed to send entry");
        } else {
            tracing::info!(key = entry.key(), "entry sent");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cd_sink::SimpleQueueSink;
    use cd_store::MemStore;

    fn scheduler(default_entries: Vec<EntryKind>) -> (Arc<Scheduler>, Arc<SimpleQueueSink>) {
        let store: Arc<dyn EntryStore> = Arc::new(MemStore::new());
        let sink = Arc::new(SimpleQueueSink::new());
        let sink_dyn: Arc<dyn TaskSink> = sink.clone();
        let scheduler = Scheduler::new(
            store,
            sink_dyn,
            EntryTypeRegistry::default(),
            default_entries,
            Duration::seconds(10),
            Duration::seconds(30),
        )
        .unwrap();
        (Arc::new(scheduler), sink)
    }

    #[tokio::test]
    async fn save_against_default_key_fails() {
        let default = EntryKind::new_interval("d1", "task", Duration::seconds(30), true).unwrap();
        let (scheduler, _sink) = scheduler(vec![default]);
        let attempt = EntryKind::new_interval("d1", "other.task", Duration::seconds(10), true).unwrap();
        let result = scheduler.save(attempt, true).await;
        assert!(matches!(result, Err(Error::OverwriteDefaultEntry(_))));
    }

    #[tokio::test]
    async fn delete_on_default_key_is_noop() {
        let default = EntryKind::new_interval("d1", "task", Duration::seconds(30), true).unwrap();
        let (scheduler, _sink) = scheduler(vec![default]);
        assert!(scheduler.delete("d1").await.is_ok());
        assert!(scheduler.get("d1").await.is_ok());
    }

    #[tokio::test]
    async fn get_missing_key_is_entry_not_found() {
        let (scheduler, _sink) = scheduler(vec![]);
        let result = scheduler.get("nope").await;
        assert!(matches!(result, Err(Error::EntryNotFound(k)) if k == "nope"));
    }

    #[tokio::test]
    async fn run_once_fires_due_default_entry() {
        let mut default = EntryKind::new_interval("d1", "task.a", Duration::milliseconds(1), true).unwrap();
        if let EntryKind::Interval { last_sent_at, .. } = &mut default {
            *last_sent_at -= chrono::Duration::seconds(10);
        }
        let (scheduler, sink) = scheduler(vec![default]);
        scheduler.run_once().await.unwrap();
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn run_once_fires_due_stored_entry() {
        let (scheduler, sink) = scheduler(vec![]);
        let mut e = EntryKind::new_interval("k", "task.b", Duration::milliseconds(1), true).unwrap();
        if let EntryKind::Interval { last_sent_at, .. } = &mut e {
            *last_sent_at -= chrono::Duration::seconds(10);
        }
        scheduler.save(e, true).await.unwrap();
        scheduler.run_once().await.unwrap();
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn list_yields_defaults_before_stored() {
        let default = EntryKind::new_interval("d1", "task", Duration::seconds(30), true).unwrap();
        let (scheduler, _sink) = scheduler(vec![default]);
        let stored = EntryKind::new_interval("s1", "task", Duration::seconds(30), true).unwrap();
        scheduler.save(stored, true).await.unwrap();

        let page = scheduler.list(None, 10).await.unwrap();
        assert_eq!(page.items[0].key(), "d1");
        assert!(page.items.iter().any(|e| e.key() == "s1"));
    }

    #[tokio::test]
    async fn run_stops_after_max_iterations() {
        let store: Arc<dyn EntryStore> = Arc::new(MemStore::new());
        let sink: Arc<dyn TaskSink> = Arc::new(SimpleQueueSink::new());
        let scheduler = Scheduler::new(
            store,
            sink,
            EntryTypeRegistry::default(),
            vec![],
            Duration::milliseconds(5),
            Duration::milliseconds(20),
        )
        .unwrap();
        // MaxIterationsReached is swallowed: run() reports a clean shutdown.
        assert!(scheduler.run(Some(3)).await.is_ok());
    }
}
