//! Broker queue sink (SPEC_FULL.md §4.F, §4.E "send failure policy").
//!
//! Grounded on `original_source/.../celery_scheduler.py`'s `CeleryScheduler.send`:
//! resolve `task` against a registered-task table, substituting the
//! `__main__`-prefixed legacy sentinel with the running binary's basename before
//! lookup, and logging (never propagating) a missing-task error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cd_core::entry::EntryKind;
use cd_core::Result;

const MAIN_SENTINEL: &str = "__main__";

/// A registered task: anything that can execute `(args, kwargs)`. Kept as a
/// trait object so callers can plug in whatever actually dispatches the work
/// (an in-process closure, a queue-client handle, ...).
#[async_trait]
pub trait RegisteredTask: Send + Sync {
    async fn delay(&self, args: &cd_core::Args, kwargs: &cd_core::Kwargs) -> Result<()>;
}

pub struct BrokerQueueSink {
    tasks: HashMap<String, Arc<dyn RegisteredTask>>,
    main_basename: String,
}

impl BrokerQueueSink {
    pub fn new(tasks: HashMap<String, Arc<dyn RegisteredTask>>) -> Self {
        let main_basename = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "main".to_string());
        Self {
            tasks,
            main_basename,
        }
    }

    fn resolve(&self, task: &str) -> String {
        if let Some(rest) = task.strip_prefix(MAIN_SENTINEL) {
            format!("{}{}", self.main_basename, rest)
        } else {
            task.to_string()
        }
    }
}

#[async_trait]
impl crate::traits::TaskSink for BrokerQueueSink {
    async fn send(&self, entry: &EntryKind) -> Result<()> {
        tracing::debug!(key = entry.key(), "sending entry to broker");
        let resolved = self.resolve(entry.task());
        match self.tasks.get(&resolved) {
            Some(task) => {
                let args = entry.args().cloned().unwrap_or_default();
                let kwargs = entry.kwargs().cloned().unwrap_or_default();
                task.delay(&args, &kwargs).await?;
                tracing::info!(key = entry.key(), task = %resolved, "entry sent");
            }
            None => {
                tracing::error!(key = entry.key(), task = %resolved, "no registered task for entry");
            }
        }
        Ok(())
    }
}
