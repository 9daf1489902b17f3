//! Simple queue sink (SPEC_FULL.md §4.F): enqueues `(task, args, kwargs)`
//! unconditionally, leaving resolution to whatever drains the queue.

use async_trait::async_trait;
use cd_core::entry::EntryKind;
use cd_core::Result;
use parking_lot::Mutex;

use crate::traits::TaskSink;

#[derive(Clone, Debug, PartialEq)]
pub struct QueuedTask {
    pub task: String,
    pub args: cd_core::Args,
    pub kwargs: cd_core::Kwargs,
}

/// An in-process queue sink, primarily the reference implementation exercised
/// by `cd-scheduler`'s tests — it needs no external broker to assert against.
pub struct SimpleQueueSink {
    queue: Mutex<Vec<QueuedTask>>,
}

impl Default for SimpleQueueSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleQueueSink {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
        }
    }

    pub fn drain(&self) -> Vec<QueuedTask> {
        std::mem::take(&mut self.queue.lock())
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskSink for SimpleQueueSink {
    async fn send(&self, entry: &EntryKind) -> Result<()> {
        self.queue.lock().push(QueuedTask {
            task: entry.task().to_string(),
            args: entry.args().cloned().unwrap_or_default(),
            kwargs: entry.kwargs().cloned().unwrap_or_default(),
        });
        tracing::debug!(key = entry.key(), task = entry.task(), "entry enqueued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn send_enqueues_unconditionally() {
        let sink = SimpleQueueSink::new();
        let e = EntryKind::new_interval("k", "task.a", Duration::seconds(30), true).unwrap();
        sink.send(&e).await.unwrap();
        let queued = sink.drain();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].task, "task.a");
    }
}
