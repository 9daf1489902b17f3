//! Task sink contract (SPEC_FULL.md §4.F).

use async_trait::async_trait;
use cd_core::entry::EntryKind;
use cd_core::Result;

/// Dispatches a fired entry to whatever executes it. `send` must not mutate
/// `entry` — by the time it is called, `sent()` has already been applied and
/// persisted by the caller.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn send(&self, entry: &EntryKind) -> Result<()>;
}
