//! `EntryStore`: the durable half of the entry-store protocol (SPEC_FULL.md §4.C, §4.G).
//!
//! Default entries never touch this trait — they're a per-process overlay maintained
//! entirely in `cd-scheduler`. This trait only concerns itself with what's actually
//! persisted.

use async_trait::async_trait;
use cd_core::{EntryKind, EntryTypeRegistry, Result};

use crate::lock::LeaderLockBackend;

/// One page of stored entries plus an opaque cursor for the next page, or `None` if
/// this was the last page. Backends encode whatever cursor representation suits them
/// (a numeric row id for the relational backend, a `HSCAN` cursor for the KV one) as
/// an opaque string — callers never parse it.
#[derive(Clone, Debug, Default)]
pub struct StoredPage {
    pub items: Vec<EntryKind>,
    pub next_cursor: Option<String>,
}

/// Outcome of a locked read-modify-write attempt against one stored entry
/// (SPEC_FULL.md §4.E `run_once` pseudocode, the `with entry_lock(entry.key): ...`
/// block). Kept as one type so backends can implement the whole critical section
/// atomically without exposing lock guards across an await point to callers.
pub enum FireOutcome {
    /// No row matched this key anymore (e.g. concurrently deleted) — a no-op
    /// (SPEC_FULL.md §4.E, §9: confirmed, not left ambiguous).
    Gone,
    /// Row existed but was disabled; contributes nothing to the sleep-time
    /// computation (SPEC_FULL.md §4.E pseudocode: `if not fresh.enabled: continue`).
    Skipped,
    /// Row existed, enabled, but its `due_in()` was still positive. Carries that
    /// value so the caller can fold it into the iteration's minimum sleep time.
    NotDue { due_in: chrono::Duration },
    /// Row was due; `sent()` was applied and persisted inside the lock. The caller
    /// must invoke the sink with the returned entry *outside* any lock.
    Fired(EntryKind),
}

#[async_trait]
pub trait EntryStore: LeaderLockBackend {
    /// Fetch one page of stored (non-default) entries. `cursor = None` starts from
    /// the beginning. Ordering is backend-defined but stable per SPEC_FULL.md §4.C.
    /// `registry` gates which `"type"` tags may be decoded (SPEC_FULL.md §4.B).
    async fn list_stored_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
        registry: &EntryTypeRegistry,
    ) -> Result<StoredPage>;

    /// `None` if no stored row matches `key`. Does not consult default entries —
    /// overlay precedence is the scheduler's job.
    async fn get_stored(&self, key: &str, registry: &EntryTypeRegistry) -> Result<Option<EntryKind>>;

    /// Insert or merge `entry`. When `preserve_read_only` is true and a row already
    /// exists, the kind's `client_read_only_fields` are copied from the stored copy
    /// before writing (SPEC_FULL.md §8 invariant 3). Returns the entry as persisted.
    async fn save_stored(
        &self,
        entry: EntryKind,
        preserve_read_only: bool,
        registry: &EntryTypeRegistry,
    ) -> Result<EntryKind>;

    /// Remove a stored row if present. Never called for default entries — the
    /// scheduler intercepts those before reaching the store (SPEC_FULL.md §4.C
    /// "silently ignores default entries" is therefore enforced one layer up).
    async fn delete_stored(&self, key: &str) -> Result<()>;

    /// Perform the full locked read-modify-write-if-due cycle for one stored entry,
    /// using `registry` to decode/re-encode. This is the store-side half of
    /// SPEC_FULL.md §4.E's `run_once` inner loop; `send` is always invoked by the
    /// caller afterward, never inside this call.
    async fn fire_if_due(&self, key: &str, registry: &EntryTypeRegistry) -> Result<FireOutcome>;

    /// One-shot schema setup. No-op for backends with nothing to create (e.g. the
    /// in-memory test double).
    async fn create_tables(&self) -> Result<()> {
        Ok(())
    }
}
