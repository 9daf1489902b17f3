//! Leader lock protocol (SPEC_FULL.md §4.D).
//!
//! Grounded on `original_source/.../sql_scheduler.py`'s and `redis_scheduler.py`'s
//! `_acquire_lock`/`_refresh_lock`/`_cleanup` trio, and shaped like the teacher's
//! `runtime/session_lock.rs` permit-based exclusion primitive — here the exclusion is
//! cross-process, so the backend (not an in-memory semaphore) is the source of truth.

use chrono::Duration;

use async_trait::async_trait;
use cd_core::Result;

/// Ownership token returned by a successful acquire/refresh, required to prove
/// ownership on the next refresh/release. For the relational backend this wraps the
/// `last_refreshed_at` value written; for the KV backend it wraps the Redlock
/// acquisition token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockToken(pub String);

#[async_trait]
pub trait LeaderLockBackend: Send + Sync {
    /// Single acquisition attempt. `Ok(None)` means "someone else currently holds an
    /// unexpired lock" — the caller is responsible for the retry/sleep loop
    /// ([`acquire_with_retry`]), never this method itself.
    async fn try_acquire(&self, lock_timeout: Duration) -> Result<Option<LockToken>>;

    /// Verify `token` still reflects this process's last write; if so, extend and
    /// return `Ok(true)`. Returns `Ok(false)` (not an error) when ownership was lost —
    /// that's the expected "another scheduler has seized the lock" case.
    async fn refresh(&self, token: &LockToken, lock_timeout: Duration) -> Result<bool>;

    /// Verify ownership, then release. Lock-already-gone and ownership-mismatch are
    /// both treated as success (SPEC_FULL.md §9: "treat missing-lock-on-cleanup as
    /// success").
    async fn release(&self, token: &LockToken) -> Result<()>;
}

/// Retry forever, sleeping `max_interval` between attempts, mirroring
/// `scheduler.py`'s `_acquire_lock` loop exactly (SPEC_FULL.md §4.D step 1).
pub async fn acquire_with_retry(
    backend: &dyn LeaderLockBackend,
    lock_timeout: Duration,
    max_interval: Duration,
) -> LockToken {
    let sleep_dur = max_interval
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1));
    loop {
        match backend.try_acquire(lock_timeout).await {
            Ok(Some(token)) => {
                tracing::info!("leader lock acquired");
                return token;
            }
            Ok(None) => {
                tracing::debug!(wait_secs = max_interval.num_seconds(), "leader lock unavailable, waiting");
            }
            Err(err) => {
                tracing::warn!(error = %err, "leader lock acquisition attempt failed");
            }
        }
        tokio::time::sleep(sleep_dur).await;
    }
}

/// `lock_timeout >= 3 * max_interval` (SPEC_FULL.md §4.D invariant).
pub fn validate_lock_timeout(lock_timeout: Duration, max_interval: Duration) -> Result<()> {
    if lock_timeout < max_interval * 3 {
        return Err(cd_core::Error::Validation(format!(
            "lock_timeout ({}ms) must be >= 3x max_interval ({}ms)",
            lock_timeout.num_milliseconds(),
            max_interval.num_milliseconds()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_ratio_boundary() {
        let max_interval = Duration::seconds(10);
        assert!(validate_lock_timeout(Duration::seconds(29), max_interval).is_err());
        assert!(validate_lock_timeout(Duration::seconds(30), max_interval).is_ok());
        assert!(validate_lock_timeout(Duration::seconds(31), max_interval).is_ok());
    }
}
