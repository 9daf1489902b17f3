//! Key-value backend (SPEC_FULL.md §4.C "Key-value backend").
//!
//! Grounded on `original_source/.../redis_scheduler.py`: one hash (`cd_entries`)
//! mapping entry key to serialized JSON, plus well-known keys `cd_entry_lock:<key>`
//! and `cd_scheduler_lock` for a single-instance Redlock-style distributed lock.
//! `RedisScheduleEntryList._get_next_page_item`'s recursive "cursor is nonzero but the
//! batch was empty, keep scanning" behavior is reproduced in [`KvStore::list_stored_page`].

use async_trait::async_trait;
use cd_core::entry::EntryKind;
use cd_core::{Error, EntryTypeRegistry, Result};
use chrono::Duration;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::lock::{LeaderLockBackend, LockToken};
use crate::traits::{EntryStore, FireOutcome, StoredPage};

const HASH_KEY: &str = "cd_entries";
const SCHEDULER_LOCK_KEY: &str = "cd_scheduler_lock";
const ENTRY_LOCK_PREFIX: &str = "cd_entry_lock:";

/// Release only succeeds if the value still matches the caller's token — the
/// classic Redlock compare-and-delete, done via a Lua script so the check and the
/// delete are atomic.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Compare-and-extend: only refresh the TTL if we still own the key.
const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

pub struct KvStore {
    client: redis::Client,
}

impl KvStore {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::Store(format!("redis client error: {e}")))?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Store(format!("redis connect failed: {e}")))
    }

    /// Acquire a single-instance Redlock over `key`, holding it for the duration of
    /// `f`. Mirrors `pottery.Redlock` used as a context manager in the source.
    async fn with_lock<F, Fut, T>(&self, key: &str, ttl: Duration, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut conn = self.conn().await?;
        let token = Uuid::new_v4().to_string();
        let ttl_ms = ttl.num_milliseconds().max(1) as usize;

        let acquired: bool = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map(|v: Option<String>| v.is_some())
            .map_err(|e| Error::Store(format!("redis lock acquire failed: {e}")))?;

        if !acquired {
            return Err(Error::Store(format!("could not acquire entry lock '{key}'")));
        }

        let result = f().await;

        let _: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(&token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Store(format!("redis lock release failed: {e}")))?;

        result
    }
}

#[async_trait]
impl EntryStore for KvStore {
    async fn list_stored_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
        registry: &EntryTypeRegistry,
    ) -> Result<StoredPage> {
        let mut conn = self.conn().await?;
        let mut scan_cursor: u64 = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);

        // HSCAN may legally return an empty batch with a nonzero cursor; keep
        // scanning until we either fill a page or the cursor returns to 0
        // (`RedisScheduleEntryList._get_next_page_item`'s recursive retry).
        loop {
            let (next_cursor, batch): (u64, Vec<(String, String)>) = redis::cmd("HSCAN")
                .arg(HASH_KEY)
                .arg(scan_cursor)
                .arg("COUNT")
                .arg(page_size)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::Store(format!("redis hscan failed: {e}")))?;

            if !batch.is_empty() || next_cursor == 0 {
                let mut items = Vec::with_capacity(batch.len());
                for (_, json) in batch {
                    items.push(registry.decode(&json)?);
                }
                let next = if next_cursor == 0 {
                    None
                } else {
                    Some(next_cursor.to_string())
                };
                return Ok(StoredPage {
                    items,
                    next_cursor: next,
                });
            }
            scan_cursor = next_cursor;
        }
    }

    async fn get_stored(&self, key: &str, registry: &EntryTypeRegistry) -> Result<Option<EntryKind>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .hget(HASH_KEY, key)
            .await
            .map_err(|e| Error::Store(format!("redis hget failed: {e}")))?;
        match raw {
            None => Ok(None),
            Some(json) => Ok(Some(registry.decode(&json)?)),
        }
    }

    async fn save_stored(
        &self,
        mut entry: EntryKind,
        preserve_read_only: bool,
        registry: &EntryTypeRegistry,
    ) -> Result<EntryKind> {
        let key = entry.key().to_string();
        let lock_key = format!("{ENTRY_LOCK_PREFIX}{key}");
        self.with_lock(&lock_key, Duration::seconds(10), || async {
            let mut conn = self.conn().await?;
            let existing: Option<String> = conn
                .hget(HASH_KEY, &key)
                .await
                .map_err(|e| Error::Store(format!("redis hget failed: {e}")))?;
            if let Some(json) = &existing {
                if preserve_read_only {
                    let stored: EntryKind = registry.decode(json)?;
                    copy_read_only_fields(&mut entry, &stored);
                }
            }
            let payload = registry.encode(&entry)?;
            let _: () = conn
                .hset(HASH_KEY, &key, payload)
                .await
                .map_err(|e| Error::Store(format!("redis hset failed: {e}")))?;
            Ok(entry.clone())
        })
        .await
    }

    async fn delete_stored(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .hdel(HASH_KEY, key)
            .await
            .map_err(|e| Error::Store(format!("redis hdel failed: {e}")))?;
        Ok(())
    }

    async fn fire_if_due(&self, key: &str, registry: &EntryTypeRegistry) -> Result<FireOutcome> {
        let lock_key = format!("{ENTRY_LOCK_PREFIX}{key}");
        self.with_lock(&lock_key, Duration::seconds(10), || async {
            let mut conn = self.conn().await?;
            let raw: Option<String> = conn
                .hget(HASH_KEY, key)
                .await
                .map_err(|e| Error::Store(format!("redis hget failed: {e}")))?;
            let Some(json) = raw else {
                return Ok(FireOutcome::Gone);
            };
            let mut fresh: EntryKind = registry.decode(&json)?;
            if !fresh.enabled() {
                return Ok(FireOutcome::Skipped);
            }
            let due_in = fresh.due_in();
            if due_in > Duration::zero() {
                return Ok(FireOutcome::NotDue { due_in });
            }
            fresh.sent();
            let payload = registry.encode(&fresh)?;
            let _: () = conn
                .hset(HASH_KEY, key, payload)
                .await
                .map_err(|e| Error::Store(format!("redis hset failed: {e}")))?;
            Ok(FireOutcome::Fired(fresh))
        })
        .await
    }
}

fn copy_read_only_fields(target: &mut EntryKind, source: &EntryKind) {
    for field in target.client_read_only_fields() {
        match (&mut *target, source) {
            (
                EntryKind::Interval { last_sent_at, .. }
                | EntryKind::Crontab { last_sent_at, .. }
                | EntryKind::CrontabTz { last_sent_at, .. },
                EntryKind::Interval {
                    last_sent_at: src, ..
                }
                | EntryKind::Crontab {
                    last_sent_at: src, ..
                }
                | EntryKind::CrontabTz {
                    last_sent_at: src, ..
                },
            ) if *field == "last_sent_at" => {
                *last_sent_at = *src;
            }
            (EntryKind::Event { was_sent, .. }, EntryKind::Event { was_sent: src, .. })
                if *field == "was_sent" =>
            {
                *was_sent = *src;
            }
            _ => {}
        }
    }
}

#[async_trait]
impl LeaderLockBackend for KvStore {
    async fn try_acquire(&self, lock_timeout: Duration) -> Result<Option<LockToken>> {
        let mut conn = self.conn().await?;
        let token = Uuid::new_v4().to_string();
        let ttl_ms = lock_timeout.num_milliseconds().max(1) as usize;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(SCHEDULER_LOCK_KEY)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Store(format!("redis lock acquire failed: {e}")))?;

        Ok(acquired.map(|_| LockToken(token)))
    }

    async fn refresh(&self, token: &LockToken, lock_timeout: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let ttl_ms = lock_timeout.num_milliseconds().max(1);
        let extended: i64 = redis::Script::new(EXTEND_SCRIPT)
            .key(SCHEDULER_LOCK_KEY)
            .arg(&token.0)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Store(format!("redis lock extend failed: {e}")))?;
        if extended == 0 {
            tracing::warn!("another scheduler has seized the leader lock");
        }
        Ok(extended != 0)
    }

    async fn release(&self, token: &LockToken) -> Result<()> {
        let mut conn = self.conn().await?;
        // A failed compare-and-delete (lock already expired/stolen) is success too,
        // per the leader-lock release contract (SPEC_FULL.md §4.D step 3).
        let _: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(SCHEDULER_LOCK_KEY)
            .arg(&token.0)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Store(format!("redis lock release failed: {e}")))?;
        Ok(())
    }
}
