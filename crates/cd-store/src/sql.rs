//! Relational backend (SPEC_FULL.md §4.C "Relational backend").
//!
//! Grounded on `original_source/.../sql_scheduler.py`: an `entries` table
//! `{id, key, payload}` and a single-row `lock` table `{last_refreshed_at}`, with
//! `SELECT ... FOR UPDATE` providing both the per-entry and the leader lock, and
//! id-ordered keyset pagination (`id > cursor LIMIT page_size + 1`).

use async_trait::async_trait;
use cd_core::entry::EntryKind;
use cd_core::time::utc_now_naive;
use cd_core::{Error, EntryTypeRegistry, Result};
use chrono::{Duration, NaiveDateTime};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::lock::{LeaderLockBackend, LockToken};
use crate::traits::{EntryStore, FireOutcome, StoredPage};

pub struct SqlStore {
    pool: PgPool,
}

impl SqlStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| Error::Store(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    fn map_sql(e: sqlx::Error) -> Error {
        Error::Store(format!("sql error: {e}"))
    }
}

#[async_trait]
impl EntryStore for SqlStore {
    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cd_entries (
                id BIGSERIAL PRIMARY KEY,
                key TEXT UNIQUE NOT NULL,
                payload JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(Self::map_sql)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cd_scheduler_lock (
                id INT PRIMARY KEY DEFAULT 1,
                token TEXT NOT NULL,
                last_refreshed_at TIMESTAMP NOT NULL,
                CHECK (id = 1)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(Self::map_sql)?;
        Ok(())
    }

    async fn list_stored_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
        registry: &EntryTypeRegistry,
    ) -> Result<StoredPage> {
        let after: i64 = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let limit = (page_size + 1) as i64;
        let rows = sqlx::query(
            "SELECT id, payload FROM cd_entries WHERE id > $1 ORDER BY id ASC LIMIT $2",
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_sql)?;

        let overfetched = rows.len() > page_size;
        let mut rows = rows;
        if overfetched {
            rows.truncate(page_size);
        }

        let next_cursor = if overfetched {
            rows.last().map(|r| r.get::<i64, _>("id").to_string())
        } else {
            None
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: serde_json::Value = row.get("payload");
            items.push(registry.decode_value(payload)?);
        }
        Ok(StoredPage { items, next_cursor })
    }

    async fn get_stored(&self, key: &str, registry: &EntryTypeRegistry) -> Result<Option<EntryKind>> {
        let row = sqlx::query("SELECT payload FROM cd_entries WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_sql)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let payload: serde_json::Value = row.get("payload");
                Ok(Some(registry.decode_value(payload)?))
            }
        }
    }

    async fn save_stored(
        &self,
        mut entry: EntryKind,
        preserve_read_only: bool,
        registry: &EntryTypeRegistry,
    ) -> Result<EntryKind> {
        let mut tx = self.pool.begin().await.map_err(Self::map_sql)?;
        let existing = sqlx::query("SELECT payload FROM cd_entries WHERE key = $1 FOR UPDATE")
            .bind(entry.key())
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::map_sql)?;

        if let Some(row) = &existing {
            if preserve_read_only {
                let payload: serde_json::Value = row.get("payload");
                let stored: EntryKind = registry.decode_value(payload)?;
                copy_read_only_fields(&mut entry, &stored);
            }
        }

        let payload = registry.encode_value(&entry)?;
        sqlx::query(
            r#"
            INSERT INTO cd_entries (key, payload) VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET payload = EXCLUDED.payload
            "#,
        )
        .bind(entry.key())
        .bind(&payload)
        .execute(&mut *tx)
        .await
        .map_err(Self::map_sql)?;

        tx.commit().await.map_err(Self::map_sql)?;
        Ok(entry)
    }

    async fn delete_stored(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cd_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(Self::map_sql)?;
        Ok(())
    }

    async fn fire_if_due(&self, key: &str, registry: &EntryTypeRegistry) -> Result<FireOutcome> {
        let mut tx = self.pool.begin().await.map_err(Self::map_sql)?;
        let row = sqlx::query("SELECT payload FROM cd_entries WHERE key = $1 FOR UPDATE")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::map_sql)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(Self::map_sql)?;
            return Ok(FireOutcome::Gone);
        };

        let payload: serde_json::Value = row.get("payload");
        let mut fresh: EntryKind = registry.decode_value(payload)?;

        if !fresh.enabled() {
            tx.rollback().await.map_err(Self::map_sql)?;
            return Ok(FireOutcome::Skipped);
        }

        let due_in = fresh.due_in();
        if due_in > Duration::zero() {
            tx.rollback().await.map_err(Self::map_sql)?;
            return Ok(FireOutcome::NotDue { due_in });
        }

        fresh.sent();
        let payload = registry.encode_value(&fresh)?;
        sqlx::query("UPDATE cd_entries SET payload = $1 WHERE key = $2")
            .bind(&payload)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(Self::map_sql)?;
        tx.commit().await.map_err(Self::map_sql)?;
        Ok(FireOutcome::Fired(fresh))
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
impl LeaderLockBackend for SqlStore {
    async fn try_acquire(&self, lock_timeout: Duration) -> Result<Option<LockToken>> {
        let mut tx = self.pool.begin().await.map_err(Self::map_sql)?;
        let row = sqlx::query("SELECT token, last_refreshed_at FROM cd_scheduler_lock WHERE id = 1 FOR UPDATE")
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::map_sql)?;

        let now = utc_now_naive();
        let seize = match &row {
            None => true,
            Some(row) => {
                let last_refreshed_at: NaiveDateTime = row.get("last_refreshed_at");
                (now - last_refreshed_at) > lock_timeout
            }
        };

        if !seize {
            tx.rollback().await.map_err(Self::map_sql)?;
            return Ok(None);
        }

        let token = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO cd_scheduler_lock (id, token, last_refreshed_at) VALUES (1, $1, $2)
            ON CONFLICT (id) DO UPDATE SET token = EXCLUDED.token, last_refreshed_at = EXCLUDED.last_refreshed_at
            "#,
        )
        .bind(&token)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Self::map_sql)?;
        tx.commit().await.map_err(Self::map_sql)?;
        Ok(Some(LockToken(token)))
    }

    async fn refresh(&self, token: &LockToken, _lock_timeout: Duration) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Self::map_sql)?;
        let row = sqlx::query("SELECT token FROM cd_scheduler_lock WHERE id = 1 FOR UPDATE")
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::map_sql)?;

        let owns = matches!(&row, Some(row) if row.get::<String, _>("token") == token.0);
        if !owns {
            tx.rollback().await.map_err(Self::map_sql)?;
            tracing::warn!("another scheduler has seized the leader lock");
            return Ok(false);
        }

        sqlx::query("UPDATE cd_scheduler_lock SET last_refreshed_at = $1 WHERE id = 1")
            .bind(utc_now_naive())
            .execute(&mut *tx)
            .await
            .map_err(Self::map_sql)?;
        tx.commit().await.map_err(Self::map_sql)?;
        Ok(true)
    }

    async fn release(&self, token: &LockToken) -> Result<()> {
        // Treat a missing row the same as a successful release (SPEC_FULL.md §9):
        // this is the explicit fix for the source's unhandled "row already gone" path
        // in its cleanup. A token mismatch is likewise silently ignored, never an error.
        let _ = sqlx::query("DELETE FROM cd_scheduler_lock WHERE id = 1 AND token = $1")
            .bind(&token.0)
            .execute(&self.pool)
            .await
            .map_err(Self::map_sql)?;
        Ok(())
    }
}
