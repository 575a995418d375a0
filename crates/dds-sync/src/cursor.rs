//! Durable extraction cursor
//!
//! Tracks, per (profile, extract type), the last window boundary whose load
//! fully committed. Commits only advance: a regression attempt is ignored so
//! replaying an old window can never move the watermark backwards.

use crate::config::WarehouseConfig;
use crate::error::CursorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dds_common::{ExtractType, ProfileKey, WindowTime};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last committed stop time, or `None` before the first successful run.
    async fn read(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
    ) -> Result<Option<WindowTime>, CursorError>;

    /// Record `stop_time` as committed. Monotonic: an earlier value than the
    /// stored one leaves the cursor unchanged.
    async fn commit(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
        stop_time: WindowTime,
    ) -> Result<(), CursorError>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PostgresCursorStore {
    pool: PgPool,
}

impl PostgresCursorStore {
    pub async fn connect(config: &WarehouseConfig) -> Result<Self, CursorError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        let store = Self { pool };
        store.ensure_table().await?;
        Ok(store)
    }

    async fn ensure_table(&self) -> Result<(), CursorError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_cursors (\
                profile_key TEXT NOT NULL, \
                extract_type TEXT NOT NULL, \
                last_stop_time TIMESTAMPTZ NOT NULL, \
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
                PRIMARY KEY (profile_key, extract_type))",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for PostgresCursorStore {
    #[instrument(skip(self))]
    async fn read(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
    ) -> Result<Option<WindowTime>, CursorError> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT last_stop_time FROM sync_cursors \
             WHERE profile_key = $1 AND extract_type = $2",
        )
        .bind(profile_key.as_str())
        .bind(extract_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(ts,)| WindowTime::new(ts)))
    }

    #[instrument(skip(self))]
    async fn commit(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
        stop_time: WindowTime,
    ) -> Result<(), CursorError> {
        // GREATEST keeps the upsert monotonic under any interleaving.
        sqlx::query(
            "INSERT INTO sync_cursors (profile_key, extract_type, last_stop_time, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (profile_key, extract_type) DO UPDATE SET \
                last_stop_time = GREATEST(sync_cursors.last_stop_time, EXCLUDED.last_stop_time), \
                updated_at = now()",
        )
        .bind(profile_key.as_str())
        .bind(extract_type.as_str())
        .bind(stop_time.as_datetime())
        .execute(&self.pool)
        .await?;

        info!(
            profile_key = %profile_key,
            extract_type = %extract_type,
            stop_time = %stop_time,
            "Cursor committed"
        );
        Ok(())
    }
}

// ============================================================================
// In-memory implementation (tests)
// ============================================================================

#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<(String, ExtractType), WindowTime>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn read(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
    ) -> Result<Option<WindowTime>, CursorError> {
        let cursors = match self.cursors.lock() {
            Ok(cursors) => cursors,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(cursors
            .get(&(profile_key.as_str().to_string(), extract_type))
            .copied())
    }

    async fn commit(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
        stop_time: WindowTime,
    ) -> Result<(), CursorError> {
        let mut cursors = match self.cursors.lock() {
            Ok(cursors) => cursors,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = cursors
            .entry((profile_key.as_str().to_string(), extract_type))
            .or_insert(stop_time);
        if stop_time > *slot {
            *slot = stop_time;
        }
        debug!(
            profile_key = %profile_key,
            extract_type = %extract_type,
            committed = %*slot,
            "Cursor committed"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn wt(s: &str) -> WindowTime {
        WindowTime::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_read_before_first_commit_is_none() {
        let store = MemoryCursorStore::new();
        let cursor = store
            .read(&ProfileKey::from("demo"), ExtractType::Incremental)
            .await
            .unwrap();
        assert!(cursor.is_none());
    }

    #[tokio::test]
    async fn test_commit_advances() {
        let store = MemoryCursorStore::new();
        let profile = ProfileKey::from("demo");

        store
            .commit(&profile, ExtractType::Incremental, wt("2024-04-19T00:00Z"))
            .await
            .unwrap();
        store
            .commit(&profile, ExtractType::Incremental, wt("2024-04-19T00:15Z"))
            .await
            .unwrap();

        assert_eq!(
            store
                .read(&profile, ExtractType::Incremental)
                .await
                .unwrap(),
            Some(wt("2024-04-19T00:15Z"))
        );
    }

    #[tokio::test]
    async fn test_commit_ignores_regression() {
        let store = MemoryCursorStore::new();
        let profile = ProfileKey::from("demo");

        store
            .commit(&profile, ExtractType::Full, wt("2024-04-19T00:00Z"))
            .await
            .unwrap();
        store
            .commit(&profile, ExtractType::Full, wt("2024-01-01T00:00Z"))
            .await
            .unwrap();

        assert_eq!(
            store.read(&profile, ExtractType::Full).await.unwrap(),
            Some(wt("2024-04-19T00:00Z"))
        );
    }

    #[tokio::test]
    async fn test_cursors_are_independent_per_key() {
        let store = MemoryCursorStore::new();
        let a = ProfileKey::from("a");
        let b = ProfileKey::from("b");

        store
            .commit(&a, ExtractType::Incremental, wt("2024-04-19T00:00Z"))
            .await
            .unwrap();

        assert!(store
            .read(&b, ExtractType::Incremental)
            .await
            .unwrap()
            .is_none());
        assert!(store.read(&a, ExtractType::Log).await.unwrap().is_none());
    }
}
