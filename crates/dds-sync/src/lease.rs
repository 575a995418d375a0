//! Durable single-flight run lease
//!
//! At most one pipeline run may be in flight per (profile, extract type),
//! across all compute units, not just within one process. The Postgres
//! backend claims a row in `sync_runs` next to the cursor table; a lease
//! whose holder the platform killed goes stale and may be taken over after
//! the cutoff.

use crate::config::WarehouseConfig;
use crate::error::LeaseError;
use async_trait::async_trait;
use dds_common::{ExtractType, ProfileKey};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

/// Leases older than this are treated as abandoned by a killed unit.
pub const STALE_LEASE_SECS: f64 = 2.0 * 60.0 * 60.0;

#[async_trait]
pub trait RunLease: Send + Sync {
    /// Try to claim the run slot. `false` means another run holds it.
    async fn acquire(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
    ) -> Result<bool, LeaseError>;

    /// Give the slot back. Releasing an unheld slot is a no-op.
    async fn release(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
    ) -> Result<(), LeaseError>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PostgresRunLease {
    pool: PgPool,
}

impl PostgresRunLease {
    pub async fn connect(config: &WarehouseConfig) -> Result<Self, LeaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        let lease = Self { pool };
        lease.ensure_table().await?;
        Ok(lease)
    }

    async fn ensure_table(&self) -> Result<(), LeaseError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_runs (\
                profile_key TEXT NOT NULL, \
                extract_type TEXT NOT NULL, \
                acquired_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
                PRIMARY KEY (profile_key, extract_type))",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RunLease for PostgresRunLease {
    #[instrument(skip(self))]
    async fn acquire(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
    ) -> Result<bool, LeaseError> {
        // The conditional upsert claims the slot when it is free or stale;
        // zero rows affected means a live run holds it.
        let result = sqlx::query(
            "INSERT INTO sync_runs (profile_key, extract_type, acquired_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (profile_key, extract_type) DO UPDATE SET \
                acquired_at = now() \
             WHERE sync_runs.acquired_at < now() - make_interval(secs => $3)",
        )
        .bind(profile_key.as_str())
        .bind(extract_type.as_str())
        .bind(STALE_LEASE_SECS)
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() == 1;
        info!(
            profile_key = %profile_key,
            extract_type = %extract_type,
            acquired,
            "Run lease attempt"
        );
        Ok(acquired)
    }

    #[instrument(skip(self))]
    async fn release(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
    ) -> Result<(), LeaseError> {
        sqlx::query(
            "DELETE FROM sync_runs WHERE profile_key = $1 AND extract_type = $2",
        )
        .bind(profile_key.as_str())
        .bind(extract_type.as_str())
        .execute(&self.pool)
        .await?;

        debug!(
            profile_key = %profile_key,
            extract_type = %extract_type,
            "Run lease released"
        );
        Ok(())
    }
}

// ============================================================================
// In-memory implementation (tests)
// ============================================================================

#[derive(Default)]
pub struct MemoryRunLease {
    held: Mutex<HashSet<(String, ExtractType)>>,
}

impl MemoryRunLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLease for MemoryRunLease {
    async fn acquire(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
    ) -> Result<bool, LeaseError> {
        let mut held = match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(held.insert((profile_key.as_str().to_string(), extract_type)))
    }

    async fn release(
        &self,
        profile_key: &ProfileKey,
        extract_type: ExtractType,
    ) -> Result<(), LeaseError> {
        let mut held = match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&(profile_key.as_str().to_string(), extract_type));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_is_rejected_until_release() {
        let lease = MemoryRunLease::new();
        let profile = ProfileKey::from("demo");

        assert!(lease
            .acquire(&profile, ExtractType::Incremental)
            .await
            .unwrap());
        assert!(!lease
            .acquire(&profile, ExtractType::Incremental)
            .await
            .unwrap());

        lease
            .release(&profile, ExtractType::Incremental)
            .await
            .unwrap();
        assert!(lease
            .acquire(&profile, ExtractType::Incremental)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_slots_are_independent_per_key() {
        let lease = MemoryRunLease::new();
        let a = ProfileKey::from("a");
        let b = ProfileKey::from("b");

        assert!(lease.acquire(&a, ExtractType::Incremental).await.unwrap());
        assert!(lease.acquire(&b, ExtractType::Incremental).await.unwrap());
        assert!(lease.acquire(&a, ExtractType::Full).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_of_unheld_slot_is_a_noop() {
        let lease = MemoryRunLease::new();
        let profile = ProfileKey::from("demo");

        lease
            .release(&profile, ExtractType::Incremental)
            .await
            .unwrap();
        assert!(lease
            .acquire(&profile, ExtractType::Incremental)
            .await
            .unwrap());
    }
}
