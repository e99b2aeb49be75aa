//! Persisted bucket table: a versioned JSON blob behind a key-value store.
//!
//! The core never touches I/O; it hands a [`PersistedState`] to whatever
//! [`StateStore`] was injected. `PgStateStore` keeps the blob in
//! PostgreSQL, `MemoryStateStore` keeps it in process for tests.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;

use crate::buckets::{BucketRecord, BucketStore};

// ---

/// Current blob layout version.
pub const STATE_VERSION: u32 = 1;

/// The persisted blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    #[serde(default)]
    pub buckets: BTreeMap<String, BucketRecord>,
}

impl PersistedState {
    // ---
    pub fn from_store(store: &BucketStore) -> Self {
        Self {
            version: STATE_VERSION,
            buckets: store.to_records(),
        }
    }

    pub fn into_store(self) -> BucketStore {
        BucketStore::from_records(&self.buckets)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize bucket state")
    }

    /// Parse a blob, refusing layouts from other versions.
    pub fn from_json(payload: &str) -> Result<Self> {
        // ---
        let state: PersistedState =
            serde_json::from_str(payload).context("Failed to parse bucket state")?;
        if state.version != STATE_VERSION {
            bail!(
                "Unsupported state version {} (expected {})",
                state.version,
                STATE_VERSION
            );
        }
        Ok(state)
    }
}

/// Opaque key-value blob storage.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Return the blob saved under `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<PersistedState>>;

    /// Replace the blob saved under `key`.
    async fn save(&self, key: &str, state: &PersistedState) -> Result<()>;
}

/// Blob storage in the `predictor_state` table.
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    // ---
    async fn load(&self, key: &str) -> Result<Option<PersistedState>> {
        // ---
        let row = sqlx::query("SELECT payload FROM predictor_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load state '{}'", key))?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                Ok(Some(PersistedState::from_json(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, state: &PersistedState) -> Result<()> {
        // ---
        let payload = state.to_json()?;

        sqlx::query(
            r#"
            INSERT INTO predictor_state (key, version, payload, saved_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE SET
                version  = EXCLUDED.version,
                payload  = EXCLUDED.payload,
                saved_at = EXCLUDED.saved_at
            "#,
        )
        .bind(key)
        .bind(state.version as i32)
        .bind(&payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save state '{}'", key))?;

        Ok(())
    }
}

/// In-process blob storage. Blobs pass through JSON so loads see exactly
/// what a database round trip would produce.
#[derive(Default)]
pub struct MemoryStateStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    // ---
    async fn load(&self, key: &str) -> Result<Option<PersistedState>> {
        let blobs = self.blobs.lock().await;
        blobs
            .get(key)
            .map(|payload| PersistedState::from_json(payload))
            .transpose()
    }

    async fn save(&self, key: &str, state: &PersistedState) -> Result<()> {
        let payload = state.to_json()?;
        self.blobs.lock().await.insert(key.to_string(), payload);
        Ok(())
    }
}

/// [`StateStore::load`] bounded by `timeout`.
pub async fn load_with_timeout(
    store: &dyn StateStore,
    key: &str,
    timeout: Duration,
) -> Result<Option<PersistedState>> {
    // ---
    match tokio::time::timeout(timeout, store.load(key)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("State load timed out after {:?}", timeout)),
    }
}

/// [`StateStore::save`] bounded by `timeout`.
pub async fn save_with_timeout(
    store: &dyn StateStore,
    key: &str,
    state: &PersistedState,
    timeout: Duration,
) -> Result<()> {
    // ---
    match tokio::time::timeout(timeout, store.save(key, state)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("State save timed out after {:?}", timeout)),
    }
}
