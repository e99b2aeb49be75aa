//! Database schema management for `heatpump-predictor`.
//!
//! Ensures the state table exists before the bucket table is loaded.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create the persisted-state table (idempotent).
///
/// One row per state key; the payload is the serialized bucket table and
/// is replaced as a whole on every save.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS predictor_state (
            key       TEXT        PRIMARY KEY,
            version   INTEGER     NOT NULL,
            payload   TEXT        NOT NULL,
            saved_at  TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
