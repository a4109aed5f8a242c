//! PostgreSQL store backend
//!
//! Persistent storage for multi-instance deployments. Artifacts live in a
//! two-column table with a non-unique index on the key:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS endorsements (
//!     kv_key text NOT NULL,
//!     kv_val text NOT NULL
//! );
//! CREATE INDEX IF NOT EXISTS idx_endorsements_key ON endorsements(kv_key);
//! ```
//!
//! `kv_val` holds a JSON array of base64 artifact strings (see
//! [`encode_value`](super::encode_value)).

use super::{decode_value, encode_value, EndorsementStore};
use crate::config::DatabaseConfig;
use crate::coserv::Artifact;
use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, Executor, PgPool, Row};
use tracing::{error, info};

/// PostgreSQL artifact table
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    table: String,
}

impl PostgresStore {
    /// Connect using `config` and create `table` if it does not exist
    pub async fn connect(config: &DatabaseConfig, table: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url())
            .await
            .map_err(|e| StoreError::ConnectionFailure(e.to_string()))?;

        info!(host = %config.host, database = %config.name, "Connected to PostgreSQL");

        let store = Self::from_pool(pool, table);
        store.run_migrations().await?;
        Ok(store)
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                kv_key text NOT NULL,
                kv_val text NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_key ON {table}(kv_key);
            "#,
            table = self.table
        );

        // Plain string execution uses the simple protocol, which allows several statements
        (&self.pool)
            .execute(ddl.as_str())
            .await
            .map_err(|e| StoreError::ConnectionFailure(e.to_string()))?;

        info!(table = %self.table, "Database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl EndorsementStore for PostgresStore {
    async fn fetch(&self, key: &str) -> Result<Vec<Artifact>, StoreError> {
        let sql = format!("SELECT kv_val FROM {} WHERE kv_key = $1", self.table);
        let rows = sqlx::query(&sql)
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Failed to query artifacts");
                StoreError::ConnectionFailure(e.to_string())
            })?;

        let mut artifacts = Vec::new();
        for row in rows {
            let value: String = row
                .try_get("kv_val")
                .map_err(|e| StoreError::MalformedValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;
            artifacts.extend(decode_value(key, &value)?);
        }

        if artifacts.is_empty() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(artifacts)
    }

    async fn replace(&self, key: &str, artifacts: Vec<Artifact>) -> Result<(), StoreError> {
        let tx_failure = |e: sqlx::Error| {
            error!(key = %key, error = %e, "Failed to replace artifacts");
            StoreError::TransactionFailure(e.to_string())
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::ConnectionFailure(e.to_string()))?;

        sqlx::query(&format!("DELETE FROM {} WHERE kv_key = $1", self.table))
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(tx_failure)?;

        if !artifacts.is_empty() {
            sqlx::query(&format!(
                "INSERT INTO {} (kv_key, kv_val) VALUES ($1, $2)",
                self.table
            ))
            .bind(key)
            .bind(encode_value(&artifacts))
            .execute(&mut *tx)
            .await
            .map_err(tx_failure)?;
        }

        tx.commit().await.map_err(tx_failure)?;

        info!(key = %key, count = artifacts.len(), "Replaced artifacts");
        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
