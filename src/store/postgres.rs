//! PostgreSQL-backed transaction store

use super::{InsertOutcome, StoreError, TransactionStore};
use crate::config::DatabaseConfig;
use crate::types::{
    ClassificationResult, Priority, TransactionInput, TransactionRecord, TransactionStats,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

const RECORD_COLUMNS: &str = "id, tx_hash, from_address, to_address, value_eth, gas_price_gwei, \
     input_data, tx_timestamp, risk_score, priority, inference_time_ms, created_at";

#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.name)
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
}

impl PgTransactionStore {
    /// Connect eagerly; fails if the database is unreachable
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = pool_options(config)
            .connect_with(connect_options(config))
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to PostgreSQL at {}:{}",
                    config.host, config.port
                )
            })?;
        info!(host = %config.host, port = config.port, db = %config.name, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create the pool without opening a connection, so callers can start
    /// while the database is still coming up
    pub fn connect_lazy(config: &DatabaseConfig) -> Self {
        let pool = pool_options(config).connect_lazy_with(connect_options(config));
        Self { pool }
    }

    /// Create the table and indexes if they do not exist yet
    pub async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to apply database schema")?;
        debug!("Database schema applied");
        Ok(())
    }
}

impl<'r> FromRow<'r, PgRow> for TransactionRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let priority: String = row.try_get("priority")?;
        let priority = priority
            .parse::<Priority>()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "priority".to_string(),
                source: e.into(),
            })?;

        Ok(Self {
            id: row.try_get("id")?,
            tx_hash: row.try_get("tx_hash")?,
            from_address: row.try_get("from_address")?,
            to_address: row.try_get("to_address")?,
            value_eth: row.try_get("value_eth")?,
            gas_price_gwei: row.try_get("gas_price_gwei")?,
            input_data: row.try_get("input_data")?,
            tx_timestamp: row.try_get("tx_timestamp")?,
            risk_score: row.try_get("risk_score")?,
            priority,
            inference_time_ms: row.try_get("inference_time_ms")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn insert(
        &self,
        tx: &TransactionInput,
        result: &ClassificationResult,
    ) -> Result<InsertOutcome, StoreError> {
        let mut db_tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO transactions
                (tx_hash, from_address, to_address, value_eth, gas_price_gwei,
                 input_data, tx_timestamp, risk_score, priority, inference_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (tx_hash) DO NOTHING
            RETURNING id, created_at
            "#,
        )
        .bind(tx.tx_hash())
        .bind(tx.from_address())
        .bind(tx.to_address())
        .bind(tx.value_eth())
        .bind(tx.gas_price_gwei())
        .bind(tx.input_data())
        .bind(tx.timestamp())
        .bind(result.risk_score)
        .bind(result.priority.as_str())
        .bind(result.inference_time_ms)
        .fetch_optional(&mut *db_tx)
        .await?;

        db_tx.commit().await?;

        match row {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let created_at: DateTime<Utc> = row.try_get("created_at")?;
                Ok(InsertOutcome::Inserted(TransactionRecord::new(
                    id, tx, result, created_at,
                )))
            }
            None => Ok(InsertOutcome::Duplicate {
                tx_hash: tx.tx_hash().to_string(),
            }),
        }
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<TransactionRecord>, StoreError> {
        let records = sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM transactions ORDER BY id ASC OFFSET $1 LIMIT $2"
        ))
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<TransactionRecord>, StoreError> {
        let records = sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM transactions ORDER BY created_at DESC, id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn stats(&self) -> Result<TransactionStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE priority = 'HIGH') AS high_priority,
                COUNT(*) FILTER (WHERE priority = 'LOW') AS low_priority,
                AVG(risk_score) AS avg_risk_score,
                AVG(inference_time_ms) AS avg_inference_time_ms
            FROM transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(TransactionStats {
            total: row.try_get("total")?,
            high_priority: row.try_get("high_priority")?,
            low_priority: row.try_get("low_priority")?,
            avg_risk_score: row.try_get("avg_risk_score")?,
            avg_inference_time_ms: row.try_get("avg_inference_time_ms")?,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
