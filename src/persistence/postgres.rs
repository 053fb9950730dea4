//! PostgreSQL audit sink
//!
//! Flat columns for querying plus the full record as JSONB for replay.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::{AuditLog, AuditRecord, BalanceSample};
use crate::error::Result;

pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("connected to audit database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run pending migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("audit migrations applied");
        Ok(())
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    #[instrument(skip(self, record), fields(event_id = %record.event_id))]
    async fn record_breach(&self, record: &AuditRecord) -> Result<()> {
        let positions = serde_json::to_value(&record.positions)?;
        let votes = serde_json::to_value(&record.votes)?;
        let outcome = serde_json::to_value(&record.outcome)?;
        let full = serde_json::to_value(record)?;

        sqlx::query(
            r#"
            INSERT INTO breach_events (
                event_id, occurred_at, kind, observed, limit_value, venue_id,
                total_value_usd, available_balance_usd, baseline_value_usd,
                pnl_since_baseline, open_positions, positions, decision,
                agreement_ratio, fail_safe, votes, outcome_status, outcome, record
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(record.event_id)
        .bind(record.timestamp)
        .bind(record.kind.as_str())
        .bind(record.observed)
        .bind(record.limit)
        .bind(&record.venue_id)
        .bind(record.total_value_usd)
        .bind(record.available_balance_usd)
        .bind(record.baseline_value_usd)
        .bind(record.pnl_since_baseline)
        .bind(record.open_positions as i32)
        .bind(&positions)
        .bind(record.decision.token())
        .bind(record.agreement_ratio)
        .bind(record.fail_safe)
        .bind(&votes)
        .bind(record.outcome.as_str())
        .bind(&outcome)
        .bind(&full)
        .execute(&self.pool)
        .await?;

        debug!("breach event persisted");
        Ok(())
    }

    #[instrument(skip(self, sample))]
    async fn record_balance(&self, sample: &BalanceSample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO balance_history (
                sampled_at, venue_id, total_value_usd, available_balance_usd,
                pnl_since_baseline, open_positions
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(sample.timestamp)
        .bind(&sample.venue_id)
        .bind(sample.total_value_usd)
        .bind(sample.available_balance_usd)
        .bind(sample.pnl_since_baseline)
        .bind(sample.open_positions as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest_breach(&self) -> Result<Option<AuditRecord>> {
        let row = sqlx::query(
            r#"
            SELECT record FROM breach_events
            ORDER BY occurred_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let value: serde_json::Value = row.get("record");
                Ok(Some(serde_json::from_value(value)?))
            }
            None => Ok(None),
        }
    }
}
