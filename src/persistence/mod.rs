//! Audit trail for breach events and balance history
//!
//! Every breach is written once, after its decision and outcome are known.
//! A failed write is fatal to the controller: an unaudited action is not
//! acceptable.

mod jsonl;
mod memory;
mod postgres;
mod record;

pub use jsonl::JsonlAuditLog;
pub use memory::MemoryAuditLog;
pub use postgres::PostgresAuditLog;
pub use record::{AuditRecord, BalanceSample};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{AuditConfig, AuditSinkKind};
use crate::error::{GuardError, Result};

/// Append-only sink for the audit trail
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Persist a completed breach event
    async fn record_breach(&self, record: &AuditRecord) -> Result<()>;

    /// Persist a breach-free balance sample
    async fn record_balance(&self, sample: &BalanceSample) -> Result<()>;

    /// Most recently persisted breach, if any
    async fn latest_breach(&self) -> Result<Option<AuditRecord>>;
}

/// Build the configured audit sink
pub async fn build_audit_log(config: &AuditConfig) -> Result<Arc<dyn AuditLog>> {
    match config.sink {
        AuditSinkKind::Jsonl => {
            info!(dir = %config.dir.display(), "audit trail: jsonl");
            Ok(Arc::new(JsonlAuditLog::open(&config.dir).await?))
        }
        AuditSinkKind::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                GuardError::InvalidConfig("audit.database_url is required for the postgres sink".into())
            })?;
            info!("audit trail: postgres");
            let log = PostgresAuditLog::connect(url, config.max_connections).await?;
            log.migrate().await?;
            Ok(Arc::new(log))
        }
        AuditSinkKind::Memory => {
            info!("audit trail: in-memory (not durable)");
            Ok(Arc::new(MemoryAuditLog::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_postgres_sink_requires_url() {
        let config = AuditConfig {
            sink: AuditSinkKind::Postgres,
            database_url: None,
            ..AuditConfig::default()
        };
        assert!(matches!(
            build_audit_log(&config).await,
            Err(GuardError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_jsonl_sink_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuditConfig {
            sink: AuditSinkKind::Jsonl,
            dir: dir.path().join("audit"),
            ..AuditConfig::default()
        };
        let log = build_audit_log(&config).await.unwrap();
        assert!(log.latest_breach().await.unwrap().is_none());
        assert!(dir.path().join("audit").is_dir());
    }
}
