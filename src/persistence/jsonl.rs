//! Append-only JSON Lines files: one record per line
//!
//! `breaches.jsonl` holds breach records, `balance_history.jsonl` holds
//! balance samples. Each append is flushed before the call returns.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{AuditLog, AuditRecord, BalanceSample};
use crate::error::{GuardError, Result};

const BREACH_FILE: &str = "breaches.jsonl";
const BALANCE_FILE: &str = "balance_history.jsonl";

pub struct JsonlAuditLog {
    breach_path: PathBuf,
    balance_path: PathBuf,
    /// Serializes appends and caches the last breach line
    latest: Mutex<Option<AuditRecord>>,
}

impl JsonlAuditLog {
    /// Create the directory if needed and load the last breach already on disk
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await.map_err(|e| {
            GuardError::Persistence(format!("cannot create audit dir {}: {}", dir.display(), e))
        })?;

        let breach_path = dir.join(BREACH_FILE);
        let latest = Self::load_latest(&breach_path).await?;

        Ok(Self {
            breach_path,
            balance_path: dir.join(BALANCE_FILE),
            latest: Mutex::new(latest),
        })
    }

    async fn load_latest(path: &Path) -> Result<Option<AuditRecord>> {
        let file = match fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GuardError::Persistence(format!("{}: {}", path.display(), e))),
        };

        let mut lines = BufReader::new(file).lines();
        let mut latest = None;
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) => latest = Some(record),
                Err(e) => warn!(path = %path.display(), "skipping unreadable audit line: {}", e),
            }
        }
        Ok(latest)
    }

    async fn append<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| GuardError::Persistence(format!("{}: {}", path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| GuardError::Persistence(format!("{}: {}", path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| GuardError::Persistence(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    pub fn breach_path(&self) -> &Path {
        &self.breach_path
    }

    pub fn balance_path(&self) -> &Path {
        &self.balance_path
    }
}

#[async_trait]
impl AuditLog for JsonlAuditLog {
    async fn record_breach(&self, record: &AuditRecord) -> Result<()> {
        let mut latest = self.latest.lock().await;
        Self::append(&self.breach_path, record).await?;
        *latest = Some(record.clone());
        debug!(event_id = %record.event_id, "breach appended to {}", self.breach_path.display());
        Ok(())
    }

    async fn record_balance(&self, sample: &BalanceSample) -> Result<()> {
        let _guard = self.latest.lock().await;
        Self::append(&self.balance_path, sample).await
    }

    async fn latest_breach(&self) -> Result<Option<AuditRecord>> {
        Ok(self.latest.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionOutcome, BreachEvent, BreachKind, Decision, PortfolioSnapshot};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn record(observed: rust_decimal::Decimal) -> AuditRecord {
        let snapshot = Arc::new(PortfolioSnapshot::new(Utc::now(), "paper", observed, vec![]));
        let mut event = BreachEvent::new(BreachKind::MinBalance, observed, dec!(50), snapshot);
        event.attach_decision(Decision::CloseAll, None);
        event.attach_outcome(ActionOutcome::Success {
            venues: vec![],
            attempts: 0,
        });
        AuditRecord::from_event(&event).unwrap()
    }

    #[tokio::test]
    async fn test_appends_one_line_per_breach() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlAuditLog::open(dir.path()).await.unwrap();

        log.record_breach(&record(dec!(48))).await.unwrap();
        log.record_breach(&record(dec!(47))).await.unwrap();

        let text = std::fs::read_to_string(log.breach_path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        let latest = log.latest_breach().await.unwrap().unwrap();
        assert_eq!(latest.observed, dec!(47));
    }

    #[tokio::test]
    async fn test_reopen_recovers_latest_breach() {
        let dir = tempfile::tempdir().unwrap();
        let first = record(dec!(48));
        {
            let log = JsonlAuditLog::open(dir.path()).await.unwrap();
            log.record_breach(&first).await.unwrap();
        }

        let reopened = JsonlAuditLog::open(dir.path()).await.unwrap();
        assert_eq!(reopened.latest_breach().await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_balance_samples_go_to_their_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlAuditLog::open(dir.path()).await.unwrap();
        let snapshot = PortfolioSnapshot::new(Utc::now(), "paper", dec!(100), vec![]);

        log.record_balance(&BalanceSample::from(&snapshot)).await.unwrap();

        let text = std::fs::read_to_string(log.balance_path()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(!log.breach_path().exists());
        assert!(log.latest_breach().await.unwrap().is_none());
    }
}
