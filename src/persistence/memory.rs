use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{AuditLog, AuditRecord, BalanceSample};
use crate::error::{GuardError, Result};

/// Keeps the trail in memory; used for dry runs and tests
#[derive(Default)]
pub struct MemoryAuditLog {
    breaches: RwLock<Vec<AuditRecord>>,
    balances: RwLock<Vec<BalanceSample>>,
    failing: AtomicBool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn breaches(&self) -> Vec<AuditRecord> {
        self.breaches.read().await.clone()
    }

    pub async fn balances(&self) -> Vec<BalanceSample> {
        self.balances.read().await.clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GuardError::Persistence("audit sink is failing".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record_breach(&self, record: &AuditRecord) -> Result<()> {
        self.check()?;
        self.breaches.write().await.push(record.clone());
        Ok(())
    }

    async fn record_balance(&self, sample: &BalanceSample) -> Result<()> {
        self.check()?;
        self.balances.write().await.push(sample.clone());
        Ok(())
    }

    async fn latest_breach(&self) -> Result<Option<AuditRecord>> {
        Ok(self.breaches.read().await.last().cloned())
    }
}
