use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

use crate::domain::PortfolioSnapshot;
use crate::error::{AggregationError, VenueError};
use crate::exchange::{VenueAdapter, VenueRegistry};

use super::BaselineTracker;

/// Produces one logical snapshot per tick from every active venue.
///
/// Venues are queried in parallel and joined before anything is returned;
/// any single failure fails the whole aggregation.
pub struct PortfolioAggregator {
    registry: VenueRegistry,
    baseline: Mutex<BaselineTracker>,
    max_value_drift_usd: Option<Decimal>,
}

impl PortfolioAggregator {
    pub fn new(registry: VenueRegistry) -> Self {
        Self {
            registry,
            baseline: Mutex::new(BaselineTracker::new()),
            max_value_drift_usd: None,
        }
    }

    /// Reject venue data whose reported total strays this far from the parts
    pub fn with_max_value_drift(mut self, max_drift: Option<Decimal>) -> Self {
        self.max_value_drift_usd = max_drift;
        self
    }

    pub fn registry(&self) -> &VenueRegistry {
        &self.registry
    }

    /// Snapshot the active venues and attach the lookback baseline.
    #[instrument(skip(self), fields(venues = active.len()))]
    pub async fn snapshot(
        &self,
        active: &[String],
        lookback_hours: u64,
    ) -> Result<PortfolioSnapshot, AggregationError> {
        let adapters = self.registry.resolve(active)?;

        let results = join_all(adapters.iter().map(|adapter| self.venue_snapshot(adapter.as_ref()))).await;

        let mut parts = Vec::with_capacity(results.len());
        for (adapter, result) in adapters.iter().zip(results) {
            match result {
                Ok(part) => parts.push(part),
                Err(source) => {
                    error!(venue = adapter.id(), "aggregation failed: {}", source);
                    return Err(AggregationError::VenueFailed {
                        venue: adapter.id().to_string(),
                        source,
                    });
                }
            }
        }

        let merged = PortfolioSnapshot::merge(parts).ok_or(AggregationError::NoVenues)?;

        let baseline = self.baseline.lock().await.observe(
            merged.timestamp(),
            merged.total_value_usd(),
            lookback_hours,
        );
        let snapshot = merged.with_baseline(baseline);

        debug!(
            total = %snapshot.total_value_usd(),
            available = %snapshot.available_balance_usd(),
            pnl = %snapshot.realized_pnl_since_baseline(),
            positions = snapshot.positions().len(),
            "portfolio snapshot"
        );
        Ok(snapshot)
    }

    /// Make the next successful snapshot the new baseline
    pub async fn reanchor(&self) {
        self.baseline.lock().await.reanchor();
    }

    async fn venue_snapshot(&self, adapter: &dyn VenueAdapter) -> Result<PortfolioSnapshot, VenueError> {
        let (account, positions) =
            tokio::try_join!(adapter.get_account_value(), adapter.get_positions())?;

        let snapshot = PortfolioSnapshot::new(Utc::now(), adapter.id(), account.available, positions);

        if let Some(max_drift) = self.max_value_drift_usd {
            let drift = (account.total - snapshot.total_value_usd()).abs();
            if drift > max_drift {
                return Err(VenueError::data(
                    adapter.id(),
                    format!(
                        "reported total {} differs from reconstructed {} by {}",
                        account.total,
                        snapshot.total_value_usd(),
                        drift
                    ),
                ));
            }
            if !drift.is_zero() {
                warn!(venue = adapter.id(), %drift, "venue total drift within tolerance");
            }
        }

        Ok(snapshot)
    }
}
