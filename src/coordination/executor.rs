use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::config::ExecutionConfig;
use crate::domain::{ActionOutcome, PortfolioSnapshot};
use crate::exchange::{RetryPolicy, VenueAdapter, VenueRegistry};

/// Flattens every venue that holds exposure and verifies the result.
///
/// A venue is done only once a fresh `get_positions()` reports nothing open.
/// Retries are bounded; leftovers become `PartialFailure`, never a silent loop.
pub struct ActionExecutor {
    registry: VenueRegistry,
    attempts: u32,
    backoff: RetryPolicy,
}

/// What a verification pass saw on one venue
enum Residual {
    Flat,
    Open(Vec<String>),
    Unknown(String),
}

impl ActionExecutor {
    pub fn new(registry: VenueRegistry, config: &ExecutionConfig) -> Self {
        Self {
            registry,
            attempts: config.flatten_attempts.max(1),
            backoff: RetryPolicy::new(
                config.flatten_attempts.saturating_sub(1),
                config.flatten_backoff_ms,
                config.flatten_max_backoff_ms,
            ),
        }
    }

    #[instrument(skip_all, fields(venues = ?snapshot.venues_with_exposure()))]
    pub async fn flatten(&self, snapshot: &PortfolioSnapshot) -> ActionOutcome {
        let targets = snapshot.venues_with_exposure();
        if targets.is_empty() {
            info!("no open positions, nothing to flatten");
            return ActionOutcome::Success {
                venues: Vec::new(),
                attempts: 0,
            };
        }

        let mut pending: BTreeMap<String, Vec<String>> = targets
            .iter()
            .map(|venue| (venue.clone(), Vec::new()))
            .collect();

        for attempt in 1..=self.attempts {
            let venues: Vec<String> = pending.keys().cloned().collect();

            join_all(venues.iter().map(|venue| self.close(venue))).await;
            let residuals = join_all(venues.iter().map(|venue| self.verify(venue))).await;

            for (venue, residual) in venues.into_iter().zip(residuals) {
                match residual {
                    Residual::Flat => {
                        pending.remove(&venue);
                    }
                    Residual::Open(symbols) => {
                        pending.insert(venue, symbols);
                    }
                    Residual::Unknown(reason) => {
                        pending.insert(venue, vec![format!("unverified ({})", reason)]);
                    }
                }
            }

            if pending.is_empty() {
                info!(attempts = attempt, "all venues report zero exposure");
                return ActionOutcome::Success {
                    venues: targets,
                    attempts: attempt,
                };
            }

            if attempt < self.attempts {
                let delay = self.backoff.backoff_for(attempt - 1);
                warn!(
                    attempt,
                    still_open = pending.len(),
                    delay_ms = delay.as_millis() as u64,
                    "positions remain after flatten, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let remaining: Vec<String> = pending
            .into_iter()
            .flat_map(|(venue, symbols)| {
                symbols
                    .into_iter()
                    .map(move |symbol| format!("{}:{}", venue, symbol))
            })
            .collect();

        error!(
            attempts = self.attempts,
            remaining = ?remaining,
            "PARTIAL FAILURE: positions still open, operator attention required"
        );
        ActionOutcome::PartialFailure {
            remaining,
            attempts: self.attempts,
        }
    }

    fn adapter(&self, venue: &str) -> Option<Arc<dyn VenueAdapter>> {
        let adapter = self.registry.get(venue);
        if adapter.is_none() {
            error!(venue, "venue with exposure is not registered");
        }
        adapter
    }

    async fn close(&self, venue: &str) {
        let Some(adapter) = self.adapter(venue) else {
            return;
        };
        match adapter.close_all_positions().await {
            Ok(report) => info!(venue, closed = ?report.closed, "close_all_positions issued"),
            Err(e) => warn!(venue, "close_all_positions failed: {}", e),
        }
    }

    async fn verify(&self, venue: &str) -> Residual {
        let Some(adapter) = self.adapter(venue) else {
            return Residual::Unknown("venue not registered".to_string());
        };
        match adapter.get_positions().await {
            Ok(positions) => {
                let open: Vec<String> = positions
                    .into_iter()
                    .filter(|p| p.is_open())
                    .map(|p| p.symbol)
                    .collect();
                if open.is_empty() {
                    Residual::Flat
                } else {
                    Residual::Open(open)
                }
            }
            Err(e) => {
                warn!(venue, "could not verify positions: {}", e);
                Residual::Unknown(e.to_string())
            }
        }
    }
}
