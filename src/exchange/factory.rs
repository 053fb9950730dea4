use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::{GatewayVenue, HyperliquidVenue, PaperVenue};
use crate::config::{AppConfig, ExecutionConfig, VenueConfig};
use crate::error::{GuardError, Result};

use super::{RetryPolicy, VenueAdapter, VenueKind, VenueRegistry};

/// Balance seeded into a paper stand-in that has no `[venues.paper]` section
const DRY_RUN_AVAILABLE_USD: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);

fn read_api_key(venue: &VenueConfig) -> Result<Option<String>> {
    let Some(var) = venue.api_key_env.as_deref() else {
        return Ok(None);
    };
    std::env::var(var).map(Some).map_err(|_| {
        GuardError::InvalidConfig(format!(
            "venue {} expects its API key in ${}, which is not set",
            venue.id, var
        ))
    })
}

fn paper_stand_in(venue: &VenueConfig) -> PaperVenue {
    match &venue.paper {
        Some(paper) => PaperVenue::from_config(&venue.id, paper),
        None => PaperVenue::new(&venue.id, DRY_RUN_AVAILABLE_USD),
    }
}

/// Build one venue adapter from its config entry.
pub fn build_venue(
    venue: &VenueConfig,
    execution: &ExecutionConfig,
    dry_run: bool,
) -> Result<Arc<dyn VenueAdapter>> {
    if dry_run || venue.kind == VenueKind::Paper {
        if venue.kind != VenueKind::Paper {
            info!(venue = %venue.id, kind = %venue.kind, "dry run: using paper venue");
        }
        return Ok(Arc::new(paper_stand_in(venue)));
    }

    let retry = RetryPolicy::new(
        execution.venue_retries,
        execution.venue_backoff_ms,
        execution.flatten_max_backoff_ms,
    );
    let api_key = read_api_key(venue)?;

    match venue.kind {
        VenueKind::Gateway => {
            let base_url = venue.base_url.as_deref().ok_or_else(|| {
                GuardError::InvalidConfig(format!("gateway venue {} needs base_url", venue.id))
            })?;
            Ok(Arc::new(GatewayVenue::new(
                &venue.id,
                base_url,
                api_key,
                venue.timeout_ms,
                retry,
            )?))
        }
        VenueKind::Hyperliquid => {
            let account = venue.account.as_deref().ok_or_else(|| {
                GuardError::InvalidConfig(format!("hyperliquid venue {} needs account", venue.id))
            })?;
            if venue.order_gateway_url.is_none() {
                warn!(
                    venue = %venue.id,
                    "hyperliquid venue has no order_gateway_url; flatten requests will fail"
                );
            }
            Ok(Arc::new(HyperliquidVenue::new(
                &venue.id,
                venue.base_url.as_deref(),
                account,
                venue.order_gateway_url.as_deref(),
                api_key,
                venue.timeout_ms,
                retry,
            )?))
        }
        VenueKind::Paper => Ok(Arc::new(paper_stand_in(venue))),
    }
}

/// Build the registry for every active venue.
///
/// In dry-run mode an active id without a `[[venues]]` entry gets an
/// unconfigured paper venue.
pub fn build_registry(config: &AppConfig) -> Result<VenueRegistry> {
    let dry_run = config.engine.dry_run;
    let mut registry = VenueRegistry::new();

    for id in &config.engine.active_venues {
        let adapter = match config.venue(id) {
            Some(venue) => build_venue(venue, &config.execution, dry_run)?,
            None if dry_run => {
                Arc::new(PaperVenue::new(id.as_str(), DRY_RUN_AVAILABLE_USD)) as Arc<dyn VenueAdapter>
            }
            None => {
                return Err(GuardError::InvalidConfig(format!(
                    "active venue '{}' has no [[venues]] entry",
                    id
                )))
            }
        };
        registry.register(adapter);
    }

    info!(venues = ?registry.ids(), dry_run, "venue registry built");
    Ok(registry)
}
