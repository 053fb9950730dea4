//! Hyperliquid perps venue.
//!
//! Reads come from the public `/info` endpoint (`clearinghouseState`). Closing
//! needs signed orders, so it is routed through an order gateway that speaks
//! the same `POST /positions/close_all` contract as [`super::GatewayVenue`].

use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use super::http::{pick, pick_array, pick_str, parse_decimalish, require_decimal, VenueHttp};
use crate::domain::{AccountValue, Position, Side};
use crate::error::{GuardError, Result, VenueError};
use crate::exchange::{retry_transient, CloseReport, RetryPolicy, VenueAdapter, VenueKind, VenueResult};

pub const DEFAULT_HYPERLIQUID_API: &str = "https://api.hyperliquid.xyz";

pub struct HyperliquidVenue {
    id: String,
    info_url: String,
    account: String,
    order_gateway_url: Option<String>,
    http: VenueHttp,
    retry: RetryPolicy,
}

impl HyperliquidVenue {
    pub fn new(
        id: &str,
        base_url: Option<&str>,
        account: &str,
        order_gateway_url: Option<&str>,
        bearer: Option<String>,
        timeout_ms: u64,
        retry: RetryPolicy,
    ) -> Result<Self> {
        if account.trim().is_empty() {
            return Err(GuardError::InvalidConfig(format!(
                "hyperliquid venue {} needs an account address",
                id
            )));
        }

        let base = base_url
            .unwrap_or(DEFAULT_HYPERLIQUID_API)
            .trim_end_matches('/');

        Ok(Self {
            id: id.to_string(),
            info_url: format!("{}/info", base),
            account: account.trim().to_string(),
            order_gateway_url: order_gateway_url.map(|u| u.trim_end_matches('/').to_string()),
            http: VenueHttp::new(id, timeout_ms, bearer)?,
            retry,
        })
    }

    async fn clearinghouse_state(&self, operation: &str) -> VenueResult<Value> {
        let body = json!({ "type": "clearinghouseState", "user": self.account });
        let (http, url, body) = (&self.http, self.info_url.as_str(), &body);
        retry_transient(&self.retry, &self.id, operation, move || {
            http.request_json(Method::POST, url, Some(body))
        })
        .await
    }

    fn parse_position(&self, entry: &Value) -> VenueResult<Position> {
        let raw = entry.get("position").unwrap_or(entry);
        let symbol = pick_str(raw, &["coin"])
            .ok_or_else(|| VenueError::data(&self.id, "asset position without coin"))?
            .to_string();
        let szi = require_decimal(&self.id, raw, &["szi"])?;
        let entry_price = require_decimal(&self.id, raw, &["entryPx"])?;
        let unrealized_pnl = require_decimal(&self.id, raw, &["unrealizedPnl"])?;

        let size = szi.abs();
        let mark_price = match pick(raw, &["positionValue"]).and_then(parse_decimalish) {
            Some(value) if !size.is_zero() => value / size,
            _ => entry_price,
        };
        let leverage = raw
            .get("leverage")
            .and_then(|l| l.get("value").or(Some(l)))
            .and_then(parse_decimalish)
            .unwrap_or(Decimal::ONE);

        Ok(Position {
            venue: self.id.clone(),
            symbol,
            side: Side::from_signed(szi),
            size,
            entry_price,
            mark_price,
            unrealized_pnl,
            leverage,
        })
    }
}

#[async_trait]
impl VenueAdapter for HyperliquidVenue {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> VenueKind {
        VenueKind::Hyperliquid
    }

    #[instrument(skip(self), fields(venue = %self.id))]
    async fn get_account_value(&self) -> VenueResult<AccountValue> {
        let state = self.clearinghouse_state("get_account_value").await?;
        let summary = state
            .get("marginSummary")
            .ok_or_else(|| VenueError::data(&self.id, "missing marginSummary"))?;

        Ok(AccountValue {
            total: require_decimal(&self.id, summary, &["accountValue"])?,
            available: require_decimal(&self.id, &state, &["withdrawable"])?,
        })
    }

    #[instrument(skip(self), fields(venue = %self.id))]
    async fn get_positions(&self) -> VenueResult<Vec<Position>> {
        let state = self.clearinghouse_state("get_positions").await?;
        let raw = pick_array(&state, &["assetPositions"])
            .ok_or_else(|| VenueError::data(&self.id, "missing assetPositions"))?;

        let mut positions = Vec::with_capacity(raw.len());
        for entry in raw {
            let position = self.parse_position(entry)?;
            if position.is_open() {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    #[instrument(skip(self), fields(venue = %self.id))]
    async fn close_all_positions(&self) -> VenueResult<CloseReport> {
        let Some(gateway) = &self.order_gateway_url else {
            warn!("no order gateway configured, cannot flatten");
            return Err(VenueError::Unsupported {
                venue: self.id.clone(),
                operation: "close_all_positions".to_string(),
            });
        };

        let url = format!("{}/positions/close_all", gateway);
        let body = json!({ "venue": "hyperliquid", "account": self.account, "reduce_only": true });
        let (http, url, body) = (&self.http, url.as_str(), &body);
        let value = retry_transient(&self.retry, &self.id, "close_all_positions", move || {
            http.request_json(Method::POST, url, Some(body))
        })
        .await?;

        let closed: Vec<String> = pick_array(&value, &["closed"])
            .unwrap_or(&[])
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        info!(closed = closed.len(), "hyperliquid close_all routed through order gateway");
        Ok(CloseReport { closed })
    }
}
