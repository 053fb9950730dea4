//! Venue behind a signing sidecar that speaks the normalized REST contract:
//!
//! - `GET  {base}/account`            -> `{ "total_value_usd", "available_balance_usd" }`
//! - `GET  {base}/positions`          -> `{ "positions": [ { symbol, size, entry_price, ... } ] }`
//! - `POST {base}/positions/close_all` -> `{ "closed": [symbol, ...] }`
//!
//! Sizes are signed (negative = short). Keys and signing stay in the sidecar.

use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::http::{pick, pick_array, pick_str, require_decimal, parse_decimalish, VenueHttp};
use crate::domain::{AccountValue, Position, Side};
use crate::error::{GuardError, Result, VenueError};
use crate::exchange::{retry_transient, CloseReport, RetryPolicy, VenueAdapter, VenueKind, VenueResult};

pub struct GatewayVenue {
    id: String,
    base_url: String,
    http: VenueHttp,
    retry: RetryPolicy,
}

impl GatewayVenue {
    pub fn new(
        id: &str,
        base_url: &str,
        bearer: Option<String>,
        timeout_ms: u64,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(GuardError::InvalidConfig(format!(
                "venue {} needs a base_url",
                id
            )));
        }

        Ok(Self {
            id: id.to_string(),
            base_url,
            http: VenueHttp::new(id, timeout_ms, bearer)?,
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn parse_position(&self, raw: &Value) -> VenueResult<Position> {
        let symbol = pick_str(raw, &["symbol", "coin", "market"])
            .ok_or_else(|| VenueError::data(&self.id, "position without symbol"))?
            .to_string();
        let raw_size = require_decimal(&self.id, raw, &["size", "szi"])?;

        // An explicit side wins over the size sign
        let side = match pick_str(raw, &["side"]).map(str::to_ascii_lowercase).as_deref() {
            Some("short") | Some("sell") => Side::Short,
            Some("long") | Some("buy") => Side::Long,
            _ => Side::from_signed(raw_size),
        };
        let signed_size = match side {
            Side::Short => -raw_size.abs(),
            Side::Long => raw_size.abs(),
        };

        let entry_price = require_decimal(&self.id, raw, &["entry_price", "entryPx"])?;
        let mark_price = pick(raw, &["mark_price", "markPx"])
            .and_then(parse_decimalish)
            .unwrap_or(entry_price);
        let unrealized_pnl = pick(raw, &["unrealized_pnl", "unrealizedPnl"])
            .and_then(parse_decimalish)
            .unwrap_or((mark_price - entry_price) * signed_size);
        let leverage = pick(raw, &["leverage"])
            .and_then(parse_decimalish)
            .unwrap_or(Decimal::ONE);

        Ok(Position {
            venue: self.id.clone(),
            symbol,
            side,
            size: signed_size.abs(),
            entry_price,
            mark_price,
            unrealized_pnl,
            leverage,
        })
    }
}

#[async_trait]
impl VenueAdapter for GatewayVenue {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> VenueKind {
        VenueKind::Gateway
    }

    #[instrument(skip(self), fields(venue = %self.id))]
    async fn get_account_value(&self) -> VenueResult<AccountValue> {
        let url = self.url("/account");
        let (http, url) = (&self.http, url.as_str());
        let value = retry_transient(&self.retry, &self.id, "get_account_value", move || {
            http.request_json(Method::GET, url, None)
        })
        .await?;

        Ok(AccountValue {
            total: require_decimal(&self.id, &value, &["total_value_usd", "total_value", "equity"])?,
            available: require_decimal(
                &self.id,
                &value,
                &["available_balance_usd", "available_balance", "withdrawable"],
            )?,
        })
    }

    #[instrument(skip(self), fields(venue = %self.id))]
    async fn get_positions(&self) -> VenueResult<Vec<Position>> {
        let url = self.url("/positions");
        let (http, url) = (&self.http, url.as_str());
        let value = retry_transient(&self.retry, &self.id, "get_positions", move || {
            http.request_json(Method::GET, url, None)
        })
        .await?;

        let raw = pick_array(&value, &["positions", "data"])
            .ok_or_else(|| VenueError::data(&self.id, "positions payload is not a list"))?;

        let mut positions = Vec::with_capacity(raw.len());
        for item in raw {
            let position = self.parse_position(item)?;
            if position.is_open() {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    #[instrument(skip(self), fields(venue = %self.id))]
    async fn close_all_positions(&self) -> VenueResult<CloseReport> {
        let url = self.url("/positions/close_all");
        let body = json!({ "reduce_only": true });
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

        info!(closed = closed.len(), "gateway close_all acknowledged");
        Ok(CloseReport { closed })
    }
}
