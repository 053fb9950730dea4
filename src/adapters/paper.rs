//! In-memory venue used for dry runs and tests.
//!
//! Closing a position realizes its mark value into the available balance,
//! so the account total is unchanged by a flatten at the current mark.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::PaperVenueConfig;
use crate::domain::{AccountValue, Position, Side};
use crate::error::VenueError;
use crate::exchange::{CloseReport, VenueAdapter, VenueKind, VenueResult};

#[derive(Debug, Clone)]
struct PaperPosition {
    symbol: String,
    /// Signed size, negative = short
    size: Decimal,
    entry_price: Decimal,
    mark_price: Decimal,
    leverage: Decimal,
}

impl PaperPosition {
    fn to_position(&self, venue: &str) -> Position {
        Position {
            venue: venue.to_string(),
            symbol: self.symbol.clone(),
            side: Side::from_signed(self.size),
            size: self.size.abs(),
            entry_price: self.entry_price,
            mark_price: self.mark_price,
            unrealized_pnl: (self.mark_price - self.entry_price) * self.size,
            leverage: self.leverage,
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    available: Decimal,
    positions: Vec<PaperPosition>,
    outage: bool,
    corrupt: bool,
    stuck: HashSet<String>,
}

/// Simulated venue with a mutable book
pub struct PaperVenue {
    id: String,
    state: RwLock<PaperState>,
    value_calls: AtomicU32,
    position_calls: AtomicU32,
    close_calls: AtomicU32,
}

impl PaperVenue {
    pub fn new(id: impl Into<String>, available: Decimal) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(PaperState {
                available,
                ..PaperState::default()
            }),
            value_calls: AtomicU32::new(0),
            position_calls: AtomicU32::new(0),
            close_calls: AtomicU32::new(0),
        }
    }

    pub fn from_config(id: impl Into<String>, config: &PaperVenueConfig) -> Self {
        config
            .positions
            .iter()
            .fold(Self::new(id, config.available_usd), |venue, p| {
                venue.with_position(
                    &p.symbol,
                    p.size,
                    p.entry_price,
                    p.mark_price.unwrap_or(p.entry_price),
                    p.leverage,
                )
            })
    }

    /// Open a position. `size` is signed; negative opens a short.
    pub fn with_position(
        mut self,
        symbol: &str,
        size: Decimal,
        entry_price: Decimal,
        mark_price: Decimal,
        leverage: Decimal,
    ) -> Self {
        if !size.is_zero() {
            self.state.get_mut().positions.push(PaperPosition {
                symbol: symbol.to_string(),
                size,
                entry_price,
                mark_price,
                leverage,
            });
        }
        self
    }

    pub async fn set_mark(&self, symbol: &str, mark_price: Decimal) {
        let mut state = self.state.write().await;
        for position in state.positions.iter_mut().filter(|p| p.symbol == symbol) {
            position.mark_price = mark_price;
        }
    }

    pub async fn set_available(&self, available: Decimal) {
        self.state.write().await.available = available;
    }

    /// Every call fails with `Unavailable` while set
    pub async fn set_outage(&self, outage: bool) {
        self.state.write().await.outage = outage;
    }

    /// Position reads fail with a data error while set
    pub async fn set_corrupt(&self, corrupt: bool) {
        self.state.write().await.corrupt = corrupt;
    }

    /// Make closes of `symbol` silently fail, leaving it open
    pub async fn stick(&self, symbol: &str) {
        self.state.write().await.stuck.insert(symbol.to_string());
    }

    pub async fn unstick(&self, symbol: &str) {
        self.state.write().await.stuck.remove(symbol);
    }

    pub fn value_calls(&self) -> u32 {
        self.value_calls.load(Ordering::SeqCst)
    }

    pub fn position_calls(&self) -> u32 {
        self.position_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn check_outage(&self, state: &PaperState) -> VenueResult<()> {
        if state.outage {
            return Err(VenueError::unavailable(&self.id, "simulated outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl VenueAdapter for PaperVenue {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> VenueKind {
        VenueKind::Paper
    }

    async fn get_account_value(&self) -> VenueResult<AccountValue> {
        self.value_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        self.check_outage(&state)?;

        let equity: Decimal = state
            .positions
            .iter()
            .map(|p| p.to_position(&self.id).mark_value())
            .sum();

        Ok(AccountValue {
            total: state.available + equity,
            available: state.available,
        })
    }

    async fn get_positions(&self) -> VenueResult<Vec<Position>> {
        self.position_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        self.check_outage(&state)?;

        if state.corrupt {
            return Err(VenueError::data(&self.id, "position payload missing size"));
        }

        Ok(state
            .positions
            .iter()
            .map(|p| p.to_position(&self.id))
            .collect())
    }

    async fn close_all_positions(&self) -> VenueResult<CloseReport> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        self.check_outage(&state)?;

        if state.positions.is_empty() {
            debug!(venue = %self.id, "close_all on a flat book");
            return Ok(CloseReport::already_flat());
        }

        let (stuck, closing): (Vec<_>, Vec<_>) = std::mem::take(&mut state.positions)
            .into_iter()
            .partition(|p| state.stuck.contains(&p.symbol));

        let mut closed = Vec::with_capacity(closing.len());
        for position in closing {
            state.available += position.to_position(&self.id).mark_value();
            closed.push(position.symbol);
        }
        state.positions = stuck;

        info!(
            venue = %self.id,
            closed = closed.len(),
            still_open = state.positions.len(),
            "paper venue flattened"
        );

        // Every symbol gets a close issued, stuck ones included
        let mut issued = closed;
        issued.extend(state.positions.iter().map(|p| p.symbol.clone()));
        Ok(CloseReport { closed: issued })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_total_includes_position_equity() {
        let venue = PaperVenue::new("paper", dec!(20)).with_position(
            "BTC",
            dec!(0.001),
            dec!(30000),
            dec!(31000),
            dec!(1),
        );

        let value = venue.get_account_value().await.unwrap();
        assert_eq!(value.available, dec!(20));
        // 0.001 * 30000 + 0.001 * 1000
        assert_eq!(value.total, dec!(51));

        let positions = venue.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, Side::Long);
        assert_eq!(positions[0].unrealized_pnl, dec!(1));
    }

    #[tokio::test]
    async fn test_short_position_pnl_sign() {
        let venue = PaperVenue::new("paper", dec!(10)).with_position(
            "ETH",
            dec!(-2),
            dec!(100),
            dec!(90),
            dec!(5),
        );

        let positions = venue.get_positions().await.unwrap();
        assert_eq!(positions[0].side, Side::Short);
        assert_eq!(positions[0].size, dec!(2));
        assert_eq!(positions[0].unrealized_pnl, dec!(20));

        let value = venue.get_account_value().await.unwrap();
        // margin 2 * 100 / 5 = 40, plus 20 pnl
        assert_eq!(value.total, dec!(70));
    }

    #[tokio::test]
    async fn test_close_realizes_into_available() {
        let venue = PaperVenue::new("paper", dec!(18)).with_position(
            "SOL",
            dec!(3),
            dec!(10),
            dec!(10),
            dec!(1),
        );
        let before = venue.get_account_value().await.unwrap();

        let report = venue.close_all_positions().await.unwrap();
        assert_eq!(report.closed, vec!["SOL".to_string()]);

        let after = venue.get_account_value().await.unwrap();
        assert_eq!(after.total, before.total);
        assert_eq!(after.available, dec!(48));
        assert!(venue.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_on_flat_book() {
        let venue = PaperVenue::new("paper", dec!(5));

        let first = venue.close_all_positions().await.unwrap();
        let second = venue.close_all_positions().await.unwrap();

        assert!(first.was_noop());
        assert!(second.was_noop());
        assert_eq!(venue.close_calls(), 2);
        assert_eq!(venue.get_account_value().await.unwrap().total, dec!(5));
    }

    #[tokio::test]
    async fn test_stuck_symbol_stays_open() {
        let venue = PaperVenue::new("paper", dec!(0))
            .with_position("BTC", dec!(1), dec!(10), dec!(10), dec!(1))
            .with_position("ETH", dec!(1), dec!(5), dec!(5), dec!(1));
        venue.stick("ETH").await;

        venue.close_all_positions().await.unwrap();

        let open = venue.get_positions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, "ETH");

        venue.unstick("ETH").await;
        venue.close_all_positions().await.unwrap();
        assert!(venue.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outage_and_corruption_surface_as_errors() {
        let venue = PaperVenue::new("paper", dec!(1));

        venue.set_outage(true).await;
        let err = venue.get_account_value().await.unwrap_err();
        assert!(err.is_transient());

        venue.set_outage(false).await;
        venue.set_corrupt(true).await;
        let err = venue.get_positions().await.unwrap_err();
        assert!(matches!(err, VenueError::Data { .. }));
    }
}
