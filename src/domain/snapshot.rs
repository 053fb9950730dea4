use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::Position;

/// Venue id used for a snapshot merged from several venues
pub const MERGED_VENUE_ID: &str = "merged";

/// Account balances as reported by a venue
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountValue {
    /// Venue-side total equity
    pub total: Decimal,
    /// Free collateral (withdrawable)
    pub available: Decimal,
}

/// Immutable view of the portfolio at one instant.
///
/// `total_value_usd` is always `available_balance_usd + Σ mark_value`; the
/// constructor derives it rather than accepting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    timestamp: DateTime<Utc>,
    venue_id: String,
    total_value_usd: Decimal,
    available_balance_usd: Decimal,
    positions: Vec<Position>,
    /// Value of the baseline sample the P&L is measured from
    baseline_value_usd: Decimal,
    realized_pnl_since_baseline: Decimal,
}

impl PortfolioSnapshot {
    /// Build a snapshot whose baseline is its own value (zero P&L)
    pub fn new(
        timestamp: DateTime<Utc>,
        venue_id: impl Into<String>,
        available_balance_usd: Decimal,
        positions: Vec<Position>,
    ) -> Self {
        let total = available_balance_usd + positions.iter().map(Position::mark_value).sum::<Decimal>();
        Self {
            timestamp,
            venue_id: venue_id.into(),
            total_value_usd: total,
            available_balance_usd,
            positions,
            baseline_value_usd: total,
            realized_pnl_since_baseline: Decimal::ZERO,
        }
    }

    /// Merge per-venue snapshots into one logical snapshot.
    ///
    /// Balances are summed, positions concatenated in input order (each keeps
    /// its venue tag), and the timestamp is the latest of the inputs.
    pub fn merge(parts: Vec<PortfolioSnapshot>) -> Option<Self> {
        if parts.len() == 1 {
            return parts.into_iter().next();
        }

        let timestamp = parts.iter().map(|p| p.timestamp).max()?;
        let available = parts.iter().map(|p| p.available_balance_usd).sum();
        let positions = parts.into_iter().flat_map(|p| p.positions).collect();

        Some(Self::new(timestamp, MERGED_VENUE_ID, available, positions))
    }

    /// Attach the baseline the P&L is measured from
    pub fn with_baseline(mut self, baseline_value_usd: Decimal) -> Self {
        self.baseline_value_usd = baseline_value_usd;
        self.realized_pnl_since_baseline = self.total_value_usd - baseline_value_usd;
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn venue_id(&self) -> &str {
        &self.venue_id
    }

    pub fn total_value_usd(&self) -> Decimal {
        self.total_value_usd
    }

    pub fn available_balance_usd(&self) -> Decimal {
        self.available_balance_usd
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn baseline_value_usd(&self) -> Decimal {
        self.baseline_value_usd
    }

    pub fn realized_pnl_since_baseline(&self) -> Decimal {
        self.realized_pnl_since_baseline
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.is_open())
    }

    pub fn has_open_positions(&self) -> bool {
        self.open_positions().next().is_some()
    }

    /// Venues that currently hold at least one open position
    pub fn venues_with_exposure(&self) -> Vec<String> {
        let mut venues: Vec<String> = Vec::new();
        for p in self.open_positions() {
            if !venues.iter().any(|v| v == &p.venue) {
                venues.push(p.venue.clone());
            }
        }
        venues
    }

    /// Recompute `available + Σ mark_value` from the parts
    pub fn reconstructed_total(&self) -> Decimal {
        self.available_balance_usd
            + self
                .positions
                .iter()
                .map(Position::mark_value)
                .sum::<Decimal>()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.iter().map(|p| p.unrealized_pnl).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;

    fn pos(venue: &str, symbol: &str, size: Decimal, price: Decimal) -> Position {
        Position {
            venue: venue.to_string(),
            symbol: symbol.to_string(),
            side: Side::Long,
            size,
            entry_price: price,
            mark_price: price,
            unrealized_pnl: Decimal::ZERO,
            leverage: dec!(1),
        }
    }

    #[test]
    fn test_total_is_available_plus_mark_values() {
        let snap = PortfolioSnapshot::new(
            Utc::now(),
            "paper",
            dec!(100),
            vec![pos("paper", "BTC", dec!(0.01), dec!(60000)), pos("paper", "SOL", dec!(2), dec!(150))],
        );
        assert_eq!(snap.total_value_usd(), dec!(1000));
        assert_eq!(snap.total_value_usd(), snap.reconstructed_total());
        assert_eq!(snap.realized_pnl_since_baseline(), Decimal::ZERO);
    }

    #[test]
    fn test_empty_positions_is_valid() {
        let snap = PortfolioSnapshot::new(Utc::now(), "paper", dec!(48), vec![]);
        assert_eq!(snap.total_value_usd(), dec!(48));
        assert!(!snap.has_open_positions());
        assert!(snap.venues_with_exposure().is_empty());
    }

    #[test]
    fn test_baseline_sets_pnl() {
        let snap = PortfolioSnapshot::new(Utc::now(), "paper", dec!(74), vec![]).with_baseline(dec!(100));
        assert_eq!(snap.realized_pnl_since_baseline(), dec!(-26));
        assert_eq!(snap.baseline_value_usd(), dec!(100));
    }

    #[test]
    fn test_merge_sums_and_keeps_venue_tags() {
        let earlier = Utc::now() - chrono::Duration::seconds(1);
        let a = PortfolioSnapshot::new(earlier, "a", dec!(10), vec![pos("a", "BTC", dec!(1), dec!(5))]);
        let b = PortfolioSnapshot::new(Utc::now(), "b", dec!(20), vec![pos("b", "ETH", dec!(1), dec!(7))]);
        let b_ts = b.timestamp();

        let merged = PortfolioSnapshot::merge(vec![a, b]).unwrap();
        assert_eq!(merged.venue_id(), MERGED_VENUE_ID);
        assert_eq!(merged.available_balance_usd(), dec!(30));
        assert_eq!(merged.total_value_usd(), dec!(42));
        assert_eq!(merged.timestamp(), b_ts);
        let venues: Vec<&str> = merged.positions().iter().map(|p| p.venue.as_str()).collect();
        assert_eq!(venues, vec!["a", "b"]);
        assert_eq!(merged.venues_with_exposure(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_merge_single_keeps_venue_id() {
        let a = PortfolioSnapshot::new(Utc::now(), "a", dec!(10), vec![]);
        let merged = PortfolioSnapshot::merge(vec![a]).unwrap();
        assert_eq!(merged.venue_id(), "a");
        assert!(PortfolioSnapshot::merge(vec![]).is_none());
    }
}
