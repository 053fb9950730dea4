use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a leveraged position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// Side implied by a signed size (negative = short)
    pub fn from_signed(size: Decimal) -> Self {
        if size.is_sign_negative() {
            Side::Short
        } else {
            Side::Long
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One open position as normalized by a venue adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Venue the position lives on
    pub venue: String,
    pub symbol: String,
    pub side: Side,
    /// Absolute size in base units
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: Decimal,
}

impl Position {
    /// Notional value at the current mark
    pub fn notional(&self) -> Decimal {
        self.size.abs() * self.mark_price
    }

    /// Equity attributed to the position: posted margin plus open P&L.
    ///
    /// At leverage 1 this equals `size * mark_price`.
    pub fn mark_value(&self) -> Decimal {
        let leverage = if self.leverage > Decimal::ZERO {
            self.leverage
        } else {
            Decimal::ONE
        };
        self.size.abs() * self.entry_price / leverage + self.unrealized_pnl
    }

    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: Side, entry: Decimal, mark: Decimal, leverage: Decimal) -> Position {
        let size = dec!(2);
        let direction = match side {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        };
        Position {
            venue: "paper".to_string(),
            symbol: "ETH".to_string(),
            side,
            size,
            entry_price: entry,
            mark_price: mark,
            unrealized_pnl: (mark - entry) * size * direction,
            leverage,
        }
    }

    #[test]
    fn test_unlevered_mark_value_is_notional() {
        let p = position(Side::Long, dec!(100), dec!(110), dec!(1));
        assert_eq!(p.mark_value(), dec!(220));
        assert_eq!(p.mark_value(), p.notional());
    }

    #[test]
    fn test_levered_mark_value_is_margin_plus_pnl() {
        // margin 2*100/5 = 40, pnl (90-100)*2*-1 = +20
        let p = position(Side::Short, dec!(100), dec!(90), dec!(5));
        assert_eq!(p.mark_value(), dec!(60));
    }

    #[test]
    fn test_zero_leverage_treated_as_spot() {
        let p = position(Side::Long, dec!(10), dec!(10), Decimal::ZERO);
        assert_eq!(p.mark_value(), dec!(20));
    }

    #[test]
    fn test_side_from_signed_size() {
        assert_eq!(Side::from_signed(dec!(-0.5)), Side::Short);
        assert_eq!(Side::from_signed(dec!(0.5)), Side::Long);
    }
}
