use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::{AccountValue, Position};
use crate::error::{GuardError, Result, VenueError};

pub type VenueResult<T> = std::result::Result<T, VenueError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    /// In-memory simulated venue
    Paper,
    /// Normalized REST contract in front of a signing sidecar
    Gateway,
    /// Hyperliquid perps (public info API + order gateway)
    Hyperliquid,
}

impl Default for VenueKind {
    fn default() -> Self {
        Self::Paper
    }
}

impl VenueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Gateway => "gateway",
            Self::Hyperliquid => "hyperliquid",
        }
    }
}

impl std::fmt::Display for VenueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VenueKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paper" | "dry_run" => Ok(Self::Paper),
            "gateway" | "rest" => Ok(Self::Gateway),
            "hyperliquid" | "hl" => Ok(Self::Hyperliquid),
            _ => Err("invalid venue; expected paper|gateway|hyperliquid"),
        }
    }
}

pub fn parse_venue_kind(raw: &str) -> Result<VenueKind> {
    VenueKind::from_str(raw).map_err(|e| GuardError::InvalidConfig(e.to_string()))
}

/// What a flatten call did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReport {
    /// Symbols a close was issued for; empty when the venue was already flat
    pub closed: Vec<String>,
}

impl CloseReport {
    pub fn already_flat() -> Self {
        Self::default()
    }

    pub fn was_noop(&self) -> bool {
        self.closed.is_empty()
    }
}

/// Capability interface every venue implements.
///
/// An empty position list is a valid state. `close_all_positions` must be
/// idempotent: with nothing open it succeeds without doing anything.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Identifier this adapter is registered under
    fn id(&self) -> &str;

    fn kind(&self) -> VenueKind;

    async fn get_account_value(&self) -> VenueResult<AccountValue>;

    async fn get_positions(&self) -> VenueResult<Vec<Position>>;

    async fn close_all_positions(&self) -> VenueResult<CloseReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_venue_kind_accepts_aliases() {
        assert_eq!(
            parse_venue_kind("paper").expect("paper should parse"),
            VenueKind::Paper
        );
        assert_eq!(
            parse_venue_kind("HL").expect("hl alias should parse"),
            VenueKind::Hyperliquid
        );
        assert_eq!(
            parse_venue_kind("rest").expect("rest alias should parse"),
            VenueKind::Gateway
        );
    }

    #[test]
    fn parse_venue_kind_rejects_unknown_value() {
        assert!(parse_venue_kind("solana").is_err());
    }
}
