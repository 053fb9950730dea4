use serde::{Deserialize, Serialize};
use std::fmt;

/// Circuit-breaker state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Evaluating snapshots, no breach pending
    Monitoring,
    /// A threshold was crossed on the current tick
    BreachDetected,
    /// Waiting on oracle consensus
    Arbitrating,
    /// Applying the resolved decision
    Acting,
    /// Acted (or held) this tick; skip re-triggering until the next interval
    Cooldown,
}

impl Default for BreakerState {
    fn default() -> Self {
        BreakerState::Monitoring
    }
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Monitoring => "MONITORING",
            BreakerState::BreachDetected => "BREACH_DETECTED",
            BreakerState::Arbitrating => "ARBITRATING",
            BreakerState::Acting => "ACTING",
            BreakerState::Cooldown => "COOLDOWN",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: BreakerState) -> bool {
        use BreakerState::*;

        match (self, target) {
            (Monitoring, BreachDetected) => true,

            // Arbitration disabled goes straight to acting
            (BreachDetected, Acting) => true,
            (BreachDetected, Arbitrating) => true,

            (Arbitrating, Acting) => true,

            // Both CLOSE_ALL (after executing) and HOLD land here
            (Acting, Cooldown) => true,

            (Cooldown, Monitoring) => true,

            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<BreakerState> {
        use BreakerState::*;

        match self {
            Monitoring => vec![BreachDetected],
            BreachDetected => vec![Acting, Arbitrating],
            Arbitrating => vec![Acting],
            Acting => vec![Cooldown],
            Cooldown => vec![Monitoring],
        }
    }

    /// States that only exist while a tick is in flight
    pub fn is_mid_tick(&self) -> bool {
        matches!(
            self,
            BreakerState::BreachDetected | BreakerState::Arbitrating | BreakerState::Acting
        )
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for BreakerState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "MONITORING" => Ok(BreakerState::Monitoring),
            "BREACH_DETECTED" => Ok(BreakerState::BreachDetected),
            "ARBITRATING" => Ok(BreakerState::Arbitrating),
            "ACTING" => Ok(BreakerState::Acting),
            "COOLDOWN" => Ok(BreakerState::Cooldown),
            _ => Err(format!("Unknown breaker state: {}", s)),
        }
    }
}
