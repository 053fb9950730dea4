pub mod adapters;
pub mod agent;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod portfolio;
pub mod risk;
pub mod services;

pub use agent::{ConsensusAggregator, DecisionOracle};
pub use config::{AppConfig, ThresholdConfig, ThresholdHandle};
pub use coordination::{
    ActionExecutor, CircuitBreaker, ExitReason, GracefulShutdown, ShutdownSignal, TickReport,
};
pub use domain::{ActionOutcome, BreachEvent, BreachKind, BreakerState, Decision, PortfolioSnapshot, Position};
pub use error::{GuardError, Result};
pub use exchange::{VenueAdapter, VenueRegistry};
pub use persistence::{AuditLog, AuditRecord};
pub use portfolio::PortfolioAggregator;
