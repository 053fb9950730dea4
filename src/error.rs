use thiserror::Error;

/// Main error type for the risk guard
#[derive(Error, Debug)]
pub enum GuardError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Layer errors
    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    PartialAction(#[from] PartialActionFailure),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Audit persistence failed: {0}")]
    Persistence(String),

    #[error("Too many consecutive aggregation failures: {count}")]
    RepeatedAggregationFailure { count: u32 },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for GuardError
pub type Result<T> = std::result::Result<T, GuardError>;

/// Errors raised by a venue adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VenueError {
    /// Network or auth failure; transient, retried at the adapter layer
    #[error("Venue {venue} unavailable: {reason}")]
    Unavailable { venue: String, reason: String },

    /// Malformed or missing fields in a venue response
    #[error("Venue {venue} returned bad data: {reason}")]
    Data { venue: String, reason: String },

    #[error("{operation} is not supported by venue {venue}")]
    Unsupported { venue: String, operation: String },
}

impl VenueError {
    pub fn unavailable(venue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            venue: venue.into(),
            reason: reason.into(),
        }
    }

    pub fn data(venue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Data {
            venue: venue.into(),
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// A tick could not produce a complete snapshot
#[derive(Error, Debug, Clone)]
pub enum AggregationError {
    #[error("Venue {venue} failed during aggregation: {source}")]
    VenueFailed {
        venue: String,
        #[source]
        source: VenueError,
    },

    #[error("Venue {0} is not registered")]
    UnknownVenue(String),

    #[error("No active venues configured")]
    NoVenues,
}

/// Oracle failures. All of them collapse to a non-vote in consensus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Oracle {oracle} timed out after {elapsed_ms}ms")]
    Timeout { oracle: String, elapsed_ms: u64 },

    #[error("Oracle {oracle} returned an unusable reply: {reason}")]
    MalformedResponse { oracle: String, reason: String },

    #[error("Oracle {oracle} unavailable: {reason}")]
    Unavailable { oracle: String, reason: String },

    #[error("Oracle {0} is not configured")]
    NotConfigured(String),
}

/// Positions remained open after the bounded flatten retries
#[derive(Error, Debug, Clone)]
#[error("Positions still open after {attempts} flatten attempts: {}", .remaining.join(", "))]
pub struct PartialActionFailure {
    pub attempts: u32,
    /// `venue:symbol` for each position left open
    pub remaining: Vec<String>,
}
