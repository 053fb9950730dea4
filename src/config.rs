use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use crate::agent::OracleKind;
use crate::domain::{BreachKind, Decision};
use crate::error::{GuardError, Result};
use crate::exchange::VenueKind;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub venues: Vec<VenueConfig>,
    #[serde(default)]
    pub oracles: Vec<OracleConfig>,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Health server port (disabled when unset)
    #[serde(default)]
    pub health_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Seconds between evaluation ticks
    pub check_interval_seconds: u64,
    /// Venue ids evaluated each tick; more than one enables multi-venue mode
    pub active_venues: Vec<String>,
    /// Extra whole intervals spent in COOLDOWN after acting (1 = next tick)
    #[serde(default = "default_cooldown_intervals")]
    pub cooldown_intervals: u32,
    /// Aborted ticks in a row before the loop gives up
    #[serde(default = "default_max_aggregation_failures")]
    pub max_consecutive_aggregation_failures: u32,
    /// Largest tolerated gap between venue-reported and reconstructed totals
    #[serde(default)]
    pub max_value_drift_usd: Option<Decimal>,
    /// Route everything to the paper venue
    #[serde(default)]
    pub dry_run: bool,
}

fn default_cooldown_intervals() -> u32 {
    1
}

fn default_max_aggregation_failures() -> u32 {
    5
}

/// How loss/gain limits are expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LimitMode {
    #[default]
    Usd,
    Percent,
}

/// Default action per breach kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BreachActions {
    #[serde(default = "default_close_all")]
    pub min_balance: Decision,
    #[serde(default = "default_close_all")]
    pub max_loss: Decision,
    #[serde(default = "default_close_all")]
    pub max_gain: Decision,
}

impl Default for BreachActions {
    fn default() -> Self {
        Self {
            min_balance: Decision::CloseAll,
            max_loss: Decision::CloseAll,
            max_gain: Decision::CloseAll,
        }
    }
}

impl BreachActions {
    pub fn for_kind(&self, kind: BreachKind) -> Decision {
        match kind {
            BreachKind::MinBalance => self.min_balance,
            BreachKind::MaxLoss => self.max_loss,
            BreachKind::MaxGain => self.max_gain,
        }
    }
}

fn default_close_all() -> Decision {
    Decision::CloseAll
}

/// Risk thresholds, read once per tick
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThresholdConfig {
    /// Breach when available balance drops below this
    pub min_balance_usd: Decimal,
    /// Breach when P&L since baseline is at or below the negative of this
    pub max_loss_usd: Decimal,
    /// Breach when P&L since baseline reaches this
    pub max_gain_usd: Decimal,
    /// Consult oracles before acting
    #[serde(default)]
    pub use_arbitration: bool,
    /// Shared deadline for the oracle fan-out
    #[serde(default = "default_arbitration_timeout_ms")]
    pub arbitration_timeout_ms: u64,
    /// Fraction of configured oracles that must return a counted vote
    #[serde(default = "default_min_agreement_ratio")]
    pub min_agreement_ratio: f64,
    #[serde(default)]
    pub limit_mode: LimitMode,
    /// Loss limit as a percentage of the baseline value (percent mode)
    #[serde(default)]
    pub max_loss_percent: Decimal,
    /// Gain limit as a percentage of the baseline value (percent mode)
    #[serde(default)]
    pub max_gain_percent: Decimal,
    /// How far back the P&L baseline reaches
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,
    #[serde(default)]
    pub actions: BreachActions,
    /// Decision for ties, quorum shortfalls and empty ballots
    #[serde(default = "default_close_all")]
    pub fail_safe: Decision,
}

fn default_arbitration_timeout_ms() -> u64 {
    15_000
}

fn default_min_agreement_ratio() -> f64 {
    0.5
}

fn default_lookback_hours() -> u64 {
    12
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        use rust_decimal_macros::dec;

        Self {
            min_balance_usd: dec!(25),
            max_loss_usd: dec!(40),
            max_gain_usd: dec!(250),
            use_arbitration: false,
            arbitration_timeout_ms: default_arbitration_timeout_ms(),
            min_agreement_ratio: default_min_agreement_ratio(),
            limit_mode: LimitMode::Usd,
            max_loss_percent: dec!(5),
            max_gain_percent: dec!(5),
            lookback_hours: default_lookback_hours(),
            actions: BreachActions::default(),
            fail_safe: Decision::CloseAll,
        }
    }
}

impl ThresholdConfig {
    /// Validate threshold values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.min_balance_usd < Decimal::ZERO {
            errors.push("min_balance_usd must not be negative".to_string());
        }

        match self.limit_mode {
            LimitMode::Usd => {
                if self.max_loss_usd <= Decimal::ZERO {
                    errors.push("max_loss_usd must be positive".to_string());
                }
                if self.max_gain_usd <= Decimal::ZERO {
                    errors.push("max_gain_usd must be positive".to_string());
                }
            }
            LimitMode::Percent => {
                if self.max_loss_percent <= Decimal::ZERO {
                    errors.push("max_loss_percent must be positive".to_string());
                }
                if self.max_gain_percent <= Decimal::ZERO {
                    errors.push("max_gain_percent must be positive".to_string());
                }
            }
        }

        if self.arbitration_timeout_ms == 0 {
            errors.push("arbitration_timeout_ms must be positive".to_string());
        }

        if !(0.0..=1.0).contains(&self.min_agreement_ratio) {
            errors.push("min_agreement_ratio must be between 0 and 1".to_string());
        }

        if self.lookback_hours == 0 {
            errors.push("lookback_hours must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    /// Identifier used in `engine.active_venues` and on every position
    pub id: String,
    pub kind: VenueKind,
    /// REST base URL (gateway, hyperliquid)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Account address (hyperliquid)
    #[serde(default)]
    pub account: Option<String>,
    /// Signing sidecar used for closes (hyperliquid)
    #[serde(default)]
    pub order_gateway_url: Option<String>,
    /// Env var holding the gateway bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_venue_timeout_ms")]
    pub timeout_ms: u64,
    /// Starting state for the paper venue
    #[serde(default)]
    pub paper: Option<PaperVenueConfig>,
}

fn default_venue_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PaperVenueConfig {
    #[serde(default)]
    pub available_usd: Decimal,
    #[serde(default)]
    pub positions: Vec<PaperPositionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperPositionConfig {
    pub symbol: String,
    /// Signed size; negative is short
    pub size: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub mark_price: Option<Decimal>,
    #[serde(default = "default_leverage")]
    pub leverage: Decimal,
}

fn default_leverage() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    pub id: String,
    pub kind: OracleKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Env var holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Path to the CLI executable (claude_cli)
    #[serde(default)]
    pub cli_path: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Flatten + verify rounds before declaring PARTIAL_FAILURE
    pub flatten_attempts: u32,
    /// First backoff between flatten rounds in milliseconds
    pub flatten_backoff_ms: u64,
    /// Backoff ceiling in milliseconds
    pub flatten_max_backoff_ms: u64,
    /// Retries for transient venue errors inside one adapter call
    pub venue_retries: u32,
    /// First backoff for transient venue errors in milliseconds
    pub venue_backoff_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            flatten_attempts: 3,
            flatten_backoff_ms: 1_000,
            flatten_max_backoff_ms: 10_000,
            venue_retries: 3,
            venue_backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    #[default]
    Jsonl,
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub sink: AuditSinkKind,
    /// Directory for JSONL files
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
    /// PostgreSQL connection URL
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Record a balance sample every N breach-free ticks (0 disables)
    #[serde(default = "default_balance_sample_every")]
    pub balance_sample_every: u32,
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from("data/audit")
}

fn default_max_connections() -> u32 {
    5
}

fn default_balance_sample_every() -> u32 {
    4
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Jsonl,
            dir: default_audit_dir(),
            database_url: None,
            max_connections: default_max_connections(),
            balance_sample_every: default_balance_sample_every(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Write a daily rolling log file here as well as stdout
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("engine.check_interval_seconds", 900)?
            .set_default("engine.active_venues", vec!["paper".to_string()])?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FLATLINE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (FLATLINE_THRESHOLDS__MIN_BALANCE_USD, etc.)
            .add_source(
                Environment::with_prefix("FLATLINE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration: one paper venue, no oracles
    pub fn default_config(dry_run: bool) -> Self {
        use rust_decimal_macros::dec;

        Self {
            engine: EngineConfig {
                check_interval_seconds: 900,
                active_venues: vec!["paper".to_string()],
                cooldown_intervals: 1,
                max_consecutive_aggregation_failures: 5,
                max_value_drift_usd: None,
                dry_run,
            },
            thresholds: ThresholdConfig::default(),
            venues: vec![VenueConfig {
                id: "paper".to_string(),
                kind: VenueKind::Paper,
                base_url: None,
                account: None,
                order_gateway_url: None,
                api_key_env: None,
                timeout_ms: default_venue_timeout_ms(),
                paper: Some(PaperVenueConfig {
                    available_usd: dec!(100),
                    positions: Vec::new(),
                }),
            }],
            oracles: Vec::new(),
            execution: ExecutionConfig::default(),
            audit: AuditConfig::default(),
            logging: LoggingConfig::default(),
            health_port: None,
        }
    }

    pub fn venue(&self, id: &str) -> Option<&VenueConfig> {
        self.venues.iter().find(|v| v.id == id)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = match self.thresholds.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };

        if self.engine.check_interval_seconds == 0 {
            errors.push("check_interval_seconds must be positive".to_string());
        }

        if self.engine.active_venues.is_empty() {
            errors.push("at least one active venue is required".to_string());
        }

        for id in &self.engine.active_venues {
            if self.venue(id).is_none() && !self.engine.dry_run {
                errors.push(format!("active venue '{}' has no [[venues]] entry", id));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for oracle in &self.oracles {
            if !seen.insert(oracle.id.as_str()) {
                errors.push(format!("duplicate oracle id '{}'", oracle.id));
            }
        }

        if self.execution.flatten_attempts == 0 {
            errors.push("flatten_attempts must be at least 1".to_string());
        }

        if self.audit.sink == AuditSinkKind::Postgres && self.audit.database_url.is_none() {
            errors.push("audit.database_url is required for the postgres sink".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and convert the error list into a `GuardError`
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|errors| GuardError::InvalidConfig(errors.join("; ")))
    }
}

/// Publishes new threshold values to the running controller
pub struct ThresholdPublisher {
    tx: watch::Sender<Arc<ThresholdConfig>>,
}

/// Read side of the threshold channel; cheap to clone
#[derive(Clone)]
pub struct ThresholdHandle {
    rx: watch::Receiver<Arc<ThresholdConfig>>,
}

/// Create a threshold channel seeded with `initial`
pub fn threshold_channel(initial: ThresholdConfig) -> (ThresholdPublisher, ThresholdHandle) {
    let (tx, rx) = watch::channel(Arc::new(initial));
    (ThresholdPublisher { tx }, ThresholdHandle { rx })
}

impl ThresholdPublisher {
    /// Replace the thresholds; rejected values leave the current ones in place
    pub fn publish(&self, thresholds: ThresholdConfig) -> Result<()> {
        thresholds
            .validate()
            .map_err(|errors| GuardError::InvalidConfig(errors.join("; ")))?;
        self.tx.send_replace(Arc::new(thresholds));
        Ok(())
    }

    pub fn handle(&self) -> ThresholdHandle {
        ThresholdHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl ThresholdHandle {
    /// A handle that never changes; convenient for tests and one-shot runs
    pub fn fixed(thresholds: ThresholdConfig) -> Self {
        let (tx, rx) = watch::channel(Arc::new(thresholds));
        // Receiver keeps the last value after the sender is dropped
        drop(tx);
        Self { rx }
    }

    /// The thresholds in force right now
    pub fn current(&self) -> Arc<ThresholdConfig> {
        self.rx.borrow().clone()
    }
}
