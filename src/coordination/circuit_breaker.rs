//! Circuit-breaker controller
//!
//! Owns the breaker state machine and runs one tick at a time: snapshot,
//! evaluate, arbitrate, act, persist. A tick is never interrupted; shutdown
//! is only observed between ticks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::ActionExecutor;
use super::shutdown::ShutdownToken;
use crate::agent::{ArbitrationRequest, ConsensusAggregator, ConsensusPolicy, DecisionOracle};
use crate::config::{AppConfig, EngineConfig, ThresholdHandle};
use crate::domain::{ActionOutcome, BreachEvent, BreachKind, BreakerState, Decision};
use crate::error::{GuardError, PartialActionFailure, Result};
use crate::exchange::VenueRegistry;
use crate::persistence::{AuditLog, AuditRecord, BalanceSample};
use crate::portfolio::PortfolioAggregator;
use crate::risk;

/// Live view of the controller for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub started_at: DateTime<Utc>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub consecutive_aggregation_failures: u32,
    pub breaches: u64,
    pub last_breach_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
}

pub type SharedStatus = Arc<RwLock<BreakerStatus>>;

/// What one tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    /// Still cooling down after acting; nothing was evaluated
    Cooldown { remaining: u32 },
    /// Snapshot taken, no threshold crossed
    Clear,
    /// Aggregation failed; the tick was abandoned without acting
    Aborted { reason: String },
    /// A breach was decided, acted on and persisted
    Breach {
        event_id: Uuid,
        kind: BreachKind,
        decision: Decision,
        outcome: ActionOutcome,
    },
}

/// Why the monitoring loop stopped
#[derive(Debug, Clone)]
pub enum ExitReason {
    Shutdown,
    PartialFailure(PartialActionFailure),
    RepeatedAggregationFailure { count: u32 },
}

impl ExitReason {
    /// Process exit code for this reason
    pub fn exit_code(&self) -> u8 {
        match self {
            ExitReason::Shutdown => 0,
            ExitReason::PartialFailure(_) => 2,
            ExitReason::RepeatedAggregationFailure { .. } => 3,
        }
    }
}

pub struct CircuitBreaker {
    engine: EngineConfig,
    thresholds: ThresholdHandle,
    aggregator: PortfolioAggregator,
    consensus: ConsensusAggregator,
    executor: ActionExecutor,
    audit: Arc<dyn AuditLog>,
    balance_sample_every: u32,
    state: BreakerState,
    cooldown_remaining: u32,
    consecutive_failures: u32,
    clear_ticks: u64,
    status: SharedStatus,
}

impl CircuitBreaker {
    pub fn new(
        config: &AppConfig,
        registry: VenueRegistry,
        thresholds: ThresholdHandle,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let status = BreakerStatus {
            state: BreakerState::Monitoring,
            started_at: Utc::now(),
            last_tick_at: None,
            ticks: 0,
            consecutive_aggregation_failures: 0,
            breaches: 0,
            last_breach_at: None,
            dry_run: config.engine.dry_run,
        };

        Self {
            engine: config.engine.clone(),
            thresholds,
            aggregator: PortfolioAggregator::new(registry.clone())
                .with_max_value_drift(config.engine.max_value_drift_usd),
            consensus: ConsensusAggregator::new(Vec::new()),
            executor: ActionExecutor::new(registry, &config.execution),
            audit,
            balance_sample_every: config.audit.balance_sample_every,
            state: BreakerState::Monitoring,
            cooldown_remaining: 0,
            consecutive_failures: 0,
            clear_ticks: 0,
            status: Arc::new(RwLock::new(status)),
        }
    }

    /// Oracles consulted when arbitration is enabled
    pub fn with_oracles(mut self, oracles: Vec<Arc<dyn DecisionOracle>>) -> Self {
        self.consensus = ConsensusAggregator::new(oracles);
        self
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    fn transition(&mut self, to: BreakerState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(GuardError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        debug!(from = %self.state, to = %to, "breaker transition");
        self.state = to;
        Ok(())
    }

    /// Run one evaluation tick to completion.
    ///
    /// Errors are fatal to the loop: an audit write that failed, or too many
    /// aggregation failures in a row.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let report = self.tick_inner().await;

        let mut status = self.status.write().await;
        status.state = self.state;
        status.last_tick_at = Some(Utc::now());
        status.ticks += 1;
        status.consecutive_aggregation_failures = self.consecutive_failures;
        if let Ok(TickReport::Breach { .. }) = &report {
            status.breaches += 1;
            status.last_breach_at = status.last_tick_at;
        }
        report
    }

    async fn tick_inner(&mut self) -> Result<TickReport> {
        if self.state == BreakerState::Cooldown {
            self.cooldown_remaining = self.cooldown_remaining.saturating_sub(1);
            if self.cooldown_remaining > 0 {
                debug!(remaining = self.cooldown_remaining, "cooling down, tick skipped");
                return Ok(TickReport::Cooldown {
                    remaining: self.cooldown_remaining,
                });
            }
            self.transition(BreakerState::Monitoring)?;
        }

        // One immutable copy for the whole tick
        let thresholds = self.thresholds.current();

        let snapshot = match self
            .aggregator
            .snapshot(&self.engine.active_venues, thresholds.lookback_hours)
            .await
        {
            Ok(snapshot) => {
                self.consecutive_failures = 0;
                Arc::new(snapshot)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                error!(
                    consecutive = self.consecutive_failures,
                    "tick aborted, no action taken: {}", e
                );
                if self.consecutive_failures >= self.engine.max_consecutive_aggregation_failures.max(1) {
                    return Err(GuardError::RepeatedAggregationFailure {
                        count: self.consecutive_failures,
                    });
                }
                return Ok(TickReport::Aborted {
                    reason: e.to_string(),
                });
            }
        };

        let Some(mut event) = risk::evaluate(&snapshot, &thresholds) else {
            self.clear_ticks += 1;
            if self.balance_sample_every > 0 && self.clear_ticks % u64::from(self.balance_sample_every) == 0 {
                if let Err(e) = self.audit.record_balance(&BalanceSample::from(snapshot.as_ref())).await {
                    warn!("balance sample not recorded: {}", e);
                }
            }
            return Ok(TickReport::Clear);
        };

        self.transition(BreakerState::BreachDetected)?;
        warn!(
            kind = %event.kind(),
            observed = %event.observed(),
            limit = %event.limit(),
            "RISK LIMIT BREACH"
        );

        let default_action = thresholds.actions.for_kind(event.kind());
        let decision = if thresholds.use_arbitration {
            self.transition(BreakerState::Arbitrating)?;
            let request = ArbitrationRequest::from_event(&event, default_action);
            let policy = ConsensusPolicy::from_thresholds(&thresholds);
            let consensus = self.consensus.arbitrate(&request, &policy).await;
            let decision = consensus.decision;
            event.attach_decision(decision, Some(consensus));
            decision
        } else {
            event.attach_decision(default_action, None);
            default_action
        };

        self.transition(BreakerState::Acting)?;
        info!(kind = %event.kind(), decision = %decision, "acting on breach");

        let outcome = match decision {
            Decision::CloseAll => self.executor.flatten(&snapshot).await,
            Decision::Hold => {
                info!("holding positions, no orders sent");
                ActionOutcome::Held
            }
        };
        event.attach_outcome(outcome.clone());

        if decision == Decision::CloseAll && !outcome.is_fatal() {
            self.aggregator.reanchor().await;
        }

        self.persist(&event).await?;

        self.transition(BreakerState::Cooldown)?;
        self.cooldown_remaining = self.engine.cooldown_intervals.max(1);

        info!(
            event_id = %event.id(),
            kind = %event.kind(),
            decision = %decision,
            outcome = %outcome,
            "breach handled"
        );
        Ok(TickReport::Breach {
            event_id: event.id(),
            kind: event.kind(),
            decision,
            outcome,
        })
    }

    async fn persist(&self, event: &BreachEvent) -> Result<()> {
        let record = AuditRecord::from_event(event)?;
        self.audit.record_breach(&record).await.map_err(|e| {
            error!(event_id = %event.id(), "AUDIT WRITE FAILED: {}", e);
            match e {
                GuardError::Persistence(_) => e,
                other => GuardError::Persistence(other.to_string()),
            }
        })
    }

    /// Tick on a fixed interval until shutdown or a fatal condition
    pub async fn run(mut self, mut shutdown: ShutdownToken) -> Result<ExitReason> {
        let period = Duration::from_secs(self.engine.check_interval_seconds.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = period.as_secs(),
            venues = ?self.engine.active_venues,
            oracles = self.consensus.len(),
            dry_run = self.engine.dry_run,
            "monitoring loop started"
        );

        loop {
            tokio::select! {
                biased;
                signal = shutdown.wait_for_shutdown() => {
                    info!(%signal, "monitoring loop stopping");
                    return Ok(ExitReason::Shutdown);
                }
                _ = interval.tick() => {}
            }

            match self.tick().await {
                Ok(TickReport::Breach {
                    outcome: ActionOutcome::PartialFailure { remaining, attempts },
                    ..
                }) => {
                    return Ok(ExitReason::PartialFailure(PartialActionFailure { attempts, remaining }));
                }
                Ok(_) => {}
                Err(GuardError::RepeatedAggregationFailure { count }) => {
                    error!(count, "giving up after repeated aggregation failures");
                    return Ok(ExitReason::RepeatedAggregationFailure { count });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::PaperVenue;
    use crate::agent::ScriptedOracle;
    use crate::config::ThresholdConfig;
    use crate::coordination::{GracefulShutdown, ShutdownSignal};
    use crate::exchange::VenueAdapter;
    use crate::persistence::MemoryAuditLog;
    use rust_decimal_macros::dec;

    fn config() -> AppConfig {
        let mut config = AppConfig::default_config(true);
        config.engine.check_interval_seconds = 60;
        config.execution.flatten_backoff_ms = 10;
        config
    }

    fn thresholds() -> ThresholdConfig {
        ThresholdConfig {
            min_balance_usd: dec!(50),
            max_loss_usd: dec!(25),
            max_gain_usd: dec!(250),
            ..ThresholdConfig::default()
        }
    }

    fn breaker(
        config: &AppConfig,
        venue: Arc<PaperVenue>,
        thresholds: ThresholdConfig,
        audit: Arc<MemoryAuditLog>,
    ) -> CircuitBreaker {
        let registry = VenueRegistry::new().with(venue);
        CircuitBreaker::new(config, registry, ThresholdHandle::fixed(thresholds), audit)
    }

    #[tokio::test]
    async fn test_clear_tick_stays_monitoring() {
        let venue = Arc::new(PaperVenue::new("paper", dec!(100)));
        let audit = Arc::new(MemoryAuditLog::new());
        let mut breaker = breaker(&config(), venue, thresholds(), audit.clone());

        assert_eq!(breaker.tick().await.unwrap(), TickReport::Clear);
        assert_eq!(breaker.state(), BreakerState::Monitoring);
        assert!(audit.breaches().await.is_empty());
    }

    #[tokio::test]
    async fn test_breach_without_arbitration_closes_and_cools_down() {
        let venue = Arc::new(
            PaperVenue::new("paper", dec!(48)).with_position("BTC", dec!(0.01), dec!(60000), dec!(60000), dec!(1)),
        );
        let audit = Arc::new(MemoryAuditLog::new());
        let mut breaker = breaker(&config(), venue.clone(), thresholds(), audit.clone());

        let report = breaker.tick().await.unwrap();
        assert!(matches!(
            report,
            TickReport::Breach {
                kind: BreachKind::MinBalance,
                decision: Decision::CloseAll,
                outcome: ActionOutcome::Success { .. },
                ..
            }
        ));
        assert_eq!(breaker.state(), BreakerState::Cooldown);
        assert!(venue.get_positions().await.unwrap().is_empty());
        assert_eq!(audit.breaches().await.len(), 1);

        // Cooldown lasts one interval; the flattened book is the new baseline
        let status = breaker.status();
        assert_eq!(breaker.tick().await.unwrap(), TickReport::Clear);
        assert_eq!(breaker.state(), BreakerState::Monitoring);
        assert_eq!(status.read().await.ticks, 2);
        assert_eq!(status.read().await.breaches, 1);
    }

    #[tokio::test]
    async fn test_longer_cooldown_skips_evaluation() {
        let mut config = config();
        config.engine.cooldown_intervals = 2;
        let venue = Arc::new(PaperVenue::new("paper", dec!(48)));
        let audit = Arc::new(MemoryAuditLog::new());
        let mut breaker = breaker(&config, venue.clone(), thresholds(), audit.clone());

        breaker.tick().await.unwrap();
        let calls = venue.value_calls();
        assert_eq!(breaker.tick().await.unwrap(), TickReport::Cooldown { remaining: 1 });
        assert_eq!(venue.value_calls(), calls);
        assert_eq!(breaker.state(), BreakerState::Cooldown);
    }

    #[tokio::test]
    async fn test_hold_vote_leaves_positions_open() {
        let venue = Arc::new(
            PaperVenue::new("paper", dec!(74)).with_position("ETH", dec!(1), dec!(26), dec!(26), dec!(1)),
        );
        let audit = Arc::new(MemoryAuditLog::new());
        let mut thresholds = thresholds();
        thresholds.use_arbitration = true;
        let mut breaker = breaker(&config(), venue.clone(), thresholds, audit.clone())
            .with_oracles(vec![Arc::new(ScriptedOracle::voting("o1", Decision::Hold))]);

        // First tick sets the baseline at $100
        assert_eq!(breaker.tick().await.unwrap(), TickReport::Clear);
        venue.set_mark("ETH", dec!(0)).await;

        let report = breaker.tick().await.unwrap();
        assert!(matches!(
            report,
            TickReport::Breach {
                kind: BreachKind::MaxLoss,
                decision: Decision::Hold,
                outcome: ActionOutcome::Held,
                ..
            }
        ));
        assert_eq!(venue.close_calls(), 0);

        let records = audit.breaches().await;
        assert_eq!(records[0].agreement_ratio, Some(1.0));
        assert_eq!(records[0].outcome, ActionOutcome::Held);
    }

    #[tokio::test]
    async fn test_aggregation_failure_aborts_then_escalates() {
        let mut config = config();
        config.engine.max_consecutive_aggregation_failures = 2;
        let venue = Arc::new(PaperVenue::new("paper", dec!(10)));
        venue.set_outage(true).await;
        let audit = Arc::new(MemoryAuditLog::new());
        let mut breaker = breaker(&config, venue.clone(), thresholds(), audit.clone());

        assert!(matches!(breaker.tick().await, Ok(TickReport::Aborted { .. })));
        assert!(matches!(
            breaker.tick().await,
            Err(GuardError::RepeatedAggregationFailure { count: 2 })
        ));
        assert_eq!(venue.close_calls(), 0);
        assert!(audit.breaches().await.is_empty());
        assert_eq!(breaker.state(), BreakerState::Monitoring);
    }

    #[tokio::test]
    async fn test_audit_failure_is_fatal() {
        let venue = Arc::new(PaperVenue::new("paper", dec!(48)));
        let audit = Arc::new(MemoryAuditLog::new());
        audit.set_failing(true);
        let mut breaker = breaker(&config(), venue, thresholds(), audit);

        assert!(matches!(breaker.tick().await, Err(GuardError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_balance_history_is_sampled() {
        let mut config = config();
        config.audit.balance_sample_every = 2;
        let venue = Arc::new(PaperVenue::new("paper", dec!(100)));
        let audit = Arc::new(MemoryAuditLog::new());
        let mut breaker = breaker(&config, venue, thresholds(), audit.clone());

        for _ in 0..4 {
            breaker.tick().await.unwrap();
        }
        assert_eq!(audit.balances().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_shutdown() {
        let venue = Arc::new(PaperVenue::new("paper", dec!(100)));
        let audit = Arc::new(MemoryAuditLog::new());
        let breaker = breaker(&config(), venue, thresholds(), audit);
        let shutdown = Arc::new(GracefulShutdown::new());

        let handle = tokio::spawn(breaker.run(shutdown.token()));
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        let reason = handle.await.unwrap().unwrap();
        assert_eq!(reason.exit_code(), 0);
    }
}
