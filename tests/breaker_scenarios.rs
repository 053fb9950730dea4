//! End-to-end breaker scenarios against paper venues and scripted oracles

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use flatline::adapters::PaperVenue;
use flatline::agent::{DecisionOracle, ScriptedOracle};
use flatline::config::{threshold_channel, AppConfig, ThresholdConfig, ThresholdHandle};
use flatline::coordination::{ActionExecutor, CircuitBreaker, ExitReason, GracefulShutdown, TickReport};
use flatline::domain::{ActionOutcome, Ballot, BreachKind, BreakerState, Decision, NonVote};
use flatline::exchange::{VenueAdapter, VenueRegistry};
use flatline::persistence::{AuditLog, JsonlAuditLog, MemoryAuditLog};
use flatline::portfolio::PortfolioAggregator;
use flatline::GuardError;

fn app_config() -> AppConfig {
    let mut config = AppConfig::default_config(true);
    config.engine.check_interval_seconds = 60;
    config.execution.flatten_backoff_ms = 10;
    config.execution.flatten_max_backoff_ms = 100;
    config
}

fn thresholds() -> ThresholdConfig {
    ThresholdConfig {
        min_balance_usd: dec!(50),
        max_loss_usd: dec!(25),
        max_gain_usd: dec!(250),
        arbitration_timeout_ms: 200,
        ..ThresholdConfig::default()
    }
}

fn arbitrated() -> ThresholdConfig {
    ThresholdConfig {
        use_arbitration: true,
        ..thresholds()
    }
}

fn breaker_for(venue: &Arc<PaperVenue>, thresholds: ThresholdConfig, audit: Arc<dyn AuditLog>) -> CircuitBreaker {
    let registry = VenueRegistry::new().with(venue.clone());
    CircuitBreaker::new(&app_config(), registry, ThresholdHandle::fixed(thresholds), audit)
}

fn oracles(votes: &[Decision]) -> Vec<Arc<dyn DecisionOracle>> {
    votes
        .iter()
        .enumerate()
        .map(|(i, vote)| Arc::new(ScriptedOracle::voting(&format!("o{}", i), *vote)) as Arc<dyn DecisionOracle>)
        .collect()
}

fn low_balance_venue() -> Arc<PaperVenue> {
    Arc::new(PaperVenue::new("paper", dec!(48)).with_position("BTC", dec!(0.01), dec!(60000), dec!(60000), dec!(1)))
}

#[tokio::test]
async fn min_balance_without_arbitration_flattens_on_the_same_tick() {
    let venue = low_balance_venue();
    let audit = Arc::new(MemoryAuditLog::new());
    let mut breaker = breaker_for(&venue, thresholds(), audit.clone());

    let report = breaker.tick().await.unwrap();

    let TickReport::Breach { kind, decision, outcome, .. } = report else {
        panic!("expected a breach, got {:?}", report);
    };
    assert_eq!(kind, BreachKind::MinBalance);
    assert_eq!(decision, Decision::CloseAll);
    assert!(matches!(outcome, ActionOutcome::Success { .. }));
    assert!(venue.get_positions().await.unwrap().is_empty());

    let records = audit.breaches().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].available_balance_usd, dec!(48));
    assert_eq!(records[0].decision, Decision::CloseAll);
    assert_eq!(records[0].agreement_ratio, None);
    assert!(records[0].votes.is_empty());
}

#[tokio::test]
async fn single_hold_vote_keeps_positions_and_is_still_audited() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(JsonlAuditLog::open(dir.path()).await.unwrap());
    let venue = Arc::new(PaperVenue::new("paper", dec!(74)).with_position("ETH", dec!(1), dec!(26), dec!(26), dec!(1)));
    let mut breaker = breaker_for(&venue, arbitrated(), audit.clone()).with_oracles(oracles(&[Decision::Hold]));

    // Baseline: $100
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
    assert_eq!(venue.get_positions().await.unwrap().len(), 1);

    let latest = audit.latest_breach().await.unwrap().unwrap();
    assert_eq!(latest.observed, dec!(-26));
    assert_eq!(latest.limit, dec!(25));
    assert_eq!(latest.outcome, ActionOutcome::Held);

    let lines = std::fs::read_to_string(audit.breach_path()).unwrap();
    assert_eq!(lines.lines().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn four_silent_oracles_fall_back_to_close_all() {
    let venue = low_balance_venue();
    let audit = Arc::new(MemoryAuditLog::new());
    let silent: Vec<Arc<dyn DecisionOracle>> = (0..4)
        .map(|i| Arc::new(ScriptedOracle::hanging(&format!("o{}", i))) as Arc<dyn DecisionOracle>)
        .collect();
    let mut breaker = breaker_for(&venue, arbitrated(), audit.clone()).with_oracles(silent);

    let report = breaker.tick().await.unwrap();
    assert!(matches!(report, TickReport::Breach { decision: Decision::CloseAll, .. }));

    let record = &audit.breaches().await[0];
    assert_eq!(record.agreement_ratio, Some(0.0));
    assert!(record.fail_safe);
    assert_eq!(record.votes.len(), 4);
    assert!(record
        .votes
        .iter()
        .all(|v| v.ballot == Ballot::Abstain(NonVote::Timeout)));
    assert!(venue.get_positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn three_to_one_split_closes_with_three_quarters_agreement() {
    let venue = low_balance_venue();
    let audit = Arc::new(MemoryAuditLog::new());
    let mut breaker = breaker_for(&venue, arbitrated(), audit.clone()).with_oracles(oracles(&[
        Decision::CloseAll,
        Decision::CloseAll,
        Decision::CloseAll,
        Decision::Hold,
    ]));

    breaker.tick().await.unwrap();

    let record = &audit.breaches().await[0];
    assert_eq!(record.decision, Decision::CloseAll);
    assert_eq!(record.agreement_ratio, Some(0.75));
    assert!(!record.fail_safe);
}

#[tokio::test]
async fn tied_vote_resolves_to_close_all() {
    let venue = low_balance_venue();
    let audit = Arc::new(MemoryAuditLog::new());
    let mut breaker = breaker_for(&venue, arbitrated(), audit.clone()).with_oracles(oracles(&[
        Decision::CloseAll,
        Decision::Hold,
        Decision::Hold,
        Decision::CloseAll,
    ]));

    breaker.tick().await.unwrap();

    let record = &audit.breaches().await[0];
    assert_eq!(record.decision, Decision::CloseAll);
    assert_eq!(record.agreement_ratio, Some(0.5));
    assert!(record.fail_safe);
    assert!(venue.get_positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn venue_outage_aborts_the_tick_without_closing() {
    let venue = low_balance_venue();
    venue.set_outage(true).await;
    let audit = Arc::new(MemoryAuditLog::new());
    let mut breaker = breaker_for(&venue, thresholds(), audit.clone());

    let report = breaker.tick().await.unwrap();

    assert!(matches!(report, TickReport::Aborted { .. }));
    assert_eq!(venue.close_calls(), 0);
    assert!(audit.breaches().await.is_empty());
    assert_eq!(breaker.state(), BreakerState::Monitoring);
}

#[tokio::test]
async fn corrupt_positions_abort_the_tick_without_closing() {
    let venue = low_balance_venue();
    venue.set_corrupt(true).await;
    let audit = Arc::new(MemoryAuditLog::new());
    let mut breaker = breaker_for(&venue, thresholds(), audit.clone());

    assert!(matches!(breaker.tick().await.unwrap(), TickReport::Aborted { .. }));
    assert_eq!(venue.close_calls(), 0);
}

#[tokio::test]
async fn flattening_twice_is_harmless() {
    let venue = low_balance_venue();
    let registry = VenueRegistry::new().with(venue.clone());
    let aggregator = PortfolioAggregator::new(registry.clone());
    let executor = ActionExecutor::new(registry, &app_config().execution);

    let snapshot = aggregator.snapshot(&["paper".to_string()], 12).await.unwrap();
    let first = executor.flatten(&snapshot).await;
    let balance = venue.get_account_value().await.unwrap();
    let second = executor.flatten(&snapshot).await;

    assert!(matches!(first, ActionOutcome::Success { .. }));
    assert!(matches!(second, ActionOutcome::Success { .. }));
    assert_eq!(venue.get_account_value().await.unwrap(), balance);
    assert!(venue.get_positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn merged_snapshot_total_matches_its_parts() {
    let a = Arc::new(
        PaperVenue::new("a", dec!(120))
            .with_position("BTC", dec!(0.5), dec!(60000), dec!(61000), dec!(10))
            .with_position("ETH", dec!(-2), dec!(3000), dec!(2900), dec!(5)),
    );
    let b = Arc::new(PaperVenue::new("b", dec!(35.5)).with_position("SOL", dec!(10), dec!(150), dec!(140), dec!(1)));
    let registry = VenueRegistry::new().with(a.clone()).with(b.clone());
    let aggregator = PortfolioAggregator::new(registry);

    let snapshot = aggregator
        .snapshot(&["a".to_string(), "b".to_string()], 12)
        .await
        .unwrap();

    assert_eq!(snapshot.total_value_usd(), snapshot.reconstructed_total());
    assert_eq!(snapshot.available_balance_usd(), dec!(155.5));
    let venues: Vec<&str> = snapshot.positions().iter().map(|p| p.venue.as_str()).collect();
    assert_eq!(venues, vec!["a", "a", "b"]);
}

#[tokio::test]
async fn reloaded_thresholds_apply_on_the_next_tick() {
    let venue = Arc::new(PaperVenue::new("paper", dec!(80)));
    let audit = Arc::new(MemoryAuditLog::new());
    let (publisher, handle) = threshold_channel(thresholds());
    let registry = VenueRegistry::new().with(venue.clone());
    let mut breaker = CircuitBreaker::new(&app_config(), registry, handle, audit.clone());

    assert_eq!(breaker.tick().await.unwrap(), TickReport::Clear);

    publisher
        .publish(ThresholdConfig {
            min_balance_usd: dec!(90),
            ..thresholds()
        })
        .unwrap();
    assert!(matches!(
        breaker.tick().await.unwrap(),
        TickReport::Breach {
            kind: BreachKind::MinBalance,
            ..
        }
    ));

    // Invalid values never replace the ones in force
    let rejected = publisher.publish(ThresholdConfig {
        max_loss_usd: dec!(0),
        ..thresholds()
    });
    assert!(matches!(rejected, Err(GuardError::InvalidConfig(_))));
}

#[tokio::test(start_paused = true)]
async fn stuck_position_stops_the_loop_with_partial_failure() {
    let venue = low_balance_venue();
    venue.stick("BTC").await;
    let audit = Arc::new(MemoryAuditLog::new());
    let breaker = breaker_for(&venue, thresholds(), audit.clone());
    let shutdown = GracefulShutdown::new();

    let reason = tokio::time::timeout(Duration::from_secs(600), breaker.run(shutdown.token()))
        .await
        .unwrap()
        .unwrap();

    let ExitReason::PartialFailure(failure) = &reason else {
        panic!("expected partial failure, got {:?}", reason);
    };
    assert_eq!(failure.remaining, vec!["paper:BTC".to_string()]);
    assert_eq!(reason.exit_code(), 2);

    // The failed flatten is still on record
    let records = audit.breaches().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome.as_str(), "partial_failure");
}

#[tokio::test(start_paused = true)]
async fn repeated_outages_stop_the_loop() {
    let venue = low_balance_venue();
    venue.set_outage(true).await;
    let audit = Arc::new(MemoryAuditLog::new());
    let breaker = breaker_for(&venue, thresholds(), audit);
    let shutdown = GracefulShutdown::new();

    let reason = tokio::time::timeout(Duration::from_secs(3600), breaker.run(shutdown.token()))
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(reason, ExitReason::RepeatedAggregationFailure { count: 5 }));
    assert_eq!(reason.exit_code(), 3);
    assert_eq!(venue.close_calls(), 0);
}
