use clap::Parser;
use flatline::agent::{build_oracles, unavailable_cli_oracles};
use flatline::cli::{Cli, Commands};
use flatline::config::{threshold_channel, AppConfig, LoggingConfig};
use flatline::coordination::{install_signal_handlers, CircuitBreaker, ExitReason, GracefulShutdown, ReloadHook};
use flatline::error::Result;
use flatline::exchange::build_registry;
use flatline::persistence::build_audit_log;
use flatline::services::{HealthServer, HealthState};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_logging_simple();
            error!("Failed to load configuration from {}: {}", cli.config.display(), e);
            return ExitCode::from(1);
        }
    };
    config.engine.dry_run |= cli.dry_run;

    init_logging(&config.logging);

    let result = match cli.command() {
        Commands::Run => run(cli.config.clone(), config).await,
    };

    match result {
        Ok(reason) => {
            match &reason {
                ExitReason::Shutdown => info!("flatline stopped"),
                ExitReason::PartialFailure(failure) => {
                    error!("{}; operator attention required", failure)
                }
                ExitReason::RepeatedAggregationFailure { count } => {
                    error!(count, "stopped after repeated aggregation failures")
                }
            }
            ExitCode::from(reason.exit_code())
        }
        Err(e) => {
            error!("fatal: {}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(config_dir: PathBuf, config: AppConfig) -> Result<ExitReason> {
    config.ensure_valid()?;

    info!(
        venues = ?config.engine.active_venues,
        oracles = config.oracles.len(),
        interval_secs = config.engine.check_interval_seconds,
        dry_run = config.engine.dry_run,
        "starting flatline"
    );
    if config.engine.dry_run {
        warn!("DRY RUN: all venues are paper venues");
    }

    let (publisher, thresholds) = threshold_channel(config.thresholds.clone());
    let publisher = Arc::new(publisher);
    let reload: ReloadHook = {
        let publisher = Arc::clone(&publisher);
        Arc::new(move || match AppConfig::load_from(&config_dir) {
            Ok(fresh) => match publisher.publish(fresh.thresholds) {
                Ok(()) => info!("thresholds reloaded"),
                Err(e) => warn!("reloaded thresholds rejected, keeping current: {}", e),
            },
            Err(e) => warn!("reload failed, keeping current thresholds: {}", e),
        })
    };

    let registry = build_registry(&config)?;
    let oracles = build_oracles(&config.oracles)?;
    unavailable_cli_oracles(&config.oracles).await;
    if config.thresholds.use_arbitration && oracles.is_empty() {
        warn!("arbitration enabled with no oracles; every breach resolves to the fail-safe");
    }

    let audit = build_audit_log(&config.audit).await?;

    let breaker = CircuitBreaker::new(&config, registry, thresholds, Arc::clone(&audit)).with_oracles(oracles);

    if let Some(port) = config.health_port {
        let state = Arc::new(HealthState::new(
            breaker.status(),
            Arc::clone(&audit),
            config.engine.check_interval_seconds,
        ));
        tokio::spawn(async move {
            if let Err(e) = HealthServer::new(state, port).run().await {
                error!("health server stopped: {}", e);
            }
        });
    }

    let shutdown = Arc::new(GracefulShutdown::new());
    install_signal_handlers(Arc::clone(&shutdown), Some(reload));

    breaker.run(shutdown.token()).await
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},flatline=debug,sqlx=warn", logging.level))
    });

    let console_layer = if logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    // rolling::daily aborts the process if the first file cannot be created
    let file_layer = logging.dir.as_ref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("file logging disabled, cannot create {}: {}", dir.display(), e);
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(dir, "flatline.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // The process logs until exit
        Box::leak(Box::new(guard));
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

fn init_logging_simple() {
    // Config never loaded; warnings and errors only
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
