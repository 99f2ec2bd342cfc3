//! sharpline binary: pipeline runs, status, health, recovery, outcomes.

use clap::Parser;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use sharpline::cli::{parse_mode, Cli, Commands, EXIT_MISCONFIGURATION};
use sharpline::collector::{
    Collector, LeagueScheduleCollector, OddsComparisonCollector, OddsProviderCollector,
    PercentagesCollector, SourceClient, SplitsCollector, SOURCE_BETSPLITS, SOURCE_LINECOMPARE,
    SOURCE_MLB_STATS, SOURCE_ODDS_API, SOURCE_WAGERPCT,
};
use sharpline::config::LoggingConfig;
use sharpline::domain::{CollectionAttempt, CollectionWindow};
use sharpline::health::{
    spawn_health_alert_bridge, AlertManager, CircuitBreakerConfig, ConsoleSink, HealthTracker,
    RecoveryManager,
};
use sharpline::persistence::{bootstrap_sportsbooks, PgStore, PipelineStore};
use sharpline::pipeline::Orchestrator;
use sharpline::shutdown::ShutdownController;
use sharpline::{AppConfig, IdentityResolver, Result, SharplineError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return EXIT_MISCONFIGURATION;
        }
    };

    let _log_guard = init_logging(&config.logging);

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("configuration problem: {}", problem);
        }
        return EXIT_MISCONFIGURATION;
    }

    let result = match cli.command {
        Commands::Migrate => run_migrate(&config).await,
        Commands::Run { ref mode, from, to } => {
            let mode = match parse_mode(mode) {
                Some(mode) => mode,
                None => {
                    error!("unknown mode: {}", mode);
                    return EXIT_MISCONFIGURATION;
                }
            };
            let window = window_from(from, to);
            return match run_pipeline(config, mode, window).await {
                Ok(code) => code,
                Err(e) => {
                    error!("pipeline run failed: {}", e);
                    2
                }
            };
        }
        Commands::Status => run_status(&config).await,
        Commands::Health => run_health(&config).await,
        Commands::Recover { ref collector } => run_recover(&config, collector).await,
        Commands::ResolveOutcomes { from, to } => {
            run_resolve_outcomes(&config, CollectionWindow { start: from, end: to }).await
        }
    };

    match result {
        Ok(()) => 0,
        Err(SharplineError::Configuration(e)) => {
            error!("misconfiguration: {}", e);
            EXIT_MISCONFIGURATION
        }
        Err(e) => {
            error!("{}", e);
            2
        }
    }
}

fn window_from(
    from: Option<chrono::NaiveDate>,
    to: Option<chrono::NaiveDate>,
) -> CollectionWindow {
    let start = from.unwrap_or_else(|| chrono::Utc::now().date_naive());
    CollectionWindow {
        start,
        end: to.unwrap_or(start),
    }
}

fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.clone()));

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "sharpline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Everything a command needs, wired once.
struct Runtime {
    store: Arc<PgStore>,
    tracker: Arc<HealthTracker>,
    alerts: Arc<AlertManager>,
    recovery: Arc<RecoveryManager>,
    orchestrator: Arc<Orchestrator>,
    controller: Arc<ShutdownController>,
}

async fn build_runtime(config: &AppConfig) -> Result<Runtime> {
    let store = Arc::new(PgStore::new(&config.database).await?);
    let tracker = Arc::new(HealthTracker::new(config.health.clone()));

    let mut alerts = AlertManager::from_config(&config.alerting)?;
    if config.alerting.sinks.is_empty() {
        alerts = alerts.with_sink(Arc::new(ConsoleSink));
    }
    let alerts = Arc::new(alerts);

    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
    for (source, collector_config) in &config.collectors {
        if !collector_config.enabled {
            info!(source = %source, "collector disabled by configuration");
            continue;
        }
        let breaker = tracker
            .register_collector(
                source,
                CircuitBreakerConfig {
                    failure_threshold: collector_config.circuit_breaker_failure_threshold,
                    cooldown_secs: collector_config.circuit_breaker_cooldown_s,
                    ..Default::default()
                },
            )
            .await;
        let client = SourceClient::new(
            source,
            collector_config.clone(),
            breaker,
            tracker.attempt_sender(),
        )?;

        let collector: Arc<dyn Collector> = match source.as_str() {
            SOURCE_ODDS_API => Arc::new(OddsProviderCollector::new(client)),
            SOURCE_BETSPLITS => Arc::new(SplitsCollector::new(client)),
            SOURCE_WAGERPCT => Arc::new(PercentagesCollector::new(client)),
            SOURCE_MLB_STATS => Arc::new(LeagueScheduleCollector::new(client)),
            SOURCE_LINECOMPARE => Arc::new(OddsComparisonCollector::new(client)),
            other => {
                return Err(SharplineError::Configuration(format!(
                    "unknown collector source: {}",
                    other
                )))
            }
        };
        collectors.push(collector);
    }

    let recovery = Arc::new(RecoveryManager::new(
        tracker.clone(),
        alerts.clone(),
        config.collectors.clone(),
    ));
    for collector in &collectors {
        let handle = collector.clone();
        recovery
            .register_probe(collector.source(), move || {
                let handle = handle.clone();
                async move { handle.probe().await }.boxed()
            })
            .await;
    }

    let resolver = Arc::new(IdentityResolver::new(&config.identity));
    let pipeline_store: Arc<dyn PipelineStore> = store.clone();
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        pipeline_store,
        resolver,
        collectors,
    ));

    Ok(Runtime {
        store,
        tracker,
        alerts,
        recovery,
        orchestrator,
        controller: Arc::new(ShutdownController::new()),
    })
}

async fn run_migrate(config: &AppConfig) -> Result<()> {
    let store = PgStore::new(&config.database).await?;
    store.migrate().await?;
    bootstrap_sportsbooks(&store).await?;
    info!("migrations applied and reference data bootstrapped");
    Ok(())
}

async fn run_pipeline(
    config: AppConfig,
    mode: sharpline::RunMode,
    window: CollectionWindow,
) -> Result<i32> {
    let runtime = build_runtime(&config).await?;
    runtime.controller.spawn_signal_listener();

    let token = runtime.controller.token();
    runtime.tracker.start(token.clone());
    spawn_health_alert_bridge(
        runtime.alerts.clone(),
        runtime.tracker.subscribe(),
        token.clone(),
    );
    runtime.recovery.start(60, token.clone());

    // Second consumer of attempt events: batched persistence
    let (tap_tx, tap_rx) = mpsc::unbounded_channel();
    runtime.tracker.set_attempt_tap(tap_tx).await;
    let attempt_writer = spawn_attempt_writer(runtime.store.clone(), tap_rx, token.clone());

    runtime.orchestrator.prime_resolver().await?;
    let run = runtime.orchestrator.run(mode, window, token).await;

    let retention = &config.retention;
    if let Err(e) = runtime
        .store
        .prune_retention(retention.raw_days, retention.attempts_days)
        .await
    {
        error!("retention pruning failed: {}", e);
    }

    runtime.controller.request();
    flush_operational(&runtime).await;
    runtime
        .controller
        .drain_with_grace("attempt writer", async {
            let _ = attempt_writer.await;
        })
        .await;

    println!("{}", run.summary());
    Ok(run.status.exit_code())
}

/// Batch attempt events into the operational schema.
fn spawn_attempt_writer(
    store: Arc<PgStore>,
    mut rx: mpsc::UnboundedReceiver<CollectionAttempt>,
    mut shutdown: sharpline::ShutdownToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: Vec<CollectionAttempt> = Vec::new();
        loop {
            tokio::select! {
                attempt = rx.recv() => match attempt {
                    Some(attempt) => {
                        pending.push(attempt);
                        if pending.len() >= 50 {
                            if let Err(e) = store.record_attempts(&pending).await {
                                error!("failed to persist attempts: {}", e);
                            }
                            pending.clear();
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
                    if !pending.is_empty() {
                        if let Err(e) = store.record_attempts(&pending).await {
                            error!("failed to persist attempts: {}", e);
                        }
                        pending.clear();
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        // Late events still in the channel flush with the final batch
        while let Ok(attempt) = rx.try_recv() {
            pending.push(attempt);
        }
        if !pending.is_empty() {
            if let Err(e) = store.record_attempts(&pending).await {
                error!("failed to persist attempts: {}", e);
            }
        }
    })
}

/// Persist alerts, dead letters, and recovery actions accumulated in memory.
async fn flush_operational(runtime: &Runtime) {
    let alerts: Vec<_> = runtime
        .alerts
        .active_alerts()
        .await
        .into_iter()
        .map(|record| record.alert)
        .collect();
    if let Err(e) = runtime.store.record_alerts(&alerts).await {
        error!("failed to persist alerts: {}", e);
    }

    let dead_letters = runtime.alerts.take_dead_letters().await;
    if let Err(e) = runtime.store.record_dead_letters(&dead_letters).await {
        error!("failed to persist dead letters: {}", e);
    }

    let actions = runtime.recovery.take_actions().await;
    if let Err(e) = runtime.store.record_recovery_actions(&actions).await {
        error!("failed to persist recovery actions: {}", e);
    }
}

async fn run_status(config: &AppConfig) -> Result<()> {
    let store = PgStore::new(&config.database).await?;
    let runs = store.recent_runs(10).await?;
    if runs.is_empty() {
        println!("no pipeline runs recorded");
        return Ok(());
    }
    for run in runs {
        println!("{}", run.summary());
    }
    Ok(())
}

async fn run_health(config: &AppConfig) -> Result<()> {
    let store = PgStore::new(&config.database).await?;
    println!("database: {}", store.health().await);

    let summaries = store.attempt_summary(24).await?;
    if summaries.is_empty() {
        println!("no collection attempts in the last 24h");
        return Ok(());
    }
    for summary in summaries {
        let rate = if summary.attempts == 0 {
            0.0
        } else {
            summary.successes as f64 / summary.attempts as f64 * 100.0
        };
        println!(
            "{:<14} {:>5} attempts  {:>5.1}% ok  avg {}ms  last {}",
            summary.collector,
            summary.attempts,
            rate,
            summary.avg_response_ms,
            summary
                .last_attempt
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".into())
        );
    }
    Ok(())
}

async fn run_recover(config: &AppConfig, collector: &str) -> Result<()> {
    let runtime = build_runtime(config).await?;
    let actions = runtime.recovery.attempt_recovery(collector).await;
    for action in &actions {
        println!(
            "{}: {} -> {}{}",
            action.collector,
            action.step.as_str(),
            action.outcome.as_str(),
            action
                .outcome
                .detail()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        );
    }
    flush_operational(&runtime).await;
    Ok(())
}

async fn run_resolve_outcomes(config: &AppConfig, window: CollectionWindow) -> Result<()> {
    let runtime = build_runtime(config).await?;
    let token = runtime.controller.token();
    let games = runtime.orchestrator.resolve_outcomes(window, token).await?;
    println!(
        "resolved outcomes for {} games in {}..{}",
        games, window.start, window.end
    );
    Ok(())
}
