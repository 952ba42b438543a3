use clap::ArgMatches;
use governor_core::bus::nats::NatsEventBus;
use governor_core::config::Config;
use governor_core::dedup::PgProcessedRegistry;
use governor_core::finality::FinalityThresholds;
use governor_core::governance::oversight::NoOversight;
use governor_core::governance::pending_review::PgPendingReviewRegistry;
use governor_core::governance::{
    FinalityLoop, GovernanceLoop, GovernancePipeline, PermissiveFallback, StaticDriftProvider,
    StaticPolicyProvider,
};
use governor_core::graph::postgres::PgGraphStore;
use governor_core::hatchery::{Hatchery, RoleConfig, WorkerFactory};
use governor_core::metrics::prometheus_exporter::PrometheusExporter;
use governor_core::policy::PolicyConfig;
use governor_core::state_machine::PgStateMachine;
use governor_core::types::{DriftLevel, DriftSnapshot};
use governor_core::wal::PgWal;
use governor_core::watchdog::Watchdog;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Spawns no-op placeholder workers: the actual extraction/drift/planning
/// workers are out of scope for this engine, so `govctl up` only ever
/// spawns stand-ins that keep the hatchery's supervision loop exercised
/// against something real.
struct PlaceholderWorkerFactory;

impl WorkerFactory for PlaceholderWorkerFactory {
    fn spawn(&self, role: &str, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let role = role.to_string();
        tokio::spawn(async move {
            info!(role = role.as_str(), "placeholder worker started");
            shutdown.cancelled().await;
            info!(role = role.as_str(), "placeholder worker stopped");
        })
    }
}

pub async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let bus = Arc::new(NatsEventBus::connect(&config.bus.nats_url, &config.bus.stream).await?);
    let wal = Arc::new(PgWal::new(pool.clone()));
    let dedup = Arc::new(PgProcessedRegistry::new(pool.clone()));
    let state_machine = Arc::new(PgStateMachine::new(pool.clone()));
    let graph = Arc::new(PgGraphStore::new(pool.clone()));
    let pending_review = Arc::new(PgPendingReviewRegistry::new(pool.clone()));

    let policy_config = PolicyConfig::from_yaml_file(&config.governance_yaml_path).unwrap_or(PolicyConfig {
        mode: governor_core::types::Mode::Yolo,
        transition_rules: vec![],
        rules: vec![],
        scopes: Default::default(),
    });
    let policy = Arc::new(StaticPolicyProvider(policy_config));
    let drift = Arc::new(StaticDriftProvider(DriftSnapshot {
        level: DriftLevel::None,
        types: vec![],
    }));
    let permission = Arc::new(PermissiveFallback);
    let oversight = Arc::new(NoOversight);
    let metrics = Arc::new(PrometheusExporter::new());

    let pipeline = Arc::new(GovernancePipeline::new(
        bus.clone(),
        wal.clone(),
        state_machine.clone(),
        drift,
        policy,
        permission,
        oversight,
        pending_review.clone(),
        metrics.clone(),
    ));

    let governance_loop = GovernanceLoop {
        bus: bus.clone(),
        dedup: dedup.clone(),
        pipeline,
        consumer_name: format!("{}-governance", config.agent_id),
        stream: config.bus.stream.clone(),
    };

    let finality_thresholds = FinalityThresholds {
        near: config.finality_thresholds.near,
        auto: config.finality_thresholds.auto,
    };

    let finality_loop = FinalityLoop {
        bus: bus.clone(),
        dedup,
        graph: graph.clone(),
        thresholds: finality_thresholds,
        metrics,
        consumer_name: format!("{}-finality", config.agent_id),
        stream: config.bus.stream.clone(),
    };

    let watchdog = Watchdog::new(
        wal.clone(),
        graph.clone(),
        pending_review,
        config.watchdog,
        finality_thresholds,
    );

    let hatchery = Hatchery::new(Arc::new(PlaceholderWorkerFactory));
    for role in ["extract_facts", "check_drift", "plan_actions", "summarize_status"] {
        hatchery.register_role(RoleConfig::new(role));
    }

    let scopes: Vec<String> = matches
        .get_many::<String>("scope")
        .map(|vals| vals.cloned().collect())
        .unwrap_or_default()
        .into_iter()
        .chain(config.scope_id.clone())
        .collect();

    let shutdown = CancellationToken::new();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        ctrl_c_shutdown.cancel();
    });

    info!(scopes = ?scopes, "starting governance engine");

    let governance_shutdown = shutdown.clone();
    let governance_handle = tokio::spawn(async move { governance_loop.run(governance_shutdown).await });

    let finality_shutdown = shutdown.clone();
    let finality_handle = tokio::spawn(async move { finality_loop.run(finality_shutdown).await });

    let watchdog_scopes = scopes.clone();
    let watchdog_shutdown = shutdown.clone();
    let watchdog_handle = tokio::spawn(async move { watchdog.run(watchdog_scopes, watchdog_shutdown).await });

    let hatchery_interval = config.watchdog.interval;
    let hatchery_shutdown = shutdown.clone();
    let hatchery_handle = tokio::spawn(async move { hatchery.run(hatchery_interval, hatchery_shutdown).await });

    let _ = tokio::join!(governance_handle, finality_handle, watchdog_handle, hatchery_handle);
    Ok(())
}
