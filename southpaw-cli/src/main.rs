mod cli;
mod config_helper;
mod errors;
mod shutdown;
mod wiring;

use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use cli::Cli;
use errors::CliError;
use southpaw_core::{Engine, MemoryStreamHub, Metrics};
use southpaw_storage::{LmdbStateStore, StateStore};
use southpaw_types::Relation;

fn main() {
    set_panic_hook();
    init_tracing();

    if let Err(e) = run() {
        error!("{e}");
        process::exit(1);
    }
}

fn set_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        error!("{info}");
        process::exit(1);
    }));
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = config_helper::load_config(&cli.config)?;
    let roots = config_helper::load_relations(&cli.relations)?;
    if roots.is_empty() {
        return Err(CliError::NoRelations(cli.relations.join(", ")));
    }
    for root in &roots {
        root.validate_as_root()?;
    }

    install_prometheus_exporter();

    let mut store = LmdbStateStore::new(cli.state_dir.as_str())?;

    // Side-effect order per spec §6: restore -> delete-backup/state -> build/run.
    let metrics = Metrics::new();
    if cli.restore {
        info!("restoring state store from the most recent backup");
        store.restore()?;
        metrics.record_backup_restored();
    }
    if cli.delete_backup {
        info!("deleting all on-disk backups");
        store.delete_backups()?;
        metrics.record_backup_deleted();
    }
    if cli.delete_state {
        info!("deleting on-disk live state");
        store.delete_state()?;
    }

    if cli.build {
        return build(store, config, roots);
    }

    if cli.verify_state {
        return verify(store, config, roots);
    }

    run_engine(store, config, roots, &cli)
}

/// Opens indices and the pending sets for every root, against an in-memory
/// stream hub, without consuming any real traffic. Validates the relation
/// trees and config against the durable store (spec: "`--build`-time dry
/// runs").
fn build(store: LmdbStateStore, config: southpaw_types::Config, roots: Vec<Relation>) -> Result<(), CliError> {
    let mut hub = MemoryStreamHub::new();
    let root_handles = wiring::dry_run_roots(&mut hub, roots.clone());
    let sources = wiring::dry_run_sources(&mut hub, &roots);
    let keep_running = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let mut engine = Engine::new(store, config, root_handles, sources, Duration::from_millis(1), keep_running)?;
    engine.commit()?;
    info!("build complete: every index and pending set opened successfully");
    Ok(())
}

fn verify(store: LmdbStateStore, config: southpaw_types::Config, roots: Vec<Relation>) -> Result<(), CliError> {
    let mut hub = MemoryStreamHub::new();
    let root_handles = wiring::dry_run_roots(&mut hub, roots.clone());
    let sources = wiring::dry_run_sources(&mut hub, &roots);
    let keep_running = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let engine = Engine::new(store, config, root_handles, sources, Duration::from_millis(1), keep_running)?;

    let violations = engine.verify_state()?;
    if violations.is_empty() {
        info!("state verified: no invariant-1 violations");
    } else {
        for (index_name, violation) in &violations {
            error!("invariant-1 violation in `{index_name}`: {violation:?}");
        }
        process::exit(1);
    }
    Ok(())
}

#[cfg(feature = "kafka")]
fn run_engine(store: LmdbStateStore, config: southpaw_types::Config, roots: Vec<Relation>, cli: &Cli) -> Result<(), CliError> {
    let keep_running = shutdown::install();
    let root_handles = wiring::kafka_roots(&cli.bootstrap_servers, roots.clone())?;
    let sources = wiring::kafka_sources(&cli.bootstrap_servers, &cli.group_id, &config, &roots)?;

    let mut engine = Engine::new(store, config, root_handles, sources, Duration::ZERO, keep_running)?;
    engine.run()?;
    info!("shutting down: committing final state");
    engine.commit()?;
    Ok(())
}

#[cfg(not(feature = "kafka"))]
fn run_engine(_store: LmdbStateStore, _config: southpaw_types::Config, _roots: Vec<Relation>, _cli: &Cli) -> Result<(), CliError> {
    Err(CliError::KafkaFeatureDisabled)
}

fn install_prometheus_exporter() {
    use metrics_exporter_prometheus::PrometheusBuilder;
    if let Err(e) = PrometheusBuilder::new().install() {
        tracing::warn!("failed to install the Prometheus metrics exporter: {e}");
    }
}
