//! uplinkd: the uplink status reconciliation daemon.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! command store, starts the reconciler over an in-process message bus, and
//! serves the intake and health endpoints over HTTP.
//!
//! Every setting can be overridden from the environment, e.g.
//! `UPLINK_PORT=8080` or `UPLINK_RECONCILE__AGEOUT_SECS=3600`.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uplink_daemon::{AppState, DaemonConfig, archiver};
use uplink_reconcile::{ReconcileService, bus::BroadcastBus, publisher::BusPublisher};
use uplink_store_sqlite::SqliteArchive;

#[derive(Parser)]
#[command(author, version, about = "Uplink command-status reconciliation daemon")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("UPLINK")
        .prefix_separator("_")
        .separator("__"),
    )
    .build()
    .context("failed to read config file")?;

  let daemon_cfg: DaemonConfig = settings
    .try_deserialize()
    .context("failed to deserialise DaemonConfig")?;
  let reconcile_cfg = &daemon_cfg.reconcile;

  // Expand `~` in store path.
  let store_path = expand_tilde(&daemon_cfg.store_path);

  // Open SQLite store.
  let store = SqliteArchive::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let shutdown = CancellationToken::new();

  // Bus, publisher, and the idle-handle sweeper.
  let bus = BroadcastBus::new();
  let publisher = BusPublisher::new(bus.clone(), reconcile_cfg.ambient_context());
  let sweeper = publisher.sweeper(
    reconcile_cfg.publisher_idle_timeout(),
    reconcile_cfg.publisher_sweep_interval(),
  );
  let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

  // Downstream inserts for published statuses.
  let archiver_task = tokio::spawn(archiver::run(
    bus.subscribe_all(),
    store.clone(),
    shutdown.clone(),
  ));

  let service = Arc::new(ReconcileService::start(store, publisher, reconcile_cfg));

  let app = uplink_daemon::router(AppState { service: service.clone() });
  let address = format!("{}:{}", daemon_cfg.host, daemon_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  let served = axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await
    .context("server error");

  // Stop the worker first so its last publishes reach the archiver.
  service.stop().await;
  shutdown.cancel();
  uplink_daemon::join_background(vec![
    ("sweeper", sweeper_task),
    ("archiver", archiver_task),
  ])
  .await;
  bus.shutdown();

  served
}

/// Resolve on Ctrl-C, or when something else cancels `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
  tokio::select! {
    result = tokio::signal::ctrl_c() => {
      if let Err(e) = result {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
      }
      tracing::info!("Shutdown requested");
    }
    _ = shutdown.cancelled() => {}
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
