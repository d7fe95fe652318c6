//! Lifecycle: start the worker, stop it, and report whether it is alive.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uplink_core::{archive::CommandArchive, publish::StatusPublisher};

use crate::{
  config::ReconcileConfig,
  engine::Reconciler,
  health::{Health, HealthSnapshot},
  intake::{self, IntakeSender},
};

pub struct ReconcileService;

impl ReconcileService {
  /// Spawn the worker on the current runtime.
  ///
  /// The worker owns `archive` and `publisher` until it exits. A supervisor
  /// task watches it and flips the health flags when it stops, whether by
  /// request or by panic. The worker is never restarted.
  pub fn start<A, P>(archive: A, publisher: P, config: &ReconcileConfig) -> ServiceHandle
  where
    A: CommandArchive + 'static,
    P: StatusPublisher + 'static,
  {
    let (intake, queue) = intake::channel(config.queue_capacity);
    let health = Arc::new(Health::new());
    let shutdown = CancellationToken::new();

    let reconciler = Reconciler::new(archive, publisher, config);
    let worker = tokio::spawn(reconciler.run(
      queue,
      shutdown.clone(),
      config.poll_timeout(),
      health.clone(),
    ));

    let supervisor = tokio::spawn({
      let health = health.clone();
      async move {
        match worker.await {
          Ok(()) => debug!("Reconciler worker exited"),
          Err(e) if e.is_panic() => error!(error = %e, "Reconciler worker died"),
          Err(e) => warn!(error = %e, "Reconciler worker cancelled"),
        }
        health.mark_dead();
      }
    });

    info!(queue_capacity = config.queue_capacity, "Reconcile service started");

    ServiceHandle {
      intake,
      health,
      shutdown,
      supervisor: Mutex::new(Some(supervisor)),
    }
  }
}

pub struct ServiceHandle {
  intake:     IntakeSender,
  health:     Arc<Health>,
  shutdown:   CancellationToken,
  supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceHandle {
  /// A sender for pushing notification batches to the worker.
  pub fn intake(&self) -> IntakeSender { self.intake.clone() }

  pub fn is_alive(&self) -> bool { self.health.is_alive() }

  pub fn is_connected(&self) -> bool { self.health.is_connected() }

  pub fn stats(&self) -> HealthSnapshot { self.health.snapshot() }

  /// Token cancelled when the service is asked to stop.
  pub fn shutdown_token(&self) -> CancellationToken { self.shutdown.clone() }

  /// Ask the worker to stop and wait for it. The pass in flight, including
  /// any archive call, completes first. Calling again is a no-op.
  pub async fn stop(&self) {
    self.shutdown.cancel();
    let supervisor = self.supervisor.lock().take();
    if let Some(task) = supervisor {
      if let Err(e) = task.await {
        error!(error = %e, "Reconcile supervisor failed");
      }
      info!("Reconcile service stopped");
    }
  }
}

impl Drop for ServiceHandle {
  fn drop(&mut self) { self.shutdown.cancel(); }
}
