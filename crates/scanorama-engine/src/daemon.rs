//! Daemon supervisor
//!
//! Builds the repository, prober, engines, and scheduler, runs until a
//! termination signal arrives, then drains in-flight jobs and closes the
//! store. Operator surfaces (CLI, API) reach the engines through the
//! accessors here; the supervisor itself only wires and waits.

use crate::discovery::DiscoveryEngine;
use crate::prober::ConnectProber;
use crate::repository::Repository;
use crate::scan::ScanEngine;
use crate::scheduler::Scheduler;
use crate::storage::SqliteRepository;
use scanorama_core::config::DaemonConfig;
use scanorama_core::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// The assembled daemon
pub struct Daemon {
    repository: Arc<dyn Repository>,
    discovery: DiscoveryEngine,
    scan: ScanEngine,
    scheduler: Scheduler,
    cancel: CancellationToken,
}

impl Daemon {
    /// Construct every component against the configured database.
    pub async fn build(config: &DaemonConfig) -> Result<Self> {
        config.validate()?;

        let repository: Arc<dyn Repository> =
            Arc::new(SqliteRepository::open(&config.database.path).await?);
        let prober = Arc::new(ConnectProber::new());

        // One tracker and one root token span every background job; the
        // scheduler drains both on stop.
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        let discovery = DiscoveryEngine::new(
            repository.clone(),
            prober.clone(),
            tracker.clone(),
            cancel.clone(),
            config.discovery.max_prefix,
        );
        let scan = ScanEngine::new(
            repository.clone(),
            prober,
            config.scan.clone(),
            cancel.clone(),
            config.discovery.max_prefix,
        );
        let scheduler = Scheduler::new(
            repository.clone(),
            discovery.clone(),
            scan.clone(),
            tracker,
            cancel.clone(),
            config.scheduler.shutdown_timeout(),
            config.discovery.max_hosts,
        );

        Ok(Self {
            repository,
            discovery,
            scan,
            scheduler,
            cancel,
        })
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn discovery(&self) -> &DiscoveryEngine {
        &self.discovery
    }

    pub fn scan(&self) -> &ScanEngine {
        &self.scan
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Token that ends [`Daemon::run_until_shutdown`] when cancelled;
    /// exposed so embedders and tests can stop the daemon without a
    /// process signal.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the scheduler, block until SIGINT/SIGTERM (or the cancel
    /// handle fires), then drain and close. Errors out only when the
    /// scheduler cannot start.
    pub async fn run_until_shutdown(&self) -> Result<()> {
        self.scheduler.start().await?;
        info!("scanorama daemon running; waiting for termination signal");

        wait_for_shutdown(&self.cancel).await;
        info!("shutdown requested; draining jobs");

        self.scheduler.stop().await;
        self.repository.close().await;
        info!("scanorama daemon stopped");
        Ok(())
    }
}

/// Block until the process receives an interrupt or termination signal,
/// or the root token is cancelled.
async fn wait_for_shutdown(cancel: &CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                cancel.cancelled().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = terminate.recv() => info!("received SIGTERM"),
            _ = cancel.cancelled() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received interrupt"),
            _ = cancel.cancelled() => {}
        }
    }
}
