//! Scanorama engine
//!
//! The scheduling, execution, and persistence core of the Scanorama
//! daemon:
//!
//! - [`repository`]: the narrow persistence seam plus the SQLite
//!   implementation in [`storage`]
//! - [`prober`]: the probe capability and the unprivileged TCP connect
//!   prober
//! - [`profile`]: OS-aware scan profile scoring and selection
//! - [`discovery`]: CIDR sweeps with adaptive timeouts
//! - [`scan`]: per-host port scans with atomic batch persistence
//! - [`scheduler`]: cron-driven dispatch with single-flight per job
//! - [`daemon`]: the supervisor wiring it all together
//!
//! # Example
//!
//! ```no_run
//! use scanorama_core::DaemonConfig;
//! use scanorama_engine::daemon::Daemon;
//!
//! # async fn example() -> scanorama_core::Result<()> {
//! let config = DaemonConfig::default();
//! let daemon = Daemon::build(&config).await?;
//! daemon.run_until_shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod daemon;
pub mod discovery;
pub mod prober;
pub mod profile;
pub mod repository;
pub mod scan;
pub mod scheduler;
pub mod storage;

pub use daemon::Daemon;
pub use discovery::{DiscoveryEngine, DiscoveryRequest};
pub use prober::{ConnectProber, Prober};
pub use profile::{score_profile, ProfileSelector};
pub use repository::{HostFilter, NewPortScan, NewScanTarget, Repository};
pub use scan::{ScanEngine, ScanRequest, ScanSummary, ScanTargets};
pub use scheduler::Scheduler;
pub use storage::SqliteRepository;
