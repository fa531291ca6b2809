//! Scanorama core library
//!
//! Shared foundation for the Scanorama daemon: the error taxonomy, the data
//! model (hosts, jobs, port scans, profiles, scheduled jobs), CIDR target
//! expansion, port specifications, and daemon configuration.
//!
//! The engines and the repository live in `scanorama-engine`; this crate
//! stays free of I/O so every type here is cheap to construct in tests.

pub mod config;
pub mod error;
pub mod target;
pub mod types;

pub use config::{DaemonConfig, DatabaseConfig, DiscoveryConfig, ScanConfig, SchedulerConfig};
pub use error::{Error, Result};
pub use target::{expand_network, PortSpec, DEFAULT_MAX_PREFIX};
pub use types::{
    canonical_ip, canonicalize_ip, DiscoveryJob, DiscoveryJobConfig, DiscoveryMethod, Host,
    HostObservation, HostStatus, JobStatus, OsFingerprint, PortScan, PortState, Protocol,
    ScanJob, ScanJobConfig, ScanProfile, ScanTarget, ScanType, ScheduledJob, ScheduledJobKind,
    TimingTemplate,
};
