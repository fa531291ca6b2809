//! Repository seam between the engines and the persistent store
//!
//! The engines depend on this narrow trait, never on an SQL dialect. The
//! SQLite implementation lives in [`crate::storage`]; tests substitute the
//! trait with the same implementation over an in-memory database.
//!
//! Every call returns `Ok` or a tagged [`scanorama_core::Error`]; transient
//! failures are surfaced to the caller, which decides whether to retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanorama_core::types::{
    DiscoveryJob, DiscoveryMethod, Host, HostObservation, HostStatus, PortScan, PortState,
    Protocol, ScanJob, ScanProfile, ScanTarget, ScanType, ScheduledJob,
};
use scanorama_core::Result;

/// Filter for [`Repository::get_active_hosts`]
///
/// Results are always ordered by `last_seen` descending; `limit` applies
/// after the CIDR-containment filter.
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    pub status: Option<HostStatus>,
    pub os_family: Option<String>,
    /// Keep only hosts whose address falls inside one of these CIDRs
    pub networks: Option<Vec<String>>,
    pub min_last_seen: Option<DateTime<Utc>>,
    pub include_ignored: bool,
    pub limit: Option<usize>,
}

impl HostFilter {
    pub fn with_status(mut self, status: HostStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_os_family(mut self, family: impl Into<String>) -> Self {
        self.os_family = Some(family.into());
        self
    }

    pub fn with_networks(mut self, networks: Vec<String>) -> Self {
        self.networks = Some(networks);
        self
    }

    pub fn with_min_last_seen(mut self, ts: DateTime<Utc>) -> Self {
        self.min_last_seen = Some(ts);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A port-scan observation before it has a row id
#[derive(Debug, Clone)]
pub struct NewPortScan {
    pub job_id: i64,
    pub host_id: i64,
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service: Option<String>,
    pub version: Option<String>,
    pub product: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

/// Fields for a new persisted scan target
#[derive(Debug, Clone)]
pub struct NewScanTarget {
    pub name: String,
    pub network: String,
    pub scan_interval_seconds: i64,
    pub scan_ports: String,
    pub scan_type: ScanType,
    pub enabled: bool,
}

/// Persistence operations the engines and scheduler rely on
#[async_trait]
pub trait Repository: Send + Sync {
    // ---- hosts ----

    /// Create the host on first sight of its address, otherwise fold the
    /// observation into the existing row: refresh `status`, `last_seen`,
    /// `discovery_method`, `response_time_ms`, bump `discovery_count`, and
    /// overwrite the OS fingerprint only when the observation carries one.
    /// Atomic; returns the stored row.
    async fn upsert_host(&self, observation: &HostObservation) -> Result<Host>;

    async fn get_host_by_ip(&self, ip_address: &str) -> Result<Option<Host>>;

    /// Filtered host query, ordered by `last_seen` descending.
    async fn get_active_hosts(&self, filter: &HostFilter) -> Result<Vec<Host>>;

    async fn set_host_ignored(&self, ip_address: &str, ignored: bool) -> Result<()>;

    // ---- discovery jobs ----

    /// Insert a `pending` discovery job row.
    async fn create_discovery_job(
        &self,
        network: &str,
        method: DiscoveryMethod,
    ) -> Result<DiscoveryJob>;

    /// Persist job fields. Status changes must follow
    /// `pending -> running -> {completed, failed}`; anything else is a
    /// `Conflict`, and terminal rows reject every update.
    async fn update_discovery_job(&self, job: &DiscoveryJob) -> Result<()>;

    async fn get_discovery_job(&self, id: i64) -> Result<Option<DiscoveryJob>>;

    // ---- scan jobs ----

    /// Insert a `pending` scan job row, optionally tied to a stored target.
    async fn create_scan_job(&self, target_id: Option<i64>) -> Result<ScanJob>;

    /// Same transition rule as [`Repository::update_discovery_job`].
    async fn update_scan_job(&self, job: &ScanJob) -> Result<()>;

    async fn get_scan_job(&self, id: i64) -> Result<Option<ScanJob>>;

    // ---- scan targets ----

    async fn create_scan_target(&self, target: &NewScanTarget) -> Result<ScanTarget>;

    async fn get_scan_target(&self, id: i64) -> Result<Option<ScanTarget>>;

    async fn list_scan_targets(&self) -> Result<Vec<ScanTarget>>;

    async fn delete_scan_target(&self, id: i64) -> Result<()>;

    // ---- port scans ----

    /// All-or-nothing batch insert. A `(job_id, host_id, port, protocol)`
    /// duplicate fails the whole batch cleanly.
    async fn insert_port_scans(&self, scans: &[NewPortScan]) -> Result<()>;

    /// Port scans recorded by one job, ordered by host then port.
    async fn get_port_scans(&self, job_id: i64) -> Result<Vec<PortScan>>;

    // ---- scan profiles ----

    async fn list_profiles(&self) -> Result<Vec<ScanProfile>>;

    async fn get_profile(&self, id: &str) -> Result<Option<ScanProfile>>;

    /// Profiles whose `os_family` set contains `family`, case-insensitive.
    async fn get_profiles_by_os_family(&self, family: &str) -> Result<Vec<ScanProfile>>;

    async fn create_profile(&self, profile: &ScanProfile) -> Result<()>;

    /// Rejected with `Conflict` for built-in profiles.
    async fn update_profile(&self, profile: &ScanProfile) -> Result<()>;

    /// Rejected with `Conflict` for built-in profiles.
    async fn delete_profile(&self, id: &str) -> Result<()>;

    // ---- scheduled jobs ----

    async fn list_enabled_scheduled_jobs(&self) -> Result<Vec<ScheduledJob>>;

    async fn list_scheduled_jobs(&self) -> Result<Vec<ScheduledJob>>;

    async fn get_scheduled_job(&self, id: i64) -> Result<Option<ScheduledJob>>;

    /// Insert when `job.id == 0`, update otherwise. A duplicate name is a
    /// `Conflict`. The caller provides `next_run` recomputed from the cron
    /// expression; the repository never parses cron.
    async fn save_scheduled_job(&self, job: &ScheduledJob) -> Result<ScheduledJob>;

    async fn delete_scheduled_job(&self, id: i64) -> Result<()>;

    async fn set_scheduled_job_enabled(&self, id: i64, enabled: bool) -> Result<()>;

    async fn set_scheduled_job_last_run(
        &self,
        id: i64,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Release pooled connections; called once at daemon shutdown.
    async fn close(&self);
}
