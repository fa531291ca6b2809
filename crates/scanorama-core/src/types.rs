//! Core data model for discovery, scanning, and scheduling
//!
//! These are the value types the engines exchange with the repository. Rows
//! are owned by the persistence layer; engines hold copies for the duration
//! of a job. Timestamps are UTC; IP addresses are stored in canonical string
//! form (see [`canonical_ip`]).

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Canonical string form of an IP address.
///
/// Host identity is keyed on this string, so every writer and every query
/// filter must go through here: IPv4 dotted quad, IPv6 lower-case compressed
/// and unbracketed.
pub fn canonical_ip(ip: IpAddr) -> String {
    ip.to_string()
}

/// Parse and re-canonicalise an address held as text.
pub fn canonicalize_ip(s: &str) -> Result<String> {
    let ip: IpAddr = s.trim().parse()?;
    Ok(canonical_ip(ip))
}

/// Liveness state of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Up,
    Down,
    Unknown,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Up => write!(f, "up"),
            HostStatus::Down => write!(f, "down"),
            HostStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for HostStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(HostStatus::Up),
            "down" => Ok(HostStatus::Down),
            "unknown" => Ok(HostStatus::Unknown),
            other => Err(Error::Validation(format!("unknown host status: {}", other))),
        }
    }
}

/// How a host's liveness was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    /// ICMP echo
    Ping,
    /// TCP probes against common ports
    Tcp,
    /// ARP on the local segment
    Arp,
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryMethod::Ping => write!(f, "ping"),
            DiscoveryMethod::Tcp => write!(f, "tcp"),
            DiscoveryMethod::Arp => write!(f, "arp"),
        }
    }
}

impl std::str::FromStr for DiscoveryMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ping" => Ok(DiscoveryMethod::Ping),
            "tcp" => Ok(DiscoveryMethod::Tcp),
            "arp" => Ok(DiscoveryMethod::Arp),
            other => Err(Error::Validation(format!(
                "unknown discovery method: {}",
                other
            ))),
        }
    }
}

/// OS fingerprint attached to a host
///
/// `confidence` is 0-100; `method` names the detection technique that
/// produced the guess (banner heuristics, operator import, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsFingerprint {
    pub family: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub confidence: u8,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub details: Option<String>,
}

impl OsFingerprint {
    pub fn new(family: impl Into<String>, name: impl Into<String>, confidence: u8) -> Self {
        Self {
            family: family.into(),
            name: name.into(),
            version: String::new(),
            confidence: confidence.min(100),
            method: String::new(),
            details: None,
        }
    }
}

/// A host row as stored in the repository
///
/// Created on first discovery. `first_seen` never changes afterwards;
/// `discovery_count` only grows; every update refreshes `last_seen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    /// Canonical address string; unique per host
    pub ip_address: String,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub vendor: Option<String>,
    pub os: Option<OsFingerprint>,
    pub status: HostStatus,
    pub discovery_method: DiscoveryMethod,
    pub response_time_ms: Option<i64>,
    pub discovery_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Operator opt-out: excluded from scan-engine host resolution
    pub ignore_scanning: bool,
}

/// A single observation of a live host, as produced by discovery
///
/// The repository folds observations into [`Host`] rows via upsert.
#[derive(Debug, Clone)]
pub struct HostObservation {
    pub ip_address: String,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub vendor: Option<String>,
    pub os: Option<OsFingerprint>,
    pub status: HostStatus,
    pub discovery_method: DiscoveryMethod,
    pub response_time_ms: Option<i64>,
}

impl HostObservation {
    /// A minimal "host responded" observation
    pub fn up(ip: IpAddr, method: DiscoveryMethod) -> Self {
        Self {
            ip_address: canonical_ip(ip),
            hostname: None,
            mac_address: None,
            vendor: None,
            os: None,
            status: HostStatus::Up,
            discovery_method: method,
            response_time_ms: None,
        }
    }
}

/// Lifecycle state shared by discovery and scan jobs
///
/// `Completed` and `Failed` are terminal: once entered, the row is read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Legal transitions: pending -> running -> {completed, failed}
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            // A job that cannot start may fail without ever running.
            (JobStatus::Pending, JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Validation(format!("unknown job status: {}", other))),
        }
    }
}

/// One discovery run over a network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryJob {
    pub id: i64,
    /// CIDR the run expanded
    pub network: String,
    pub method: DiscoveryMethod,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub hosts_discovered: i64,
    pub hosts_responsive: i64,
    pub error_message: Option<String>,
}

/// One scan run over a host set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: i64,
    /// Stored scan target this run was started from, if any; ad-hoc and
    /// scheduler-driven runs carry no reference
    pub target_id: Option<i64>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// A persisted, named scan target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTarget {
    pub id: i64,
    /// Unique operator-visible name
    pub name: String,
    pub network: String,
    pub scan_interval_seconds: i64,
    pub scan_ports: String,
    pub scan_type: ScanType,
    pub enabled: bool,
}

/// Transport protocol of a scanned port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(Error::Validation(format!("unknown protocol: {}", other))),
        }
    }
}

/// Observed state of a scanned port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
        }
    }
}

impl std::str::FromStr for PortState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(PortState::Open),
            "closed" => Ok(PortState::Closed),
            "filtered" => Ok(PortState::Filtered),
            other => Err(Error::Validation(format!("unknown port state: {}", other))),
        }
    }
}

/// One port observation from one scan job
///
/// Unique per `(job_id, host_id, port, protocol)`; the repository rejects
/// the whole batch when a duplicate slips in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortScan {
    pub id: i64,
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

/// Scan technique requested from the prober
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    /// Full TCP handshake; unprivileged
    Connect,
    /// Half-open SYN scan
    Syn,
    /// Connect plus service version probing
    Version,
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanType::Connect => write!(f, "connect"),
            ScanType::Syn => write!(f, "syn"),
            ScanType::Version => write!(f, "version"),
        }
    }
}

impl std::str::FromStr for ScanType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connect" => Ok(ScanType::Connect),
            "syn" => Ok(ScanType::Syn),
            "version" => Ok(ScanType::Version),
            other => Err(Error::Validation(format!("unknown scan type: {}", other))),
        }
    }
}

/// Timing template for probe pacing, nmap-style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingTemplate {
    Paranoid,
    Sneaky,
    Polite,
    Normal,
    Aggressive,
    Insane,
}

impl TimingTemplate {
    /// Per-probe timeout in milliseconds
    pub fn probe_timeout_ms(&self) -> u64 {
        match self {
            TimingTemplate::Paranoid => 300_000,
            TimingTemplate::Sneaky => 15_000,
            TimingTemplate::Polite => 10_000,
            TimingTemplate::Normal => 3_000,
            TimingTemplate::Aggressive => 1_000,
            TimingTemplate::Insane => 250,
        }
    }

    /// Upper bound on in-flight probes
    pub fn max_parallelism(&self) -> usize {
        match self {
            TimingTemplate::Paranoid => 1,
            TimingTemplate::Sneaky => 10,
            TimingTemplate::Polite => 100,
            TimingTemplate::Normal => 1000,
            TimingTemplate::Aggressive => 5000,
            TimingTemplate::Insane => 10000,
        }
    }
}

impl fmt::Display for TimingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingTemplate::Paranoid => write!(f, "paranoid"),
            TimingTemplate::Sneaky => write!(f, "sneaky"),
            TimingTemplate::Polite => write!(f, "polite"),
            TimingTemplate::Normal => write!(f, "normal"),
            TimingTemplate::Aggressive => write!(f, "aggressive"),
            TimingTemplate::Insane => write!(f, "insane"),
        }
    }
}

impl std::str::FromStr for TimingTemplate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "paranoid" => Ok(TimingTemplate::Paranoid),
            "sneaky" => Ok(TimingTemplate::Sneaky),
            "polite" => Ok(TimingTemplate::Polite),
            "normal" => Ok(TimingTemplate::Normal),
            "aggressive" => Ok(TimingTemplate::Aggressive),
            "insane" => Ok(TimingTemplate::Insane),
            other => Err(Error::Validation(format!(
                "unknown timing template: {}",
                other
            ))),
        }
    }
}

/// A named bundle of scan parameters, optionally keyed to OS families
///
/// Profiles shipped with the daemon have `built_in = true` and reject
/// update and delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProfile {
    /// Operator-visible unique id, e.g. `generic-default`
    pub id: String,
    pub name: String,
    pub description: String,
    /// OS families this profile targets; empty means generic
    pub os_family: Vec<String>,
    /// Regex patterns matched against the fingerprint's OS name
    pub os_pattern: Vec<String>,
    /// Port specification in `PortSpec` syntax
    pub ports: String,
    pub scan_type: ScanType,
    pub timing: TimingTemplate,
    pub scripts: Vec<String>,
    /// Opaque options blob, passed through to the prober
    pub options: serde_json::Value,
    pub priority: i32,
    pub built_in: bool,
}

/// Kind of work a scheduled job dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledJobKind {
    Discovery,
    Scan,
}

impl fmt::Display for ScheduledJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduledJobKind::Discovery => write!(f, "discovery"),
            ScheduledJobKind::Scan => write!(f, "scan"),
        }
    }
}

impl std::str::FromStr for ScheduledJobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "discovery" => Ok(ScheduledJobKind::Discovery),
            "scan" => Ok(ScheduledJobKind::Scan),
            other => Err(Error::Validation(format!(
                "unknown scheduled job type: {}",
                other
            ))),
        }
    }
}

/// A persisted cron-triggered job
///
/// `config` is an opaque JSON blob typed by `kind`; `next_run` is recomputed
/// from the cron expression relative to now on every persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: i64,
    /// Unique operator-visible name
    pub name: String,
    pub kind: ScheduledJobKind,
    /// Standard 5-field cron expression, local wall-clock time
    pub cron_expression: String,
    pub config: serde_json::Value,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Config blob for scheduled discovery jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryJobConfig {
    pub network: String,
    #[serde(default = "default_discovery_method")]
    pub method: DiscoveryMethod,
    #[serde(default)]
    pub detect_os: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_discovery_method() -> DiscoveryMethod {
    DiscoveryMethod::Tcp
}

fn default_timeout_seconds() -> u64 {
    5
}

fn default_concurrency() -> usize {
    50
}

/// Config blob for scheduled scan jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJobConfig {
    #[serde(default)]
    pub live_hosts_only: bool,
    /// Restrict to hosts inside these CIDRs
    #[serde(default)]
    pub networks: Option<Vec<String>>,
    /// Profile id, or `auto`/empty for fingerprint-based selection
    #[serde(default)]
    pub profile_id: Option<String>,
    /// Only hosts seen within the last N hours
    #[serde(default)]
    pub max_age_hours: Option<i64>,
    #[serde(default)]
    pub os_family: Option<String>,
}
