//! Host discovery engine
//!
//! A discovery run has two phases. The synchronous phase validates the
//! network, persists a `running` job row, and hands the caller the job.
//! The asynchronous phase expands targets, probes them under an adaptive
//! timeout, upserts the responsive hosts, and always finishes by writing a
//! terminal row, whatever happened in between.

use crate::prober::{LivenessRequest, LivenessResult, Prober};
use crate::repository::Repository;
use chrono::Utc;
use futures::FutureExt;
use scanorama_core::target::expand_network;
use scanorama_core::types::{
    DiscoveryJob, DiscoveryJobConfig, DiscoveryMethod, HostObservation, HostStatus, JobStatus,
};
use scanorama_core::{Error, Result};
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Polling cadence of [`DiscoveryEngine::wait_for_completion`]
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Polls during which a missing job row is tolerated rather than fatal
const MISSING_ROW_GRACE_POLLS: u32 = 5;

/// Parameters for one discovery run
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    /// CIDR to sweep (required)
    pub network: String,
    pub method: DiscoveryMethod,
    pub detect_os: bool,
    /// Per-run base timeout fed into the adaptive computation
    pub base_timeout: Duration,
    pub concurrency: usize,
    pub max_hosts: usize,
}

impl DiscoveryRequest {
    /// Build a request from a scheduled job's config blob plus engine limits.
    pub fn from_job_config(config: &DiscoveryJobConfig, max_hosts: usize) -> Self {
        Self {
            network: config.network.clone(),
            method: config.method,
            detect_os: config.detect_os,
            base_timeout: Duration::from_secs(config.timeout_seconds),
            concurrency: config.concurrency,
            max_hosts,
        }
    }
}

/// Adaptive sweep timeout: the base timeout scaled by target count,
/// clamped to [30s, 300s].
pub fn adaptive_timeout(base: Duration, target_count: usize) -> Duration {
    let scaled = base.as_secs_f64() * (6.0 + (target_count as f64 / 100.0) * 2.0);
    Duration::from_secs_f64(scaled.clamp(30.0, 300.0))
}

/// Timing template for a sweep deadline: short deadlines push harder.
pub fn timing_for_timeout(timeout: Duration) -> scanorama_core::types::TimingTemplate {
    use scanorama_core::types::TimingTemplate;
    if timeout <= Duration::from_secs(30) {
        TimingTemplate::Aggressive
    } else if timeout <= Duration::from_secs(120) {
        TimingTemplate::Normal
    } else {
        TimingTemplate::Polite
    }
}

/// Pick the canonical address out of a liveness result, IPv4 preferred.
fn preferred_address(result: &LivenessResult) -> IpAddr {
    result
        .addresses
        .iter()
        .copied()
        .find(|a| a.is_ipv4())
        .or_else(|| result.addresses.first().copied())
        .unwrap_or(result.address)
}

/// Discovery engine
#[derive(Clone)]
pub struct DiscoveryEngine {
    repository: Arc<dyn Repository>,
    prober: Arc<dyn Prober>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    /// Widest accepted prefix length for expansion
    max_prefix: u8,
}

impl DiscoveryEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        prober: Arc<dyn Prober>,
        tracker: TaskTracker,
        cancel: CancellationToken,
        max_prefix: u8,
    ) -> Self {
        Self {
            repository,
            prober,
            tracker,
            cancel,
            max_prefix,
        }
    }

    /// Start a discovery run and return the `running` job row immediately;
    /// the sweep itself continues on the supervisor's task tracker.
    pub async fn discover(&self, request: DiscoveryRequest) -> Result<DiscoveryJob> {
        let (job, targets) = self.begin(&request).await?;

        let engine = self.clone();
        let job_for_task = job.clone();
        self.tracker.spawn(async move {
            engine.execute(job_for_task, targets, request).await;
        });

        Ok(job)
    }

    /// Run a discovery to completion and return the terminal job row.
    /// This is the entry point the scheduler dispatches through.
    pub async fn run(&self, request: DiscoveryRequest) -> Result<DiscoveryJob> {
        let (job, targets) = self.begin(&request).await?;
        let job_id = job.id;
        self.execute(job, targets, request).await;

        let finished = self
            .repository
            .get_discovery_job(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("discovery job {} disappeared", job_id)))?;

        if finished.status == JobStatus::Failed {
            return Err(Error::Internal(format!(
                "discovery job {} failed: {}",
                job_id,
                finished.error_message.as_deref().unwrap_or("unknown error")
            )));
        }
        Ok(finished)
    }

    /// Synchronous phase: validate the network, persist the job, mark it
    /// running.
    async fn begin(&self, request: &DiscoveryRequest) -> Result<(DiscoveryJob, Vec<IpAddr>)> {
        let targets = expand_network(&request.network, self.max_prefix, request.max_hosts)?;

        let mut job = self
            .repository
            .create_discovery_job(&request.network, request.method)
            .await?;

        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        self.repository.update_discovery_job(&job).await?;

        info!(
            "discovery job {} started: {} ({} targets, method {})",
            job.id,
            request.network,
            targets.len(),
            request.method
        );

        Ok((job, targets))
    }

    /// Asynchronous phase. Never returns an error: every outcome, including
    /// a panic in the sweep or a cancellation, ends in a terminal row.
    async fn execute(&self, job: DiscoveryJob, targets: Vec<IpAddr>, request: DiscoveryRequest) {
        let sweep = AssertUnwindSafe(self.sweep(&targets, &request)).catch_unwind();

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(Error::Cancelled("discovery cancelled during shutdown".to_string()))
            }
            result = sweep => match result {
                Ok(inner) => inner,
                Err(_) => Err(Error::Internal("discovery sweep panicked".to_string())),
            },
        };

        self.finalize(job, outcome).await;
    }

    /// Probe the targets and upsert every responsive host. Returns the
    /// number of responsive hosts; per-host save failures are logged and
    /// counted but never fail the sweep.
    async fn sweep(&self, targets: &[IpAddr], request: &DiscoveryRequest) -> Result<i64> {
        let timeout = adaptive_timeout(request.base_timeout, targets.len());
        let timing = timing_for_timeout(timeout);
        debug!(
            "sweeping {} targets with timeout {:?} ({} timing)",
            targets.len(),
            timeout,
            timing
        );

        let results = self
            .prober
            .probe_liveness(&LivenessRequest {
                targets: targets.to_vec(),
                method: request.method,
                timing,
                detect_os: request.detect_os,
                timeout,
                concurrency: request.concurrency,
            })
            .await
            .map_err(|e| Error::Transient(format!("liveness probe failed: {}", e)))?;

        let responsive: Vec<&LivenessResult> = results
            .iter()
            .filter(|r| r.state == HostStatus::Up)
            .collect();

        let mut save_errors = 0u64;
        for result in &responsive {
            let address = preferred_address(result);
            let observation = HostObservation {
                os: result.os.clone(),
                hostname: result.hostname.clone(),
                mac_address: result.mac_address.clone(),
                vendor: result.vendor.clone(),
                response_time_ms: result.response_time.map(|d| d.as_millis() as i64),
                ..HostObservation::up(address, request.method)
            };

            if let Err(e) = self.repository.upsert_host(&observation).await {
                save_errors += 1;
                warn!("failed to save host {}: {}", observation.ip_address, e);
            }
        }

        if save_errors > 0 {
            warn!(
                "{}/{} responsive hosts could not be saved",
                save_errors,
                responsive.len()
            );
        }

        Ok(responsive.len() as i64)
    }

    /// Write the terminal row. Errors here can only be logged; there is
    /// nothing left to report them to.
    async fn finalize(&self, mut job: DiscoveryJob, outcome: Result<i64>) {
        job.completed_at = Some(Utc::now());
        match outcome {
            Ok(responsive) => {
                job.status = JobStatus::Completed;
                job.hosts_discovered = responsive;
                job.hosts_responsive = responsive;
                info!(
                    "discovery job {} completed: {} hosts responsive",
                    job.id, responsive
                );
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error_message = Some(e.to_string());
                warn!("discovery job {} failed: {}", job.id, e);
            }
        }

        if let Err(e) = self.repository.update_discovery_job(&job).await {
            error!(
                "failed to write terminal row for discovery job {}: {}",
                job.id, e
            );
        }
    }

    /// Poll the job until it reaches a terminal state.
    ///
    /// Returns the completed job, an error carrying the job's failure
    /// message, or `Timeout` when the deadline passes first. A missing row
    /// is tolerated for the first few polls to cover read-after-write lag.
    pub async fn wait_for_completion(&self, job_id: i64, timeout: Duration) -> Result<DiscoveryJob> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut polls = 0u32;

        loop {
            match self.repository.get_discovery_job(job_id).await? {
                Some(job) if job.status == JobStatus::Completed => return Ok(job),
                Some(job) if job.status == JobStatus::Failed => {
                    return Err(Error::Internal(format!(
                        "discovery job {} failed: {}",
                        job_id,
                        job.error_message.as_deref().unwrap_or("unknown error")
                    )));
                }
                Some(_) => {}
                None if polls < MISSING_ROW_GRACE_POLLS => {}
                None => {
                    return Err(Error::NotFound(format!(
                        "discovery job {} not found",
                        job_id
                    )));
                }
            }

            polls += 1;
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                return Err(Error::Timeout(format!(
                    "discovery job {} still not terminal after {:?}",
                    job_id, timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::{HostPortReport, PortProbeRequest};
    use crate::storage::SqliteRepository;
    use async_trait::async_trait;
    use scanorama_core::types::TimingTemplate;

    /// Prober that reports a fixed set of addresses as up.
    struct StaticProber {
        up: Vec<IpAddr>,
    }

    #[async_trait]
    impl Prober for StaticProber {
        async fn probe_liveness(&self, request: &LivenessRequest) -> Result<Vec<LivenessResult>> {
            Ok(request
                .targets
                .iter()
                .map(|&t| {
                    if self.up.contains(&t) {
                        LivenessResult {
                            address: t,
                            state: HostStatus::Up,
                            addresses: vec![t],
                            hostname: None,
                            mac_address: None,
                            vendor: None,
                            os: None,
                            response_time: Some(Duration::from_millis(3)),
                        }
                    } else {
                        LivenessResult {
                            address: t,
                            state: HostStatus::Down,
                            addresses: vec![t],
                            hostname: None,
                            mac_address: None,
                            vendor: None,
                            os: None,
                            response_time: None,
                        }
                    }
                })
                .collect())
        }

        async fn probe_ports(&self, _request: &PortProbeRequest) -> Result<Vec<HostPortReport>> {
            Ok(Vec::new())
        }
    }

    async fn engine_with(up: Vec<IpAddr>) -> (DiscoveryEngine, Arc<SqliteRepository>) {
        let repo = Arc::new(SqliteRepository::open(":memory:").await.unwrap());
        let engine = DiscoveryEngine::new(
            repo.clone(),
            Arc::new(StaticProber { up }),
            TaskTracker::new(),
            CancellationToken::new(),
            16,
        );
        (engine, repo)
    }

    fn request(network: &str) -> DiscoveryRequest {
        DiscoveryRequest {
            network: network.to_string(),
            method: DiscoveryMethod::Tcp,
            detect_os: false,
            base_timeout: Duration::from_secs(5),
            concurrency: 10,
            max_hosts: 1024,
        }
    }

    #[test]
    fn test_adaptive_timeout_scaling() {
        // base 10s, 254 targets: 10 * (6 + 5.08) = ~110.8s
        let t = adaptive_timeout(Duration::from_secs(10), 254);
        assert!(t >= Duration::from_secs(100) && t <= Duration::from_secs(120));

        // base 10s, 5 targets: 10 * 6.1 = 61s
        let t = adaptive_timeout(Duration::from_secs(10), 5);
        assert!(t >= Duration::from_secs(50) && t <= Duration::from_secs(70));
    }

    #[test]
    fn test_adaptive_timeout_clamps() {
        assert_eq!(
            adaptive_timeout(Duration::from_secs(1), 0),
            Duration::from_secs(30)
        );
        assert_eq!(
            adaptive_timeout(Duration::from_secs(60), 10_000),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_timing_selection() {
        assert_eq!(
            timing_for_timeout(Duration::from_secs(30)),
            TimingTemplate::Aggressive
        );
        assert_eq!(
            timing_for_timeout(Duration::from_secs(120)),
            TimingTemplate::Normal
        );
        assert_eq!(
            timing_for_timeout(Duration::from_secs(121)),
            TimingTemplate::Polite
        );
    }

    #[test]
    fn test_preferred_address_picks_ipv4() {
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let result = LivenessResult {
            address: v6,
            state: HostStatus::Up,
            addresses: vec![v6, v4],
            hostname: None,
            mac_address: None,
            vendor: None,
            os: None,
            response_time: None,
        };
        assert_eq!(preferred_address(&result), v4);

        let v6_only = LivenessResult {
            addresses: vec![v6],
            ..result
        };
        assert_eq!(preferred_address(&v6_only), v6);
    }

    #[tokio::test]
    async fn test_run_persists_host_and_terminal_job() {
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();
        let (engine, repo) = engine_with(vec![localhost]).await;

        let job = engine.run(request("127.0.0.1/32")).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.hosts_discovered, 1);
        assert_eq!(job.hosts_responsive, 1);
        assert!(job.completed_at.unwrap() >= job.created_at);

        let host = repo.get_host_by_ip("127.0.0.1").await.unwrap().unwrap();
        assert_eq!(host.discovery_method, DiscoveryMethod::Tcp);
        assert_eq!(host.status, HostStatus::Up);
        assert_eq!(host.discovery_count, 1);
    }

    #[tokio::test]
    async fn test_repeat_discovery_increments_count_only() {
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();
        let (engine, repo) = engine_with(vec![localhost]).await;

        engine.run(request("127.0.0.1/32")).await.unwrap();
        let first = repo.get_host_by_ip("127.0.0.1").await.unwrap().unwrap();

        engine.run(request("127.0.0.1/32")).await.unwrap();
        let second = repo.get_host_by_ip("127.0.0.1").await.unwrap().unwrap();

        assert_eq!(second.discovery_count, 2);
        assert_eq!(second.first_seen, first.first_seen);
        assert!(second.last_seen >= first.last_seen);
    }

    #[tokio::test]
    async fn test_discover_returns_running_then_completes() {
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();
        let (engine, _repo) = engine_with(vec![localhost]).await;

        let handle = engine.discover(request("127.0.0.1/32")).await.unwrap();
        assert_eq!(handle.status, JobStatus::Running);

        let finished = engine
            .wait_for_completion(handle.id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.hosts_responsive, 1);
    }

    #[tokio::test]
    async fn test_invalid_network_fails_synchronously() {
        let (engine, repo) = engine_with(vec![]).await;

        let err = engine.discover(request("10.0.0.0/8")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Nothing was persisted for the rejected run.
        assert!(repo.get_discovery_job(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_down_hosts_are_not_persisted() {
        let (engine, repo) = engine_with(vec![]).await;

        let job = engine.run(request("10.0.0.0/30")).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.hosts_responsive, 0);
        assert!(repo
            .get_active_hosts(&crate::repository::HostFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_failed_row() {
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();
        let repo = Arc::new(SqliteRepository::open(":memory:").await.unwrap());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = DiscoveryEngine::new(
            repo.clone(),
            Arc::new(StaticProber {
                up: vec![localhost],
            }),
            TaskTracker::new(),
            cancel,
            16,
        );

        let err = engine.run(request("127.0.0.1/32")).await.unwrap_err();
        assert!(err.to_string().contains("cancel"));

        let job = repo.get_discovery_job(1).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("cancel"));
    }

    #[tokio::test]
    async fn test_wait_for_completion_timeout() {
        let (engine, repo) = engine_with(vec![]).await;

        // A job parked in running never becomes terminal by itself.
        let mut job = repo
            .create_discovery_job("10.0.0.0/30", DiscoveryMethod::Tcp)
            .await
            .unwrap();
        job.status = JobStatus::Running;
        repo.update_discovery_job(&job).await.unwrap();

        let err = engine
            .wait_for_completion(job.id, Duration::from_millis(400))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
