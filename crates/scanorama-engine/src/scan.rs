//! Port scan engine
//!
//! Resolves a host set (explicit addresses or a live-host selection),
//! persists a `running` scan job, fans the hosts out under bounded
//! concurrency, and for each host picks a profile, probes its ports, and
//! flushes the results through the repository: one atomic port-scan batch
//! plus a host upsert per host. Per-host failures are recorded on the
//! result, never escalated; only catastrophic failures or cancellation
//! fail the job.

use crate::profile::ProfileSelector;
use crate::prober::{PortProbeRequest, Prober};
use crate::repository::{HostFilter, NewPortScan, Repository};
use chrono::Utc;
use scanorama_core::target::{expand_network, PortSpec};
use scanorama_core::types::{
    canonical_ip, DiscoveryMethod, Host, HostObservation, HostStatus, JobStatus, PortState,
    ScanJob, ScanJobConfig, ScanProfile, ScanType,
};
use scanorama_core::{Error, Result};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Host set a scan run operates on
#[derive(Debug, Clone)]
pub enum ScanTargets {
    /// Scan exactly these addresses
    Explicit(Vec<IpAddr>),
    /// Scan hosts already known to the repository, narrowed by a selector
    LiveHosts(LiveHostSelector),
}

/// Selector deriving a [`HostFilter`] from a scan job's config blob
#[derive(Debug, Clone, Default)]
pub struct LiveHostSelector {
    /// Only hosts currently marked `up`
    pub live_only: bool,
    pub networks: Option<Vec<String>>,
    pub max_age_hours: Option<i64>,
    pub os_family: Option<String>,
    pub limit: Option<usize>,
}

impl LiveHostSelector {
    fn to_filter(&self) -> HostFilter {
        let mut filter = HostFilter::default();
        if self.live_only {
            filter.status = Some(HostStatus::Up);
        }
        filter.networks = self.networks.clone();
        filter.os_family = self.os_family.clone();
        if let Some(hours) = self.max_age_hours {
            filter.min_last_seen = Some(Utc::now() - chrono::Duration::hours(hours));
        }
        filter.limit = self.limit;
        filter
    }
}

/// Parameters for one scan run
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub targets: ScanTargets,
    /// Extra ports unioned with the profile's set
    pub ports: Option<String>,
    /// Overrides the profile's scan type when set
    pub scan_type: Option<ScanType>,
    /// Per-host prober deadline
    pub timeout: Duration,
    /// Hosts scanned in parallel
    pub concurrency: usize,
    /// Profile id; `None`, empty, or `"auto"` selects by fingerprint
    pub profile_id: Option<String>,
    /// Stored scan target this run references, if any
    pub target_id: Option<i64>,
}

/// Per-host outcome within a scan run
#[derive(Debug, Clone)]
pub struct HostScanOutcome {
    pub ip_address: String,
    pub profile_id: Option<String>,
    pub ports_scanned: usize,
    pub open_ports: usize,
    pub responsive: bool,
    pub error: Option<String>,
}

/// Aggregate host counters for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub up: usize,
    pub down: usize,
    pub total: usize,
}

/// What a scan run returns to its direct caller
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub job: ScanJob,
    pub hosts: Vec<HostScanOutcome>,
    pub stats: ScanStats,
    pub duration: Duration,
}

/// Port scan engine
#[derive(Clone)]
pub struct ScanEngine {
    repository: Arc<dyn Repository>,
    prober: Arc<dyn Prober>,
    selector: Arc<ProfileSelector>,
    defaults: scanorama_core::config::ScanConfig,
    cancel: CancellationToken,
    max_prefix: u8,
}

impl ScanEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        prober: Arc<dyn Prober>,
        defaults: scanorama_core::config::ScanConfig,
        cancel: CancellationToken,
        max_prefix: u8,
    ) -> Self {
        let selector = Arc::new(ProfileSelector::new(repository.clone()));
        Self {
            repository,
            prober,
            selector,
            defaults,
            cancel,
            max_prefix,
        }
    }

    /// Build and run a scan from a scheduled job's config blob.
    pub async fn run_from_job_config(&self, config: &ScanJobConfig) -> Result<ScanSummary> {
        let request = ScanRequest {
            targets: ScanTargets::LiveHosts(LiveHostSelector {
                live_only: config.live_hosts_only,
                networks: config.networks.clone(),
                max_age_hours: config.max_age_hours,
                os_family: config.os_family.clone(),
                limit: None,
            }),
            ports: None,
            scan_type: None,
            timeout: Duration::from_secs(self.defaults.timeout_secs),
            concurrency: self.defaults.concurrency,
            profile_id: config.profile_id.clone(),
            target_id: None,
        };
        self.run(request).await
    }

    /// Run a scan against a stored target's network.
    pub async fn run_target(&self, target_id: i64) -> Result<ScanSummary> {
        let target = self
            .repository
            .get_scan_target(target_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("scan target {} not found", target_id)))?;

        let addresses = expand_network(&target.network, self.max_prefix, usize::MAX)?;
        let request = ScanRequest {
            targets: ScanTargets::Explicit(addresses),
            ports: Some(target.scan_ports.clone()),
            scan_type: Some(target.scan_type),
            timeout: Duration::from_secs(self.defaults.timeout_secs),
            concurrency: self.defaults.concurrency,
            profile_id: None,
            target_id: Some(target.id),
        };
        self.run(request).await
    }

    /// Execute a scan run to completion.
    pub async fn run(&self, request: ScanRequest) -> Result<ScanSummary> {
        let started = Instant::now();

        // Resolve the host set and any fixed profile before the job row
        // exists, so setup mistakes surface as plain errors.
        let hosts = self.resolve_hosts(&request).await?;
        let fixed_profile = match request.profile_id.as_deref() {
            None | Some("") | Some("auto") => None,
            Some(id) => Some(
                self.repository
                    .get_profile(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("profile {} not found", id)))?,
            ),
        };

        let extra_ports = match &request.ports {
            Some(spec) => Some(PortSpec::parse(spec)?),
            None => None,
        };

        let mut job = self.repository.create_scan_job(request.target_id).await?;
        job.status = JobStatus::Running;
        self.repository.update_scan_job(&job).await?;

        info!(
            "scan job {} started: {} hosts, concurrency {}",
            job.id,
            hosts.len(),
            request.concurrency
        );

        let work = self.scan_hosts(job.id, &hosts, &request, fixed_profile, extra_ports);
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(Error::Cancelled("scan cancelled during shutdown".to_string()))
            }
            outcomes = work => Ok(outcomes),
        };

        job.completed_at = Some(Utc::now());
        match outcome {
            Ok(outcomes) => {
                job.status = JobStatus::Completed;
                self.repository.update_scan_job(&job).await?;

                let stats = ScanStats {
                    up: outcomes.iter().filter(|o| o.responsive).count(),
                    down: outcomes.iter().filter(|o| !o.responsive).count(),
                    total: outcomes.len(),
                };
                info!(
                    "scan job {} completed: {}/{} hosts responsive",
                    job.id, stats.up, stats.total
                );

                Ok(ScanSummary {
                    job,
                    hosts: outcomes,
                    stats,
                    duration: started.elapsed(),
                })
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error_message = Some(e.to_string());
                if let Err(update_err) = self.repository.update_scan_job(&job).await {
                    warn!(
                        "failed to write terminal row for scan job {}: {}",
                        job.id, update_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn resolve_hosts(&self, request: &ScanRequest) -> Result<Vec<(IpAddr, Option<Host>)>> {
        match &request.targets {
            ScanTargets::Explicit(addresses) => {
                let mut hosts = Vec::with_capacity(addresses.len());
                for &addr in addresses {
                    let existing = self.repository.get_host_by_ip(&canonical_ip(addr)).await?;
                    if existing.as_ref().is_some_and(|h| h.ignore_scanning) {
                        debug!("skipping {} (scanning ignored)", addr);
                        continue;
                    }
                    hosts.push((addr, existing));
                }
                Ok(hosts)
            }
            ScanTargets::LiveHosts(selector) => {
                let rows = self
                    .repository
                    .get_active_hosts(&selector.to_filter())
                    .await?;
                rows.into_iter()
                    .map(|host| {
                        let addr: IpAddr = host.ip_address.parse().map_err(|_| {
                            Error::Internal(format!(
                                "stored host {} has an unparseable address",
                                host.ip_address
                            ))
                        })?;
                        Ok((addr, Some(host)))
                    })
                    .collect()
            }
        }
    }

    /// Scan every host with bounded concurrency; each host flushes its own
    /// results before the task finishes.
    async fn scan_hosts(
        &self,
        job_id: i64,
        hosts: &[(IpAddr, Option<Host>)],
        request: &ScanRequest,
        fixed_profile: Option<ScanProfile>,
        extra_ports: Option<PortSpec>,
    ) -> Vec<HostScanOutcome> {
        let semaphore = Arc::new(Semaphore::new(request.concurrency.max(1)));
        let mut handles = Vec::with_capacity(hosts.len());

        for (addr, existing) in hosts.iter().cloned() {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let fixed_profile = fixed_profile.clone();
            let extra_ports = extra_ports.clone();
            let scan_type = request.scan_type;
            let timeout = request.timeout;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                engine
                    .scan_one_host(job_id, addr, existing, fixed_profile, extra_ports, scan_type, timeout)
                    .await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("scan task for job {} failed to join: {}", job_id, e),
            }
        }
        outcomes
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan_one_host(
        &self,
        job_id: i64,
        addr: IpAddr,
        existing: Option<Host>,
        fixed_profile: Option<ScanProfile>,
        extra_ports: Option<PortSpec>,
        scan_type_override: Option<ScanType>,
        timeout: Duration,
    ) -> HostScanOutcome {
        let ip_address = canonical_ip(addr);

        let mut outcome = HostScanOutcome {
            ip_address: ip_address.clone(),
            profile_id: None,
            ports_scanned: 0,
            open_ports: 0,
            responsive: false,
            error: None,
        };

        let profile = match fixed_profile {
            Some(profile) => profile,
            None => {
                let host_for_selection =
                    existing.clone().unwrap_or_else(|| placeholder_host(addr));
                match self.selector.select_best(&host_for_selection).await {
                    Ok(profile) => profile,
                    Err(e) => {
                        warn!("profile selection failed for {}: {}", ip_address, e);
                        outcome.error = Some(e.to_string());
                        return outcome;
                    }
                }
            }
        };
        outcome.profile_id = Some(profile.id.clone());

        let ports = match self.effective_ports(&profile, extra_ports.as_ref()) {
            Ok(ports) => ports,
            Err(e) => {
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        outcome.ports_scanned = ports.len();

        let scan_type = scan_type_override.unwrap_or(profile.scan_type);
        let reports = match self
            .prober
            .probe_ports(&PortProbeRequest {
                targets: vec![addr],
                ports,
                scan_type,
                timing: profile.timing,
                timeout,
                detect_version: scan_type == ScanType::Version,
            })
            .await
        {
            Ok(reports) => reports,
            Err(e) => {
                warn!("port probe failed for {}: {}", ip_address, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        let Some(report) = reports.into_iter().find(|r| r.host == addr) else {
            outcome.error = Some("prober returned no report for host".to_string());
            return outcome;
        };

        // Anything that answered, even with a refusal, proves the host up.
        outcome.responsive = report
            .ports
            .iter()
            .any(|p| matches!(p.state, PortState::Open | PortState::Closed));

        let status = if outcome.responsive {
            HostStatus::Up
        } else {
            HostStatus::Down
        };
        let method = existing
            .as_ref()
            .map(|h| h.discovery_method)
            .unwrap_or(DiscoveryMethod::Tcp);

        let mut observation = HostObservation::up(addr, method);
        observation.status = status;
        let host = match self.repository.upsert_host(&observation).await {
            Ok(host) => host,
            Err(e) => {
                warn!("failed to upsert host {}: {}", ip_address, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        // Only ports that actually answered become rows; prober order is
        // preserved inside the batch.
        let scanned_at = Utc::now();
        let records: Vec<NewPortScan> = report
            .ports
            .iter()
            .filter(|p| p.state == PortState::Open)
            .map(|p| NewPortScan {
                job_id,
                host_id: host.id,
                port: p.port,
                protocol: p.protocol,
                state: p.state,
                service: p.service.clone(),
                version: p.version.clone(),
                product: p.product.clone(),
                scanned_at,
            })
            .collect();
        outcome.open_ports = records.len();

        if let Err(e) = self.repository.insert_port_scans(&records).await {
            warn!("failed to persist port scans for {}: {}", ip_address, e);
            outcome.error = Some(e.to_string());
        }

        debug!(
            "scanned {}: {} open of {} ports (profile {})",
            ip_address, outcome.open_ports, outcome.ports_scanned, profile.id
        );
        outcome
    }

    /// Profile ports unioned with request ports, falling back to the
    /// engine defaults when both are empty.
    fn effective_ports(
        &self,
        profile: &ScanProfile,
        extra: Option<&PortSpec>,
    ) -> Result<Vec<u16>> {
        let mut spec = match profile.ports.trim() {
            "" => None,
            ports => Some(PortSpec::parse(ports)?),
        };

        if let Some(extra) = extra {
            spec = Some(match spec {
                Some(base) => base.union(extra),
                None => extra.clone(),
            });
        }

        let spec = match spec {
            Some(spec) if !spec.is_empty() => spec,
            _ => PortSpec::parse(&self.defaults.default_ports)?,
        };

        Ok(spec.ports())
    }
}

/// Host value used for profile selection when the address has never been
/// observed before.
fn placeholder_host(addr: IpAddr) -> Host {
    let now = Utc::now();
    Host {
        id: 0,
        ip_address: canonical_ip(addr),
        hostname: None,
        mac_address: None,
        vendor: None,
        os: None,
        status: HostStatus::Unknown,
        discovery_method: DiscoveryMethod::Tcp,
        response_time_ms: None,
        discovery_count: 1,
        first_seen: now,
        last_seen: now,
        ignore_scanning: false,
    }
}
