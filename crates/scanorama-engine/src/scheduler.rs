//! Cron-driven job scheduler
//!
//! Owns an in-memory table of scheduled jobs hydrated from the repository,
//! registers a timer task per job, and dispatches the discovery or scan
//! engine when a timer fires. Each job is single-flight: a fire that lands
//! while the previous execution is still running is skipped and logged,
//! never queued.
//!
//! Cron expressions are the standard 5-field form evaluated against local
//! wall-clock time. The job table is guarded by a read-write lock that is
//! never held across engine or repository I/O.

use crate::discovery::{DiscoveryEngine, DiscoveryRequest};
use crate::repository::Repository;
use crate::scan::ScanEngine;
use chrono::{DateTime, Local, Utc};
use cron::Schedule;
use parking_lot::RwLock;
use scanorama_core::types::{
    DiscoveryJobConfig, ScanJobConfig, ScheduledJob, ScheduledJobKind,
};
use scanorama_core::{Error, Result};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Parse a standard 5-field cron expression.
///
/// The underlying evaluator wants a seconds field, so a literal `0` is
/// prepended after validating the field count; operators never see the
/// six-field form.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let fields = expression.split_whitespace().count();
    if fields != 5 {
        return Err(Error::Validation(format!(
            "cron expression {:?} must have 5 fields, found {}",
            expression, fields
        )));
    }

    Schedule::from_str(&format!("0 {}", expression))
        .map_err(|e| Error::Validation(format!("invalid cron expression {:?}: {}", expression, e)))
}

/// Next fire time of a schedule in local wall-clock time, as UTC.
pub fn next_fire(schedule: &Schedule) -> Option<DateTime<Utc>> {
    schedule
        .upcoming(Local)
        .next()
        .map(|t| t.with_timezone(&Utc))
}

/// What happened to one dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The engine ran to completion (successfully or not)
    Executed,
    /// A previous execution was still in flight; this fire was dropped
    Skipped,
    /// The job is disabled or no longer known
    Ignored,
}

/// One scheduled job's view for operators
#[derive(Debug, Clone)]
pub struct ScheduledJobStatus {
    pub job: ScheduledJob,
    pub next_run: Option<DateTime<Utc>>,
    pub running: bool,
}

struct JobEntry {
    row: ScheduledJob,
    schedule: Schedule,
    running: bool,
    timer: Option<AbortHandle>,
}

/// Cron-driven dispatcher for discovery and scan jobs
#[derive(Clone)]
pub struct Scheduler {
    repository: Arc<dyn Repository>,
    discovery: DiscoveryEngine,
    scan: ScanEngine,
    jobs: Arc<RwLock<HashMap<i64, JobEntry>>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    started: Arc<AtomicBool>,
    shutdown_timeout: Duration,
    /// Target cap handed to blob-driven discovery runs
    discovery_max_hosts: usize,
}

impl Scheduler {
    pub fn new(
        repository: Arc<dyn Repository>,
        discovery: DiscoveryEngine,
        scan: ScanEngine,
        tracker: TaskTracker,
        cancel: CancellationToken,
        shutdown_timeout: Duration,
        discovery_max_hosts: usize,
    ) -> Self {
        Self {
            repository,
            discovery,
            scan,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            tracker,
            cancel,
            started: Arc::new(AtomicBool::new(false)),
            shutdown_timeout,
            discovery_max_hosts,
        }
    }

    /// Hydrate the job table from storage and start all timers.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Conflict("scheduler already started".to_string()));
        }

        let rows = self.repository.list_enabled_scheduled_jobs().await?;
        let count = rows.len();

        for row in rows {
            match parse_cron(&row.cron_expression) {
                Ok(schedule) => {
                    self.install(row, schedule);
                }
                Err(e) => {
                    // A stored row with a bad expression cannot fire; leave
                    // it in storage for the operator but keep booting.
                    error!("scheduled job {} ({}) has an invalid cron expression: {}", row.id, row.name, e);
                }
            }
        }

        info!("scheduler started with {} jobs", count);
        Ok(())
    }

    /// Stop dispatching, signal cancellation, and drain in-flight work.
    ///
    /// Idempotent; returns once everything finished or the shutdown
    /// timeout expired.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        {
            let mut jobs = self.jobs.write();
            for entry in jobs.values_mut() {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
            }
        }

        self.cancel.cancel();
        self.tracker.close();

        if tokio::time::timeout(self.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "in-flight jobs did not drain within {:?}; continuing shutdown",
                self.shutdown_timeout
            );
        } else {
            info!("scheduler stopped");
        }
    }

    /// Persist and register a cron-driven discovery job.
    pub async fn add_discovery_job(
        &self,
        name: &str,
        cron_expression: &str,
        config: &DiscoveryJobConfig,
    ) -> Result<ScheduledJob> {
        self.add_job(
            name,
            cron_expression,
            ScheduledJobKind::Discovery,
            serde_json::to_value(config)?,
        )
        .await
    }

    /// Persist and register a cron-driven scan job.
    pub async fn add_scan_job(
        &self,
        name: &str,
        cron_expression: &str,
        config: &ScanJobConfig,
    ) -> Result<ScheduledJob> {
        self.add_job(
            name,
            cron_expression,
            ScheduledJobKind::Scan,
            serde_json::to_value(config)?,
        )
        .await
    }

    async fn add_job(
        &self,
        name: &str,
        cron_expression: &str,
        kind: ScheduledJobKind,
        config: serde_json::Value,
    ) -> Result<ScheduledJob> {
        let schedule = parse_cron(cron_expression)?;

        let job = ScheduledJob {
            id: 0,
            name: name.to_string(),
            kind,
            cron_expression: cron_expression.to_string(),
            config,
            enabled: true,
            last_run: None,
            next_run: next_fire(&schedule),
            created_at: Utc::now(),
        };

        let saved = self.repository.save_scheduled_job(&job).await?;
        info!(
            "scheduled {} job {} ({}) with cron {:?}",
            kind, saved.id, saved.name, cron_expression
        );

        self.install(saved.clone(), schedule);
        Ok(saved)
    }

    /// Cancel the timer, delete the row, forget the entry. Quiet when the
    /// job was already gone.
    pub async fn remove_job(&self, id: i64) -> Result<()> {
        if let Some(mut entry) = self.jobs.write().remove(&id) {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
        self.repository.delete_scheduled_job(id).await?;
        info!("removed scheduled job {}", id);
        Ok(())
    }

    /// Enable a job. The timer keeps its cadence; the dispatch closure
    /// consults the flag at fire time.
    pub async fn enable_job(&self, id: i64) -> Result<()> {
        self.set_enabled(id, true).await
    }

    /// Disable a job without touching its timer registration.
    pub async fn disable_job(&self, id: i64) -> Result<()> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        self.repository.set_scheduled_job_enabled(id, enabled).await?;
        if let Some(entry) = self.jobs.write().get_mut(&id) {
            entry.row.enabled = enabled;
        }
        debug!("scheduled job {} enabled={}", id, enabled);
        Ok(())
    }

    /// Refresh the job table from storage and return every entry with its
    /// computed next fire time.
    pub async fn get_jobs(&self) -> Result<Vec<ScheduledJobStatus>> {
        let rows = self.repository.list_scheduled_jobs().await?;

        // Fold fresh rows in without touching timers or running flags; the
        // I/O above happened outside the lock.
        let mut fresh: Vec<(ScheduledJob, Schedule)> = Vec::new();
        {
            let mut jobs = self.jobs.write();
            let known: Vec<i64> = jobs.keys().copied().collect();
            for id in known {
                if !rows.iter().any(|r| r.id == id) {
                    if let Some(mut entry) = jobs.remove(&id) {
                        if let Some(timer) = entry.timer.take() {
                            timer.abort();
                        }
                    }
                }
            }

            for row in &rows {
                match jobs.get_mut(&row.id) {
                    Some(entry) => {
                        entry.row = row.clone();
                    }
                    None => {
                        if let Ok(schedule) = parse_cron(&row.cron_expression) {
                            fresh.push((row.clone(), schedule));
                        }
                    }
                }
            }
        }

        for (row, schedule) in fresh {
            self.install(row, schedule);
        }

        let jobs = self.jobs.read();
        let mut statuses: Vec<ScheduledJobStatus> = jobs
            .values()
            .map(|entry| ScheduledJobStatus {
                job: entry.row.clone(),
                next_run: next_fire(&entry.schedule),
                running: entry.running,
            })
            .collect();
        statuses.sort_by_key(|s| s.job.id);
        Ok(statuses)
    }

    /// Fire a job immediately, subject to the same single-flight rule as a
    /// timer fire.
    pub async fn run_job_now(&self, id: i64) -> Result<DispatchOutcome> {
        if self.jobs.read().get(&id).is_none() {
            return Err(Error::NotFound(format!("scheduled job {} not found", id)));
        }
        Ok(self.dispatch(id).await)
    }

    /// Insert the entry and register its timer.
    fn install(&self, row: ScheduledJob, schedule: Schedule) {
        let id = row.id;

        let mut jobs = self.jobs.write();
        if let Some(existing) = jobs.get_mut(&id) {
            // Re-install replaces the row and revives the timer if a stop
            // cleared it; an already-armed timer is left alone.
            existing.row = row;
            existing.schedule = schedule.clone();
            if existing.timer.is_none() {
                existing.timer = Some(self.spawn_timer(id, schedule));
            }
            return;
        }

        let timer = self.spawn_timer(id, schedule.clone());
        jobs.insert(
            id,
            JobEntry {
                row,
                schedule,
                running: false,
                timer: Some(timer),
            },
        );
    }

    /// Timer loop: sleep until the next cron fire, then hand the dispatch
    /// off so a long execution never delays the following fire.
    fn spawn_timer(&self, id: i64, schedule: Schedule) -> AbortHandle {
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Local).next() else {
                    debug!("schedule for job {} has no future fires", id);
                    break;
                };
                let Ok(until) = (next - Local::now()).to_std() else {
                    // The computed fire slipped into the past; recompute.
                    continue;
                };

                tokio::select! {
                    _ = scheduler.cancel.cancelled() => break,
                    _ = tokio::time::sleep(until) => {}
                }

                let dispatcher = scheduler.clone();
                scheduler.tracker.spawn(async move {
                    dispatcher.dispatch(id).await;
                });
            }
        });
        handle.abort_handle()
    }

    /// The fire-time closure: look up, single-flight check, invoke the
    /// engine, then record the run.
    async fn dispatch(&self, id: i64) -> DispatchOutcome {
        let fired_at = Utc::now();

        // Step 1 + 2 + 3 under one short write lock.
        let (kind, config) = {
            let mut jobs = self.jobs.write();
            let Some(entry) = jobs.get_mut(&id) else {
                return DispatchOutcome::Ignored;
            };
            if !entry.row.enabled {
                debug!("job {} fired while disabled; ignoring", id);
                return DispatchOutcome::Ignored;
            }
            if entry.running {
                warn!(
                    "job {} ({}) fired while still running; skipping this fire",
                    id, entry.row.name
                );
                return DispatchOutcome::Skipped;
            }
            entry.running = true;
            entry.row.last_run = Some(fired_at);
            (entry.row.kind, entry.row.config.clone())
        };

        // Step 4: run the engine with no lock held. Engine errors are
        // logged and land in the engine's own job row; the loop never dies
        // for a job error.
        match kind {
            ScheduledJobKind::Discovery => {
                match serde_json::from_value::<DiscoveryJobConfig>(config) {
                    Ok(cfg) => {
                        let request =
                            DiscoveryRequest::from_job_config(&cfg, self.discovery_max_hosts);
                        if let Err(e) = self.discovery.run(request).await {
                            error!("scheduled discovery job {} failed: {}", id, e);
                        }
                    }
                    Err(e) => error!("job {} has an invalid discovery config blob: {}", id, e),
                }
            }
            ScheduledJobKind::Scan => match serde_json::from_value::<ScanJobConfig>(config) {
                Ok(cfg) => {
                    if let Err(e) = self.scan.run_from_job_config(&cfg).await {
                        error!("scheduled scan job {} failed: {}", id, e);
                    }
                }
                Err(e) => error!("job {} has an invalid scan config blob: {}", id, e),
            },
        }

        // Step 5: clear the flag, then persist last_run and the recomputed
        // next_run.
        let next_run = {
            let mut jobs = self.jobs.write();
            match jobs.get_mut(&id) {
                Some(entry) => {
                    entry.running = false;
                    let next = next_fire(&entry.schedule);
                    entry.row.next_run = next;
                    next
                }
                None => None,
            }
        };

        if let Err(e) = self
            .repository
            .set_scheduled_job_last_run(id, fired_at, next_run)
            .await
        {
            warn!("failed to persist last_run for job {}: {}", id, e);
        }

        DispatchOutcome::Executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::{
        HostPortReport, LivenessRequest, LivenessResult, PortProbeRequest, Prober,
    };
    use crate::storage::SqliteRepository;
    use async_trait::async_trait;
    use scanorama_core::types::HostStatus;

    /// Prober whose liveness sweep takes a configurable amount of time.
    struct SlowProber {
        delay: Duration,
    }

    #[async_trait]
    impl Prober for SlowProber {
        async fn probe_liveness(&self, request: &LivenessRequest) -> Result<Vec<LivenessResult>> {
            tokio::time::sleep(self.delay).await;
            Ok(request
                .targets
                .iter()
                .map(|&t| LivenessResult {
                    address: t,
                    state: HostStatus::Up,
                    addresses: vec![t],
                    hostname: None,
                    mac_address: None,
                    vendor: None,
                    os: None,
                    response_time: None,
                })
                .collect())
        }

        async fn probe_ports(&self, request: &PortProbeRequest) -> Result<Vec<HostPortReport>> {
            tokio::time::sleep(self.delay).await;
            Ok(request
                .targets
                .iter()
                .map(|&host| HostPortReport {
                    host,
                    ports: Vec::new(),
                })
                .collect())
        }
    }

    async fn scheduler_with_delay(delay: Duration) -> (Scheduler, Arc<SqliteRepository>) {
        let repo: Arc<SqliteRepository> =
            Arc::new(SqliteRepository::open(":memory:").await.unwrap());
        let prober: Arc<dyn Prober> = Arc::new(SlowProber { delay });
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        let discovery = DiscoveryEngine::new(
            repo.clone(),
            prober.clone(),
            tracker.clone(),
            cancel.clone(),
            16,
        );
        let scan = ScanEngine::new(
            repo.clone(),
            prober,
            scanorama_core::config::ScanConfig::default(),
            cancel.clone(),
            16,
        );

        let scheduler = Scheduler::new(
            repo.clone(),
            discovery,
            scan,
            tracker,
            cancel,
            Duration::from_secs(5),
            1024,
        );
        (scheduler, repo)
    }

    fn discovery_config() -> DiscoveryJobConfig {
        DiscoveryJobConfig {
            network: "10.0.0.0/30".to_string(),
            method: scanorama_core::types::DiscoveryMethod::Tcp,
            detect_os: false,
            timeout_seconds: 1,
            concurrency: 4,
        }
    }

    #[test]
    fn test_parse_cron_five_fields() {
        parse_cron("* * * * *").unwrap();
        parse_cron("30 2 * * 1-5").unwrap();
        parse_cron("*/15 * * * *").unwrap();
    }

    #[test]
    fn test_parse_cron_rejects_wrong_field_count() {
        assert!(matches!(parse_cron(""), Err(Error::Validation(_))));
        assert!(matches!(parse_cron("* * * *"), Err(Error::Validation(_))));
        assert!(matches!(
            parse_cron("0 * * * * *"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_parse_cron_rejects_bad_values() {
        assert!(matches!(
            parse_cron("61 * * * *"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            parse_cron("* 25 * * *"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_next_fire_is_in_the_future() {
        let schedule = parse_cron("* * * * *").unwrap();
        let next = next_fire(&schedule).unwrap();
        assert!(next > Utc::now());
        // A minutely schedule always fires within the next minute.
        assert!(next <= Utc::now() + chrono::Duration::seconds(61));
    }

    #[test]
    fn test_next_fire_pure_in_cron_and_now() {
        // Disabling and enabling cannot change the computation: it only
        // depends on the expression and the clock.
        let a = next_fire(&parse_cron("0 3 * * *").unwrap()).unwrap();
        let b = next_fire(&parse_cron("0 3 * * *").unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (scheduler, _repo) = scheduler_with_delay(Duration::from_millis(1)).await;
        scheduler.start().await.unwrap();
        let err = scheduler.start().await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (scheduler, _repo) = scheduler_with_delay(Duration::from_millis(1)).await;
        scheduler.start().await.unwrap();
        scheduler.stop().await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_add_job_persists_and_computes_next_run() {
        let (scheduler, repo) = scheduler_with_delay(Duration::from_millis(1)).await;
        scheduler.start().await.unwrap();

        let job = scheduler
            .add_discovery_job("nightly", "0 2 * * *", &discovery_config())
            .await
            .unwrap();
        assert!(job.id > 0);
        assert!(job.next_run.unwrap() > Utc::now());

        let stored = repo.get_scheduled_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "nightly");
        assert_eq!(stored.kind, ScheduledJobKind::Discovery);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (scheduler, _repo) = scheduler_with_delay(Duration::from_millis(1)).await;
        scheduler.start().await.unwrap();

        scheduler
            .add_discovery_job("sweep", "* * * * *", &discovery_config())
            .await
            .unwrap();
        let err = scheduler
            .add_discovery_job("sweep", "*/5 * * * *", &discovery_config())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_cron_rejected_at_submission() {
        let (scheduler, repo) = scheduler_with_delay(Duration::from_millis(1)).await;
        scheduler.start().await.unwrap();

        let err = scheduler
            .add_discovery_job("broken", "not a cron", &discovery_config())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(repo.list_scheduled_jobs().await.unwrap().is_empty());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_single_flight_skips_overlapping_fire() {
        let (scheduler, repo) = scheduler_with_delay(Duration::from_millis(300)).await;
        scheduler.start().await.unwrap();

        let job = scheduler
            .add_discovery_job("slow", "* * * * *", &discovery_config())
            .await
            .unwrap();

        // First fire occupies the job; a concurrent fire must be skipped.
        let first = {
            let scheduler = scheduler.clone();
            let id = job.id;
            tokio::spawn(async move { scheduler.run_job_now(id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = scheduler.run_job_now(job.id).await.unwrap();
        assert_eq!(second, DispatchOutcome::Skipped);

        let first = first.await.unwrap().unwrap();
        assert_eq!(first, DispatchOutcome::Executed);

        // Exactly one engine execution reached the repository.
        let mut discovery_jobs = 0;
        for id in 1..=4 {
            if repo.get_discovery_job(id).await.unwrap().is_some() {
                discovery_jobs += 1;
            }
        }
        assert_eq!(discovery_jobs, 1);

        // And the job can fire again once idle.
        let third = scheduler.run_job_now(job.id).await.unwrap();
        assert_eq!(third, DispatchOutcome::Executed);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_disabled_job_is_ignored_at_fire_time() {
        let (scheduler, repo) = scheduler_with_delay(Duration::from_millis(1)).await;
        scheduler.start().await.unwrap();

        let job = scheduler
            .add_discovery_job("toggled", "* * * * *", &discovery_config())
            .await
            .unwrap();

        scheduler.disable_job(job.id).await.unwrap();
        assert_eq!(
            scheduler.run_job_now(job.id).await.unwrap(),
            DispatchOutcome::Ignored
        );
        assert!(!repo
            .get_scheduled_job(job.id)
            .await
            .unwrap()
            .unwrap()
            .enabled);

        scheduler.enable_job(job.id).await.unwrap();
        assert_eq!(
            scheduler.run_job_now(job.id).await.unwrap(),
            DispatchOutcome::Executed
        );

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_dispatch_persists_last_run() {
        let (scheduler, repo) = scheduler_with_delay(Duration::from_millis(1)).await;
        scheduler.start().await.unwrap();

        let job = scheduler
            .add_scan_job(
                "scan-live",
                "*/5 * * * *",
                &ScanJobConfig {
                    live_hosts_only: true,
                    networks: None,
                    profile_id: Some("generic-default".to_string()),
                    max_age_hours: None,
                    os_family: None,
                },
            )
            .await
            .unwrap();
        assert!(job.last_run.is_none());

        scheduler.run_job_now(job.id).await.unwrap();

        let stored = repo.get_scheduled_job(job.id).await.unwrap().unwrap();
        assert!(stored.last_run.is_some());
        assert!(stored.next_run.unwrap() > stored.last_run.unwrap());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_remove_job_is_quiet_when_gone() {
        let (scheduler, repo) = scheduler_with_delay(Duration::from_millis(1)).await;
        scheduler.start().await.unwrap();

        let job = scheduler
            .add_discovery_job("temp", "* * * * *", &discovery_config())
            .await
            .unwrap();
        scheduler.remove_job(job.id).await.unwrap();
        assert!(repo.get_scheduled_job(job.id).await.unwrap().is_none());

        // Second removal of the same id is not an error.
        scheduler.remove_job(job.id).await.unwrap();
        let err = scheduler.run_job_now(job.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_start_hydrates_jobs_from_storage() {
        let (scheduler, repo) = scheduler_with_delay(Duration::from_millis(1)).await;

        // Row persisted before the scheduler boots, as after a restart.
        repo.save_scheduled_job(&ScheduledJob {
            id: 0,
            name: "persisted".to_string(),
            kind: ScheduledJobKind::Discovery,
            cron_expression: "0 4 * * *".to_string(),
            config: serde_json::to_value(discovery_config()).unwrap(),
            enabled: true,
            last_run: None,
            next_run: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        scheduler.start().await.unwrap();

        let jobs = scheduler.get_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job.name, "persisted");
        assert!(jobs[0].next_run.unwrap() > Utc::now());
        assert!(!jobs[0].running);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_get_jobs_refreshes_from_storage() {
        let (scheduler, repo) = scheduler_with_delay(Duration::from_millis(1)).await;
        scheduler.start().await.unwrap();

        let job = scheduler
            .add_discovery_job("refresh-me", "* * * * *", &discovery_config())
            .await
            .unwrap();

        // External mutation lands in the table on the next listing.
        repo.set_scheduled_job_enabled(job.id, false).await.unwrap();
        let jobs = scheduler.get_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(!jobs[0].job.enabled);

        // External deletion drops the entry.
        repo.delete_scheduled_job(job.id).await.unwrap();
        assert!(scheduler.get_jobs().await.unwrap().is_empty());

        scheduler.stop().await;
    }
}
