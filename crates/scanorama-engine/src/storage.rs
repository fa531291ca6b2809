//! SQLite repository
//!
//! Implements [`Repository`] over SQLite with:
//! - WAL mode and performance pragmas applied at connect time
//! - automatic schema initialisation and built-in profile seeding
//! - transaction-based multi-row batch inserts for port scans
//! - enforced job status transitions
//!
//! Engines hold the repository as `Arc<dyn Repository>`; nothing outside
//! this module speaks SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use scanorama_core::types::{
    DiscoveryJob, DiscoveryMethod, Host, HostObservation, JobStatus, OsFingerprint, PortScan,
    ScanJob, ScanProfile, ScanTarget, ScanType, ScheduledJob, TimingTemplate,
};
use scanorama_core::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{ConnectOptions, Row};
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::repository::{HostFilter, NewPortScan, NewScanTarget, Repository};

/// SQLite-backed repository
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and initialise the schema.
    ///
    /// `":memory:"` opens an ephemeral database pinned to a single pooled
    /// connection, since separate SQLite memory connections do not share
    /// state.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .map_err(|e| Error::Validation(format!("invalid database path {:?}: {}", path, e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            // Applied per connection; a pooled pragma would only reach one.
            .foreign_keys(true)
            .disable_statement_logging();

        let max_connections = if path == ":memory:" { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| Error::Transient(format!("failed to connect to database: {}", e)))?;

        info!("Connected to SQLite database: {}", path);

        let repo = Self { pool };
        repo.init_schema().await?;
        repo.seed_builtin_profiles().await?;

        Ok(repo)
    }

    async fn init_schema(&self) -> Result<()> {
        debug!("Initializing database schema");

        // synchronous=NORMAL is safe under WAL and considerably faster.
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .ok();

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip_address TEXT NOT NULL UNIQUE,
                hostname TEXT,
                mac_address TEXT,
                vendor TEXT,
                os_family TEXT,
                os_name TEXT,
                os_version TEXT,
                os_confidence INTEGER,
                os_method TEXT,
                os_details TEXT,
                status TEXT NOT NULL,
                discovery_method TEXT NOT NULL,
                response_time_ms INTEGER,
                discovery_count INTEGER NOT NULL DEFAULT 1,
                first_seen TIMESTAMP NOT NULL,
                last_seen TIMESTAMP NOT NULL,
                ignore_scanning INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS discovery_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                network TEXT NOT NULL,
                method TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                started_at TIMESTAMP,
                completed_at TIMESTAMP,
                hosts_discovered INTEGER NOT NULL DEFAULT 0,
                hosts_responsive INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_targets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                network TEXT NOT NULL,
                scan_interval_seconds INTEGER NOT NULL,
                scan_ports TEXT NOT NULL,
                scan_type TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target_id INTEGER REFERENCES scan_targets(id) ON DELETE SET NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                completed_at TIMESTAMP,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS port_scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES scan_jobs(id) ON DELETE CASCADE,
                host_id INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
                port INTEGER NOT NULL,
                protocol TEXT NOT NULL,
                state TEXT NOT NULL,
                service TEXT,
                version TEXT,
                product TEXT,
                scanned_at TIMESTAMP NOT NULL,
                UNIQUE (job_id, host_id, port, protocol)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                os_family TEXT NOT NULL DEFAULT '[]',
                os_pattern TEXT NOT NULL DEFAULT '[]',
                ports TEXT NOT NULL,
                scan_type TEXT NOT NULL,
                timing TEXT NOT NULL,
                scripts TEXT NOT NULL DEFAULT '[]',
                options TEXT NOT NULL DEFAULT '{}',
                priority INTEGER NOT NULL DEFAULT 0,
                built_in INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                cron_expression TEXT NOT NULL,
                config TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                last_run TIMESTAMP,
                next_run TIMESTAMP,
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_hosts_last_seen ON hosts(last_seen)")
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_port_scans_job ON port_scans(job_id)")
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_port_scans_host ON port_scans(host_id)")
            .execute(&self.pool)
            .await
            .ok();

        debug!("Database schema initialized");
        Ok(())
    }

    /// Insert the well-known built-in profiles when absent.
    async fn seed_builtin_profiles(&self) -> Result<()> {
        for profile in builtin_profiles() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO scan_profiles
                (id, name, description, os_family, os_pattern, ports, scan_type,
                 timing, scripts, options, priority, built_in)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
                "#,
            )
            .bind(&profile.id)
            .bind(&profile.name)
            .bind(&profile.description)
            .bind(serde_json::to_string(&profile.os_family)?)
            .bind(serde_json::to_string(&profile.os_pattern)?)
            .bind(&profile.ports)
            .bind(profile.scan_type.to_string())
            .bind(profile.timing.to_string())
            .bind(serde_json::to_string(&profile.scripts)?)
            .bind(profile.options.to_string())
            .bind(profile.priority)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

/// The profiles the daemon ships with; `generic-default` is the fallback
/// the profile selector relies on.
fn builtin_profiles() -> Vec<ScanProfile> {
    fn profile(
        id: &str,
        name: &str,
        description: &str,
        os_family: &[&str],
        os_pattern: &[&str],
        ports: &str,
        scan_type: ScanType,
        timing: TimingTemplate,
        priority: i32,
    ) -> ScanProfile {
        ScanProfile {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            os_family: os_family.iter().map(|s| s.to_string()).collect(),
            os_pattern: os_pattern.iter().map(|s| s.to_string()).collect(),
            ports: ports.to_string(),
            scan_type,
            timing,
            scripts: Vec::new(),
            options: serde_json::json!({}),
            priority,
            built_in: true,
        }
    }

    vec![
        profile(
            "generic-default",
            "Generic default",
            "Fallback profile for hosts with no usable OS fingerprint",
            &[],
            &[],
            "21-23,25,53,80,110,143,443,445,993,995,3306,3389,5432,8080,8443",
            ScanType::Connect,
            TimingTemplate::Normal,
            0,
        ),
        profile(
            "linux-server",
            "Linux server",
            "Common service ports on Linux hosts",
            &["linux", "unix"],
            &["(?i)linux", "(?i)ubuntu", "(?i)debian", "(?i)centos", "(?i)red ?hat"],
            "21-23,25,53,80,111,139,143,443,445,2049,3306,5432,6379,8080,8443,9090",
            ScanType::Version,
            TimingTemplate::Normal,
            10,
        ),
        profile(
            "windows-server",
            "Windows server",
            "SMB, RDP, and directory ports on Windows hosts",
            &["windows"],
            &["(?i)windows"],
            "53,80,88,135,139,389,443,445,464,593,636,3268,3269,3389,5985,5986",
            ScanType::Version,
            TimingTemplate::Normal,
            10,
        ),
        profile(
            "macos-host",
            "macOS host",
            "Remote access and sharing ports on macOS hosts",
            &["macos", "darwin"],
            &["(?i)mac ?os", "(?i)darwin"],
            "22,80,88,443,445,548,5900,7000",
            ScanType::Connect,
            TimingTemplate::Normal,
            10,
        ),
        profile(
            "network-device",
            "Network device",
            "Management ports on switches, routers, and firewalls",
            &["ios", "routeros", "junos", "embedded"],
            &["(?i)cisco", "(?i)mikrotik", "(?i)juniper", "(?i)fortinet"],
            "22,23,80,161,443,830,8291",
            ScanType::Connect,
            TimingTemplate::Polite,
            20,
        ),
    ]
}

fn row_to_host(row: &SqliteRow) -> Result<Host> {
    let os_family: Option<String> = row.try_get("os_family")?;
    let os = match os_family {
        Some(family) if !family.is_empty() => Some(OsFingerprint {
            family,
            name: row.try_get::<Option<String>, _>("os_name")?.unwrap_or_default(),
            version: row
                .try_get::<Option<String>, _>("os_version")?
                .unwrap_or_default(),
            confidence: row.try_get::<Option<i64>, _>("os_confidence")?.unwrap_or(0) as u8,
            method: row
                .try_get::<Option<String>, _>("os_method")?
                .unwrap_or_default(),
            details: row.try_get("os_details")?,
        }),
        _ => None,
    };

    Ok(Host {
        id: row.try_get("id")?,
        ip_address: row.try_get("ip_address")?,
        hostname: row.try_get("hostname")?,
        mac_address: row.try_get("mac_address")?,
        vendor: row.try_get("vendor")?,
        os,
        status: row.try_get::<String, _>("status")?.parse()?,
        discovery_method: row.try_get::<String, _>("discovery_method")?.parse()?,
        response_time_ms: row.try_get("response_time_ms")?,
        discovery_count: row.try_get("discovery_count")?,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
        ignore_scanning: row.try_get("ignore_scanning")?,
    })
}

fn row_to_discovery_job(row: &SqliteRow) -> Result<DiscoveryJob> {
    Ok(DiscoveryJob {
        id: row.try_get("id")?,
        network: row.try_get("network")?,
        method: row.try_get::<String, _>("method")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        hosts_discovered: row.try_get("hosts_discovered")?,
        hosts_responsive: row.try_get("hosts_responsive")?,
        error_message: row.try_get("error_message")?,
    })
}

fn row_to_scan_job(row: &SqliteRow) -> Result<ScanJob> {
    Ok(ScanJob {
        id: row.try_get("id")?,
        target_id: row.try_get("target_id")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
    })
}

fn row_to_scan_target(row: &SqliteRow) -> Result<ScanTarget> {
    Ok(ScanTarget {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        network: row.try_get("network")?,
        scan_interval_seconds: row.try_get("scan_interval_seconds")?,
        scan_ports: row.try_get("scan_ports")?,
        scan_type: row.try_get::<String, _>("scan_type")?.parse()?,
        enabled: row.try_get("enabled")?,
    })
}

fn row_to_port_scan(row: &SqliteRow) -> Result<PortScan> {
    Ok(PortScan {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        host_id: row.try_get("host_id")?,
        port: row.try_get::<i64, _>("port")? as u16,
        protocol: row.try_get::<String, _>("protocol")?.parse()?,
        state: row.try_get::<String, _>("state")?.parse()?,
        service: row.try_get("service")?,
        version: row.try_get("version")?,
        product: row.try_get("product")?,
        scanned_at: row.try_get("scanned_at")?,
    })
}

fn row_to_profile(row: &SqliteRow) -> Result<ScanProfile> {
    Ok(ScanProfile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        os_family: serde_json::from_str(row.try_get::<String, _>("os_family")?.as_str())?,
        os_pattern: serde_json::from_str(row.try_get::<String, _>("os_pattern")?.as_str())?,
        ports: row.try_get("ports")?,
        scan_type: row.try_get::<String, _>("scan_type")?.parse()?,
        timing: row.try_get::<String, _>("timing")?.parse()?,
        scripts: serde_json::from_str(row.try_get::<String, _>("scripts")?.as_str())?,
        options: serde_json::from_str(row.try_get::<String, _>("options")?.as_str())?,
        priority: row.try_get::<i64, _>("priority")? as i32,
        built_in: row.try_get("built_in")?,
    })
}

fn row_to_scheduled_job(row: &SqliteRow) -> Result<ScheduledJob> {
    Ok(ScheduledJob {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: row.try_get::<String, _>("kind")?.parse()?,
        cron_expression: row.try_get("cron_expression")?,
        config: serde_json::from_str(row.try_get::<String, _>("config")?.as_str())?,
        enabled: row.try_get("enabled")?,
        last_run: row.try_get("last_run")?,
        next_run: row.try_get("next_run")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Validate a status change against the stored row inside a transaction.
fn check_transition(current: JobStatus, next: JobStatus, id: i64) -> Result<()> {
    if current.is_terminal() {
        return Err(Error::Conflict(format!(
            "job {} is {} and read-only",
            id, current
        )));
    }
    if current != next && !current.can_transition_to(next) {
        return Err(Error::Conflict(format!(
            "job {} cannot move from {} to {}",
            id, current, next
        )));
    }
    Ok(())
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn upsert_host(&self, observation: &HostObservation) -> Result<Host> {
        let now = Utc::now();
        let os = observation.os.as_ref();

        let row = sqlx::query(
            r#"
            INSERT INTO hosts
            (ip_address, hostname, mac_address, vendor,
             os_family, os_name, os_version, os_confidence, os_method, os_details,
             status, discovery_method, response_time_ms,
             discovery_count, first_seen, last_seen, ignore_scanning)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, 0)
            ON CONFLICT(ip_address) DO UPDATE SET
                hostname = COALESCE(excluded.hostname, hosts.hostname),
                mac_address = COALESCE(excluded.mac_address, hosts.mac_address),
                vendor = COALESCE(excluded.vendor, hosts.vendor),
                os_family = COALESCE(excluded.os_family, hosts.os_family),
                os_name = COALESCE(excluded.os_name, hosts.os_name),
                os_version = COALESCE(excluded.os_version, hosts.os_version),
                os_confidence = COALESCE(excluded.os_confidence, hosts.os_confidence),
                os_method = COALESCE(excluded.os_method, hosts.os_method),
                os_details = COALESCE(excluded.os_details, hosts.os_details),
                status = excluded.status,
                discovery_method = excluded.discovery_method,
                response_time_ms = excluded.response_time_ms,
                discovery_count = hosts.discovery_count + 1,
                last_seen = excluded.last_seen
            RETURNING *
            "#,
        )
        .bind(&observation.ip_address)
        .bind(&observation.hostname)
        .bind(&observation.mac_address)
        .bind(&observation.vendor)
        .bind(os.map(|o| o.family.clone()))
        .bind(os.map(|o| o.name.clone()))
        .bind(os.map(|o| o.version.clone()))
        .bind(os.map(|o| o.confidence as i64))
        .bind(os.map(|o| o.method.clone()))
        .bind(os.and_then(|o| o.details.clone()))
        .bind(observation.status.to_string())
        .bind(observation.discovery_method.to_string())
        .bind(observation.response_time_ms)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row_to_host(&row)
    }

    async fn get_host_by_ip(&self, ip_address: &str) -> Result<Option<Host>> {
        let row = sqlx::query("SELECT * FROM hosts WHERE ip_address = ?")
            .bind(ip_address)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_host).transpose()
    }

    async fn get_active_hosts(&self, filter: &HostFilter) -> Result<Vec<Host>> {
        // Parse CIDR filters up front so a bad filter is a Validation error,
        // not an empty result.
        let networks: Option<Vec<IpNetwork>> = match &filter.networks {
            Some(nets) => Some(
                nets.iter()
                    .map(|n| {
                        n.parse::<IpNetwork>().map_err(|e| {
                            Error::Validation(format!("invalid network filter {:?}: {}", n, e))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        let mut sql = String::from("SELECT * FROM hosts WHERE 1=1");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.os_family.is_some() {
            sql.push_str(" AND LOWER(os_family) = LOWER(?)");
        }
        if filter.min_last_seen.is_some() {
            sql.push_str(" AND last_seen >= ?");
        }
        if !filter.include_ignored {
            sql.push_str(" AND ignore_scanning = 0");
        }
        sql.push_str(" ORDER BY last_seen DESC");

        // The limit can only be pushed into SQL when no in-process CIDR
        // filter runs afterwards.
        if networks.is_none() {
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
        }

        let mut query = sqlx::query(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.to_string());
        }
        if let Some(ref family) = filter.os_family {
            query = query.bind(family.clone());
        }
        if let Some(min_last_seen) = filter.min_last_seen {
            query = query.bind(min_last_seen);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut hosts: Vec<Host> = rows.iter().map(row_to_host).collect::<Result<Vec<_>>>()?;

        if let Some(networks) = networks {
            hosts.retain(|host| match host.ip_address.parse::<IpAddr>() {
                Ok(ip) => networks.iter().any(|net| net.contains(ip)),
                Err(_) => false,
            });
            if let Some(limit) = filter.limit {
                hosts.truncate(limit);
            }
        }

        Ok(hosts)
    }

    async fn set_host_ignored(&self, ip_address: &str, ignored: bool) -> Result<()> {
        let result = sqlx::query("UPDATE hosts SET ignore_scanning = ? WHERE ip_address = ?")
            .bind(ignored)
            .bind(ip_address)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("host {} not found", ip_address)));
        }
        Ok(())
    }

    async fn create_discovery_job(
        &self,
        network: &str,
        method: DiscoveryMethod,
    ) -> Result<DiscoveryJob> {
        let row = sqlx::query(
            r#"
            INSERT INTO discovery_jobs (network, method, status, created_at)
            VALUES (?, ?, 'pending', ?)
            RETURNING *
            "#,
        )
        .bind(network)
        .bind(method.to_string())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        row_to_discovery_job(&row)
    }

    async fn update_discovery_job(&self, job: &DiscoveryJob) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM discovery_jobs WHERE id = ?")
            .bind(job.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("discovery job {} not found", job.id)))?;
        let current: JobStatus = row.try_get::<String, _>("status")?.parse()?;
        check_transition(current, job.status, job.id)?;

        sqlx::query(
            r#"
            UPDATE discovery_jobs
            SET status = ?, started_at = ?, completed_at = ?,
                hosts_discovered = ?, hosts_responsive = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.to_string())
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.hosts_discovered)
        .bind(job.hosts_responsive)
        .bind(&job.error_message)
        .bind(job.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_discovery_job(&self, id: i64) -> Result<Option<DiscoveryJob>> {
        let row = sqlx::query("SELECT * FROM discovery_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_discovery_job).transpose()
    }

    async fn create_scan_job(&self, target_id: Option<i64>) -> Result<ScanJob> {
        let row = sqlx::query(
            r#"
            INSERT INTO scan_jobs (target_id, status, created_at)
            VALUES (?, 'pending', ?)
            RETURNING *
            "#,
        )
        .bind(target_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        row_to_scan_job(&row)
    }

    async fn update_scan_job(&self, job: &ScanJob) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM scan_jobs WHERE id = ?")
            .bind(job.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("scan job {} not found", job.id)))?;
        let current: JobStatus = row.try_get::<String, _>("status")?.parse()?;
        check_transition(current, job.status, job.id)?;

        sqlx::query(
            "UPDATE scan_jobs SET status = ?, completed_at = ?, error_message = ? WHERE id = ?",
        )
        .bind(job.status.to_string())
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(job.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_scan_job(&self, id: i64) -> Result<Option<ScanJob>> {
        let row = sqlx::query("SELECT * FROM scan_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_scan_job).transpose()
    }

    async fn create_scan_target(&self, target: &NewScanTarget) -> Result<ScanTarget> {
        if target.scan_interval_seconds <= 0 {
            return Err(Error::Validation(
                "scan_interval_seconds must be greater than 0".to_string(),
            ));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO scan_targets (name, network, scan_interval_seconds, scan_ports, scan_type, enabled)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&target.name)
        .bind(&target.network)
        .bind(target.scan_interval_seconds)
        .bind(&target.scan_ports)
        .bind(target.scan_type.to_string())
        .bind(target.enabled)
        .fetch_one(&self.pool)
        .await?;

        row_to_scan_target(&row)
    }

    async fn get_scan_target(&self, id: i64) -> Result<Option<ScanTarget>> {
        let row = sqlx::query("SELECT * FROM scan_targets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_scan_target).transpose()
    }

    async fn list_scan_targets(&self) -> Result<Vec<ScanTarget>> {
        let rows = sqlx::query("SELECT * FROM scan_targets ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_scan_target).collect()
    }

    async fn delete_scan_target(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM scan_targets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_port_scans(&self, scans: &[NewPortScan]) -> Result<()> {
        if scans.is_empty() {
            return Ok(());
        }

        for scan in scans {
            if scan.port == 0 {
                return Err(Error::Validation("port 0 is invalid".to_string()));
            }
        }

        let mut tx = self.pool.begin().await?;

        // 9 bind parameters per row; stay well under SQLite's 999 limit.
        const ROWS_PER_QUERY: usize = 100;

        for chunk in scans.chunks(ROWS_PER_QUERY) {
            let placeholders: Vec<&str> = chunk.iter().map(|_| "(?, ?, ?, ?, ?, ?, ?, ?, ?)").collect();
            let sql = format!(
                "INSERT INTO port_scans \
                 (job_id, host_id, port, protocol, state, service, version, product, scanned_at) \
                 VALUES {}",
                placeholders.join(", ")
            );

            let mut query = sqlx::query(&sql);
            for scan in chunk {
                query = query
                    .bind(scan.job_id)
                    .bind(scan.host_id)
                    .bind(scan.port as i64)
                    .bind(scan.protocol.to_string())
                    .bind(scan.state.to_string())
                    .bind(&scan.service)
                    .bind(&scan.version)
                    .bind(&scan.product)
                    .bind(scan.scanned_at);
            }

            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;

        debug!("Stored {} port scans in one transaction", scans.len());
        Ok(())
    }

    async fn get_port_scans(&self, job_id: i64) -> Result<Vec<PortScan>> {
        let rows =
            sqlx::query("SELECT * FROM port_scans WHERE job_id = ? ORDER BY host_id, port")
                .bind(job_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_port_scan).collect()
    }

    async fn list_profiles(&self) -> Result<Vec<ScanProfile>> {
        let rows = sqlx::query("SELECT * FROM scan_profiles ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_profile).collect()
    }

    async fn get_profile(&self, id: &str) -> Result<Option<ScanProfile>> {
        let row = sqlx::query("SELECT * FROM scan_profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn get_profiles_by_os_family(&self, family: &str) -> Result<Vec<ScanProfile>> {
        // Profile counts are small; decode and match in-process rather than
        // pushing JSON matching into SQL.
        let all = self.list_profiles().await?;
        let family = family.to_lowercase();
        Ok(all
            .into_iter()
            .filter(|p| p.os_family.iter().any(|f| f.to_lowercase() == family))
            .collect())
    }

    async fn create_profile(&self, profile: &ScanProfile) -> Result<()> {
        if self.get_profile(&profile.id).await?.is_some() {
            return Err(Error::Conflict(format!(
                "profile {} already exists",
                profile.id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO scan_profiles
            (id, name, description, os_family, os_pattern, ports, scan_type,
             timing, scripts, options, priority, built_in)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.name)
        .bind(&profile.description)
        .bind(serde_json::to_string(&profile.os_family)?)
        .bind(serde_json::to_string(&profile.os_pattern)?)
        .bind(&profile.ports)
        .bind(profile.scan_type.to_string())
        .bind(profile.timing.to_string())
        .bind(serde_json::to_string(&profile.scripts)?)
        .bind(profile.options.to_string())
        .bind(profile.priority)
        .bind(profile.built_in)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_profile(&self, profile: &ScanProfile) -> Result<()> {
        let existing = self
            .get_profile(&profile.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("profile {} not found", profile.id)))?;
        if existing.built_in {
            return Err(Error::Conflict(format!(
                "built-in profile {} cannot be updated",
                profile.id
            )));
        }

        sqlx::query(
            r#"
            UPDATE scan_profiles
            SET name = ?, description = ?, os_family = ?, os_pattern = ?, ports = ?,
                scan_type = ?, timing = ?, scripts = ?, options = ?, priority = ?
            WHERE id = ?
            "#,
        )
        .bind(&profile.name)
        .bind(&profile.description)
        .bind(serde_json::to_string(&profile.os_family)?)
        .bind(serde_json::to_string(&profile.os_pattern)?)
        .bind(&profile.ports)
        .bind(profile.scan_type.to_string())
        .bind(profile.timing.to_string())
        .bind(serde_json::to_string(&profile.scripts)?)
        .bind(profile.options.to_string())
        .bind(profile.priority)
        .bind(&profile.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_profile(&self, id: &str) -> Result<()> {
        let existing = self
            .get_profile(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("profile {} not found", id)))?;
        if existing.built_in {
            return Err(Error::Conflict(format!(
                "built-in profile {} cannot be deleted",
                id
            )));
        }

        sqlx::query("DELETE FROM scan_profiles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_enabled_scheduled_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query("SELECT * FROM scheduled_jobs WHERE enabled = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_scheduled_job).collect()
    }

    async fn list_scheduled_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query("SELECT * FROM scheduled_jobs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_scheduled_job).collect()
    }

    async fn get_scheduled_job(&self, id: i64) -> Result<Option<ScheduledJob>> {
        let row = sqlx::query("SELECT * FROM scheduled_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_scheduled_job).transpose()
    }

    async fn save_scheduled_job(&self, job: &ScheduledJob) -> Result<ScheduledJob> {
        let row = if job.id == 0 {
            sqlx::query(
                r#"
                INSERT INTO scheduled_jobs
                (name, kind, cron_expression, config, enabled, last_run, next_run, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(&job.name)
            .bind(job.kind.to_string())
            .bind(&job.cron_expression)
            .bind(job.config.to_string())
            .bind(job.enabled)
            .bind(job.last_run)
            .bind(job.next_run)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match Error::from(e) {
                Error::Conflict(_) => {
                    Error::Conflict(format!("scheduled job name {:?} already exists", job.name))
                }
                other => other,
            })?
        } else {
            sqlx::query(
                r#"
                UPDATE scheduled_jobs
                SET name = ?, kind = ?, cron_expression = ?, config = ?,
                    enabled = ?, last_run = ?, next_run = ?
                WHERE id = ?
                RETURNING *
                "#,
            )
            .bind(&job.name)
            .bind(job.kind.to_string())
            .bind(&job.cron_expression)
            .bind(job.config.to_string())
            .bind(job.enabled)
            .bind(job.last_run)
            .bind(job.next_run)
            .bind(job.id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("scheduled job {} not found", job.id)))?
        };

        row_to_scheduled_job(&row)
    }

    async fn delete_scheduled_job(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM scheduled_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_scheduled_job_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE scheduled_jobs SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("scheduled job {} not found", id)));
        }
        Ok(())
    }

    async fn set_scheduled_job_last_run(
        &self,
        id: i64,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET last_run = ?, next_run = ? WHERE id = ?")
            .bind(last_run)
            .bind(next_run)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
