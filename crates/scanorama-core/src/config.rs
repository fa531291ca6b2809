//! Daemon configuration
//!
//! Loaded from a TOML file by the binary; every section has workable
//! defaults so a bare `scanorama-daemon --database scanorama.db` runs.

use crate::error::{Error, Result};
use crate::target::{PortSpec, DEFAULT_MAX_PREFIX};
use crate::types::{DiscoveryMethod, ScanType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Persistence settings
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Discovery engine defaults
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Scan engine defaults
    #[serde(default)]
    pub scan: ScanConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Validation(format!("failed to read config file {:?}: {}", path, e))
        })?;
        Self::load_from_str(&contents)
    }

    /// Load configuration from a TOML string
    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: DaemonConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.shutdown_timeout_secs == 0 {
            return Err(Error::Validation(
                "scheduler.shutdown_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.discovery.concurrency == 0 || self.discovery.concurrency > 10_000 {
            return Err(Error::Validation(
                "discovery.concurrency must be in 1..=10000".to_string(),
            ));
        }

        if self.discovery.max_hosts == 0 {
            return Err(Error::Validation(
                "discovery.max_hosts must be greater than 0".to_string(),
            ));
        }

        if !(8..=32).contains(&self.discovery.max_prefix) {
            return Err(Error::Validation(
                "discovery.max_prefix must be in 8..=32".to_string(),
            ));
        }

        if self.scan.concurrency == 0 || self.scan.concurrency > 10_000 {
            return Err(Error::Validation(
                "scan.concurrency must be in 1..=10000".to_string(),
            ));
        }

        // Surface bad default port specs at boot, not at first scan.
        PortSpec::parse(&self.scan.default_ports)?;

        Ok(())
    }
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path; `:memory:` for ephemeral state
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "scanorama.db".to_string(),
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long `stop` waits for in-flight jobs before giving up
    pub shutdown_timeout_secs: u64,
}

impl SchedulerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
        }
    }
}

/// Discovery engine defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Default liveness method for ad-hoc runs
    pub method: DiscoveryMethod,
    /// Base per-probe timeout fed into the adaptive computation, seconds
    pub base_timeout_secs: u64,
    /// Bounded concurrency for liveness probes
    pub concurrency: usize,
    /// Hard cap on expanded targets per run
    pub max_hosts: usize,
    /// Widest accepted prefix length (smaller number = larger network)
    pub max_prefix: u8,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            method: DiscoveryMethod::Tcp,
            base_timeout_secs: 5,
            concurrency: 50,
            max_hosts: 4096,
            max_prefix: DEFAULT_MAX_PREFIX,
        }
    }
}

/// Scan engine defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Ports scanned when neither profile nor request names any
    pub default_ports: String,
    pub default_scan_type: ScanType,
    /// Hosts scanned in parallel
    pub concurrency: usize,
    /// Per-host prober timeout, seconds
    pub timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_ports: "22,80,443,3389,8080".to_string(),
            default_scan_type: ScanType::Connect,
            concurrency: 10,
            timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DaemonConfig::default();
        config.validate().unwrap();
        assert_eq!(config.database.path, "scanorama.db");
        assert_eq!(config.scan.concurrency, 10);
    }

    #[test]
    fn test_load_from_toml() {
        let config = DaemonConfig::load_from_str(
            r#"
            [database]
            path = "/var/lib/scanorama/state.db"

            [scheduler]
            shutdown_timeout_secs = 10

            [discovery]
            method = "ping"
            base_timeout_secs = 2
            concurrency = 100
            max_hosts = 1024
            max_prefix = 20

            [scan]
            default_ports = "1-1024"
            default_scan_type = "version"
            concurrency = 5
            timeout_secs = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, "/var/lib/scanorama/state.db");
        assert_eq!(config.discovery.method, DiscoveryMethod::Ping);
        assert_eq!(config.discovery.max_prefix, 20);
        assert_eq!(config.scan.default_scan_type, ScanType::Version);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = DaemonConfig::load_from_str(
            r#"
            [database]
            path = ":memory:"
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.shutdown_timeout_secs, 30);
        assert_eq!(config.discovery.concurrency, 50);
    }

    #[test]
    fn test_rejects_zero_shutdown_timeout() {
        let mut config = DaemonConfig::default();
        config.scheduler.shutdown_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_default_ports() {
        let mut config = DaemonConfig::default();
        config.scan.default_ports = "0-12".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_prefix() {
        let mut config = DaemonConfig::default();
        config.discovery.max_prefix = 4;
        assert!(config.validate().is_err());
    }
}
