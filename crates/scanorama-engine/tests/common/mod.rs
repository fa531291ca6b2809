//! Shared test fixtures: a deterministic scripted prober and wiring
//! helpers for engines backed by in-memory SQLite.

use async_trait::async_trait;
use scanorama_core::types::{HostStatus, OsFingerprint, PortState, Protocol};
use scanorama_engine::prober::{
    HostPortReport, LivenessRequest, LivenessResult, PortObservation, PortProbeRequest, Prober,
};
use scanorama_engine::storage::SqliteRepository;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Prober that answers from fixed tables instead of the network.
#[derive(Default)]
pub struct ScriptedProber {
    /// Hosts that respond to liveness probes, with an optional fingerprint
    pub live: HashMap<IpAddr, Option<OsFingerprint>>,
    /// Open ports per host; everything else reports filtered
    pub open_ports: HashMap<IpAddr, Vec<u16>>,
    /// Artificial per-call latency
    pub delay: Duration,
}

impl ScriptedProber {
    pub fn with_live_host(mut self, ip: &str, os: Option<OsFingerprint>) -> Self {
        self.live.insert(ip.parse().unwrap(), os);
        self
    }

    pub fn with_open_ports(mut self, ip: &str, ports: &[u16]) -> Self {
        self.open_ports.insert(ip.parse().unwrap(), ports.to_vec());
        self
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe_liveness(
        &self,
        request: &LivenessRequest,
    ) -> scanorama_core::Result<Vec<LivenessResult>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(request
            .targets
            .iter()
            .map(|&target| match self.live.get(&target) {
                Some(os) => LivenessResult {
                    address: target,
                    state: HostStatus::Up,
                    addresses: vec![target],
                    hostname: None,
                    mac_address: None,
                    vendor: None,
                    os: if request.detect_os { os.clone() } else { None },
                    response_time: Some(Duration::from_millis(2)),
                },
                None => LivenessResult {
                    address: target,
                    state: HostStatus::Down,
                    addresses: vec![target],
                    hostname: None,
                    mac_address: None,
                    vendor: None,
                    os: None,
                    response_time: None,
                },
            })
            .collect())
    }

    async fn probe_ports(
        &self,
        request: &PortProbeRequest,
    ) -> scanorama_core::Result<Vec<HostPortReport>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(request
            .targets
            .iter()
            .map(|&host| {
                let open = self.open_ports.get(&host).cloned().unwrap_or_default();
                HostPortReport {
                    host,
                    ports: request
                        .ports
                        .iter()
                        .map(|&port| PortObservation {
                            port,
                            protocol: Protocol::Tcp,
                            state: if open.contains(&port) {
                                PortState::Open
                            } else {
                                PortState::Filtered
                            },
                            service: None,
                            version: None,
                            product: None,
                        })
                        .collect(),
                }
            })
            .collect())
    }
}

pub async fn memory_repository() -> Arc<SqliteRepository> {
    Arc::new(SqliteRepository::open(":memory:").await.unwrap())
}
