//! Prober capability
//!
//! The engines depend on the [`Prober`] trait only; tests substitute a
//! deterministic fake and the daemon wires in [`ConnectProber`], an
//! unprivileged implementation built on OS TCP connects. Raw-socket probe
//! crafting is deliberately out of scope: requests for `ping` or `arp`
//! degrade to TCP probing with a warning.

use async_trait::async_trait;
use scanorama_core::types::{
    DiscoveryMethod, HostStatus, OsFingerprint, PortState, Protocol, ScanType, TimingTemplate,
};
use scanorama_core::Result;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Ports probed for TCP liveness, most-commonly-open first
const TCP_PING_PORTS: &[u16] = &[80, 443, 22, 21, 25, 53, 3389, 3306, 5432];

/// Liveness probe request
#[derive(Debug, Clone)]
pub struct LivenessRequest {
    pub targets: Vec<IpAddr>,
    pub method: DiscoveryMethod,
    pub timing: TimingTemplate,
    pub detect_os: bool,
    /// Overall deadline for the whole target set
    pub timeout: Duration,
    pub concurrency: usize,
}

/// One liveness observation
///
/// `addresses` may carry more than one address for multi-homed hosts; the
/// discovery engine picks the canonical one (IPv4 preferred).
#[derive(Debug, Clone)]
pub struct LivenessResult {
    pub address: IpAddr,
    pub state: HostStatus,
    pub addresses: Vec<IpAddr>,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub vendor: Option<String>,
    pub os: Option<OsFingerprint>,
    pub response_time: Option<Duration>,
}

impl LivenessResult {
    fn down(address: IpAddr) -> Self {
        Self {
            address,
            state: HostStatus::Down,
            addresses: vec![address],
            hostname: None,
            mac_address: None,
            vendor: None,
            os: None,
            response_time: None,
        }
    }
}

/// Port probe request for a target set
#[derive(Debug, Clone)]
pub struct PortProbeRequest {
    pub targets: Vec<IpAddr>,
    pub ports: Vec<u16>,
    pub scan_type: ScanType,
    pub timing: TimingTemplate,
    pub timeout: Duration,
    pub detect_version: bool,
}

/// One observed port on one host
#[derive(Debug, Clone)]
pub struct PortObservation {
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service: Option<String>,
    pub version: Option<String>,
    pub product: Option<String>,
}

/// Port observations for one probed host
#[derive(Debug, Clone)]
pub struct HostPortReport {
    pub host: IpAddr,
    pub ports: Vec<PortObservation>,
}

/// Abstract probe capability the engines are written against
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe liveness of every target. Individual unreachable hosts are
    /// reported as `down`, not as errors; only a failure to probe at all
    /// is an `Err`.
    async fn probe_liveness(&self, request: &LivenessRequest) -> Result<Vec<LivenessResult>>;

    /// Probe the given ports on every target, reporting ports in probe
    /// order per host.
    async fn probe_ports(&self, request: &PortProbeRequest) -> Result<Vec<HostPortReport>>;
}

/// Unprivileged prober using full TCP connects
///
/// Liveness: connect attempts against a short ladder of commonly open
/// ports; a completed handshake or a connection refusal both prove the
/// host is up. Ports: connect result mapped to open/closed/filtered, with
/// optional banner reading for service naming when `detect_version` is set.
#[derive(Debug, Clone, Default)]
pub struct ConnectProber;

impl ConnectProber {
    pub fn new() -> Self {
        Self
    }

    fn connect_timeout(timing: TimingTemplate) -> Duration {
        // The template timeout caps a single connect; two seconds is enough
        // for anything that will answer at all.
        Duration::from_millis(timing.probe_timeout_ms().min(2_000))
    }

    /// TCP liveness ladder for a single target.
    async fn probe_one(
        target: IpAddr,
        timing: TimingTemplate,
        detect_os: bool,
    ) -> LivenessResult {
        let per_port = Self::connect_timeout(timing);
        let started = Instant::now();

        for &port in TCP_PING_PORTS {
            let addr = SocketAddr::new(target, port);
            match timeout(per_port, TcpStream::connect(addr)).await {
                Ok(Ok(_stream)) => {
                    debug!("Host {} alive (tcp {} open)", target, port);
                    return Self::alive(target, started.elapsed(), detect_os, timing).await;
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    // A refusal still proves something answered.
                    debug!("Host {} alive (tcp {} refused)", target, port);
                    return Self::alive(target, started.elapsed(), detect_os, timing).await;
                }
                Ok(Err(e)) => {
                    trace!("tcp {} error for {}: {}", port, target, e);
                }
                Err(_) => {
                    trace!("tcp {} timeout for {}", port, target);
                }
            }
        }

        debug!("Host {} appears down (all tcp pings failed)", target);
        LivenessResult::down(target)
    }

    async fn alive(
        target: IpAddr,
        response_time: Duration,
        detect_os: bool,
        timing: TimingTemplate,
    ) -> LivenessResult {
        let os = if detect_os {
            Self::fingerprint_from_ssh(target, Self::connect_timeout(timing)).await
        } else {
            None
        };

        LivenessResult {
            address: target,
            state: HostStatus::Up,
            addresses: vec![target],
            hostname: None,
            mac_address: None,
            vendor: None,
            os,
            response_time: Some(response_time),
        }
    }

    /// Best-effort OS hint from an SSH banner (RFC 4253 version string).
    async fn fingerprint_from_ssh(target: IpAddr, deadline: Duration) -> Option<OsFingerprint> {
        let addr = SocketAddr::new(target, 22);
        let mut stream = timeout(deadline, TcpStream::connect(addr)).await.ok()?.ok()?;

        let mut buf = [0u8; 256];
        let n = timeout(deadline, stream.read(&mut buf)).await.ok()?.ok()?;
        let banner = String::from_utf8_lossy(&buf[..n]);

        parse_ssh_os_hint(banner.trim())
    }

    /// Probe one port on one host.
    async fn probe_port(
        target: IpAddr,
        port: u16,
        timing: TimingTemplate,
        detect_version: bool,
    ) -> PortObservation {
        let per_port = Self::connect_timeout(timing);
        let addr = SocketAddr::new(target, port);

        let state = match timeout(per_port, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if detect_version {
                    let (service, product, version) =
                        grab_service_banner(stream, addr, per_port).await;
                    return PortObservation {
                        port,
                        protocol: Protocol::Tcp,
                        state: PortState::Open,
                        service: service.or_else(|| well_known_service(port)),
                        version,
                        product,
                    };
                }
                PortState::Open
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => PortState::Closed,
            Ok(Err(_)) | Err(_) => PortState::Filtered,
        };

        PortObservation {
            port,
            protocol: Protocol::Tcp,
            state,
            service: if state == PortState::Open {
                well_known_service(port)
            } else {
                None
            },
            version: None,
            product: None,
        }
    }
}

#[async_trait]
impl Prober for ConnectProber {
    async fn probe_liveness(&self, request: &LivenessRequest) -> Result<Vec<LivenessResult>> {
        if request.method != DiscoveryMethod::Tcp {
            warn!(
                "{} probing requires raw sockets; falling back to tcp",
                request.method
            );
        }

        let semaphore = Arc::new(Semaphore::new(request.concurrency.max(1)));
        let mut handles = Vec::with_capacity(request.targets.len());

        for target in request.targets.iter().copied() {
            let semaphore = Arc::clone(&semaphore);
            let timing = request.timing;
            let detect_os = request.detect_os;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                Self::probe_one(target, timing, detect_os).await
            }));
        }

        let gather = async {
            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                match handle.await {
                    Ok(result) => results.push(result),
                    Err(e) => warn!("liveness probe task failed: {}", e),
                }
            }
            results
        };

        // The overall deadline covers the whole sweep; whatever finished in
        // time is still a usable answer.
        match timeout(request.timeout, gather).await {
            Ok(results) => Ok(results),
            Err(_) => {
                warn!(
                    "liveness sweep of {} targets exceeded {:?}",
                    request.targets.len(),
                    request.timeout
                );
                Ok(Vec::new())
            }
        }
    }

    async fn probe_ports(&self, request: &PortProbeRequest) -> Result<Vec<HostPortReport>> {
        if request.scan_type == ScanType::Syn {
            warn!("syn scanning requires raw sockets; falling back to connect");
        }
        let detect_version = request.detect_version || request.scan_type == ScanType::Version;

        let parallelism = request.timing.max_parallelism().min(256).max(1);
        let semaphore = Arc::new(Semaphore::new(parallelism));

        let mut reports = Vec::with_capacity(request.targets.len());
        for target in request.targets.iter().copied() {
            let mut handles = Vec::with_capacity(request.ports.len());
            for &port in &request.ports {
                let semaphore = Arc::clone(&semaphore);
                let timing = request.timing;
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    Self::probe_port(target, port, timing, detect_version).await
                }));
            }

            let gather = async {
                let mut ports = Vec::with_capacity(handles.len());
                for handle in handles {
                    match handle.await {
                        Ok(observation) => ports.push(observation),
                        Err(e) => warn!("port probe task failed: {}", e),
                    }
                }
                ports
            };

            let ports = match timeout(request.timeout, gather).await {
                Ok(ports) => ports,
                Err(_) => {
                    warn!("port probe of {} exceeded {:?}", target, request.timeout);
                    Vec::new()
                }
            };

            reports.push(HostPortReport { host: target, ports });
        }

        Ok(reports)
    }
}

/// Read whatever the service volunteers (sending an HTTP request first on
/// web ports) and turn it into (service, product, version).
async fn grab_service_banner(
    mut stream: TcpStream,
    addr: SocketAddr,
    deadline: Duration,
) -> (Option<String>, Option<String>, Option<String>) {
    if matches!(addr.port(), 80 | 8080 | 8000 | 8443 | 443) {
        let request = format!(
            "HEAD / HTTP/1.0\r\nHost: {}\r\nUser-Agent: scanorama/0.3\r\n\r\n",
            addr.ip()
        );
        if stream.write_all(request.as_bytes()).await.is_err() {
            return (well_known_service(addr.port()), None, None);
        }
    }

    let mut buf = [0u8; 512];
    let banner = match timeout(deadline, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => String::from_utf8_lossy(&buf[..n]).into_owned(),
        _ => return (well_known_service(addr.port()), None, None),
    };

    parse_banner(&banner, addr.port())
}

/// Split a raw banner into (service, product, version).
fn parse_banner(banner: &str, port: u16) -> (Option<String>, Option<String>, Option<String>) {
    let first_line = banner.lines().next().unwrap_or("").trim();

    if let Some(rest) = first_line.strip_prefix("SSH-") {
        // SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.1
        let software = rest.splitn(2, '-').nth(1).unwrap_or("");
        let software = software.split_whitespace().next().unwrap_or("");
        let (product, version) = match software.split_once('_') {
            Some((p, v)) => (Some(p.to_string()), Some(v.to_string())),
            None if !software.is_empty() => (Some(software.to_string()), None),
            None => (None, None),
        };
        return (Some("ssh".to_string()), product, version);
    }

    if first_line.starts_with("HTTP/") {
        // Prefer the Server header when present.
        let server = banner
            .lines()
            .find_map(|l| l.strip_prefix("Server: ").or_else(|| l.strip_prefix("server: ")));
        let (product, version) = match server {
            Some(s) => match s.trim().split_once('/') {
                Some((p, v)) => (
                    Some(p.to_string()),
                    Some(v.split_whitespace().next().unwrap_or(v).to_string()),
                ),
                None => (Some(s.trim().to_string()), None),
            },
            None => (None, None),
        };
        return (Some("http".to_string()), product, version);
    }

    if first_line.starts_with("220") {
        let service = match port {
            21 => "ftp",
            25 | 587 => "smtp",
            _ => "unknown",
        };
        return (Some(service.to_string()), None, None);
    }

    (well_known_service(port), None, None)
}

/// IANA-ish service name for common ports, used when no banner speaks up.
fn well_known_service(port: u16) -> Option<String> {
    let name = match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 => "http",
        110 => "pop3",
        143 => "imap",
        443 => "https",
        445 => "microsoft-ds",
        993 => "imaps",
        995 => "pop3s",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5432 => "postgresql",
        6379 => "redis",
        8080 => "http-proxy",
        8443 => "https-alt",
        _ => return None,
    };
    Some(name.to_string())
}

/// OS hint from an SSH version string comment, e.g.
/// `SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.1` -> linux / Ubuntu.
fn parse_ssh_os_hint(banner: &str) -> Option<OsFingerprint> {
    if !banner.starts_with("SSH-") {
        return None;
    }

    let lowered = banner.to_lowercase();
    let (family, name) = if lowered.contains("ubuntu") {
        ("linux", "Ubuntu")
    } else if lowered.contains("debian") {
        ("linux", "Debian")
    } else if lowered.contains("freebsd") {
        ("unix", "FreeBSD")
    } else if lowered.contains("windows") {
        ("windows", "Windows")
    } else if lowered.contains("openssh") {
        // OpenSSH without a distro comment is almost always unix-like.
        ("linux", "Linux")
    } else {
        return None;
    };

    let mut fp = OsFingerprint::new(family, name, 60);
    fp.method = "ssh-banner".to_string();
    fp.details = Some(banner.to_string());
    Some(fp)
}
