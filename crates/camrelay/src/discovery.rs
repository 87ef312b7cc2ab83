//! Camera discovery
//!
//! The relay core only needs a list of [`CameraAddress`]es. [`NmapDiscovery`]
//! ping-scans the local subnet and keeps hosts whose nmap record mentions one
//! of the configured vendor strings; [`StaticDiscovery`] returns a fixed list.

use async_trait::async_trait;
use std::net::{Ipv4Addr, UdpSocket};
use thiserror::Error;
use tokio::process::Command;

use crate::camera::{CameraAddress, Credentials};
use crate::config::{DiscoveryConfig, DiscoveryMode};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("nmap is not installed or not in PATH")]
    ToolMissing,
    #[error("nmap failed after {attempts} attempts: {reason}")]
    ScanFailed { attempts: u32, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Discover: Send + Sync {
    async fn discover(&self) -> Result<Vec<CameraAddress>, DiscoveryError>;
}

/// Fixed camera list from configuration
pub struct StaticDiscovery {
    addresses: Vec<String>,
    credentials: Option<Credentials>,
}

impl StaticDiscovery {
    pub fn new(addresses: Vec<String>, credentials: Option<Credentials>) -> Self {
        Self {
            addresses,
            credentials,
        }
    }
}

#[async_trait]
impl Discover for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<CameraAddress>, DiscoveryError> {
        Ok(self
            .addresses
            .iter()
            .filter(|a| !a.trim().is_empty())
            .map(|a| CameraAddress::new(a.as_str()).with_credentials(self.credentials.clone()))
            .collect())
    }
}

/// Subnet scan through the `nmap` binary
pub struct NmapDiscovery {
    network: String,
    filter_devices: Vec<String>,
    retries: u32,
    use_sudo: bool,
    credentials: Option<Credentials>,
}

impl NmapDiscovery {
    pub fn new(
        network: String,
        filter_devices: Vec<String>,
        retries: u32,
        use_sudo: bool,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            network,
            filter_devices,
            retries: retries.max(1),
            use_sudo,
            credentials,
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    fn command(&self) -> Command {
        let mut cmd = if self.use_sudo && cfg!(unix) {
            let mut cmd = Command::new("sudo");
            cmd.arg("nmap");
            cmd
        } else {
            Command::new("nmap")
        };
        cmd.arg("-sn").arg(&self.network).kill_on_drop(true);
        cmd
    }

    async fn scan_once(&self) -> Result<String, DiscoveryError> {
        let output = match self.command().output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DiscoveryError::ToolMissing)
            }
            Err(e) => return Err(e.into()),
        };
        if !output.status.success() {
            return Err(DiscoveryError::ScanFailed {
                attempts: 1,
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Discover for NmapDiscovery {
    async fn discover(&self) -> Result<Vec<CameraAddress>, DiscoveryError> {
        let mut last_reason = String::new();
        for attempt in 1..=self.retries {
            log::info!(
                "Scanning network {} (attempt {}/{})",
                self.network,
                attempt,
                self.retries
            );
            match self.scan_once().await {
                Ok(stdout) => {
                    log::debug!("nmap output:\n{}", stdout);
                    let hosts = parse_nmap_hosts(&stdout, &self.filter_devices);
                    log::info!("Matched {} camera(s): {:?}", hosts.len(), hosts);
                    return Ok(hosts
                        .into_iter()
                        .map(|h| CameraAddress::new(h).with_credentials(self.credentials.clone()))
                        .collect());
                }
                Err(DiscoveryError::ToolMissing) => return Err(DiscoveryError::ToolMissing),
                Err(e) => {
                    log::error!("nmap scan attempt {} failed: {}", attempt, e);
                    last_reason = e.to_string();
                }
            }
        }
        Err(DiscoveryError::ScanFailed {
            attempts: self.retries,
            reason: last_reason,
        })
    }
}

/// Build the discoverer selected by `config`
pub fn from_config(config: &DiscoveryConfig, credentials: Option<Credentials>) -> Box<dyn Discover> {
    match config.mode {
        DiscoveryMode::Static => Box::new(StaticDiscovery::new(config.addresses.clone(), credentials)),
        DiscoveryMode::Nmap => {
            let network = config
                .network
                .clone()
                .unwrap_or_else(|| network_cidr(local_ipv4()));
            Box::new(NmapDiscovery::new(
                network,
                config.filter_devices.clone(),
                config.retries,
                config.use_sudo,
                credentials,
            ))
        }
    }
}

/// Extract hosts from `nmap -sn` output.
///
/// nmap prints each host as a block:
///
/// ```text
/// Nmap scan report for 192.168.1.64
/// Host is up (0.0010s latency).
/// MAC Address: 80:BE:AF:12:34:56 (Hikvision)
/// ```
///
/// A line containing any filter string selects the host named two lines above.
pub fn parse_nmap_hosts(output: &str, filter_devices: &[String]) -> Vec<String> {
    let lines: Vec<&str> = output.lines().collect();
    let mut hosts = Vec::new();
    for window in lines.windows(3) {
        if !filter_devices
            .iter()
            .any(|f| !f.is_empty() && window[2].contains(f.as_str()))
        {
            continue;
        }
        if let Some(last) = window[0].split_whitespace().last() {
            let host = last.trim_matches(|c| c == '(' || c == ')').to_string();
            if !host.is_empty() && !hosts.contains(&host) {
                hosts.push(host);
            }
        }
    }
    hosts
}

/// Primary IPv4 address of this host, or loopback if there is no route.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick the
/// outbound interface.
pub fn local_ipv4() -> Ipv4Addr {
    let probe = || -> std::io::Result<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("10.254.254.254:1")?;
        match socket.local_addr()?.ip() {
            std::net::IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
            other => Err(std::io::Error::other(format!("unexpected local address {other}"))),
        }
    };
    match probe() {
        Ok(ip) => ip,
        Err(e) => {
            log::warn!("Could not determine host IP ({}), using loopback", e);
            Ipv4Addr::LOCALHOST
        }
    }
}

/// The /24 network containing `ip`, in CIDR form
pub fn network_cidr(ip: Ipv4Addr) -> String {
    let [a, b, c, _] = ip.octets();
    format!("{a}.{b}.{c}.0/24")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NMAP_OUTPUT: &str = "\
Starting Nmap 7.94 ( https://nmap.org ) at 2024-05-01 10:00 UTC
Nmap scan report for router.lan (192.168.1.1)
Host is up (0.0012s latency).
MAC Address: 00:11:22:33:44:55 (Tp-link Technologies)
Nmap scan report for 192.168.1.64
Host is up (0.0020s latency).
MAC Address: 80:BE:AF:12:34:56 (Hangzhou Hikvision Digital Technology)
Nmap scan report for cam2.lan (192.168.1.65)
Host is up (0.0021s latency).
MAC Address: 80:BE:AF:AB:CD:EF (Hangzhou Hikvision Digital Technology)
Nmap done: 256 IP addresses (3 hosts up) scanned in 2.10 seconds
";

    fn filters(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_by_vendor() {
        let hosts = parse_nmap_hosts(NMAP_OUTPUT, &filters(&["Hikvision"]));
        assert_eq!(hosts, vec!["192.168.1.64", "192.168.1.65"]);
    }

    #[test]
    fn test_parse_by_mac_prefix() {
        let hosts = parse_nmap_hosts(NMAP_OUTPUT, &filters(&["00:11:22"]));
        assert_eq!(hosts, vec!["192.168.1.1"]);
    }

    #[test]
    fn test_parse_no_match() {
        assert!(parse_nmap_hosts(NMAP_OUTPUT, &filters(&["Axis"])).is_empty());
        assert!(parse_nmap_hosts(NMAP_OUTPUT, &filters(&[""])).is_empty());
        assert!(parse_nmap_hosts("", &filters(&["Hikvision"])).is_empty());
    }

    #[test]
    fn test_network_cidr() {
        assert_eq!(network_cidr(Ipv4Addr::new(192, 168, 1, 37)), "192.168.1.0/24");
        assert_eq!(network_cidr(Ipv4Addr::LOCALHOST), "127.0.0.0/24");
    }

    #[tokio::test]
    async fn test_static_discovery() {
        let discovery = StaticDiscovery::new(
            vec!["10.0.0.5".into(), " ".into(), "10.0.0.6".into()],
            None,
        );
        let cameras = discovery.discover().await.unwrap();
        let hosts: Vec<&str> = cameras.iter().map(|c| c.host()).collect();
        assert_eq!(hosts, vec!["10.0.0.5", "10.0.0.6"]);
    }

    #[tokio::test]
    async fn test_static_discovery_empty() {
        let discovery = StaticDiscovery::new(Vec::new(), None);
        assert!(discovery.discover().await.unwrap().is_empty());
    }

    #[test]
    fn test_nmap_network_and_retry_floor() {
        let config = DiscoveryConfig {
            network: Some("10.1.2.0/24".into()),
            ..Default::default()
        };
        let nmap = NmapDiscovery::new(
            config.network.clone().unwrap(),
            config.filter_devices.clone(),
            0,
            false,
            None,
        );
        assert_eq!(nmap.network(), "10.1.2.0/24");
        assert_eq!(nmap.retries, 1);
    }
}
