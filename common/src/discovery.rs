//! mDNS-SD advertisement of the bridge.
//!
//! The bridge registers itself on the local network with a sequential
//! instance name like `bridge-01`, so a phone or the fetch client can find
//! it without a hard-coded address.

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, info, warn};

/// mDNS service type of the bridge, including domain.
pub const SERVICE_TYPE: &str = "_urbansight._tcp.local.";

/// Prefix of the bridge's instance names.
const INSTANCE_PREFIX: &str = "bridge";

/// How long to scan for existing bridges before claiming an instance number.
const DISCOVERY_SCAN: Duration = Duration::from_secs(3);

// ── Peer ─────────────────────────────────────────────────────────────────────

/// A bridge discovered on the network.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Instance name, e.g. `bridge-01`.
    pub instance_name: String,
    /// All advertised IP addresses.
    pub addresses: Vec<IpAddr>,
    /// Listening port.
    pub port: u16,
}

impl Peer {
    /// Socket address for this peer, preferring a non-loopback IPv4.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let mut addrs = self.addresses.clone();
        addrs.sort_by_key(|a| (a.is_loopback(), !a.is_ipv4()));
        addrs.first().map(|ip| SocketAddr::new(*ip, self.port))
    }
}

// ── Advertisement handle ─────────────────────────────────────────────────────

/// Handle returned by [`register`].  Keeps the mDNS daemon alive.
pub struct Advertisement {
    daemon: ServiceDaemon,
    instance_name: String,
    fullname: String,
}

impl Advertisement {
    /// Our assigned instance name, e.g. `bridge-01`.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Unregister from mDNS and shut down the daemon.
    pub fn shutdown(self) {
        let _ = self.daemon.unregister(&self.fullname);
        let _ = self.daemon.shutdown();
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Advertise a bridge listening on `port`.
///
/// Scans for bridges already on the network, picks the next free
/// sequential number and registers as `bridge-NN`.
pub fn register(port: u16) -> Result<Advertisement> {
    let daemon = ServiceDaemon::new().context("Cannot start mDNS daemon")?;

    let receiver = daemon.browse(SERVICE_TYPE).context("Cannot browse mDNS")?;

    let mut existing: BTreeSet<u32> = BTreeSet::new();
    let deadline = Instant::now() + DISCOVERY_SCAN;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                if let Some(n) = parse_instance_number(info.get_fullname()) {
                    debug!("Found existing bridge instance #{}", n);
                    existing.insert(n);
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    let _ = daemon.stop_browse(SERVICE_TYPE);

    let our_number = next_available(&existing);
    let instance_name = format!("{}-{:02}", INSTANCE_PREFIX, our_number);
    let host = format!("{}.local.", instance_name);

    let service_info = ServiceInfo::new(
        SERVICE_TYPE,
        &instance_name,
        &host,
        "", // auto-detect addresses
        port,
        None,
    )
    .context("Cannot create mDNS ServiceInfo")?
    .enable_addr_auto();

    let fullname = service_info.get_fullname().to_string();

    daemon
        .register(service_info)
        .context("Cannot register mDNS service")?;

    info!(
        "Registered on mDNS as '{}' (type={}, port={})",
        instance_name, SERVICE_TYPE, port
    );

    Ok(Advertisement {
        daemon,
        instance_name,
        fullname,
    })
}

/// Browse for bridges for up to `timeout`.
pub fn discover(timeout: Duration) -> Result<Vec<Peer>> {
    let daemon = ServiceDaemon::new().context("Cannot start mDNS daemon")?;
    let receiver = daemon.browse(SERVICE_TYPE).context("Cannot browse mDNS")?;

    debug!("mDNS: browsing for {} (timeout={}s)", SERVICE_TYPE, timeout.as_secs());
    let mut peers = Vec::new();
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                let name = info.get_fullname().to_string();
                let addresses: Vec<IpAddr> =
                    info.get_addresses().iter().map(|a| a.to_ip_addr()).collect();
                let port = info.get_port();
                info!("mDNS: discovered bridge {} at {:?}:{}", name, addresses, port);
                peers.push(Peer {
                    instance_name: extract_instance_name(&name),
                    addresses,
                    port,
                });
                // one bridge per store; the first answer is enough
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    let _ = daemon.stop_browse(SERVICE_TYPE);
    if let Err(e) = daemon.shutdown() {
        warn!("mDNS daemon shutdown failed: {e}");
    }
    Ok(peers)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Extract the instance number from a fullname like
/// `bridge-03._urbansight._tcp.local.`
fn parse_instance_number(fullname: &str) -> Option<u32> {
    let instance = fullname.split('.').next()?;
    let suffix = instance.strip_prefix(INSTANCE_PREFIX)?.strip_prefix('-')?;
    suffix.parse().ok()
}

fn extract_instance_name(fullname: &str) -> String {
    fullname
        .split('.')
        .next()
        .unwrap_or(fullname)
        .to_string()
}

/// Return the smallest positive integer not in `used`.
fn next_available(used: &BTreeSet<u32>) -> u32 {
    let mut n = 1;
    while used.contains(&n) {
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instance_number() {
        assert_eq!(parse_instance_number("bridge-01._urbansight._tcp.local."), Some(1));
        assert_eq!(parse_instance_number("bridge-12._urbansight._tcp.local."), Some(12));
        assert_eq!(parse_instance_number("capture-01._urbansight._tcp.local."), None);
        assert_eq!(parse_instance_number("garbage"), None);
    }

    #[test]
    fn test_next_available() {
        assert_eq!(next_available(&BTreeSet::new()), 1);

        let set: BTreeSet<u32> = [1, 2, 3].into();
        assert_eq!(next_available(&set), 4);

        let gap: BTreeSet<u32> = [1, 3].into();
        assert_eq!(next_available(&gap), 2);
    }

    #[test]
    fn test_peer_prefers_ipv4_non_loopback() {
        let peer = Peer {
            instance_name: "bridge-01".into(),
            addresses: vec![
                "::1".parse().unwrap(),
                "127.0.0.1".parse().unwrap(),
                "fe80::1".parse().unwrap(),
                "192.168.1.20".parse().unwrap(),
            ],
            port: 8095,
        };
        assert_eq!(peer.socket_addr(), Some("192.168.1.20:8095".parse().unwrap()));
        assert_eq!(extract_instance_name("bridge-01._urbansight._tcp.local."), "bridge-01");
    }
}
