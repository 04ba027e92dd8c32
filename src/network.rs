//! Network link bring-up
//!
//! The bridge needs an IP link before it can reach the broker, and the
//! broker usually lives on the link's default gateway.

use crate::transport::mqtt::connection::GATEWAY_HOST;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

/// Linux routing table location
pub const PROC_NET_ROUTE: &str = "/proc/net/route";

/// `RTF_UP` flag in the routing table
const RTF_UP: u32 = 0x0001;

/// `RTF_GATEWAY` flag in the routing table
const RTF_GATEWAY: u32 = 0x0002;

/// Loopback interface name in the routing table
const LOOPBACK_IFACE: &str = "lo";

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to join network {ssid}: {reason}")]
    JoinFailed { ssid: String, reason: String },
    #[error("Interrupted while waiting for the network link")]
    Interrupted,
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The IP link the bridge runs over
#[async_trait]
pub trait NetworkLink: Send {
    /// Start association with the access point; completion is seen through `is_up`
    async fn connect(&mut self, ssid: Option<&str>, password: Option<&str>)
        -> Result<(), NetworkError>;

    fn is_up(&self) -> bool;

    fn gateway_address(&self) -> Option<Ipv4Addr>;

    fn local_address(&self) -> Option<IpAddr>;
}

/// What the first broker connect needs from the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRequirement {
    /// Broker host is the link's default gateway
    Gateway,
    /// Broker is elsewhere on the network; any non-loopback route will do
    Route,
    /// Broker runs on this machine
    Nothing,
}

impl LinkRequirement {
    /// Requirement for a broker URL host
    pub fn for_broker_host(host: &str) -> Self {
        if host.eq_ignore_ascii_case(GATEWAY_HOST) {
            return LinkRequirement::Gateway;
        }
        let ip = host.trim_matches(&['[', ']'][..]).parse::<IpAddr>();
        if host.eq_ignore_ascii_case("localhost") || ip.is_ok_and(|ip| ip.is_loopback()) {
            return LinkRequirement::Nothing;
        }
        LinkRequirement::Route
    }

    pub fn is_met<L: NetworkLink + ?Sized>(&self, link: &L) -> bool {
        match self {
            LinkRequirement::Gateway => link.is_up() && link.gateway_address().is_some(),
            LinkRequirement::Route => link.is_up(),
            LinkRequirement::Nothing => true,
        }
    }
}

/// Host network managed by the operating system
///
/// Association is the OS's job, so `connect` only records the request. The
/// link counts as up once a route on a non-loopback interface exists.
#[derive(Debug, Clone)]
pub struct HostNetworkLink {
    route_table: PathBuf,
}

impl HostNetworkLink {
    pub fn new() -> Self {
        Self::with_route_table(PROC_NET_ROUTE)
    }

    pub fn with_route_table(path: impl Into<PathBuf>) -> Self {
        Self {
            route_table: path.into(),
        }
    }
}

impl Default for HostNetworkLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkLink for HostNetworkLink {
    async fn connect(
        &mut self,
        ssid: Option<&str>,
        _password: Option<&str>,
    ) -> Result<(), NetworkError> {
        match ssid {
            Some(ssid) => info!("Network association for '{}' is managed by the host", ssid),
            None => debug!("No SSID configured; using host network"),
        }
        Ok(())
    }

    fn is_up(&self) -> bool {
        std::fs::read_to_string(&self.route_table)
            .map(|table| has_interface_route(&table))
            .unwrap_or(false)
    }

    fn gateway_address(&self) -> Option<Ipv4Addr> {
        let table = std::fs::read_to_string(&self.route_table).ok()?;
        parse_default_gateway(&table)
    }

    fn local_address(&self) -> Option<IpAddr> {
        // Connecting a UDP socket selects the outgoing interface without sending anything
        let gateway = self.gateway_address()?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect((gateway, 9)).ok()?;
        socket.local_addr().ok().map(|addr| addr.ip())
    }
}

/// Extract the default gateway from `/proc/net/route` contents
///
/// Columns are whitespace separated with a header line; addresses are
/// little-endian hex.
pub fn parse_default_gateway(route_table: &str) -> Option<Ipv4Addr> {
    route_table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (destination, gateway, flags) = (fields.get(1)?, fields.get(2)?, fields.get(3)?);

        let destination = u32::from_str_radix(destination, 16).ok()?;
        let flags = u32::from_str_radix(flags, 16).ok()?;
        if destination != 0 || flags & RTF_GATEWAY == 0 {
            return None;
        }

        let gateway = u32::from_str_radix(gateway, 16).ok()?;
        Some(Ipv4Addr::from(gateway.to_le_bytes()))
    })
}

/// True when the table has a usable route on an interface other than loopback
pub fn has_interface_route(route_table: &str) -> bool {
    route_table.lines().skip(1).any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (Some(iface), Some(flags)) = (fields.first(), fields.get(3)) else {
            return false;
        };
        let up = u32::from_str_radix(flags, 16).is_ok_and(|f| f & RTF_UP != 0);
        up && *iface != LOOPBACK_IFACE
    })
}

/// Poll the link until `requirement` is met, or until shutdown is requested
pub async fn wait_for_link<L: NetworkLink + ?Sized>(
    link: &L,
    requirement: LinkRequirement,
    poll: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), NetworkError> {
    if requirement == LinkRequirement::Nothing {
        debug!("Broker is local; not waiting for a network link");
        return Ok(());
    }

    let mut polls = 0u32;
    while !requirement.is_met(link) {
        if *shutdown.borrow() {
            return Err(NetworkError::Interrupted);
        }
        polls += 1;
        debug!(polls, ?requirement, "Waiting for network link");

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Err(NetworkError::Interrupted);
                }
            }
        }
    }

    info!(
        local = ?link.local_address(),
        gateway = ?link.gateway_address(),
        "Network link up"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockNetworkLink;
    use std::io::Write;

    const ROUTE_TABLE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
wlan0\t0001A8C0\t00000000\t0001\t0\t0\t600\t00FFFFFF\t0\t0\t0
wlan0\t00000000\t0101A8C0\t0003\t0\t0\t600\t00000000\t0\t0\t0
";

    #[test]
    fn test_parse_default_gateway() {
        assert_eq!(
            parse_default_gateway(ROUTE_TABLE),
            Some(Ipv4Addr::new(192, 168, 1, 1))
        );
    }

    #[test]
    fn test_parse_without_default_route() {
        let table = "\
Iface\tDestination\tGateway \tFlags
eth0\t0000A8C0\t00000000\t0001
";
        assert_eq!(parse_default_gateway(table), None);
        assert_eq!(parse_default_gateway(""), None);
        assert_eq!(parse_default_gateway("header\ngarbage line"), None);
    }

    #[test]
    fn test_host_link_reads_route_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ROUTE_TABLE.as_bytes()).unwrap();

        let link = HostNetworkLink::with_route_table(file.path());
        assert!(link.is_up());
        assert_eq!(link.gateway_address(), Some(Ipv4Addr::new(192, 168, 1, 1)));

        let missing = HostNetworkLink::with_route_table("/nonexistent/route");
        assert!(!missing.is_up());
        assert_eq!(missing.local_address(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_link_polls_until_up() {
        let link = MockNetworkLink::up_after(3);
        let (_tx, mut rx) = watch::channel(false);

        let start = tokio::time::Instant::now();
        wait_for_link(
            &link,
            LinkRequirement::Route,
            Duration::from_millis(500),
            &mut rx,
        )
        .await
        .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_link_interrupted() {
        let link = MockNetworkLink::up_after(u32::MAX);
        let (tx, mut rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let _ = tx.send(true);
        });

        let result = wait_for_link(
            &link,
            LinkRequirement::Gateway,
            Duration::from_millis(500),
            &mut rx,
        )
        .await;
        assert!(matches!(result, Err(NetworkError::Interrupted)));
    }

    const LOOPBACK_ONLY: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
lo\t0000007F\t00000000\t0001\t0\t0\t0\t000000FF\t0\t0\t0
";

    const SUBNET_ONLY: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0
";

    fn route_file(table: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(table.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_link_requirement_follows_broker_host() {
        assert_eq!(
            LinkRequirement::for_broker_host("gateway"),
            LinkRequirement::Gateway
        );
        assert_eq!(
            LinkRequirement::for_broker_host("localhost"),
            LinkRequirement::Nothing
        );
        assert_eq!(
            LinkRequirement::for_broker_host("127.0.0.1"),
            LinkRequirement::Nothing
        );
        assert_eq!(
            LinkRequirement::for_broker_host("[::1]"),
            LinkRequirement::Nothing
        );
        assert_eq!(
            LinkRequirement::for_broker_host("192.168.1.10"),
            LinkRequirement::Route
        );
        assert_eq!(
            LinkRequirement::for_broker_host("broker.lan"),
            LinkRequirement::Route
        );
    }

    #[test]
    fn test_interface_route_without_default_gateway() {
        assert!(!has_interface_route(LOOPBACK_ONLY));
        assert!(has_interface_route(SUBNET_ONLY));
        assert!(has_interface_route(ROUTE_TABLE));
        assert!(!has_interface_route(""));

        let file = route_file(SUBNET_ONLY);
        let link = HostNetworkLink::with_route_table(file.path());
        assert!(link.is_up());
        assert_eq!(link.gateway_address(), None);
        assert!(LinkRequirement::Route.is_met(&link));
        assert!(!LinkRequirement::Gateway.is_met(&link));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_broker_does_not_wait_on_loopback_only_host() {
        let file = route_file(LOOPBACK_ONLY);
        let link = HostNetworkLink::with_route_table(file.path());
        assert!(!link.is_up());
        let (_tx, mut rx) = watch::channel(false);

        let start = tokio::time::Instant::now();
        let requirement = LinkRequirement::for_broker_host("localhost");
        tokio::time::timeout(
            Duration::from_secs(3600),
            wait_for_link(&link, requirement, Duration::from_millis(500), &mut rx),
        )
        .await
        .expect("wait should return at once")
        .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_host_needs_no_default_gateway() {
        let file = route_file(SUBNET_ONLY);
        let link = HostNetworkLink::with_route_table(file.path());
        let (_tx, mut rx) = watch::channel(false);

        let requirement = LinkRequirement::for_broker_host("192.168.1.10");
        tokio::time::timeout(
            Duration::from_secs(3600),
            wait_for_link(&link, requirement, Duration::from_millis(500), &mut rx),
        )
        .await
        .expect("wait should return at once")
        .unwrap();

        // A gateway broker on the same host keeps waiting
        let requirement = LinkRequirement::for_broker_host("gateway");
        let waited = tokio::time::timeout(
            Duration::from_secs(3600),
            wait_for_link(&link, requirement, Duration::from_millis(500), &mut rx),
        )
        .await;
        assert!(waited.is_err());
    }
}
