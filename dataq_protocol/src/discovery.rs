use crate::protocol::{ProtocolError, DEFAULT_DEVICE_PORT};
use log::{debug, info};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// Tag the device firmware answers to
pub const PRODUCT_TAG: &str = "dataq_instruments";
/// Port devices listen on for discovery probes
pub const DISCOVERY_PORT: u16 = 1235;
/// Port discovery replies are sent back to
pub const DISCOVERY_REPLY_PORT: u16 = 1234;

/// Where a device can be reached once discovered or supplied explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddress {
    pub host: IpAddr,
    pub port: u16,
}

impl DeviceAddress {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Parameters of the broadcast discovery handshake
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub product_tag: String,
    pub target: Ipv4Addr,
    pub discovery_port: u16,
    /// Local port replies arrive on; 0 picks an ephemeral port
    pub reply_port: u16,
    /// Command port assigned to the discovered device
    pub device_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            product_tag: PRODUCT_TAG.to_string(),
            target: Ipv4Addr::BROADCAST,
            discovery_port: DISCOVERY_PORT,
            reply_port: DISCOVERY_REPLY_PORT,
            device_port: DEFAULT_DEVICE_PORT,
        }
    }
}

/// Broadcast a probe and wait for the first device to answer
pub fn discover(timeout: Duration) -> Result<DeviceAddress, ProtocolError> {
    discover_with(&DiscoveryConfig::default(), timeout)
}

pub fn discover_with(
    config: &DiscoveryConfig,
    timeout: Duration,
) -> Result<DeviceAddress, ProtocolError> {
    // Nothing can answer within no time at all
    if timeout.is_zero() {
        info!("🔍 Discovery skipped: zero timeout");
        return Err(ProtocolError::NotFound { timeout });
    }

    // Dropped on every return path
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.reply_port))?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(timeout))?;

    let reply_port = socket.local_addr()?.port();
    let probe = format!("{} {}", config.product_tag, reply_port);

    info!(
        "📡 Probing for devices on {}:{} (replies to port {})",
        config.target, config.discovery_port, reply_port
    );
    socket.send_to(probe.as_bytes(), (config.target, config.discovery_port))?;

    let started = Instant::now();
    let mut buf = [0u8; 1024];
    match socket.recv_from(&mut buf) {
        Ok((len, from)) => {
            debug!(
                "Discovery reply from {}: {:?}",
                from,
                String::from_utf8_lossy(&buf[..len])
            );
            info!("✅ Discovered device at {}", from.ip());
            Ok(DeviceAddress::new(from.ip(), config.device_port))
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            info!(
                "🔍 No device answered after {:?}",
                started.elapsed()
            );
            Err(ProtocolError::NotFound { timeout })
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}
