use crate::discovery::DeviceAddress;
use crate::protocol::{
    frame_magic, CommandCode, CommandMessage, ProtocolError, ResponseMessage, DEFAULT_LOCAL_PORT,
    DEFAULT_SESSION_ID, DQ_ADCDATA, MAX_DATAGRAM_SIZE,
};
use log::{debug, info};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Settings applied when the session socket is bound
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub local_port: u16,
    pub read_timeout: Duration,
    pub session_id: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            local_port: DEFAULT_LOCAL_PORT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            session_id: DEFAULT_SESSION_ID,
        }
    }
}

/// Everything that identifies one session on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: u32,
    pub local: SocketAddr,
    pub remote: DeviceAddress,
    pub read_timeout: Duration,
}

/// Local address the OS would route through to reach `remote`.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn local_ip_for(remote: IpAddr) -> io::Result<IpAddr> {
    let unspecified: IpAddr = match remote {
        IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        IpAddr::V6(_) => std::net::Ipv6Addr::UNSPECIFIED.into(),
    };
    let probe = UdpSocket::bind((unspecified, 0))?;
    probe.connect((remote, 1))?;
    Ok(probe.local_addr()?.ip())
}

/// Owns the session socket. Control replies and stream data share it.
///
/// Every method that touches the socket takes `&mut self`, so at most one
/// request is ever in flight.
pub struct SessionTransport {
    socket: Option<UdpSocket>,
    context: SessionContext,
    recv_buffer: Vec<u8>,
}

impl SessionTransport {
    pub fn bind(remote: DeviceAddress, config: &TransportConfig) -> Result<Self, ProtocolError> {
        if config.read_timeout.is_zero() {
            return Err(ProtocolError::ZeroTimeout);
        }
        let local_ip = local_ip_for(remote.host)?;
        let socket = UdpSocket::bind((local_ip, config.local_port))?;
        socket.set_read_timeout(Some(config.read_timeout))?;

        let context = SessionContext {
            session_id: config.session_id,
            local: socket.local_addr()?,
            remote,
            read_timeout: config.read_timeout,
        };

        info!(
            "🔌 Session socket bound on {} for device {}",
            context.local, context.remote
        );

        Ok(Self {
            socket: Some(socket),
            context,
            recv_buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    /// Send a command and block for its reply.
    ///
    /// Anything already queued on the socket (late replies to earlier
    /// requests, stream data) is discarded first. Stream datagrams that
    /// arrive while waiting are dropped; they count against the same read
    /// timeout.
    pub fn request(
        &mut self,
        command: CommandCode,
        args: [u32; 3],
        payload: &str,
    ) -> Result<ResponseMessage, ProtocolError> {
        self.drain_pending()?;
        self.send_only(command, args, payload)?;

        let deadline = Instant::now() + self.context.read_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProtocolError::Timeout {
                    timeout: self.context.read_timeout,
                });
            }

            let len = match self.recv_within(remaining) {
                Err(ProtocolError::Timeout { .. }) => continue,
                other => other?,
            };
            let datagram = &self.recv_buffer[..len];

            if frame_magic(datagram) == Some(DQ_ADCDATA) {
                debug!("🔄 Dropping stream datagram while awaiting {:?} reply", command);
                continue;
            }

            let response = ResponseMessage::from_bytes(datagram)?;
            debug!("📥 {:?} reply: {:?}", command, response.payload);
            return Ok(response);
        }
    }

    /// Send a command without waiting for anything back
    pub fn send_only(
        &mut self,
        command: CommandCode,
        args: [u32; 3],
        payload: &str,
    ) -> Result<(), ProtocolError> {
        let message = CommandMessage::new(self.context.session_id, command, args, payload);
        let bytes = message.to_bytes()?;
        let socket = self.socket.as_ref().ok_or(ProtocolError::Closed)?;

        debug!("📤 {:?} {:?} {:?}", command, args, payload);
        socket.send_to(&bytes, self.context.remote.socket_addr())?;
        Ok(())
    }

    /// Next datagram of any kind, within the configured read timeout
    pub fn receive_raw(&mut self) -> Result<&[u8], ProtocolError> {
        self.receive_raw_within(self.context.read_timeout)
    }

    /// Next datagram of any kind, waiting at most `timeout`. A zero wait
    /// times out immediately.
    pub fn receive_raw_within(&mut self, timeout: Duration) -> Result<&[u8], ProtocolError> {
        let len = self.recv_within(timeout)?;
        Ok(&self.recv_buffer[..len])
    }

    /// Release the socket. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            info!("🔌 Session socket on {} closed", self.context.local);
        }
    }

    /// Discard every datagram already queued, returning how many were dropped
    fn drain_pending(&mut self) -> Result<usize, ProtocolError> {
        let socket = self.socket.as_ref().ok_or(ProtocolError::Closed)?;
        socket.set_nonblocking(true)?;

        let mut dropped = 0;
        let result = loop {
            match socket.recv_from(&mut self.recv_buffer) {
                Ok((len, from)) => {
                    debug!(
                        "🗑️ Dropping stale datagram of {} bytes from {} (magic {:?})",
                        len,
                        from,
                        frame_magic(&self.recv_buffer[..len])
                    );
                    dropped += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(dropped),
                Err(e) => break Err(ProtocolError::Io(e)),
            }
        };

        socket.set_nonblocking(false)?;
        result
    }

    fn recv_within(&mut self, timeout: Duration) -> Result<usize, ProtocolError> {
        let socket = self.socket.as_ref().ok_or(ProtocolError::Closed)?;
        // The OS rejects a zero read timeout
        if timeout.is_zero() {
            return Err(ProtocolError::Timeout { timeout });
        }
        socket.set_read_timeout(Some(timeout))?;

        let result = socket.recv_from(&mut self.recv_buffer);
        match result {
            Ok((len, from)) => {
                if from != self.context.remote.socket_addr() {
                    debug!("Datagram of {} bytes from {}", len, from);
                }
                Ok(len)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Err(ProtocolError::Timeout { timeout })
            }
            Err(e) => Err(ProtocolError::Io(e)),
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close();
    }
}
