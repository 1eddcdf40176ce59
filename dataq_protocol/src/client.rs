use crate::protocol::{CommandCode, ProtocolError, START_SYNC_ARGS};
use crate::stream::{self, SampleBatch};
use crate::transport::{local_ip_for, SessionContext, SessionTransport};
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;

/// Role requested at connect time. Its effect is defined by the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ConnectMode {
    Slave = 0,
    Master = 1,
    #[default]
    Standalone = 2,
}

impl TryFrom<u32> for ConnectMode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectMode::Slave),
            1 => Ok(ConnectMode::Master),
            2 => Ok(ConnectMode::Standalone),
            other => Err(other),
        }
    }
}

/// Session lifecycle as seen from the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Configured,
    Streaming,
    Stopped,
    Disconnected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connected => "connected",
            SessionState::Configured => "configured",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
            SessionState::Disconnected => "disconnected",
        }
    }

    fn is_open(&self) -> bool {
        matches!(
            self,
            SessionState::Connected
                | SessionState::Configured
                | SessionState::Streaming
                | SessionState::Stopped
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `info` index of the model string
pub const INFO_MODEL: u32 = 1;
/// `info` index of the serial number
pub const INFO_SERIAL_NUMBER: u32 = 6;

/// Named device commands on top of a [`SessionTransport`]
pub struct DaqClient {
    transport: SessionTransport,
    state: SessionState,
    /// A connect went out but its reply never came back, so the device may
    /// hold a session we do not know about
    connect_unconfirmed: bool,
}

impl DaqClient {
    pub fn new(transport: SessionTransport) -> Self {
        Self {
            transport,
            state: SessionState::Idle,
            connect_unconfirmed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        self.transport.context()
    }

    /// Open the device-side session. The payload carries our own IP so the
    /// device knows where to stream to.
    pub fn connect(&mut self, local_port: u16, mode: ConnectMode) -> Result<String, ProtocolError> {
        if !matches!(self.state, SessionState::Idle | SessionState::Disconnected) {
            return Err(self.invalid("connect"));
        }

        let local_ip = local_ip_for(self.context().remote.host)?;
        info!(
            "📡 Connecting to {} as {:?} (local {}:{})",
            self.context().remote,
            mode,
            local_ip,
            local_port
        );

        self.connect_unconfirmed = true;
        let reply = self.transport.request(
            CommandCode::Connect,
            [local_port as u32, mode as u32, 0],
            &local_ip.to_string(),
        )?;

        self.connect_unconfirmed = false;
        self.state = SessionState::Connected;
        info!("✅ Connected to device: {}", reply.payload);
        Ok(reply.payload)
    }

    /// Release the device-side session. Returns `None` when there is nothing
    /// to release: no session is open and no connect is left unanswered.
    pub fn disconnect(&mut self) -> Result<Option<String>, ProtocolError> {
        if !self.state.is_open() && !self.connect_unconfirmed {
            debug!("Disconnect while {}, nothing to release", self.state);
            self.state = SessionState::Disconnected;
            return Ok(None);
        }
        if self.connect_unconfirmed {
            warn!("⚠️ Connect was never confirmed, releasing the session anyway");
        }

        // The session is gone from our side whatever the device answers
        self.state = SessionState::Disconnected;
        self.connect_unconfirmed = false;
        let reply = self
            .transport
            .request(CommandCode::Disconnect, [0; 3], "")?;

        info!("👋 Disconnected from device: {}", reply.payload);
        Ok(Some(reply.payload))
    }

    pub fn configure_scan_list(
        &mut self,
        index: u32,
        channel_spec: &str,
    ) -> Result<String, ProtocolError> {
        self.configure(&format!("slist {} {}", index, channel_spec))
    }

    pub fn set_sample_rate(&mut self, rate: u32) -> Result<String, ProtocolError> {
        self.configure(&format!("srate {}", rate))
    }

    /// `channel_selector` is a channel number or `*` for all channels
    pub fn set_filter(&mut self, channel_selector: &str, mode: u32) -> Result<String, ProtocolError> {
        self.configure(&format!("filter {} {}", channel_selector, mode))
    }

    pub fn set_decimation(&mut self, value: u32) -> Result<String, ProtocolError> {
        self.configure(&format!("dec {}", value))
    }

    pub fn set_decimation_averaging(&mut self, value: u32) -> Result<String, ProtocolError> {
        self.configure(&format!("deca {}", value))
    }

    pub fn set_packet_size(&mut self, size_index: u32) -> Result<String, ProtocolError> {
        self.configure(&format!("ps {}", size_index))
    }

    pub fn get_info(&mut self, index: u32) -> Result<String, ProtocolError> {
        self.configuration_command("get info", &format!("info {}", index))
    }

    pub fn get_model(&mut self) -> Result<String, ProtocolError> {
        self.get_info(INFO_MODEL)
    }

    pub fn get_serial_number(&mut self) -> Result<String, ProtocolError> {
        self.get_info(INFO_SERIAL_NUMBER)
    }

    /// Tell the device to start pushing sample datagrams. No reply is awaited.
    pub fn start_sync(&mut self) -> Result<(), ProtocolError> {
        if !matches!(self.state, SessionState::Configured | SessionState::Stopped) {
            return Err(self.invalid("start streaming"));
        }

        self.transport
            .send_only(CommandCode::StartSync, START_SYNC_ARGS, "")?;
        self.state = SessionState::Streaming;
        info!("▶️ Streaming started");
        Ok(())
    }

    /// With a setting, reconfigure the device keep-alive timeout and return
    /// its reply. Without one, send the periodic ping.
    pub fn keep_alive(&mut self, setting: Option<u32>) -> Result<Option<String>, ProtocolError> {
        match setting {
            Some(setting) => self
                .configuration_command("set keep-alive", &format!("keepalive {}", setting))
                .map(Some),
            None => {
                if !self.state.is_open() {
                    return Err(self.invalid("send keep-alive"));
                }
                self.transport
                    .send_only(CommandCode::KeepAlive, [0; 3], "KeepAlive")?;
                Ok(None)
            }
        }
    }

    pub fn stop_acquisition(&mut self) -> Result<String, ProtocolError> {
        let reply = self.configuration_command("stop acquisition", "stop")?;
        if self.state == SessionState::Streaming {
            self.state = SessionState::Stopped;
            info!("⏹️ Streaming stopped: {}", reply);
        }
        Ok(reply)
    }

    /// Wait for the next streamed datagram and decode it
    pub fn read_batch(&mut self) -> Result<SampleBatch, ProtocolError> {
        let timeout = self.context().read_timeout;
        self.read_batch_within(timeout)
    }

    /// Like [`read_batch`](Self::read_batch) but waits at most `timeout`
    pub fn read_batch_within(&mut self, timeout: Duration) -> Result<SampleBatch, ProtocolError> {
        if self.state != SessionState::Streaming {
            warn!("⚠️ Reading samples while {}", self.state);
        }

        let datagram = self.transport.receive_raw_within(timeout)?;
        let batch = stream::decode(datagram)?;
        debug!(
            "📥 Batch {} ({} samples, cumulative {})",
            batch.order,
            batch.samples.len(),
            batch.cumulative_count
        );
        Ok(batch)
    }

    /// Release the session socket. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Scan-list, rate and filter commands move a fresh session to `Configured`
    fn configure(&mut self, text: &str) -> Result<String, ProtocolError> {
        let reply = self.configuration_command("configure", text)?;
        if self.state == SessionState::Connected {
            self.state = SessionState::Configured;
        }
        Ok(reply)
    }

    fn configuration_command(
        &mut self,
        operation: &'static str,
        text: &str,
    ) -> Result<String, ProtocolError> {
        if !self.state.is_open() {
            return Err(self.invalid(operation));
        }

        let reply = self
            .transport
            .request(CommandCode::Configure, [0; 3], text)?;
        Ok(reply.payload)
    }

    fn invalid(&self, operation: &'static str) -> ProtocolError {
        ProtocolError::InvalidState {
            operation,
            state: self.state.as_str(),
        }
    }
}
