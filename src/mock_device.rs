use dataq_protocol::{CommandCode, CommandMessage, ResponseMessage, SampleBatch};
use log::{debug, error, info, warn};
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Configuration for the simulated device
#[derive(Debug, Clone)]
pub struct MockDeviceConfig {
    /// Address the command socket binds to (use "127.0.0.1:0" for a random port)
    pub bind_address: String,
    /// Address the discovery responder binds to, if any
    pub discovery_address: Option<String>,
    pub model: String,
    pub serial_number: String,
    /// Time between two stream datagrams
    pub stream_interval: Duration,
    pub samples_per_packet: usize,
    /// Streaming stops when no keep-alive ping arrives within this window
    pub keep_alive_timeout: Duration,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            discovery_address: None,
            model: "4208".to_string(),
            serial_number: "5D1234AB".to_string(),
            stream_interval: Duration::from_millis(20),
            samples_per_packet: 16,
            keep_alive_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct DeviceState {
    session_id: u32,
    stream_to: Option<SocketAddr>,
    streaming: bool,
    order: u32,
    cumulative: u32,
    last_keep_alive: Instant,
    next_packet: Instant,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            session_id: 0,
            stream_to: None,
            streaming: false,
            order: 0,
            cumulative: 0,
            last_keep_alive: Instant::now(),
            next_packet: Instant::now(),
        }
    }
}

/// Simulated device obeying the command grammar over UDP
pub struct MockDevice;

impl MockDevice {
    /// Bind the sockets and serve in background threads until the handle is dropped
    pub fn start(config: MockDeviceConfig) -> io::Result<MockDeviceHandle> {
        let socket = UdpSocket::bind(&config.bind_address)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let address = socket.local_addr()?;

        let should_stop = Arc::new(AtomicBool::new(false));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let mut threads = Vec::new();

        let discovery_address = match &config.discovery_address {
            Some(bind) => {
                let discovery = UdpSocket::bind(bind)?;
                discovery.set_read_timeout(Some(POLL_INTERVAL))?;
                let local = discovery.local_addr()?;
                let reply = format!("{} {}", config.model, config.serial_number);
                let should_stop = should_stop.clone();
                threads.push(thread::spawn(move || {
                    Self::serve_discovery(discovery, reply, should_stop)
                }));
                Some(local)
            }
            None => None,
        };

        info!("🧪 Mock device listening on {}", address);

        {
            let should_stop = should_stop.clone();
            let commands = commands.clone();
            threads.push(thread::spawn(move || {
                Self::serve_commands(socket, config, commands, should_stop)
            }));
        }

        Ok(MockDeviceHandle {
            address,
            discovery_address,
            commands,
            should_stop,
            threads,
        })
    }

    fn serve_discovery(socket: UdpSocket, reply: String, should_stop: Arc<AtomicBool>) {
        let mut buf = [0u8; 256];
        while !should_stop.load(Ordering::Relaxed) {
            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    error!("Discovery socket error: {}", e);
                    break;
                }
            };

            let probe = String::from_utf8_lossy(&buf[..len]);
            let Some(reply_port) = probe
                .split_whitespace()
                .nth(1)
                .and_then(|port| port.parse::<u16>().ok())
            else {
                warn!("Ignoring discovery probe {:?}", probe);
                continue;
            };

            debug!("Discovery probe {:?} from {}", probe, from);
            if let Err(e) = socket.send_to(reply.as_bytes(), (from.ip(), reply_port)) {
                warn!("Discovery reply failed: {}", e);
            }
        }
    }

    fn serve_commands(
        socket: UdpSocket,
        config: MockDeviceConfig,
        commands: Arc<Mutex<Vec<CommandMessage>>>,
        should_stop: Arc<AtomicBool>,
    ) {
        let mut state = DeviceState::new();
        let mut buf = [0u8; 2048];

        while !should_stop.load(Ordering::Relaxed) {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => match CommandMessage::from_bytes(&buf[..len]) {
                    Ok(command) => {
                        let reply = Self::handle_command(&command, from, &config, &mut state);
                        if let Ok(mut log) = commands.lock() {
                            log.push(command);
                        }
                        if let Some(reply) = reply {
                            if let Err(e) = socket.send_to(&reply.to_bytes(), from) {
                                warn!("Reply to {} failed: {}", from, e);
                            }
                        }
                    }
                    Err(e) => warn!("Ignoring datagram from {}: {}", from, e),
                },
                Err(e) if is_timeout(&e) => {}
                Err(e) => {
                    error!("Command socket error: {}", e);
                    break;
                }
            }

            Self::stream_tick(&socket, &config, &mut state);
        }

        info!("🛑 Mock device stopped");
    }

    fn handle_command(
        command: &CommandMessage,
        from: SocketAddr,
        config: &MockDeviceConfig,
        state: &mut DeviceState,
    ) -> Option<ResponseMessage> {
        let reply = |text: &str| Some(ResponseMessage::new(command.session_id, 0, text));

        match command.command_code() {
            Some(CommandCode::Connect) => {
                state.session_id = command.session_id;
                state.stream_to = match (command.args[0], command.payload.parse::<IpAddr>()) {
                    (0, _) | (_, Err(_)) => Some(from),
                    (port, Ok(ip)) => Some(SocketAddr::new(ip, port as u16)),
                };
                info!("🔗 Session {:#x} streams to {:?}", state.session_id, state.stream_to);
                reply("connect")
            }
            Some(CommandCode::Disconnect) => {
                state.streaming = false;
                state.stream_to = None;
                reply("disconnect")
            }
            Some(CommandCode::KeepAlive) => {
                state.last_keep_alive = Instant::now();
                None
            }
            Some(CommandCode::StartSync) => {
                if state.stream_to.is_some() {
                    state.streaming = true;
                    state.order = 0;
                    state.cumulative = 0;
                    state.last_keep_alive = Instant::now();
                    state.next_packet = Instant::now();
                    info!("▶️ Mock streaming started");
                } else {
                    warn!("start sync without a session");
                }
                None
            }
            Some(CommandCode::Configure) => {
                let mut words = command.payload.split_whitespace();
                match (words.next(), words.next()) {
                    (Some("info"), Some("1")) => reply(&config.model),
                    (Some("info"), Some("6")) => reply(&config.serial_number),
                    (Some("stop"), _) => {
                        state.streaming = false;
                        reply("stop")
                    }
                    _ => reply(&command.payload),
                }
            }
            None => {
                warn!("Unknown command code {}", command.command);
                None
            }
        }
    }

    fn stream_tick(socket: &UdpSocket, config: &MockDeviceConfig, state: &mut DeviceState) {
        if !state.streaming {
            return;
        }
        if state.last_keep_alive.elapsed() > config.keep_alive_timeout {
            warn!("⏰ Keep-alive lapsed, mock streaming stopped");
            state.streaming = false;
            return;
        }
        let Some(dest) = state.stream_to else {
            return;
        };

        while Instant::now() >= state.next_packet {
            let batch = SampleBatch {
                group_id: state.session_id,
                order: state.order,
                cumulative_count: state.cumulative,
                samples: (0..config.samples_per_packet as u32)
                    .map(|i| sawtooth(state.cumulative.wrapping_add(i)))
                    .collect(),
            };

            if let Err(e) = socket.send_to(&batch.to_bytes(), dest) {
                warn!("Stream send to {} failed: {}", dest, e);
            }

            state.order = state.order.wrapping_add(1);
            state.cumulative = state.cumulative.wrapping_add(batch.samples.len() as u32);
            state.next_packet += config.stream_interval;
        }
    }
}

fn sawtooth(index: u32) -> i16 {
    ((index.wrapping_mul(37) % 4096) as i16) - 2048
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Running simulator; stops its threads when dropped
pub struct MockDeviceHandle {
    pub address: SocketAddr,
    pub discovery_address: Option<SocketAddr>,
    commands: Arc<Mutex<Vec<CommandMessage>>>,
    should_stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl MockDeviceHandle {
    /// Every well-formed command received so far, in arrival order
    pub fn received_commands(&self) -> Vec<CommandMessage> {
        self.commands
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for MockDeviceHandle {
    fn drop(&mut self) {
        self.stop();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                error!("Mock device thread panicked");
            }
        }
    }
}
