//! # DATAQ Protocol
//!
//! UDP command protocol and sample stream decoder for DATAQ Ethernet
//! data-acquisition devices.
//!
//! This crate provides:
//! - Wire codec for command, reply and stream frames
//! - Broadcast discovery of devices on the local network
//! - A session transport with blocking request/reply over one socket
//! - A command façade with session state tracking
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use dataq_protocol::{discover, ConnectMode, DaqClient, SessionTransport, TransportConfig};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = discover(Duration::from_secs(2))?;
//! let transport = SessionTransport::bind(device, &TransportConfig::default())?;
//! let mut client = DaqClient::new(transport);
//!
//! client.connect(0, ConnectMode::Standalone)?;
//! println!("Model: {}", client.get_model()?);
//! client.configure_scan_list(0, "0")?;
//! client.set_sample_rate(30000)?;
//! client.start_sync()?;
//!
//! for _ in 0..10 {
//!     let batch = client.read_batch()?;
//!     println!("Batch {}: {:?}", batch.order, batch.samples);
//!     client.keep_alive(None)?;
//! }
//!
//! client.stop_acquisition()?;
//! client.disconnect()?;
//! client.close();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod discovery;
pub mod protocol;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use client::{ConnectMode, DaqClient, SessionState};
pub use discovery::{discover, discover_with, DeviceAddress, DiscoveryConfig};
pub use protocol::{
    CommandCode, CommandMessage, FrameError, ProtocolError, ResponseMessage, DEFAULT_DEVICE_PORT,
    DEFAULT_LOCAL_PORT, DEFAULT_SESSION_ID,
};
pub use stream::{SampleBatch, SequenceGap, SequenceTracker};
pub use transport::{SessionContext, SessionTransport, TransportConfig};
