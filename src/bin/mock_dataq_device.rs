use clap::Parser;
use dataq_edge::mock_device::{MockDevice, MockDeviceConfig};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "mock_dataq_device")]
#[command(about = "Simulated DATAQ device that streams synthetic samples for testing")]
struct Args {
    /// Address to bind the command socket to
    #[arg(short, long, default_value = "127.0.0.1:51235")]
    address: String,

    /// Address to answer discovery probes on
    #[arg(long)]
    discovery_address: Option<String>,

    /// Milliseconds between stream datagrams
    #[arg(long, default_value = "20", value_parser = clap::value_parser!(u64).range(1..))]
    stream_interval_ms: u64,

    /// Samples per stream datagram
    #[arg(long, default_value = "16")]
    samples_per_packet: usize,

    /// Seconds without keep-alive before streaming stops
    #[arg(long, default_value = "5")]
    keep_alive_timeout: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    info!("🚀 Starting mock device with args: {:?}", args);

    let handle = MockDevice::start(MockDeviceConfig {
        bind_address: args.address,
        discovery_address: args.discovery_address,
        stream_interval: Duration::from_millis(args.stream_interval_ms),
        samples_per_packet: args.samples_per_packet,
        keep_alive_timeout: Duration::from_secs(args.keep_alive_timeout),
        ..Default::default()
    })?;
    info!("🧪 Mock device serving on {}", handle.address);

    // Handle Ctrl+C gracefully
    let should_stop = Arc::new(AtomicBool::new(false));
    let should_stop_clone = should_stop.clone();
    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, shutting down...");
        should_stop_clone.store(true, Ordering::Relaxed);
    })?;

    // Wait for shutdown signal
    while !should_stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    drop(handle);
    info!("🛑 Mock device stopped");

    Ok(())
}
