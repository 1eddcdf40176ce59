use clap::Parser;
use crossbeam_channel::unbounded;
use dataq_edge::{acquisition, config::AcquisitionConfig, error::Result as DaqResult};
use log::{error, info};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Parser, Debug)]
#[command(name = "dataq-edge")]
#[command(about = "Stream raw ADC samples from a DATAQ Ethernet device")]
struct Args {
    /// Device IP address (discovered by broadcast when omitted)
    #[arg(short, long)]
    address: Option<IpAddr>,

    /// Device command port
    #[arg(short, long)]
    port: Option<u16>,

    /// Local port the session socket binds to
    #[arg(long)]
    local_port: Option<u16>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Discovery timeout in milliseconds
    #[arg(long)]
    discovery_timeout: Option<u64>,

    /// Sample rate passed to the device
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Stop after this many batches
    #[arg(long)]
    max_batches: Option<u64>,
}

impl Args {
    fn apply(&self, config: &mut AcquisitionConfig) {
        if self.address.is_some() {
            config.address = self.address;
        }
        if let Some(port) = self.port {
            config.device_port = port;
        }
        if let Some(port) = self.local_port {
            config.local_port = port;
        }
        if let Some(timeout) = self.discovery_timeout {
            config.discovery_timeout_ms = timeout;
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
    }
}

fn main() -> DaqResult<()> {
    env_logger::init();

    let args = Args::parse();
    info!("🚀 Starting dataq-edge with args: {:?}", args);

    let mut config = AcquisitionConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    // Handle Ctrl+C gracefully
    let should_stop = Arc::new(AtomicBool::new(false));
    let should_stop_clone = should_stop.clone();
    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, shutting down...");
        should_stop_clone.store(true, Ordering::Relaxed);
    })?;

    let (sink, batches) = unbounded::<dataq_protocol::SampleBatch>();
    let channels = config.scan_list.len();
    let printer = thread::spawn(move || {
        for batch in batches {
            println!(
                "#{} cumulative={} samples={}",
                batch.order,
                batch.cumulative_count,
                batch.samples.len()
            );
            for frame in batch.frames(channels) {
                println!("  {:?}", frame);
            }
        }
    });

    println!("Acquisition starting. Press Ctrl+C to stop.");
    let result = acquisition::acquire(&config, &sink, &should_stop, args.max_batches);

    drop(sink);
    if printer.join().is_err() {
        error!("❌ Sample printer thread panicked");
    }

    match result {
        Ok(report) => {
            info!(
                "📊 {} batches, {} samples, {} malformed, {} gaps",
                report.batches, report.samples, report.malformed, report.gaps
            );
            println!("Done.");
            Ok(())
        }
        Err(e) => {
            error!("❌ Acquisition ended with error: {}", e);
            Err(e)
        }
    }
}
