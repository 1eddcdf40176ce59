use crate::config::AcquisitionConfig;
use crate::error::Result;
use crossbeam_channel::Sender;
use dataq_protocol::{
    discover, DaqClient, DeviceAddress, SampleBatch, SequenceTracker, SessionTransport,
};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Counters collected over one streaming run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub batches: u64,
    pub samples: u64,
    pub malformed: u64,
    pub gaps: u64,
}

/// Resolve the device, bind the session socket and open the device-side session
pub fn open_session(config: &AcquisitionConfig) -> Result<DaqClient> {
    let device = match config.device_address() {
        Some(device) => device,
        None => DeviceAddress::new(
            discover(config.discovery_timeout())?.host,
            config.device_port,
        ),
    };

    let transport = SessionTransport::bind(device, &config.transport_config())?;
    let stream_port = transport.context().local.port();
    let mut client = DaqClient::new(transport);

    if let Err(e) = client.connect(stream_port, config.connect_mode()) {
        // The device may have opened the session even though we saw no reply
        if let Err(cleanup) = client.disconnect() {
            warn!("⚠️ Disconnect after failed connect: {}", cleanup);
        }
        client.close();
        return Err(e.into());
    }
    Ok(client)
}

/// Query identity and push the sampling configuration to the device
pub fn configure(client: &mut DaqClient, config: &AcquisitionConfig) -> Result<()> {
    info!("📋 Model: {}", client.get_model()?);
    info!("📋 Serial: {}", client.get_serial_number()?);

    info!("{}", client.set_decimation(config.decimation)?);
    info!("{}", client.set_decimation_averaging(config.decimation_averaging)?);
    info!("{}", client.set_sample_rate(config.sample_rate)?);

    for (index, channel_spec) in config.scan_list.iter().enumerate() {
        info!("{}", client.configure_scan_list(index as u32, channel_spec)?);
    }
    info!(
        "{}",
        client.set_filter(&config.filter_channel, config.filter_mode)?
    );
    info!("{}", client.set_packet_size(config.packet_size)?);

    if let Some(setting) = config.keep_alive_setting {
        if let Some(reply) = client.keep_alive(Some(setting))? {
            info!("{}", reply);
        }
    }

    Ok(())
}

/// Start streaming and forward every decoded batch to `sink` until `stop`
/// is raised, `max_batches` is reached, the consumer goes away, or an
/// unexpected error occurs.
pub fn run(
    client: &mut DaqClient,
    config: &AcquisitionConfig,
    sink: &Sender<SampleBatch>,
    stop: &AtomicBool,
    max_batches: Option<u64>,
) -> Result<AcquisitionReport> {
    let keep_alive_interval = config.keep_alive_interval();
    let mut report = AcquisitionReport::default();
    let mut tracker = SequenceTracker::new();

    client.start_sync()?;
    let mut last_ping = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        if max_batches.is_some_and(|max| report.batches >= max) {
            info!("🏁 Reached {} batches", report.batches);
            break;
        }

        // Never wait past the next keep-alive ping
        let until_ping = keep_alive_interval.saturating_sub(last_ping.elapsed());
        match client.read_batch_within(until_ping.min(config.request_timeout())) {
            Ok(batch) => {
                tracker.observe(&batch);
                report.batches += 1;
                report.samples += batch.samples.len() as u64;

                if sink.send(batch).is_err() {
                    info!("Sample consumer went away, ending acquisition");
                    break;
                }
            }
            Err(e) if e.is_timeout() => {
                debug!("No sample data within the read window");
            }
            Err(e) if e.is_malformed() => {
                report.malformed += 1;
                warn!("⚠️ Skipping datagram: {}", e);
            }
            Err(e) => {
                error!("❌ Acquisition failed: {}", e);
                return Err(e.into());
            }
        }

        if last_ping.elapsed() >= keep_alive_interval {
            client.keep_alive(None)?;
            last_ping = Instant::now();
        }
    }

    report.gaps = tracker.gaps();
    Ok(report)
}

/// Stop, disconnect and close. Each step is attempted even if an earlier one failed.
pub fn shutdown(client: &mut DaqClient) {
    info!("🧹 Stopping and cleaning up...");

    if let Err(e) = client.stop_acquisition() {
        warn!("⚠️ Stop failed: {}", e);
    }
    if let Err(e) = client.disconnect() {
        warn!("⚠️ Disconnect failed: {}", e);
    }
    client.close();

    info!("✅ Cleanup done");
}

/// Full session: open, configure, stream, then always clean up
pub fn acquire(
    config: &AcquisitionConfig,
    sink: &Sender<SampleBatch>,
    stop: &AtomicBool,
    max_batches: Option<u64>,
) -> Result<AcquisitionReport> {
    let mut client = open_session(config)?;

    let result = configure(&mut client, config)
        .and_then(|()| run(&mut client, config, sink, stop, max_batches));

    shutdown(&mut client);
    result
}
