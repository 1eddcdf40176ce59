//! Full sessions against the simulated device
//!
//! Each test starts its own MockDevice on a random localhost port, so the
//! tests do not share any sockets.

use crossbeam_channel::unbounded;
use dataq_edge::acquisition::{self, AcquisitionReport};
use dataq_edge::config::AcquisitionConfig;
use dataq_edge::DaqError;
use dataq_edge::mock_device::{MockDevice, MockDeviceConfig, MockDeviceHandle};
use dataq_protocol::{
    discover_with, CommandCode, CommandMessage, DiscoveryConfig, ProtocolError, SessionState,
};
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn start_device(config: MockDeviceConfig) -> MockDeviceHandle {
    MockDevice::start(config).expect("Failed to start mock device")
}

fn session_config(device: &MockDeviceHandle) -> AcquisitionConfig {
    AcquisitionConfig {
        address: Some(device.address.ip()),
        device_port: device.address.port(),
        local_port: 0,
        request_timeout_ms: 500,
        keep_alive_interval_ms: 100,
        scan_list: vec!["0".to_string(), "1".to_string()],
        ..Default::default()
    }
}

fn payloads(device: &MockDeviceHandle, code: CommandCode) -> Vec<String> {
    device
        .received_commands()
        .into_iter()
        .filter(|command| command.command_code() == Some(code))
        .map(|command| command.payload)
        .collect()
}

#[test]
fn test_full_acquisition_session() {
    env_logger::try_init().ok();

    let device = start_device(MockDeviceConfig::default());
    let config = session_config(&device);
    let (sink, batches) = unbounded();
    let stop = AtomicBool::new(false);

    let report = acquisition::acquire(&config, &sink, &stop, Some(20)).unwrap();
    drop(sink);

    let received: Vec<_> = batches.iter().collect();
    assert_eq!(report.batches, 20);
    assert_eq!(received.len(), 20);
    assert_eq!(report.samples, 20 * 16);
    assert_eq!(report.malformed, 0);

    // Batches arrive in order with consistent cumulative counts
    for pair in received.windows(2) {
        assert_eq!(pair[1].cumulative_count, pair[0].cumulative_count + 16);
        assert_eq!(pair[1].order, pair[0].order + 1);
    }
    assert!(received.iter().all(|batch| batch.group_id == 0x12345678));

    let configure = payloads(&device, CommandCode::Configure);
    assert_eq!(
        configure,
        vec![
            "info 1", "info 6", "dec 500", "deca 4", "srate 30000", "slist 0 0", "slist 1 1",
            "filter * 1", "ps 0", "stop",
        ]
    );
    assert_eq!(payloads(&device, CommandCode::Connect), vec!["127.0.0.1"]);
    assert_eq!(payloads(&device, CommandCode::Disconnect).len(), 1);
    assert_eq!(payloads(&device, CommandCode::StartSync).len(), 1);
}

#[test]
fn test_stop_flag_ends_acquisition() {
    env_logger::try_init().ok();

    let device = start_device(MockDeviceConfig::default());
    let config = session_config(&device);
    let (sink, batches) = unbounded();
    let stop = Arc::new(AtomicBool::new(false));

    let stopper = {
        let stop = stop.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(400));
            stop.store(true, Ordering::Relaxed);
        })
    };

    let report = acquisition::acquire(&config, &sink, &stop, None).unwrap();
    stopper.join().unwrap();
    drop(sink);

    assert!(report.batches > 0);
    assert_eq!(batches.iter().count() as u64, report.batches);

    // Keep-alive pings were sent while streaming
    let pings = payloads(&device, CommandCode::KeepAlive);
    assert!(!pings.is_empty());
    assert!(pings.iter().all(|payload| payload == "KeepAlive"));
}

#[test]
fn test_keep_alive_cadence_holds_without_data() {
    env_logger::try_init().ok();

    // One packet right after start, then silence
    let device = start_device(MockDeviceConfig {
        stream_interval: Duration::from_secs(60),
        ..Default::default()
    });
    let config = AcquisitionConfig {
        request_timeout_ms: 2000,
        keep_alive_interval_ms: 100,
        ..session_config(&device)
    };
    let (sink, _batches) = unbounded();
    let stop = Arc::new(AtomicBool::new(false));

    let stopper = {
        let stop = stop.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(700));
            stop.store(true, Ordering::Relaxed);
        })
    };

    let started = Instant::now();
    let report = acquisition::acquire(&config, &sink, &stop, None).unwrap();
    stopper.join().unwrap();

    assert_eq!(report.batches, 1);
    assert!(
        started.elapsed() < Duration::from_millis(1800),
        "Stop flag was not seen between pings: {:?}",
        started.elapsed()
    );
    let pings = payloads(&device, CommandCode::KeepAlive).len();
    assert!(pings >= 4, "Only {} pings in 700ms at a 100ms interval", pings);
}

#[test]
fn test_failed_connect_still_releases_session() {
    env_logger::try_init().ok();

    // A device that swallows every command without answering
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    silent
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let addr = silent.local_addr().unwrap();
    let listener = thread::spawn(move || {
        let mut buf = [0u8; 2048];
        let mut codes = Vec::new();
        while let Ok((len, _)) = silent.recv_from(&mut buf) {
            codes.push(CommandMessage::from_bytes(&buf[..len]).unwrap().command);
            if codes.len() == 2 {
                break;
            }
        }
        codes
    });

    let config = AcquisitionConfig {
        address: Some(addr.ip()),
        device_port: addr.port(),
        local_port: 0,
        request_timeout_ms: 150,
        ..Default::default()
    };
    let err = acquisition::open_session(&config).err().unwrap();
    assert!(
        matches!(err, DaqError::Protocol(ref e) if e.is_timeout()),
        "Expected timeout, got {:?}",
        err
    );

    let codes = listener.join().unwrap();
    assert_eq!(
        codes,
        vec![CommandCode::Connect as u32, CommandCode::Disconnect as u32]
    );
}

#[test]
fn test_consumer_hangup_ends_acquisition() {
    let device = start_device(MockDeviceConfig::default());
    let config = session_config(&device);
    let (sink, batches) = unbounded();
    drop(batches);

    let stop = AtomicBool::new(false);
    let report = acquisition::acquire(&config, &sink, &stop, None).unwrap();

    assert_eq!(
        report,
        AcquisitionReport {
            batches: 1,
            samples: 16,
            malformed: 0,
            gaps: 0
        }
    );
    assert_eq!(payloads(&device, CommandCode::Disconnect).len(), 1);
}

#[test]
fn test_state_machine_and_repeated_cleanup() {
    env_logger::try_init().ok();

    let device = start_device(MockDeviceConfig::default());
    let config = session_config(&device);
    let mut client = acquisition::open_session(&config).unwrap();
    assert_eq!(client.state(), SessionState::Connected);

    assert!(matches!(
        client.start_sync(),
        Err(ProtocolError::InvalidState { .. })
    ));

    assert_eq!(client.get_model().unwrap(), "4208");
    assert_eq!(client.get_serial_number().unwrap(), "5D1234AB");
    assert_eq!(client.state(), SessionState::Connected);

    assert_eq!(client.set_sample_rate(1000).unwrap(), "srate 1000");
    assert_eq!(client.state(), SessionState::Configured);

    assert_eq!(client.keep_alive(Some(3000)).unwrap().as_deref(), Some("keepalive 3000"));

    client.start_sync().unwrap();
    assert_eq!(client.state(), SessionState::Streaming);
    let batch = client.read_batch().unwrap();
    assert_eq!(batch.samples.len(), 16);

    assert_eq!(client.stop_acquisition().unwrap(), "stop");
    assert_eq!(client.state(), SessionState::Stopped);

    assert_eq!(client.disconnect().unwrap().as_deref(), Some("disconnect"));
    assert_eq!(client.disconnect().unwrap(), None);
    assert_eq!(client.state(), SessionState::Disconnected);

    client.close();
    client.close();

    // Best-effort cleanup after everything is already torn down
    acquisition::shutdown(&mut client);
}

#[test]
fn test_streaming_stops_without_keep_alive() {
    env_logger::try_init().ok();

    let device = start_device(MockDeviceConfig {
        keep_alive_timeout: Duration::from_millis(150),
        ..Default::default()
    });
    let config = AcquisitionConfig {
        request_timeout_ms: 300,
        ..session_config(&device)
    };
    let mut client = acquisition::open_session(&config).unwrap();
    client.set_sample_rate(1000).unwrap();
    client.start_sync().unwrap();

    // Drain until the device gives up on us
    let mut received = 0;
    let err = loop {
        match client.read_batch() {
            Ok(_) => received += 1,
            Err(e) => break e,
        }
        assert!(received < 1000, "device never stopped streaming");
    };

    assert!(err.is_timeout(), "Expected timeout, got {:?}", err);
    assert!(received > 0);
    acquisition::shutdown(&mut client);
}

#[test]
fn test_discovery_against_mock_device() {
    env_logger::try_init().ok();

    let device = start_device(MockDeviceConfig {
        discovery_address: Some("127.0.0.1:0".to_string()),
        ..Default::default()
    });
    let discovery_port = device.discovery_address.unwrap().port();

    let found = discover_with(
        &DiscoveryConfig {
            target: Ipv4Addr::LOCALHOST,
            discovery_port,
            reply_port: 0,
            ..Default::default()
        },
        Duration::from_secs(2),
    )
    .unwrap();

    assert_eq!(found.host, device.address.ip());
}
