//! Discovery handshake against a responder on localhost

use dataq_protocol::{discover_with, DiscoveryConfig, ProtocolError, DEFAULT_DEVICE_PORT};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

fn local_config(discovery_port: u16) -> DiscoveryConfig {
    DiscoveryConfig {
        target: Ipv4Addr::LOCALHOST,
        discovery_port,
        reply_port: 0,
        ..Default::default()
    }
}

#[test]
fn test_discover_finds_responder() {
    env_logger::try_init().ok();

    let responder = UdpSocket::bind("127.0.0.1:0").unwrap();
    responder
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let port = responder.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 256];
        let (len, from) = responder.recv_from(&mut buf).unwrap();
        let probe = String::from_utf8(buf[..len].to_vec()).unwrap();

        let (tag, reply_port) = probe.split_once(' ').unwrap();
        let reply_port: u16 = reply_port.parse().unwrap();
        responder
            .send_to(b"4208 5D1234 1.0", SocketAddr::new(from.ip(), reply_port))
            .unwrap();
        tag.to_string()
    });

    let device = discover_with(&local_config(port), Duration::from_secs(2)).unwrap();
    assert!(device.host.is_loopback());
    assert_eq!(device.port, DEFAULT_DEVICE_PORT);
    assert_eq!(handle.join().unwrap(), "dataq_instruments");
}

#[test]
fn test_discover_without_responder_times_out() {
    env_logger::try_init().ok();

    // Reserve a port and release it so nothing is listening there
    let port = {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().port()
    };

    let timeout = Duration::from_millis(300);
    let started = Instant::now();
    let result = discover_with(&local_config(port), timeout);
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(ProtocolError::NotFound { .. })));
    assert!(elapsed >= Duration::from_millis(250), "returned too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "took too long: {:?}", elapsed);
}

#[test]
fn test_discover_zero_timeout_is_not_found() {
    let started = Instant::now();
    let result = discover_with(&local_config(9), Duration::ZERO);

    assert!(
        matches!(result, Err(ProtocolError::NotFound { timeout }) if timeout.is_zero()),
        "Expected NotFound, got {:?}",
        result
    );
    assert!(started.elapsed() < Duration::from_millis(250));
}
