//! Receiver reconnect and stop behaviour against an absent or late server

mod common;

use std::net::TcpListener;
use std::time::{Duration, Instant};

use common::{free_tcp_port, link_config, wait_for};
use mpx_link::network::{ConnectionState, StreamReceiver};
use mpx_link::protocol::Protocol;

#[test]
fn test_receiver_keeps_retrying_and_stops_promptly() {
    let receiver = StreamReceiver::new(link_config(Protocol::Tcp, free_tcp_port())).unwrap();
    receiver.start().unwrap();

    wait_for(|| receiver.reconnect_count() >= 1);
    assert!(receiver.is_running());
    assert_ne!(receiver.state(), ConnectionState::Connected);

    let started = Instant::now();
    receiver.stop();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!receiver.is_running());
    assert_eq!(receiver.state(), ConnectionState::Idle);
}

#[test]
fn test_receiver_without_auto_reconnect_gives_up() {
    let mut config = link_config(Protocol::Tcp, free_tcp_port());
    config.network.auto_reconnect = false;
    let receiver = StreamReceiver::new(config).unwrap();
    receiver.start().unwrap();

    wait_for(|| !receiver.is_running());
    assert_eq!(receiver.state(), ConnectionState::Idle);
    assert_eq!(receiver.reconnect_count(), 0);
    receiver.stop();
}

#[test]
fn test_receiver_connects_once_server_appears() {
    let port = free_tcp_port();
    let receiver = StreamReceiver::new(link_config(Protocol::Tcp, port)).unwrap();
    let events = receiver.events();
    receiver.start().unwrap();

    wait_for(|| receiver.reconnect_count() >= 1);
    let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
    let (_stream, _) = listener.accept().unwrap();

    wait_for(|| receiver.state() == ConnectionState::Connected);
    let saw_error = events
        .try_iter()
        .any(|e| matches!(e, mpx_link::network::ConnectionEvent::Error(_)));
    assert!(saw_error);
    receiver.stop();
}

#[test]
fn test_restart_after_stop() {
    let mut config = link_config(Protocol::Tcp, free_tcp_port());
    config.network.auto_reconnect = false;
    let receiver = StreamReceiver::new(config).unwrap();

    receiver.start().unwrap();
    wait_for(|| !receiver.is_running());
    receiver.stop();

    receiver.start().unwrap();
    wait_for(|| !receiver.is_running());
    receiver.stop();
    assert_eq!(receiver.state(), ConnectionState::Idle);
}
