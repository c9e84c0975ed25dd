#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use mpx_link::config::AppConfig;
use mpx_link::protocol::Protocol;

pub fn free_tcp_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap()
}

pub fn free_udp_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .and_then(|s| s.local_addr())
        .map(|a| a.port())
        .unwrap()
}

pub fn link_config(protocol: Protocol, port: u16) -> AppConfig {
    let mut config = AppConfig::default();
    config.network.protocol = protocol;
    config.network.port = port;
    config.network.accept_timeout_ms = 100;
    config.network.reconnect_interval_secs = 1;
    config.network.connect_timeout_secs = 2;
    config.audio.sample_rate = 48000;
    config.audio.block_size = 512;
    config.control.enabled = false;
    config
}

pub fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached within 5s");
        thread::sleep(Duration::from_millis(10));
    }
}

/// Interleaved stereo ramp, distinct per block
pub fn stereo_pcm(block: usize, frames: usize) -> Vec<i16> {
    (0..frames * 2)
        .map(|i| ((block * 997 + i * 31) % 65536) as i32 - 32768)
        .map(|v| v as i16)
        .collect()
}
