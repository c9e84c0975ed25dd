//! End-to-end TCP loopback: framed, FEC-protected, encrypted PCM reaches the
//! receiver's jitter buffer bit-exact, with simulated packet drop.

mod common;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::net::TcpListener;
use std::time::{Duration, Instant};

use common::{free_tcp_port, link_config, stereo_pcm, wait_for};
use mpx_link::audio::{pcm, AudioBlock, BlockSink, BlockSource, SampleFormat};
use mpx_link::codec::{AudioCipher, FramingPipeline};
use mpx_link::network::{ConnectionState, StreamReceiver, StreamSender};
use mpx_link::protocol::{Packet, Protocol};

const FRAMES: usize = 512;
const BLOCKS: usize = 10;

#[test]
fn test_tcp_loopback_with_simulated_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = link_config(Protocol::Tcp, port);
    config.security.fec = true;
    config.security.encryption = true;
    config.security.password = "secret".into();

    let receiver = StreamReceiver::new(config).unwrap();
    receiver.start().unwrap();

    let (mut stream, _) = listener.accept().unwrap();
    let pipeline = FramingPipeline::new(true, Some(AudioCipher::from_password("secret")));
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut sent = Vec::new();
    for seq in 0..BLOCKS {
        let samples = stereo_pcm(seq, FRAMES);
        if rng.gen_bool(0.01) {
            continue;
        }
        let block = AudioBlock::from_i16(&samples, 2, 48000);
        let payload = pipeline.encode(&pcm::encode(&block, SampleFormat::I16)).unwrap();
        let packet = Packet::new(seq as u32, payload);
        stream.write_all(&packet.encode_tcp()).unwrap();
        sent.push((seq as u32, samples));
    }
    stream.flush().unwrap();
    assert!(sent.len() >= BLOCKS - 2);

    wait_for(|| receiver.stats().monitor.packets_received == sent.len() as u64);

    let first = sent.first().unwrap().0;
    let last = sent.last().unwrap().0;
    let expected_lost = (last - first + 1) as u64 - sent.len() as u64;

    let stats = receiver.stats();
    assert_eq!(stats.checksum_failures, 0);
    assert_eq!(stats.malformed_packets, 0);
    assert_eq!(stats.monitor.packets_lost, expected_lost);
    assert_eq!(stats.state, ConnectionState::Connected);

    for (_, samples) in &sent {
        assert_eq!(&receiver.pull_block(FRAMES).to_i16(), samples);
    }
    receiver.stop();
    assert_eq!(receiver.state(), ConnectionState::Idle);
}

#[test]
fn test_corrupted_frame_is_dropped_and_stream_continues() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = link_config(Protocol::Tcp, port);
    config.security.fec = true;
    let receiver = StreamReceiver::new(config).unwrap();
    receiver.start().unwrap();

    let (mut stream, _) = listener.accept().unwrap();
    let pipeline = FramingPipeline::new(true, None);

    for seq in 0..3u32 {
        let block = AudioBlock::from_i16(&stereo_pcm(seq as usize, 64), 2, 48000);
        let mut payload = pipeline.encode(&pcm::encode(&block, SampleFormat::I16)).unwrap();
        if seq == 1 {
            payload[20] ^= 0x01;
        }
        stream
            .write_all(&Packet::new(seq, payload).encode_tcp())
            .unwrap();
    }

    wait_for(|| {
        let stats = receiver.stats();
        stats.monitor.packets_received == 2 && stats.checksum_failures == 1
    });
    // The corrupted packet shows up as a gap
    assert_eq!(receiver.stats().monitor.packets_lost, 1);
    assert_eq!(receiver.jitter_buffer().len(), 2);
    receiver.stop();
}

#[test]
fn test_sender_to_receiver_over_tcp() {
    let port = free_tcp_port();
    let mut config = link_config(Protocol::Tcp, port);
    config.security.fec = true;
    config.security.encryption = true;
    config.security.password = "correct horse".into();

    let sender = StreamSender::new(config.clone()).unwrap();
    sender.start().unwrap();
    let receiver = StreamReceiver::new(config).unwrap();
    receiver.start().unwrap();

    wait_for(|| sender.state() == ConnectionState::Connected);
    wait_for(|| receiver.state() == ConnectionState::Connected);

    let blocks: Vec<Vec<i16>> = (0..5).map(|i| stereo_pcm(i, FRAMES)).collect();
    for samples in &blocks {
        sender.push_block(AudioBlock::from_i16(samples, 2, 48000));
    }

    wait_for(|| receiver.stats().monitor.packets_received == 5);
    for samples in &blocks {
        assert_eq!(&receiver.pull_block(FRAMES).to_i16(), samples);
    }

    let sent = sender.stats();
    assert_eq!(sent.monitor.packets_sent, 5);
    assert_eq!(receiver.stats().monitor.packets_lost, 0);

    sender.stop();
    // Sender going away drops the receiver back into reconnecting
    wait_for(|| receiver.state() != ConnectionState::Connected);
    let started = Instant::now();
    receiver.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!receiver.is_running());
}
