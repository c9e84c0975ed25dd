//! Property tests for the per-packet and per-block invariants

use proptest::prelude::*;

use mpx_link::audio::AudioBlock;
use mpx_link::codec::{AudioCipher, FecCodec, FramingPipeline};
use mpx_link::dsp::conditioner::Limiter;
use mpx_link::dsp::SignalConditioner;
use mpx_link::error::SecurityError;
use mpx_link::protocol::{Packet, TcpFrameDecoder};

proptest! {
    #[test]
    fn limiter_output_is_bounded(
        samples in prop::collection::vec(-4.0f32..4.0, 0..512),
        threshold in 0.01f32..1.0,
    ) {
        let mut out = samples.clone();
        Limiter::new(threshold).process(&mut out);
        for (o, s) in out.iter().zip(&samples) {
            prop_assert!(o.abs() <= threshold);
            if s.abs() <= threshold {
                prop_assert_eq!(o, s);
            }
        }
    }

    #[test]
    fn conditioner_with_limiter_stays_bounded(
        samples in prop::collection::vec(-2.0f32..2.0, 2..1024),
    ) {
        let mut conditioner = SignalConditioner::with_defaults(48000);
        conditioner.set_agc(true);
        conditioner.set_limiter(true);
        let len = samples.len() / 2 * 2;
        let mut block = AudioBlock::new(samples[..len].to_vec(), 2, 48000);
        conditioner.process(&mut block);
        prop_assert!(block.samples.iter().all(|s| s.is_finite() && s.abs() <= 0.95));
    }

    #[test]
    fn fec_detects_any_single_bit_flip(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        bit in any::<prop::sample::Index>(),
    ) {
        let fec = FecCodec::new();
        let mut encoded = fec.encode(&payload);
        let position = bit.index(encoded.len() * 8);
        encoded[position / 8] ^= 1 << (position % 8);

        let (_, valid) = fec.decode(&encoded);
        prop_assert!(!valid);
    }

    #[test]
    fn pipeline_rejects_corruption_with_fec(
        payload in prop::collection::vec(any::<u8>(), 0..256),
        byte in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let pipeline = FramingPipeline::new(true, Some(AudioCipher::from_password("pw")));
        let mut wire = pipeline.encode(&payload).unwrap();
        let index = byte.index(wire.len());
        wire[index] ^= mask;
        prop_assert_eq!(pipeline.decode(&wire), Err(SecurityError::IntegrityFailure));
    }

    #[test]
    fn cipher_round_trips(
        payload in prop::collection::vec(any::<u8>(), 0..1024),
        password in "[a-z]{1,12}",
    ) {
        let cipher = AudioCipher::from_password(&password);
        let encrypted = cipher.encrypt(&payload).unwrap();
        prop_assert_eq!(encrypted.len(), payload.len() + 16);
        prop_assert_eq!(cipher.decrypt(&encrypted).unwrap(), payload);
    }

    #[test]
    fn tcp_decoder_handles_arbitrary_chunking(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..128), 1..8),
        cuts in prop::collection::vec(1usize..64, 1..32),
    ) {
        let mut stream = Vec::new();
        for (seq, payload) in payloads.iter().enumerate() {
            stream.extend_from_slice(&Packet::new(seq as u32, payload.clone()).encode_tcp());
        }

        let mut decoder = TcpFrameDecoder::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        let mut cut = cuts.iter().cycle();
        while offset < stream.len() {
            let end = (offset + cut.next().copied().unwrap_or(1)).min(stream.len());
            decoder.feed(&stream[offset..end]);
            offset = end;
            while let Some(packet) = decoder.next_frame().unwrap() {
                decoded.push(packet);
            }
        }

        prop_assert_eq!(decoded.len(), payloads.len());
        for (seq, (packet, payload)) in decoded.iter().zip(&payloads).enumerate() {
            prop_assert_eq!(packet.sequence, seq as u32);
            prop_assert_eq!(packet.payload.as_ref(), payload.as_slice());
        }
        prop_assert_eq!(decoder.buffered(), 0);
    }
}
