//! Per-block cost of the sender/receiver hot path

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use mpx_link::audio::{pcm, AudioBlock, SampleFormat};
use mpx_link::codec::{AudioCipher, FramingPipeline};
use mpx_link::dsp::SignalConditioner;
use mpx_link::protocol::{Packet, TcpFrameDecoder};

const SAMPLE_RATE: u32 = 192000;

fn test_block(frames: usize) -> AudioBlock {
    let samples = (0..frames * 2)
        .map(|i| (i as f32 * 0.01).sin() * 0.8)
        .collect();
    AudioBlock::new(samples, 2, SAMPLE_RATE)
}

fn bench_conditioner(c: &mut Criterion) {
    let mut group = c.benchmark_group("conditioner");
    for frames in [256usize, 1024, 4096] {
        let block = test_block(frames);
        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(BenchmarkId::new("agc_limiter", frames), &block, |b, block| {
            let mut conditioner = SignalConditioner::with_defaults(SAMPLE_RATE);
            conditioner.set_agc(true);
            conditioner.set_limiter(true);
            b.iter(|| {
                let mut work = block.clone();
                conditioner.process(&mut work);
                black_box(work);
            });
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let block = test_block(1024);
    let pcm_bytes = pcm::encode(&block, SampleFormat::I16);
    let pipelines = [
        ("plain", FramingPipeline::plain()),
        ("fec", FramingPipeline::new(true, None)),
        (
            "fec_aes",
            FramingPipeline::new(true, Some(AudioCipher::from_password("bench"))),
        ),
    ];

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Bytes(pcm_bytes.len() as u64));
    for (name, pipeline) in &pipelines {
        group.bench_function(BenchmarkId::new("encode", name), |b| {
            b.iter(|| black_box(pipeline.encode(black_box(&pcm_bytes))))
        });
        if let Ok(wire) = pipeline.encode(&pcm_bytes) {
            group.bench_function(BenchmarkId::new("decode", name), |b| {
                b.iter(|| black_box(pipeline.decode(black_box(&wire))))
            });
        }
    }
    group.finish();
}

fn bench_framing(c: &mut Criterion) {
    let block = test_block(1024);
    let wire = Packet::new(7, pcm::encode(&block, SampleFormat::I16)).encode_tcp();

    c.bench_function("tcp_deframe_1024", |b| {
        let mut decoder = TcpFrameDecoder::new();
        b.iter(|| {
            decoder.feed(&wire);
            black_box(decoder.next_frame())
        })
    });

    c.bench_function("pcm_decode_1024", |b| {
        let bytes = pcm::encode(&block, SampleFormat::I16);
        b.iter(|| black_box(pcm::decode(&bytes, SampleFormat::I16, 2, SAMPLE_RATE)))
    });
}

criterion_group!(benches, bench_conditioner, bench_pipeline, bench_framing);
criterion_main!(benches);
