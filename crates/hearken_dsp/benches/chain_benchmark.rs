//! Performance benchmarks for the signal chain
//!
//! Run with: cargo bench -p hearken_dsp

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use hearken_dsp::{ChainControl, ChainLayout, ProcessContext};

fn benchmark_chain_processing(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal_chain");

    // Common buffer sizes in audio applications
    let buffer_sizes = [64, 128, 256, 512, 1024, 2048];

    for size in buffer_sizes {
        // Stereo buffer (interleaved)
        let sample_count = size * 2;

        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("process_{}_frames", size), |b| {
            let control = ChainControl::new(&ChainLayout::default(), 75.0).unwrap();
            let mut chain = control
                .instantiate(ProcessContext::new(48000.0, 2, size))
                .unwrap();
            let mut buffer: Vec<f32> = (0..sample_count)
                .map(|i| (i as f32 * 0.001).sin())
                .collect();

            b.iter(|| {
                chain.process(black_box(&mut buffer));
            });
        });
    }

    group.finish();
}

fn benchmark_band_gain_update(c: &mut Criterion) {
    c.bench_function("chain_band_gain_update", |b| {
        let control = ChainControl::new(&ChainLayout::default(), 75.0).unwrap();
        let mut chain = control
            .instantiate(ProcessContext::new(48000.0, 2, 64))
            .unwrap();
        let mut buffer = vec![0.1_f32; 128];
        let frequencies = [250, 500, 1000, 2000, 4000, 8000];
        let mut band = 0;
        let mut gain = 0.0_f32;

        b.iter(|| {
            // Simulate dragging a slider: one write, one block picking it up
            control.set_band_gain(frequencies[band], gain);
            chain.process(black_box(&mut buffer));
            band = (band + 1) % frequencies.len();
            gain = (gain + 1.0) % 12.0;
        });
    });
}

criterion_group!(benches, benchmark_chain_processing, benchmark_band_gain_update);

criterion_main!(benches);
