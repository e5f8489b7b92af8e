use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, Criterion};
use glam::Vec2;
use xrpipe_core::{
    layer::submission_order, AdaptiveConfig, AdaptiveDensity, DeviceDescription, Extent,
    HmdDevice, Layer, LayerDesc, MockCompositor, PipelineConfig,
};

fn bench_adaptive_ladder(c: &mut Criterion) {
    let trace: Vec<f32> = (0..1024)
        .map(|i| 6.0 + 5.0 * ((i as f32) * 0.07).sin())
        .collect();

    c.bench_function("adaptive_ladder_1024_samples", |b| {
        b.iter(|| {
            let mut controller = AdaptiveDensity::new(AdaptiveConfig::default());
            for t in &trace {
                black_box(controller.sample(*t));
            }
            controller.rung()
        })
    });
}

fn bench_submission_sort(c: &mut Criterion) {
    let layers: Vec<Layer> = (1..=64u32)
        .map(|id| {
            let desc = LayerDesc::quad(Vec2::ONE, Extent::new(64, 64))
                .with_priority(((id * 37) % 11) as i32 - 5);
            Layer::new(id, desc).unwrap()
        })
        .collect();

    c.bench_function("submission_sort_64_layers", |b| {
        b.iter(|| {
            let mut sorted = layers.clone();
            sorted.sort_by(submission_order);
            black_box(sorted)
        })
    });
}

fn bench_frame_round_trip(c: &mut Criterion) {
    let mock = Arc::new(MockCompositor::new());
    let mut device = HmdDevice::new(mock, DeviceDescription::default(), PipelineConfig::default());
    device.init().unwrap();
    for _ in 0..4 {
        device
            .create_layer(LayerDesc::quad(Vec2::ONE, Extent::new(256, 256)))
            .unwrap();
    }

    c.bench_function("frame_round_trip_5_layers", |b| {
        b.iter(|| {
            device.run_frame().unwrap();
            device.wait_idle().unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_adaptive_ladder,
    bench_submission_sort,
    bench_frame_round_trip
);
criterion_main!(benches);
