/// Normalization Benchmarks
///
/// Compares the three forward transform paths on the same data, and measures the
/// training forward, the backward pass and renorm at a few activation sizes.
use chanorm_core::ops::normalization::transform::{
    apply_channels_last, apply_contiguous, apply_generic,
};
use chanorm_core::ops::normalization::collect_fused_coefficients;
use chanorm_core::{
    batch_norm, renorm, BackendCapabilities, BackendSelector, GradientMask,
    NormalizationParameters, Tensor,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Activation shape `[N, C, H, W]` for one benchmark case
struct BenchConfig {
    name: &'static str,
    shape: [usize; 4],
}

const SHAPES: &[BenchConfig] = &[
    BenchConfig {
        name: "small_8x16x8x8",
        shape: [8, 16, 8, 8],
    },
    BenchConfig {
        name: "medium_16x64x16x16",
        shape: [16, 64, 16, 16],
    },
    BenchConfig {
        name: "large_32x128x28x28",
        shape: [32, 128, 28, 28],
    },
];

fn activation(shape: &[usize]) -> Tensor<f32> {
    let n: usize = shape.iter().product();
    let data = (0..n).map(|i| ((i * 31) % 97) as f32 / 97.0 - 0.5).collect();
    Tensor::from_vec(data, shape).unwrap()
}

fn channel_param(channels: usize, value: f32) -> Tensor<f32> {
    Tensor::full(&[channels], value)
}

fn bench_transform_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_paths");
    for config in SHAPES {
        let channels = config.shape[1];
        let input = activation(&config.shape);
        let channels_last = input.to_channels_last().unwrap();
        let mean = channel_param(channels, 0.1);
        let var = channel_param(channels, 0.9);
        let invstd = channel_param(channels, 1.0 / 0.9f32.sqrt());
        let fused = collect_fused_coefficients(None, None, &mean, &var, 0.0);

        group.bench_with_input(BenchmarkId::new("generic", config.name), &input, |b, x| {
            b.iter(|| apply_generic(black_box(x), &mean, &invstd, None, None).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("contiguous", config.name), &input, |b, x| {
            b.iter(|| apply_contiguous(black_box(x), &fused).unwrap())
        });
        group.bench_with_input(
            BenchmarkId::new("channels_last", config.name),
            &channels_last,
            |b, x| b.iter(|| apply_channels_last(black_box(x), &fused).unwrap()),
        );
    }
    group.finish();
}

fn bench_training_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_norm_training");
    for config in SHAPES {
        let channels = config.shape[1];
        let input = activation(&config.shape);
        let weight = channel_param(channels, 1.0);
        let bias = channel_param(channels, 0.0);
        let mut running_mean = channel_param(channels, 0.0);
        let mut running_var = channel_param(channels, 1.0);

        group.bench_with_input(BenchmarkId::from_parameter(config.name), &input, |b, x| {
            b.iter(|| {
                let mut params = NormalizationParameters::new()
                    .with_affine(&weight, &bias)
                    .with_running_stats(&mut running_mean, &mut running_var);
                batch_norm(black_box(x), &mut params, true, 0.1, 1e-5).unwrap()
            })
        });
    }
    group.finish();
}

fn bench_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_norm_backward");
    let selector = BackendSelector::<f32>::default();
    let capabilities = BackendCapabilities::default();
    for config in SHAPES {
        let channels = config.shape[1];
        let input = activation(&config.shape);
        let grad_output = activation(&config.shape);
        let weight = channel_param(channels, 1.0);
        let bias = channel_param(channels, 0.0);
        let mut params = NormalizationParameters::new().with_affine(&weight, &bias);
        let forward = selector
            .forward(&input, &mut params, true, 0.1, 1e-5, &capabilities)
            .unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(config.name), &input, |b, x| {
            b.iter(|| {
                selector
                    .backward(
                        &forward.state,
                        black_box(x),
                        &grad_output,
                        &params,
                        1e-5,
                        GradientMask::all(),
                    )
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_renorm(c: &mut Criterion) {
    let mut group = c.benchmark_group("renorm");
    for config in SHAPES {
        let input = activation(&config.shape);
        group.bench_with_input(BenchmarkId::from_parameter(config.name), &input, |b, x| {
            b.iter(|| renorm(black_box(x), 2.0, 0, 1.0).unwrap())
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_transform_paths,
    bench_training_forward,
    bench_backward,
    bench_renorm
);
criterion_main!(benches);
