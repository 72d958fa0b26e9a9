//! Tests for Normalization Operations
//!
//! Cross-module behaviour of the forward transform, running statistics, validation
//! and gradients. Per-function tests live next to each function.

use super::transform::{apply_channels_last, apply_contiguous, apply_generic, inverse_std};
use super::*;
use crate::config::BackendCapabilities;
use crate::numerical_gradient::{dot_loss, GradientCheckConfig, NumericalGradientChecker};
use crate::{Device, MemoryFormat, Tensor, TensorError};
use approx::assert_abs_diff_eq;
use proptest::prelude::*;

fn ramp(shape: &[usize]) -> Tensor<f64> {
    let n: usize = shape.iter().product();
    let data = (0..n).map(|i| ((i * 5) % 13) as f64 * 0.37 - 2.0).collect();
    Tensor::from_vec(data, shape).unwrap()
}

#[test]
fn test_batch_norm_eval_identity() {
    let n = 2 * 3 * 4 * 4;
    let data: Vec<f32> = (0..n).map(|i| (i % 9) as f32 - 4.0).collect();
    let input = Tensor::from_vec(data, &[2, 3, 4, 4]).unwrap();
    let weight = Tensor::<f32>::ones(&[3]);
    let bias = Tensor::<f32>::zeros(&[3]);
    let mut running_mean = Tensor::<f32>::zeros(&[3]);
    let mut running_var = Tensor::<f32>::ones(&[3]);
    let mut params = NormalizationParameters::new()
        .with_affine(&weight, &bias)
        .with_running_stats(&mut running_mean, &mut running_var);

    let output = batch_norm(&input, &mut params, false, 0.1, 1e-5).unwrap();

    assert_eq!(output.shape().dims(), &[2, 3, 4, 4]);
    for (y, x) in output.to_vec().iter().zip(input.to_vec()) {
        assert_abs_diff_eq!(*y, x, epsilon = 1e-4);
    }
}

#[test]
fn test_running_mean_momentum_update() {
    let input = Tensor::<f32>::from_vec(vec![3.0, 5.0, 4.0, 4.0], &[4, 1]).unwrap();
    let mut running_mean = Tensor::<f32>::zeros(&[1]);
    let mut running_var = Tensor::<f32>::ones(&[1]);
    let mut params =
        NormalizationParameters::new().with_running_stats(&mut running_mean, &mut running_var);

    batch_norm(&input, &mut params, true, 0.1, 1e-5).unwrap();

    assert_abs_diff_eq!(running_mean.to_vec()[0], 0.4, epsilon = 1e-6);
}

#[test]
fn test_repeated_updates_compose() {
    // batch mean 4, unbiased variance 2/3
    let input = Tensor::<f64>::from_vec(vec![3.0, 5.0, 4.0, 4.0], &[4, 1]).unwrap();
    let mut running_mean = Tensor::<f64>::zeros(&[1]);
    let mut running_var = Tensor::<f64>::zeros(&[1]);
    let m = 0.25;

    for _ in 0..2 {
        let mut params =
            NormalizationParameters::new().with_running_stats(&mut running_mean, &mut running_var);
        batch_norm(&input, &mut params, true, m, 1e-5).unwrap();
    }

    // r2 = m*b + (1-m)*(m*b + (1-m)*r0) = b * (1 - (1-m)^2) with r0 = 0
    let factor = 1.0 - (1.0 - m) * (1.0 - m);
    assert_abs_diff_eq!(running_mean.to_vec()[0], 4.0 * factor, epsilon = 1e-12);
    assert_abs_diff_eq!(running_var.to_vec()[0], (2.0 / 3.0) * factor, epsilon = 1e-12);
}

#[test]
fn test_biased_and_unbiased_variance() {
    let input = Tensor::<f64>::from_vec(vec![1.0, 3.0], &[2, 1]).unwrap();
    let mut running_mean = Tensor::<f64>::zeros(&[1]);
    let mut running_var = Tensor::<f64>::zeros(&[1]);
    let mut params =
        NormalizationParameters::new().with_running_stats(&mut running_mean, &mut running_var);

    let result = BackendSelector::<f64>::default()
        .forward(&input, &mut params, true, 1.0, 0.0, &BackendCapabilities::default())
        .unwrap();

    // transform sees the biased variance 1; running_var gets the unbiased 2
    let saved = result.state.saved().unwrap();
    assert_eq!(saved.mean.to_vec(), vec![2.0]);
    assert_eq!(saved.invstd.to_vec(), vec![1.0]);
    assert_eq!(result.output.to_vec(), vec![-1.0, 1.0]);
    assert_eq!(running_var.to_vec(), vec![2.0]);
}

#[test]
fn test_single_value_per_channel_skips_running_var() {
    let input = Tensor::<f32>::from_vec(vec![7.0, -1.0], &[1, 2]).unwrap();
    let mut running_mean = Tensor::<f32>::zeros(&[2]);
    let mut running_var = Tensor::<f32>::full(&[2], 3.0);
    let mut params =
        NormalizationParameters::new().with_running_stats(&mut running_mean, &mut running_var);

    let output = batch_norm(&input, &mut params, true, 0.5, 1e-5).unwrap();

    assert_eq!(output.to_vec(), vec![0.0, 0.0]);
    assert_eq!(running_mean.to_vec(), vec![3.5, -0.5]);
    assert_eq!(running_var.to_vec(), vec![3.0, 3.0]);
}

#[test]
fn test_wrong_weight_length_leaves_running_stats() {
    let input = ramp(&[2, 3, 2]);
    let weight = Tensor::<f64>::ones(&[2]);
    let mut running_mean = Tensor::<f64>::full(&[3], 0.5);
    let mut running_var = Tensor::<f64>::full(&[3], 2.0);
    let mut params = NormalizationParameters::new()
        .with_weight(&weight)
        .with_running_stats(&mut running_mean, &mut running_var);

    let err = batch_norm(&input, &mut params, true, 0.1, 1e-5).unwrap_err();
    match &err {
        TensorError::ShapeMismatch { expected, got, .. } => {
            assert!(expected.contains("weight with 3 elements"));
            assert!(got.contains("weight with 2 elements"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.context().is_some());
    assert_eq!(running_mean.to_vec(), vec![0.5; 3]);
    assert_eq!(running_var.to_vec(), vec![2.0; 3]);
}

#[test]
fn test_validation_errors() {
    let input = ramp(&[2, 3]);

    let mut params = NormalizationParameters::new();
    assert!(matches!(
        batch_norm(&input, &mut params, false, 0.1, 1e-5),
        Err(TensorError::MissingState { .. })
    ));

    let vector = Tensor::<f64>::ones(&[3]);
    assert!(matches!(
        batch_norm(&vector, &mut NormalizationParameters::new(), true, 0.1, 1e-5),
        Err(TensorError::InvalidShape { .. })
    ));

    let bias = Tensor::<f64>::zeros(&[3]).to_device(Device::Gpu(0));
    let mut params = NormalizationParameters::new().with_bias(&bias);
    assert!(matches!(
        batch_norm(&input, &mut params, true, 0.1, 1e-5),
        Err(TensorError::DeviceMismatch { .. })
    ));

    assert!(matches!(
        batch_norm(&input, &mut NormalizationParameters::new(), true, f64::NAN, 1e-5),
        Err(TensorError::InvalidArgument { .. })
    ));
}

#[test]
fn test_empty_input() {
    let input = Tensor::<f32>::zeros(&[0, 3, 4]);
    let mut running_mean = Tensor::<f32>::zeros(&[3]);
    let mut running_var = Tensor::<f32>::ones(&[3]);
    let mut params =
        NormalizationParameters::new().with_running_stats(&mut running_mean, &mut running_var);

    let output = batch_norm(&input, &mut params, true, 0.1, 1e-5).unwrap();
    assert_eq!(output.shape().dims(), &[0, 3, 4]);
    assert!(output.is_empty());
    assert_eq!(running_mean.to_vec(), vec![0.0; 3]);

    let empty_vector = Tensor::<f32>::zeros(&[0]);
    assert!(matches!(
        batch_norm(&empty_vector, &mut NormalizationParameters::new(), true, 0.1, 1e-5),
        Err(TensorError::InvalidShape { .. })
    ));
}

#[test]
fn test_update_stats_without_normalizing() {
    let input = Tensor::<f64>::from_vec(vec![1.0, 10.0, 3.0, 20.0], &[2, 2]).unwrap();
    let mut running_mean = Tensor::<f64>::zeros(&[2]);
    let mut running_var = Tensor::<f64>::ones(&[2]);

    let (mean, var) = batch_norm_update_stats(
        &input,
        Some(&mut running_mean),
        Some(&mut running_var),
        0.5,
    )
    .unwrap();

    assert_eq!(mean.to_vec(), vec![2.0, 15.0]);
    assert_eq!(var.to_vec(), vec![1.0, 25.0]);
    assert_eq!(running_mean.to_vec(), vec![1.0, 7.5]);
    // unbiased variances 2 and 50
    assert_eq!(running_var.to_vec(), vec![1.5, 25.5]);

    let short = &mut Tensor::<f64>::zeros(&[1]);
    assert!(matches!(
        batch_norm_update_stats(&input, Some(short), None, 0.5),
        Err(TensorError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_channels_last_eval_keeps_format() {
    let input = ramp(&[2, 3, 2, 2]).to_channels_last().unwrap();
    let mut running_mean = Tensor::from_vec(vec![0.5, -0.5, 1.0], &[3]).unwrap();
    let mut running_var = Tensor::from_vec(vec![1.0, 2.0, 0.5], &[3]).unwrap();
    let reference = apply_generic(
        &input,
        &running_mean,
        &inverse_std(&running_var, 1e-5),
        None,
        None,
    )
    .unwrap();

    let mut params =
        NormalizationParameters::new().with_running_stats(&mut running_mean, &mut running_var);
    let output = batch_norm(&input, &mut params, false, 0.1, 1e-5).unwrap();

    assert_eq!(output.memory_format(), MemoryFormat::ChannelsLast);
    for (a, b) in output.to_vec().iter().zip(reference.to_vec()) {
        assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
    }
}

fn batch_norm_gradient_check(training: bool) {
    let input = ramp(&[3, 2, 2]);
    let upstream = Tensor::from_vec(
        vec![0.3, -1.2, 0.8, 0.1, -0.4, 2.0, 1.1, -0.7, 0.5, 0.2, -1.5, 0.9],
        &[3, 2, 2],
    )
    .unwrap();
    let weight = Tensor::from_vec(vec![1.5, -0.5], &[2]).unwrap();
    let bias = Tensor::from_vec(vec![0.2, 0.3], &[2]).unwrap();
    let running_mean = Tensor::from_vec(vec![0.1, -0.3], &[2]).unwrap();
    let running_var = Tensor::from_vec(vec![0.8, 1.7], &[2]).unwrap();
    let eps = 1e-5;

    let forward_with = |x: &Tensor<f64>, w: &Tensor<f64>| {
        let mut rm = running_mean.clone();
        let mut rv = running_var.clone();
        let mut params = NormalizationParameters::new()
            .with_affine(w, &bias)
            .with_running_stats(&mut rm, &mut rv);
        batch_norm(x, &mut params, training, 0.1, eps)
    };

    let selector = BackendSelector::<f64>::default();
    let mut rm = running_mean.clone();
    let mut rv = running_var.clone();
    let mut params = NormalizationParameters::new()
        .with_affine(&weight, &bias)
        .with_running_stats(&mut rm, &mut rv);
    let forward = selector
        .forward(&input, &mut params, training, 0.1, eps, &BackendCapabilities::default())
        .unwrap();
    let grads = selector
        .backward(&forward.state, &input, &upstream, &params, eps, GradientMask::all())
        .unwrap();

    let checker = NumericalGradientChecker::<f64>::new(GradientCheckConfig::default());

    let input_loss = dot_loss(&upstream, |x| forward_with(x, &weight));
    let numerical = checker
        .compute_numerical_gradient(&input, input_loss)
        .unwrap();
    let result = checker
        .compare_gradients(&numerical, grads.grad_input.as_ref().unwrap())
        .unwrap();
    assert!(result.passed, "grad_input: {}", result.summary());

    let weight_loss = dot_loss(&upstream, |w| forward_with(&input, w));
    let numerical = checker
        .compute_numerical_gradient(&weight, weight_loss)
        .unwrap();
    let result = checker
        .compare_gradients(&numerical, grads.grad_weight.as_ref().unwrap())
        .unwrap();
    assert!(result.passed, "grad_weight: {}", result.summary());

    let bias_sums: Vec<f64> = (0..2)
        .map(|c| {
            (0..3)
                .flat_map(|n| (0..2).map(move |s| (n, s)))
                .map(|(n, s)| upstream.get(&[n, c, s]).unwrap())
                .sum()
        })
        .collect();
    for (g, e) in grads.grad_bias.unwrap().to_vec().iter().zip(bias_sums) {
        assert_abs_diff_eq!(*g, e, epsilon = 1e-12);
    }
}

#[test]
fn test_training_gradients_match_finite_differences() {
    batch_norm_gradient_check(true);
}

#[test]
fn test_eval_gradients_match_finite_differences() {
    batch_norm_gradient_check(false);
}

fn eval_case() -> impl Strategy<Value = (Vec<usize>, Vec<f32>, Vec<f32>, Vec<f32>)> {
    (1usize..3, 1usize..5, 1usize..4, 1usize..4).prop_flat_map(|(n, c, h, w)| {
        (
            Just(vec![n, c, h, w]),
            prop::collection::vec(-4.0f32..4.0, n * c * h * w),
            prop::collection::vec(-2.0f32..2.0, c),
            prop::collection::vec(0.5f32..4.0, c),
        )
    })
}

proptest! {
    #[test]
    fn prop_transform_paths_agree((dims, data, mean, var) in eval_case()) {
        let c = dims[1];
        let input = Tensor::from_vec(data, &dims).unwrap();
        let mean = Tensor::from_vec(mean, &[c]).unwrap();
        let var = Tensor::from_vec(var, &[c]).unwrap();
        let weight = Tensor::from_vec((0..c).map(|i| 0.5 + 0.25 * i as f32).collect(), &[c]).unwrap();
        let bias = Tensor::from_vec((0..c).map(|i| 1.0 - 0.5 * i as f32).collect(), &[c]).unwrap();
        let eps = 1e-5;

        let fused = collect_fused_coefficients(Some(&weight), Some(&bias), &mean, &var, eps);
        let generic = apply_generic(&input, &mean, &inverse_std(&var, eps), Some(&weight), Some(&bias)).unwrap();
        let contiguous = apply_contiguous(&input, &fused).unwrap();
        let channels_last = apply_channels_last(&input.to_channels_last().unwrap(), &fused).unwrap();

        let reference = generic.to_vec();
        for (a, b) in contiguous.to_vec().iter().zip(&reference) {
            prop_assert!((a - b).abs() <= 1e-5, "contiguous {} vs generic {}", a, b);
        }
        for (a, b) in channels_last.to_vec().iter().zip(&reference) {
            prop_assert!((a - b).abs() <= 1e-5, "channels-last {} vs generic {}", a, b);
        }
    }
}
