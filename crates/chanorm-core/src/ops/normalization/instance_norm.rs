//! Instance Normalization
//!
//! Instance normalization computes statistics per `(sample, channel)` pair. It is
//! expressed as batch normalization over a `[1, N*C, *spatial]` view of the input with
//! the per-channel parameters repeated `N` times. Running statistics are updated per
//! repeated slot and then averaged over the batch back into the caller's `[C]` tensors.

use crate::config::BackendCapabilities;
use crate::scalar::{Accumulator, NormFloat};
use crate::{Result, Tensor, TensorError};
use num_traits::Zero;
use tracing::debug;

use super::batch_norm::batch_norm_with_selector;
use super::params::{input_channels, NormalizationParameters};
use super::selector::BackendSelector;

const OPERATION: &str = "instance_norm";

/// Instance normalization of an `[N, C, *spatial]` input.
///
/// `use_input_stats == false` normalizes with the running statistics, which must then
/// be present.
#[allow(clippy::too_many_arguments)]
pub fn instance_norm<T: NormFloat>(
    input: &Tensor<T>,
    weight: Option<&Tensor<T>>,
    bias: Option<&Tensor<T>>,
    running_mean: Option<&mut Tensor<T>>,
    running_var: Option<&mut Tensor<T>>,
    use_input_stats: bool,
    momentum: f64,
    eps: f64,
    capabilities: &BackendCapabilities,
) -> Result<Tensor<T>> {
    let channels = input_channels(input, OPERATION)?;
    if !use_input_stats && (running_mean.is_none() || running_var.is_none()) {
        return Err(TensorError::missing_state(
            OPERATION,
            "running_mean and running_var must be defined when use_input_stats is false",
        ));
    }
    for (name, param) in [
        ("weight", weight),
        ("bias", bias),
        ("running_mean", running_mean.as_deref()),
        ("running_var", running_var.as_deref()),
    ] {
        if let Some(param) = param {
            if param.numel() != channels {
                return Err(TensorError::parameter_length(
                    OPERATION,
                    name,
                    channels,
                    param.numel(),
                ));
            }
        }
    }

    let dims = input.shape().dims();
    let batch = dims[0];
    let mut folded = dims.to_vec();
    folded[0] = 1;
    folded[1] = batch * channels;
    debug!(shape = %input.shape(), ?folded, use_input_stats, "instance norm");

    let reshaped = input.reshape(&folded)?;
    let weight_rep = weight.map(|w| repeat(w, batch)).transpose()?;
    let bias_rep = bias.map(|b| repeat(b, batch)).transpose()?;
    let mut mean_rep = running_mean.as_deref().map(|m| repeat(m, batch)).transpose()?;
    let mut var_rep = running_var.as_deref().map(|v| repeat(v, batch)).transpose()?;

    let output = {
        let mut params = NormalizationParameters {
            weight: weight_rep.as_ref(),
            bias: bias_rep.as_ref(),
            running_mean: mean_rep.as_mut(),
            running_var: var_rep.as_mut(),
        };
        batch_norm_with_selector(
            &BackendSelector::<T>::default(),
            &reshaped,
            &mut params,
            use_input_stats,
            momentum,
            eps,
            capabilities,
        )?
    };

    if let (Some(target), Some(repeated)) = (running_mean, mean_rep.as_ref()) {
        average_over_batch(target, repeated, batch, channels)?;
    }
    if let (Some(target), Some(repeated)) = (running_var, var_rep.as_ref()) {
        average_over_batch(target, repeated, batch, channels)?;
    }

    output.reshape(dims)
}

/// Concatenate `times` copies of a `[C]` tensor
fn repeat<T: NormFloat>(tensor: &Tensor<T>, times: usize) -> Result<Tensor<T>> {
    let values = tensor.to_vec();
    let mut data = Vec::with_capacity(values.len() * times);
    for _ in 0..times {
        data.extend_from_slice(&values);
    }
    let len = data.len();
    Ok(Tensor::from_vec(data, &[len])?.to_device(*tensor.device()))
}

/// `target[c] = mean over b of repeated[b * C + c]`
fn average_over_batch<T: NormFloat>(
    target: &mut Tensor<T>,
    repeated: &Tensor<T>,
    batch: usize,
    channels: usize,
) -> Result<()> {
    if batch == 0 {
        return Ok(());
    }
    let values = repeated.to_vec();
    let count = T::Acc::from_count(batch);
    let averaged: Vec<T> = (0..channels)
        .map(|c| {
            let sum = (0..batch).fold(T::Acc::zero(), |acc, b| {
                acc + values[b * channels + c].to_acc()
            });
            T::from_acc(sum / count)
        })
        .collect();
    let device = *target.device();
    *target = Tensor::from_vec(averaged, target.shape().dims())?.to_device(device);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_each_instance_is_standardized() {
        // two samples, one channel, four values each
        let input = Tensor::<f64>::from_vec(
            vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0],
            &[2, 1, 4],
        )
        .unwrap();
        let out = instance_norm(
            &input,
            None,
            None,
            None,
            None,
            true,
            0.1,
            0.0,
            &BackendCapabilities::default(),
        )
        .unwrap();

        assert_eq!(out.shape().dims(), &[2, 1, 4]);
        let values = out.to_vec();
        for sample in values.chunks(4) {
            let mean: f64 = sample.iter().sum::<f64>() / 4.0;
            let var: f64 = sample.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-9);
        }
        // both samples are affine images of each other
        for (a, b) in values[..4].iter().zip(&values[4..]) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_running_stats_are_batch_averaged() {
        // sample means 2 and 6 for the single channel
        let input =
            Tensor::<f32>::from_vec(vec![1.0, 3.0, 5.0, 7.0], &[2, 1, 2]).unwrap();
        let mut running_mean = Tensor::<f32>::zeros(&[1]);
        let mut running_var = Tensor::<f32>::zeros(&[1]);

        instance_norm(
            &input,
            None,
            None,
            Some(&mut running_mean),
            Some(&mut running_var),
            true,
            1.0,
            1e-5,
            &BackendCapabilities::default(),
        )
        .unwrap();

        assert_abs_diff_eq!(running_mean.to_vec()[0], 4.0, epsilon = 1e-6);
        // each instance has unbiased variance 2
        assert_abs_diff_eq!(running_var.to_vec()[0], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_requires_running_stats_without_input_stats() {
        let input = Tensor::<f32>::ones(&[2, 3, 4]);
        let result = instance_norm(
            &input,
            None,
            None,
            None,
            None,
            false,
            0.1,
            1e-5,
            &BackendCapabilities::default(),
        );
        assert!(matches!(result, Err(TensorError::MissingState { .. })));
    }
}
