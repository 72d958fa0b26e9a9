//! Batch Normalization Operations
//!
//! Batch normalization standardizes every channel of the input using statistics
//! reduced over all other axes, then applies a per-channel affine transform. Training
//! mode uses batch statistics and blends them into the running statistics; evaluation
//! mode uses the running statistics directly.
//!
//! [`batch_norm_cpu`] is the native kernel behind [`NativeStrategy`]; [`batch_norm`]
//! is the convenience entry point routed through the default strategy registry.
//!
//! [`NativeStrategy`]: crate::dispatch_registry::NativeStrategy

use crate::config::BackendCapabilities;
use crate::scalar::NormFloat;
use crate::{Result, Tensor};
use tracing::trace;

use super::params::{input_channels, NormalizationParameters, SavedStatistics};
use super::selector::BackendSelector;
use super::statistics::{compute_training_statistics, InvStd};
use super::transform::transform_input;

/// Native batch normalization forward.
///
/// Returns the output and, in training mode, the batch mean and inverse standard
/// deviation needed by the backward pass.
pub fn batch_norm_cpu<T: NormFloat>(
    input: &Tensor<T>,
    params: &mut NormalizationParameters<'_, T>,
    training: bool,
    momentum: f64,
    eps: f64,
) -> Result<(Tensor<T>, Option<SavedStatistics<T>>)> {
    if training {
        let (mean, invstd) = compute_training_statistics::<T, InvStd>(
            input,
            params.running_mean.as_deref_mut(),
            params.running_var.as_deref_mut(),
            momentum,
            eps,
        )?;
        let saved = SavedStatistics { mean, invstd };
        let output = transform_input(
            input,
            params.weight,
            params.bias,
            Some(&saved),
            params.running_mean(),
            params.running_var(),
            true,
            eps,
        )?;
        Ok((output, Some(saved)))
    } else {
        let output = transform_input(
            input,
            params.weight,
            params.bias,
            None,
            params.running_mean(),
            params.running_var(),
            false,
            eps,
        )?;
        Ok((output, None))
    }
}

/// Batch normalization returning only the output.
///
/// Uses the process-wide registry of `T` on a CPU-only host. An input without elements
/// is returned as a copy (scaled by `weight[0]` and shifted by `bias[0]` when present)
/// without consulting any strategy.
pub fn batch_norm<T: NormFloat>(
    input: &Tensor<T>,
    params: &mut NormalizationParameters<'_, T>,
    training: bool,
    momentum: f64,
    eps: f64,
) -> Result<Tensor<T>> {
    batch_norm_with_selector(
        &BackendSelector::<T>::default(),
        input,
        params,
        training,
        momentum,
        eps,
        &BackendCapabilities::default(),
    )
}

/// [`batch_norm`] with an explicit selector and host capabilities
pub fn batch_norm_with_selector<T: NormFloat>(
    selector: &BackendSelector<'_, T>,
    input: &Tensor<T>,
    params: &mut NormalizationParameters<'_, T>,
    training: bool,
    momentum: f64,
    eps: f64,
    capabilities: &BackendCapabilities,
) -> Result<Tensor<T>> {
    if input.numel() == 0 {
        input_channels(input, "batch_norm")?;
        return Ok(empty_passthrough(input, params));
    }

    let result = selector.forward(input, params, training, momentum, eps, capabilities)?;
    Ok(result.output)
}

fn empty_passthrough<T: NormFloat>(
    input: &Tensor<T>,
    params: &NormalizationParameters<'_, T>,
) -> Tensor<T> {
    trace!(shape = %input.shape(), "batch norm on empty input");
    let first = |t: Option<&Tensor<T>>| t.and_then(|t| t.view().iter().next().copied());
    let scale = first(params.weight).unwrap_or_else(T::one);
    let shift = first(params.bias).unwrap_or_else(T::zero);
    let output = input.view().mapv(|x| x * scale + shift);
    Tensor::from_array(output).to_device(*input.device())
}
