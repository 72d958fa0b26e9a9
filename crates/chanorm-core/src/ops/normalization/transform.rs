//! Forward normalization transform
//!
//! Applies `y = (x - mean) * invstd * weight + bias` per channel. Three code paths
//! produce the same values:
//!
//! - **generic**: broadcasting over `[1, C, 1, ..]` views, any memory format;
//! - **contiguous**: standard layout input, `y = x * alpha[c] + beta[c]` over `(n, c)`
//!   planes in parallel;
//! - **channels-last**: `[N, *spatial, C]` memory, inner loop over channels, output
//!   keeps the channels-last format.
//!
//! The fused paths are taken only in evaluation mode, where `mean` and `invstd` come
//! from the running statistics.

use crate::layout::{channels_last_inverse, channels_last_order};
use crate::scalar::NormFloat;
use crate::{Result, Tensor, TensorError};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Zip};
use rayon::prelude::*;
use tracing::{debug, trace};

use super::params::{input_channels, SavedStatistics};

/// Implementation chosen by [`select_transform_path`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformPath {
    Generic,
    Contiguous,
    ChannelsLast,
}

/// Per-channel coefficients of the fused form `y = x * alpha + beta`
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCoefficients<T> {
    pub alpha: Vec<T>,
    pub beta: Vec<T>,
}

/// Fold mean, variance and the affine parameters into per-channel `alpha` / `beta`:
///
/// ```text
/// invstd = 1 / sqrt(var + eps)
/// alpha  = invstd * weight
/// beta   = bias - mean * invstd * weight
/// ```
///
/// Absent weight counts as 1, absent bias as 0.
pub fn collect_fused_coefficients<T: NormFloat>(
    weight: Option<&Tensor<T>>,
    bias: Option<&Tensor<T>>,
    mean: &Tensor<T>,
    variance: &Tensor<T>,
    eps: f64,
) -> FusedCoefficients<T> {
    let eps = T::from_f64_lossy(eps);
    let mean = mean.to_vec();
    let variance = variance.to_vec();
    let weight = weight.map(|w| w.to_vec());
    let bias = bias.map(|b| b.to_vec());

    let mut alpha = Vec::with_capacity(mean.len());
    let mut beta = Vec::with_capacity(mean.len());
    for c in 0..mean.len() {
        let invstd = T::one() / (variance[c] + eps).sqrt();
        let w = weight.as_ref().map_or(T::one(), |w| w[c]);
        let b = bias.as_ref().map_or(T::zero(), |b| b[c]);
        alpha.push(invstd * w);
        beta.push(b - mean[c] * invstd * w);
    }
    FusedCoefficients { alpha, beta }
}

/// Pick the implementation for a forward transform
pub fn select_transform_path<T>(
    input: &Tensor<T>,
    weight: Option<&Tensor<T>>,
    bias: Option<&Tensor<T>>,
    running_mean: Option<&Tensor<T>>,
    running_var: Option<&Tensor<T>>,
    training: bool,
) -> TransformPath {
    if training {
        return TransformPath::Generic;
    }
    let operands_contiguous = [weight, bias, running_mean, running_var]
        .iter()
        .all(|t| t.map_or(true, |t| t.is_contiguous()));
    if !operands_contiguous || running_mean.is_none() || running_var.is_none() {
        return TransformPath::Generic;
    }
    if input.is_contiguous() {
        TransformPath::Contiguous
    } else if input.is_channels_last_contiguous() {
        TransformPath::ChannelsLast
    } else {
        TransformPath::Generic
    }
}

/// Normalize `input` per channel.
///
/// Training mode uses `saved` (batch mean and inverse standard deviation); evaluation
/// mode derives `invstd = 1 / sqrt(running_var + eps)` from the running statistics.
#[allow(clippy::too_many_arguments)]
pub fn transform_input<T: NormFloat>(
    input: &Tensor<T>,
    weight: Option<&Tensor<T>>,
    bias: Option<&Tensor<T>>,
    saved: Option<&SavedStatistics<T>>,
    running_mean: Option<&Tensor<T>>,
    running_var: Option<&Tensor<T>>,
    training: bool,
    eps: f64,
) -> Result<Tensor<T>> {
    let path = select_transform_path(input, weight, bias, running_mean, running_var, training);
    debug!(?path, shape = %input.shape(), training, "normalization transform");

    match (path, training) {
        (_, true) => {
            let saved = saved.ok_or_else(|| {
                TensorError::missing_state(
                    "transform_input",
                    "training mode requires saved batch statistics",
                )
            })?;
            apply_generic(input, &saved.mean, &saved.invstd, weight, bias)
        }
        (TransformPath::Contiguous, false) | (TransformPath::ChannelsLast, false) => {
            let (mean, var) = running_stats(running_mean, running_var)?;
            let coefficients = collect_fused_coefficients(weight, bias, mean, var, eps);
            if path == TransformPath::Contiguous {
                apply_contiguous(input, &coefficients)
            } else {
                apply_channels_last(input, &coefficients)
            }
        }
        (TransformPath::Generic, false) => {
            let (mean, var) = running_stats(running_mean, running_var)?;
            let invstd = inverse_std(var, eps);
            apply_generic(input, mean, &invstd, weight, bias)
        }
    }
}

fn running_stats<'t, T>(
    running_mean: Option<&'t Tensor<T>>,
    running_var: Option<&'t Tensor<T>>,
) -> Result<(&'t Tensor<T>, &'t Tensor<T>)> {
    match (running_mean, running_var) {
        (Some(mean), Some(var)) => Ok((mean, var)),
        _ => Err(TensorError::missing_state(
            "transform_input",
            "running_mean and running_var must be defined in evaluation mode",
        )),
    }
}

/// `1 / sqrt(var + eps)` per channel
pub(crate) fn inverse_std<T: NormFloat>(variance: &Tensor<T>, eps: f64) -> Tensor<T> {
    let eps = T::from_f64_lossy(eps);
    let invstd = variance.view().mapv(|v| T::one() / (v + eps).sqrt());
    Tensor::from_array(invstd).to_device(*variance.device())
}

/// View a `[C]` tensor as `[1, C, 1, ..]` with `rank` axes
fn broadcast_channel_view<T>(channel: ArrayViewD<'_, T>, rank: usize) -> ArrayViewD<'_, T> {
    let mut view = channel.insert_axis(Axis(0));
    while view.ndim() < rank {
        let last = view.ndim();
        view = view.insert_axis(Axis(last));
    }
    view
}

fn per_channel_or<T: NormFloat>(
    param: Option<&Tensor<T>>,
    channels: usize,
    fill: T,
) -> Result<ArrayD<T>> {
    match param {
        Some(p) => Ok(ArrayD::from_shape_vec(IxDyn(&[channels]), p.to_vec())?),
        None => Ok(ArrayD::from_elem(IxDyn(&[channels]), fill)),
    }
}

/// Broadcasting path: `((x - mean) * invstd) * weight + bias`, any memory format.
/// Output is in standard layout.
pub fn apply_generic<T: NormFloat>(
    input: &Tensor<T>,
    mean: &Tensor<T>,
    invstd: &Tensor<T>,
    weight: Option<&Tensor<T>>,
    bias: Option<&Tensor<T>>,
) -> Result<Tensor<T>> {
    let channels = input_channels(input, "apply_generic")?;
    let rank = input.rank();

    let mean = per_channel_or(Some(mean), channels, T::zero())?;
    let invstd = per_channel_or(Some(invstd), channels, T::one())?;
    let weight = per_channel_or(weight, channels, T::one())?;
    let bias = per_channel_or(bias, channels, T::zero())?;

    let view = input.view();
    let mut output = ArrayD::<T>::zeros(view.raw_dim());
    Zip::from(&mut output)
        .and(&view)
        .and_broadcast(&broadcast_channel_view(mean.view(), rank))
        .and_broadcast(&broadcast_channel_view(invstd.view(), rank))
        .and_broadcast(&broadcast_channel_view(weight.view(), rank))
        .and_broadcast(&broadcast_channel_view(bias.view(), rank))
        .par_for_each(|out, &x, &m, &s, &w, &b| {
            *out = ((x - m) * s) * w + b;
        });

    Ok(Tensor::from_array(output).to_device(*input.device()))
}

/// Standard-layout fast path: `y = x * alpha[c] + beta[c]`, one task per `(n, c)` plane
pub fn apply_contiguous<T: NormFloat>(
    input: &Tensor<T>,
    coefficients: &FusedCoefficients<T>,
) -> Result<Tensor<T>> {
    let data = input.as_slice().ok_or_else(|| {
        TensorError::invalid_argument_op(
            "apply_contiguous",
            "input must be contiguous in standard layout",
        )
    })?;
    let channels = coefficients.alpha.len();
    let image_size = input.shape().image_size();
    trace!(channels, image_size, "contiguous fused transform");

    let mut output = vec![T::zero(); data.len()];
    if image_size > 0 && channels > 0 {
        output
            .par_chunks_mut(image_size)
            .zip(data.par_chunks(image_size))
            .enumerate()
            .for_each(|(plane, (out, x))| {
                let c = plane % channels;
                let (alpha, beta) = (coefficients.alpha[c], coefficients.beta[c]);
                for (o, &v) in out.iter_mut().zip(x) {
                    *o = v * alpha + beta;
                }
            });
    }

    Ok(Tensor::from_vec(output, input.shape().dims())?.to_device(*input.device()))
}

/// Channels-last fast path. The result keeps the `[N, *spatial, C]` memory format.
pub fn apply_channels_last<T: NormFloat>(
    input: &Tensor<T>,
    coefficients: &FusedCoefficients<T>,
) -> Result<Tensor<T>> {
    let rank = input.rank();
    let physical = input.view().permuted_axes(channels_last_order(rank));
    let data = physical.as_slice().ok_or_else(|| {
        TensorError::invalid_argument_op(
            "apply_channels_last",
            "input must be contiguous in channels-last layout",
        )
    })?;
    let channels = coefficients.alpha.len();
    trace!(channels, "channels-last fused transform");

    let mut output = vec![T::zero(); data.len()];
    if channels == 1 {
        let (alpha, beta) = (coefficients.alpha[0], coefficients.beta[0]);
        output
            .par_iter_mut()
            .zip(data.par_iter())
            .for_each(|(o, &v)| *o = v * alpha + beta);
    } else if channels > 0 {
        output
            .par_chunks_mut(channels)
            .zip(data.par_chunks(channels))
            .for_each(|(out, x)| {
                for c in 0..channels {
                    out[c] = x[c] * coefficients.alpha[c] + coefficients.beta[c];
                }
            });
    }

    let array = ArrayD::from_shape_vec(IxDyn(physical.shape()), output)?
        .permuted_axes(channels_last_inverse(rank));
    Ok(Tensor::from_array(array).to_device(*input.device()))
}
