//! Per-channel batch statistics
//!
//! Reduces every axis except the channel axis (logical axis 1) to a per-channel mean
//! and biased variance, accumulating in the widened type of the element. The same
//! pass optionally blends the batch statistics into running statistics:
//!
//! ```text
//! running_mean[c] = momentum * mean[c]          + (1 - momentum) * running_mean[c]
//! running_var[c]  = momentum * var_sum[c]/(n-1) + (1 - momentum) * running_var[c]
//! ```
//!
//! The returned variance is biased (`var_sum / n`); only the running update uses the
//! unbiased estimator.

use crate::scalar::{Accumulator, NormFloat};
use crate::{Result, Tensor, TensorError};
use ndarray::Axis;
use num_traits::{Float, One, Zero};
use rayon::prelude::*;
use tracing::{trace, warn};

use super::params::input_channels;

/// Transformation applied to the biased variance before it is returned
pub trait VarTransform {
    fn apply<A: Float>(var: A, eps: A) -> A;
}

/// Returns the variance unchanged
#[derive(Debug, Clone, Copy)]
pub struct Var;

/// Returns `1 / sqrt(var + eps)`, or `0` when both are zero
#[derive(Debug, Clone, Copy)]
pub struct InvStd;

impl VarTransform for Var {
    #[inline]
    fn apply<A: Float>(var: A, _eps: A) -> A {
        var
    }
}

impl VarTransform for InvStd {
    #[inline]
    fn apply<A: Float>(var: A, eps: A) -> A {
        if var == A::zero() && eps == A::zero() {
            return A::zero();
        }
        A::one() / (var + eps).sqrt()
    }
}

/// Mean (in element precision) and sum of squared deviations for one channel
#[derive(Debug, Clone, Copy)]
struct ChannelMoments<T, A> {
    mean: T,
    var_sum: A,
}

/// Compute per-channel batch mean and transformed biased variance of `input`,
/// blending them into the running statistics when those are given.
///
/// Returns `(mean, V::apply(var, eps))`, both of shape `[C]`.
pub fn compute_training_statistics<T, V>(
    input: &Tensor<T>,
    running_mean: Option<&mut Tensor<T>>,
    running_var: Option<&mut Tensor<T>>,
    momentum: f64,
    eps: f64,
) -> Result<(Tensor<T>, Tensor<T>)>
where
    T: NormFloat,
    V: VarTransform,
{
    let num_channels = input_channels(input, "compute_training_statistics")?;
    let reduction_size = input.shape().reduction_size();
    trace!(
        shape = %input.shape(),
        num_channels,
        reduction_size,
        "collecting batch statistics"
    );

    if reduction_size == 0 {
        return Err(TensorError::invalid_shape(
            "compute_training_statistics",
            "cannot compute statistics over an empty reduction",
            input.shape().dims(),
        ));
    }

    let count = T::Acc::from_count(reduction_size);
    let view = input.view();
    let moments: Vec<ChannelMoments<T, T::Acc>> = view
        .axis_iter(Axis(1))
        .into_par_iter()
        .map(|plane| {
            let sum = plane
                .iter()
                .fold(T::Acc::zero(), |acc, &x| acc + x.to_acc());
            // The deviation pass is centred on the mean rounded to element precision.
            let mean = T::from_acc(sum / count);
            let centre = mean.to_acc();
            let var_sum = plane.iter().fold(T::Acc::zero(), |acc, &x| {
                let d = x.to_acc() - centre;
                acc + d * d
            });
            ChannelMoments { mean, var_sum }
        })
        .collect();

    let eps_acc = T::Acc::from_f64_exact(eps);
    let save_mean: Vec<T> = moments.iter().map(|m| m.mean).collect();
    let save_var: Vec<T> = moments
        .iter()
        .map(|m| T::from_acc(V::apply(m.var_sum / count, eps_acc)))
        .collect();

    let momentum_acc = T::Acc::from_f64_exact(momentum);
    let keep = T::Acc::one() - momentum_acc;

    if let Some(running_mean) = running_mean {
        for (slot, m) in running_mean.view_mut().iter_mut().zip(moments.iter()) {
            *slot = T::from_acc(momentum_acc * m.mean.to_acc() + keep * slot.to_acc());
        }
    }

    if let Some(running_var) = running_var {
        if reduction_size > 1 {
            let unbiased_count = T::Acc::from_count(reduction_size - 1);
            for (slot, m) in running_var.view_mut().iter_mut().zip(moments.iter()) {
                let unbiased = m.var_sum / unbiased_count;
                *slot = T::from_acc(momentum_acc * unbiased + keep * slot.to_acc());
            }
        } else {
            warn!(
                num_channels,
                "one value per channel; unbiased variance undefined, running_var left unchanged"
            );
        }
    }

    Ok((
        Tensor::from_vec(save_mean, &[num_channels])?.to_device(*input.device()),
        Tensor::from_vec(save_var, &[num_channels])?.to_device(*input.device()),
    ))
}

/// Compute the batch mean and biased variance of `input` and blend them into the
/// running statistics. Performs no normalization.
///
/// Returns `(mean, var)`, both of shape `[C]`.
pub fn batch_norm_update_stats<T: NormFloat>(
    input: &Tensor<T>,
    running_mean: Option<&mut Tensor<T>>,
    running_var: Option<&mut Tensor<T>>,
    momentum: f64,
) -> Result<(Tensor<T>, Tensor<T>)> {
    const OPERATION: &str = "batch_norm_update_stats";

    let num_channels = input_channels(input, OPERATION)?;
    crate::config::validate_hyper_parameters(OPERATION, momentum, 0.0)?;
    for (name, param) in [
        ("running_mean", running_mean.as_deref()),
        ("running_var", running_var.as_deref()),
    ] {
        if let Some(param) = param {
            if param.numel() != num_channels {
                return Err(TensorError::parameter_length(
                    OPERATION,
                    name,
                    num_channels,
                    param.numel(),
                ));
            }
        }
    }

    compute_training_statistics::<T, Var>(input, running_mean, running_var, momentum, 0.0)
}
