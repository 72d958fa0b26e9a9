//! Backward pass of batch normalization
//!
//! With `xhat = (x - mean) * invstd`, per channel:
//!
//! ```text
//! sum  = Σ dy
//! dotp = Σ (x - mean) * dy
//!
//! training:   dx = (dy - sum/n - (x - mean) * dotp * invstd² / n) * invstd * w
//! evaluation: dx = dy * invstd * w
//! dw = dotp * invstd
//! db = sum
//! ```
//!
//! Reductions accumulate in the widened type; channels are processed in parallel.

use crate::scalar::{Accumulator, NormFloat};
use crate::{Result, Tensor, TensorError};
use ndarray::{ArrayD, Axis, Zip};
use num_traits::{Float, One, Zero};
use rayon::prelude::*;
use tracing::trace;

use super::params::{input_channels, GradientMask, Gradients, SavedStatistics};

/// Per-channel terms shared by all three gradients
#[derive(Debug, Clone, Copy)]
struct ChannelTerms<A> {
    mean: A,
    invstd: A,
    weight: A,
    sum: A,
    dotp: A,
}

/// Compute the gradients selected by `mask`.
///
/// Training mode differentiates through the batch statistics in `saved`; evaluation
/// mode treats the running statistics as constants. Absent weight counts as 1.
#[allow(clippy::too_many_arguments)]
pub fn batch_norm_backward<T: NormFloat>(
    grad_output: &Tensor<T>,
    input: &Tensor<T>,
    weight: Option<&Tensor<T>>,
    running_mean: Option<&Tensor<T>>,
    running_var: Option<&Tensor<T>>,
    saved: Option<&SavedStatistics<T>>,
    training: bool,
    eps: f64,
    mask: GradientMask,
) -> Result<Gradients<T>> {
    const OPERATION: &str = "batch_norm_backward";

    let num_channels = input_channels(input, OPERATION)?;
    if grad_output.shape() != input.shape() {
        return Err(TensorError::shape_mismatch(
            OPERATION,
            &format!("grad_output with shape {}", input.shape()),
            &format!("grad_output with shape {}", grad_output.shape()),
        ));
    }
    if let Some(w) = weight {
        if w.numel() != num_channels {
            return Err(TensorError::parameter_length(
                OPERATION,
                "weight",
                num_channels,
                w.numel(),
            ));
        }
    }

    let (mean, invstd) = channel_statistics(
        running_mean,
        running_var,
        saved,
        training,
        eps,
        num_channels,
    )?;
    let weight: Vec<T::Acc> = match weight {
        Some(w) => w.view().iter().map(|&v| v.to_acc()).collect(),
        None => vec![T::Acc::one(); num_channels],
    };

    let reduction_size = input.shape().reduction_size();
    trace!(
        shape = %input.shape(),
        training,
        ?mask,
        "batch norm backward"
    );

    let x_view = input.view();
    let dy_view = grad_output.view();
    let terms: Vec<ChannelTerms<T::Acc>> = x_view
        .axis_iter(Axis(1))
        .into_par_iter()
        .zip(dy_view.axis_iter(Axis(1)).into_par_iter())
        .enumerate()
        .map(|(c, (x, dy))| {
            let (sum, dotp) = Zip::from(&x).and(&dy).fold(
                (T::Acc::zero(), T::Acc::zero()),
                |(sum, dotp), &x, &dy| {
                    let dy = dy.to_acc();
                    (sum + dy, dotp + (x.to_acc() - mean[c]) * dy)
                },
            );
            ChannelTerms {
                mean: mean[c],
                invstd: invstd[c],
                weight: weight[c],
                sum,
                dotp,
            }
        })
        .collect();

    let grad_input = if mask.input {
        let mut grad = ArrayD::<T>::zeros(x_view.raw_dim());
        let count = T::Acc::from_count(reduction_size.max(1));
        grad.axis_iter_mut(Axis(1))
            .into_par_iter()
            .zip(x_view.axis_iter(Axis(1)).into_par_iter())
            .zip(dy_view.axis_iter(Axis(1)).into_par_iter())
            .zip(terms.par_iter())
            .for_each(|(((mut gi, x), dy), t)| {
                if training {
                    let k = t.dotp * t.invstd * t.invstd / count;
                    let grad_mean = t.sum / count;
                    let scale = t.invstd * t.weight;
                    Zip::from(&mut gi).and(&x).and(&dy).for_each(|gi, &x, &dy| {
                        let centred = x.to_acc() - t.mean;
                        *gi = T::from_acc((dy.to_acc() - grad_mean - centred * k) * scale);
                    });
                } else {
                    let scale = t.invstd * t.weight;
                    Zip::from(&mut gi).and(&dy).for_each(|gi, &dy| {
                        *gi = T::from_acc(dy.to_acc() * scale);
                    });
                }
            });
        Some(Tensor::from_array(grad).to_device(*input.device()))
    } else {
        None
    };

    let per_channel = |f: fn(&ChannelTerms<T::Acc>) -> T::Acc| -> Result<Tensor<T>> {
        let values = terms.iter().map(|t| T::from_acc(f(t))).collect();
        Ok(Tensor::from_vec(values, &[num_channels])?.to_device(*input.device()))
    };
    let grad_weight = if mask.weight {
        Some(per_channel(|t| t.dotp * t.invstd)?)
    } else {
        None
    };
    let grad_bias = if mask.bias {
        Some(per_channel(|t| t.sum)?)
    } else {
        None
    };

    Ok(Gradients {
        grad_input,
        grad_weight,
        grad_bias,
    })
}

/// Mean and inverse standard deviation per channel, in the accumulation type
fn channel_statistics<T: NormFloat>(
    running_mean: Option<&Tensor<T>>,
    running_var: Option<&Tensor<T>>,
    saved: Option<&SavedStatistics<T>>,
    training: bool,
    eps: f64,
    num_channels: usize,
) -> Result<(Vec<T::Acc>, Vec<T::Acc>)> {
    const OPERATION: &str = "batch_norm_backward";

    let check_len = |name: &str, t: &Tensor<T>| -> Result<()> {
        if t.numel() != num_channels {
            return Err(TensorError::parameter_length(
                OPERATION,
                name,
                num_channels,
                t.numel(),
            ));
        }
        Ok(())
    };
    let widen = |t: &Tensor<T>| -> Vec<T::Acc> { t.view().iter().map(|&v| v.to_acc()).collect() };

    if training {
        let saved = saved.ok_or_else(|| {
            TensorError::missing_state(
                OPERATION,
                "save_mean and save_invstd are required in training mode",
            )
        })?;
        check_len("save_mean", &saved.mean)?;
        check_len("save_invstd", &saved.invstd)?;
        Ok((widen(&saved.mean), widen(&saved.invstd)))
    } else {
        let (mean, var) = match (running_mean, running_var) {
            (Some(mean), Some(var)) => (mean, var),
            _ => {
                return Err(TensorError::missing_state(
                    OPERATION,
                    "running_mean and running_var are required in evaluation mode",
                ))
            }
        };
        check_len("running_mean", mean)?;
        check_len("running_var", var)?;
        let eps = T::Acc::from_f64_exact(eps);
        let invstd = var
            .view()
            .iter()
            .map(|&v| T::Acc::one() / (v.to_acc() + eps).sqrt())
            .collect();
        Ok((widen(mean), invstd))
    }
}
