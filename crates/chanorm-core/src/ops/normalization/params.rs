//! Per-channel parameters and the values passed between forward and backward

use crate::error::ErrorContext;
use crate::{Result, Tensor, TensorError};

/// Optional affine parameters and running statistics for one normalization call.
///
/// Every present tensor holds exactly `input.shape[1]` elements. Running statistics are
/// borrowed mutably because training calls blend the batch statistics into them.
pub struct NormalizationParameters<'a, T> {
    pub weight: Option<&'a Tensor<T>>,
    pub bias: Option<&'a Tensor<T>>,
    pub running_mean: Option<&'a mut Tensor<T>>,
    pub running_var: Option<&'a mut Tensor<T>>,
}

impl<T> Default for NormalizationParameters<'_, T> {
    fn default() -> Self {
        Self {
            weight: None,
            bias: None,
            running_mean: None,
            running_var: None,
        }
    }
}

impl<'a, T> NormalizationParameters<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weight(mut self, weight: &'a Tensor<T>) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_bias(mut self, bias: &'a Tensor<T>) -> Self {
        self.bias = Some(bias);
        self
    }

    /// Set both affine parameters
    pub fn with_affine(self, weight: &'a Tensor<T>, bias: &'a Tensor<T>) -> Self {
        self.with_weight(weight).with_bias(bias)
    }

    pub fn with_running_mean(mut self, running_mean: &'a mut Tensor<T>) -> Self {
        self.running_mean = Some(running_mean);
        self
    }

    pub fn with_running_var(mut self, running_var: &'a mut Tensor<T>) -> Self {
        self.running_var = Some(running_var);
        self
    }

    /// Set both running statistics
    pub fn with_running_stats(
        self,
        running_mean: &'a mut Tensor<T>,
        running_var: &'a mut Tensor<T>,
    ) -> Self {
        self.with_running_mean(running_mean)
            .with_running_var(running_var)
    }

    pub fn running_mean(&self) -> Option<&Tensor<T>> {
        self.running_mean.as_deref()
    }

    pub fn running_var(&self) -> Option<&Tensor<T>> {
        self.running_var.as_deref()
    }

    /// True when both running statistics are present
    pub fn has_running_stats(&self) -> bool {
        self.running_mean.is_some() && self.running_var.is_some()
    }

    /// Check the parameters against `input` and return the channel count.
    ///
    /// Checks run in this order: input rank, parameter lengths, running statistics in
    /// evaluation mode, then parameter devices.
    pub fn validate(&self, input: &Tensor<T>, training: bool, operation: &str) -> Result<usize>
    where
        T: 'static,
    {
        let num_channels = input_channels(input, operation)?;

        let named = [
            ("weight", self.weight),
            ("bias", self.bias),
            ("running_mean", self.running_mean()),
            ("running_var", self.running_var()),
        ];

        for (name, param) in named.iter() {
            if let Some(param) = param {
                if param.numel() != num_channels {
                    return Err(TensorError::parameter_length(
                        operation,
                        name,
                        num_channels,
                        param.numel(),
                    )
                    .with_context(input_context(input)));
                }
            }
        }

        if !training && !self.has_running_stats() {
            return Err(TensorError::missing_state(
                operation,
                "running_mean and running_var must be defined in evaluation mode",
            ));
        }

        for (name, param) in named.iter() {
            if let Some(param) = param {
                if param.device() != input.device() {
                    return Err(TensorError::device_mismatch(
                        operation,
                        &format!("input on {}", input.device()),
                        &format!("{name} on {}", param.device()),
                    ));
                }
            }
        }

        Ok(num_channels)
    }
}

/// Channel count of a normalization input (rank must be at least 2)
pub(crate) fn input_channels<T: 'static>(input: &Tensor<T>, operation: &str) -> Result<usize> {
    let shape = input.shape();
    if shape.rank() < 2 {
        return Err(TensorError::invalid_shape(
            operation,
            &format!(
                "expected input with at least 2 dimensions (N, C, ...), got {}",
                shape.rank()
            ),
            shape.dims(),
        ));
    }
    Ok(shape[1])
}

fn input_context<T: 'static>(input: &Tensor<T>) -> ErrorContext {
    ErrorContext::new().with_input_tensor(input.shape().dims(), *input.device(), input.dtype())
}

/// Batch statistics produced by a training forward and consumed by its backward
#[derive(Debug, Clone)]
pub struct SavedStatistics<T> {
    /// Per-channel batch mean, `[C]`
    pub mean: Tensor<T>,
    /// Per-channel `1 / sqrt(var + eps)`, `[C]`
    pub invstd: Tensor<T>,
}

/// Selects which gradients the backward pass computes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradientMask {
    pub input: bool,
    pub weight: bool,
    pub bias: bool,
}

impl GradientMask {
    pub fn new(input: bool, weight: bool, bias: bool) -> Self {
        Self {
            input,
            weight,
            bias,
        }
    }

    pub fn all() -> Self {
        Self::new(true, true, true)
    }

    pub fn input_only() -> Self {
        Self::new(true, false, false)
    }

    pub fn any(&self) -> bool {
        self.input || self.weight || self.bias
    }
}

impl Default for GradientMask {
    fn default() -> Self {
        Self::all()
    }
}

impl From<[bool; 3]> for GradientMask {
    fn from(mask: [bool; 3]) -> Self {
        Self::new(mask[0], mask[1], mask[2])
    }
}

/// Gradients requested through a [`GradientMask`]; unrequested entries are `None`
#[derive(Debug, Clone)]
pub struct Gradients<T> {
    pub grad_input: Option<Tensor<T>>,
    pub grad_weight: Option<Tensor<T>>,
    pub grad_bias: Option<Tensor<T>>,
}

impl<T> Gradients<T> {
    /// Drop every gradient the mask does not request
    pub fn masked(self, mask: GradientMask) -> Self {
        Self {
            grad_input: self.grad_input.filter(|_| mask.input),
            grad_weight: self.grad_weight.filter(|_| mask.weight),
            grad_bias: self.grad_bias.filter(|_| mask.bias),
        }
    }
}
