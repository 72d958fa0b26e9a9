//! Normalization hyper-parameters and backend availability
//!
//! [`NormConfig`] bundles the per-call hyper-parameters most callers pass unchanged
//! from step to step. [`BackendCapabilities`] describes what the host offers to the
//! capability predicates of the accelerated strategies; its default is a CPU-only host.

use crate::{Result, TensorError};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Default momentum for running-statistic blending
pub const DEFAULT_MOMENTUM: f64 = 0.1;

/// Default variance stabilizer
pub const DEFAULT_EPS: f64 = 1e-5;

/// Hyper-parameters for batch and instance normalization
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct NormConfig {
    /// Weight of the current batch when blending running statistics
    pub momentum: f64,
    /// Added to the variance before taking the inverse square root
    pub eps: f64,
    /// Allow accelerated strategies to be selected
    pub accelerated_enabled: bool,
}

impl Default for NormConfig {
    fn default() -> Self {
        Self {
            momentum: DEFAULT_MOMENTUM,
            eps: DEFAULT_EPS,
            accelerated_enabled: true,
        }
    }
}

impl NormConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_accelerated(mut self, enabled: bool) -> Self {
        self.accelerated_enabled = enabled;
        self
    }

    /// Reject non-finite values. Momentum outside `[0, 1]` is accepted as-is.
    pub fn validate(&self) -> Result<()> {
        validate_hyper_parameters("norm_config", self.momentum, self.eps)
    }

    /// Apply the accelerated toggle on top of the host capabilities
    pub fn capabilities(&self, host: &BackendCapabilities) -> BackendCapabilities {
        BackendCapabilities {
            enabled: host.enabled && self.accelerated_enabled,
            ..host.clone()
        }
    }
}

pub(crate) fn validate_hyper_parameters(operation: &str, momentum: f64, eps: f64) -> Result<()> {
    if !momentum.is_finite() {
        return Err(TensorError::invalid_argument_op(
            operation,
            &format!("momentum must be finite, got {momentum}"),
        ));
    }
    if !eps.is_finite() {
        return Err(TensorError::invalid_argument_op(
            operation,
            &format!("eps must be finite, got {eps}"),
        ));
    }
    Ok(())
}

/// Properties of the first accelerated library
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct AcceleratedALibrary {
    /// Library version number, e.g. `7600`
    pub version: u32,
    /// Smallest `eps` the library accepts
    pub min_epsilon: f64,
}

impl AcceleratedALibrary {
    /// Lowest library version whose batch-norm kernels are used
    pub const MIN_VERSION: u32 = 5110;

    pub fn new(version: u32, min_epsilon: f64) -> Self {
        Self {
            version,
            min_epsilon,
        }
    }
}

/// Accelerated libraries available on the host
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct BackendCapabilities {
    /// First accelerated library, when compiled in
    pub accelerated_a: Option<AcceleratedALibrary>,
    /// Second accelerated library compiled in
    pub accelerated_b_available: bool,
    /// Global toggle for accelerated strategies
    pub enabled: bool,
}

impl BackendCapabilities {
    /// Host without any accelerated library
    pub fn cpu_only() -> Self {
        Self::default()
    }

    pub fn with_accelerated_a(mut self, library: AcceleratedALibrary) -> Self {
        self.accelerated_a = Some(library);
        self
    }

    pub fn with_accelerated_b(mut self, available: bool) -> Self {
        self.accelerated_b_available = available;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// True when any accelerated library could be selected
    pub fn any_accelerated(&self) -> bool {
        self.enabled && (self.accelerated_a.is_some() || self.accelerated_b_available)
    }
}
