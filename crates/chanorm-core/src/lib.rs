//! # chanorm-core
//!
//! Per-channel statistical normalization kernels for dense `f32`/`f64` tensors.
//!
//! The crate computes, applies and differentiates the batch-normalization transform
//!
//! ```text
//! y = (x - mean[c]) * invstd[c] * weight[c] + bias[c]
//! ```
//!
//! where `c` is the index along axis 1 and the statistics are reduced over every other
//! axis. Calls are routed through a [`BackendSelector`], which validates the call once,
//! picks the first registered strategy whose capability predicate matches and records
//! it in a [`ForwardState`] so the matching backward runs later.
//!
//! ```rust
//! use chanorm_core::{batch_norm, NormalizationParameters, Tensor};
//!
//! let input = Tensor::<f32>::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
//! let mut running_mean = Tensor::zeros(&[2]);
//! let mut running_var = Tensor::ones(&[2]);
//! let mut params = NormalizationParameters::new()
//!     .with_running_stats(&mut running_mean, &mut running_var);
//!
//! let output = batch_norm(&input, &mut params, true, 0.1, 1e-5).unwrap();
//! assert_eq!(output.shape().dims(), &[2, 2]);
//! ```
//!
//! Also provided: [`instance_norm`], [`renorm`], [`batch_norm_update_stats`] and the
//! finite-difference checker in [`numerical_gradient`].

#![allow(clippy::result_large_err)]

pub mod config;
pub mod device;
pub mod dispatch_registry;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod numerical_gradient;
pub mod ops;
pub mod scalar;
pub mod shape;
pub mod tensor;

pub use config::{AcceleratedALibrary, BackendCapabilities, NormConfig, DEFAULT_EPS, DEFAULT_MOMENTUM};
pub use device::Device;
pub use dispatch_registry::{
    AcceleratedBackend, CapabilityQuery, NativeStrategy, NormalizationStrategy, StrategyOutput,
    StrategyRegistry, StrategyRegistryBuilder, StrategyTag, F32_REGISTRY, F64_REGISTRY,
};
pub use dtype::{dtype_from_type, DType};
pub use error::{ErrorContext, Result, TensorError};
pub use layout::MemoryFormat;
pub use numerical_gradient::{check_gradients, GradientCheckConfig, GradientCheckResult};
pub use ops::{
    batch_norm, batch_norm_backward, batch_norm_update_stats, batch_norm_with_selector,
    instance_norm, renorm, BackendSelector, ForwardResult, ForwardState, GradientMask,
    Gradients, NormOrder, NormalizationParameters, SavedStatistics,
};
pub use scalar::{Accumulator, NormFloat};
pub use shape::Shape;
pub use tensor::Tensor;
