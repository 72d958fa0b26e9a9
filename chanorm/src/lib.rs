//! # chanorm - Per-Channel Normalization for Rust
//!
//! chanorm computes, applies and differentiates per-channel statistical
//! normalization over dense `f32` / `f64` tensors whose channel axis is axis 1:
//!
//! - **Batch normalization**: training and evaluation forward, running statistics,
//!   input/weight/bias gradients
//! - **Instance normalization**: statistics per `(sample, channel)` pair
//! - **Renorm**: clamp the p-norm of every slice along a dimension
//! - **Backend selection**: an ordered registry of strategies with capability
//!   predicates, so accelerated implementations can be plugged in
//!
//! ## Quick Start
//!
//! ```rust
//! use chanorm::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input = Tensor::<f32>::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2])?;
//! let weight = Tensor::<f32>::ones(&[2]);
//! let bias = Tensor::<f32>::zeros(&[2]);
//! let mut running_mean = Tensor::<f32>::zeros(&[2]);
//! let mut running_var = Tensor::<f32>::ones(&[2]);
//!
//! let config = NormConfig::default();
//! let selector = BackendSelector::<f32>::default();
//! let mut params = NormalizationParameters::new()
//!     .with_affine(&weight, &bias)
//!     .with_running_stats(&mut running_mean, &mut running_var);
//!
//! // Forward in training mode, then the matching backward
//! let forward = selector.forward(
//!     &input,
//!     &mut params,
//!     true,
//!     config.momentum,
//!     config.eps,
//!     &BackendCapabilities::cpu_only(),
//! )?;
//! let grad_output = Tensor::<f32>::ones(&[3, 2]);
//! let grads = selector.backward(
//!     &forward.state,
//!     &input,
//!     &grad_output,
//!     &params,
//!     config.eps,
//!     GradientMask::all(),
//! )?;
//! assert!(grads.grad_input.is_some());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export the kernel crate
pub use chanorm_core as core;

/// Prelude module for convenient imports
///
/// ```rust
/// use chanorm::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::{DType, Device, Shape, Tensor, TensorError};
    pub use crate::core::{Accumulator, NormFloat};

    // Configuration
    pub use crate::core::{AcceleratedALibrary, BackendCapabilities, NormConfig};

    // Operations
    pub use crate::core::{
        batch_norm, batch_norm_backward, batch_norm_update_stats, instance_norm, renorm,
    };
    pub use crate::core::{GradientMask, Gradients, NormalizationParameters, SavedStatistics};

    // Backend selection
    pub use crate::core::{
        AcceleratedBackend, BackendSelector, ForwardResult, ForwardState, StrategyOutput,
        StrategyRegistry, StrategyTag,
    };
}

/// The version of the chanorm crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the version string of chanorm
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert_eq!(version(), VERSION);
    }
}
