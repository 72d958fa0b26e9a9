//! Normalization Operations
//!
//! Per-channel normalization over the logical channel axis 1. Statistics for a
//! channel are reduced over every other axis and accumulated in the widened type of
//! the element ([`NormFloat::Acc`]).
//!
//! # Modules
//! - [`statistics`] - batch mean and variance, running-statistic blending
//! - [`transform`] - the affine transform with its contiguous and channels-last fast paths
//! - [`backward`] - input, weight and bias gradients
//! - [`selector`] - strategy selection and forward/backward pairing
//! - [`batch_norm`] - native forward and the convenience entry points
//! - [`instance_norm`] - per-sample statistics on top of batch normalization
//!
//! [`NormFloat::Acc`]: crate::scalar::NormFloat::Acc

pub mod backward;
pub mod batch_norm;
pub mod instance_norm;
pub mod params;
pub mod selector;
pub mod statistics;
pub mod transform;

#[cfg(test)]
mod tests;

pub use backward::batch_norm_backward;
pub use batch_norm::{batch_norm, batch_norm_cpu, batch_norm_with_selector};
pub use instance_norm::instance_norm;
pub use params::{GradientMask, Gradients, NormalizationParameters, SavedStatistics};
pub use selector::{BackendSelector, ForwardResult, ForwardState};
pub use statistics::{batch_norm_update_stats, compute_training_statistics, InvStd, Var, VarTransform};
pub use transform::{
    collect_fused_coefficients, select_transform_path, transform_input, FusedCoefficients,
    TransformPath,
};
