//! Normalization operations
//!
//! - [`normalization`] - batch and instance normalization, their backward pass and the
//!   backend selector
//! - [`renorm`] - max-norm renormalization of tensor slices

pub mod normalization;
pub mod renorm;

pub use normalization::{
    batch_norm, batch_norm_backward, batch_norm_update_stats, batch_norm_with_selector,
    instance_norm, BackendSelector, ForwardResult, ForwardState, GradientMask, Gradients,
    NormalizationParameters, SavedStatistics,
};
pub use renorm::{renorm, NormOrder};
