//! Tensor Module
//!
//! A deliberately small N-D array: an owned `ndarray::ArrayD` plus the logical shape
//! and the device tag. Views may be strided; normalization kernels pick fast paths
//! from the memory format reported here.
//!
//! ## Module Organization
//!
//! - [`core`] - The `Tensor` structure and property access
//! - [`creation`] - Constructors, including channels-last construction
//! - [`device`] - Device tagging and conversion

pub mod core;
pub mod creation;
pub mod device;

pub use self::core::Tensor;
