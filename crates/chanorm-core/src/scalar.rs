//! Numeric-type dispatch
//!
//! Normalization kernels are generic over the closed set of floating element types
//! implementing [`NormFloat`]. Each type names the wider type its reductions
//! accumulate in and the process-wide strategy registry used when callers do not
//! supply one.

use crate::dispatch_registry::{StrategyRegistry, F32_REGISTRY, F64_REGISTRY};
use crate::DType;
use num_traits::{Float, FromPrimitive};
use std::fmt::{Debug, Display};

mod private {
    pub trait Sealed {}

    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Accumulation scalar used for per-channel sums
pub trait Accumulator:
    Float + FromPrimitive + Debug + Display + Send + Sync + std::iter::Sum + 'static
{
    fn from_f64_exact(value: f64) -> Self;

    fn from_count(count: usize) -> Self;

    fn into_f64(self) -> f64;
}

impl Accumulator for f64 {
    #[inline]
    fn from_f64_exact(value: f64) -> Self {
        value
    }

    #[inline]
    fn from_count(count: usize) -> Self {
        count as f64
    }

    #[inline]
    fn into_f64(self) -> f64 {
        self
    }
}

/// Floating element type accepted by the normalization kernels
pub trait NormFloat:
    Float + FromPrimitive + Default + Debug + Display + Send + Sync + 'static + private::Sealed
{
    /// Widened type for reductions (`f64` for both `f32` and `f64`)
    type Acc: Accumulator;

    const DTYPE: DType;

    fn to_acc(self) -> Self::Acc;

    fn from_acc(acc: Self::Acc) -> Self;

    /// Lossy conversion used for hyper-parameters such as `eps` and `momentum`
    fn from_f64_lossy(value: f64) -> Self;

    /// Process-wide default strategy registry for this element type
    fn default_registry() -> &'static StrategyRegistry<Self>;
}

impl NormFloat for f32 {
    type Acc = f64;

    const DTYPE: DType = DType::Float32;

    #[inline]
    fn to_acc(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_acc(acc: f64) -> Self {
        acc as f32
    }

    #[inline]
    fn from_f64_lossy(value: f64) -> Self {
        value as f32
    }

    fn default_registry() -> &'static StrategyRegistry<f32> {
        &F32_REGISTRY
    }
}

impl NormFloat for f64 {
    type Acc = f64;

    const DTYPE: DType = DType::Float64;

    #[inline]
    fn to_acc(self) -> f64 {
        self
    }

    #[inline]
    fn from_acc(acc: f64) -> Self {
        acc
    }

    #[inline]
    fn from_f64_lossy(value: f64) -> Self {
        value
    }

    fn default_registry() -> &'static StrategyRegistry<f64> {
        &F64_REGISTRY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_in_f64() {
        let x = 0.1f32;
        assert_eq!(x.to_acc(), 0.1f32 as f64);
        assert_eq!(f32::from_acc(2.5), 2.5f32);
        assert_eq!(<f32 as NormFloat>::DTYPE, DType::Float32);
        assert_eq!(<f64 as NormFloat>::DTYPE, DType::Float64);
    }

    #[test]
    fn test_default_registries_are_native_only() {
        assert_eq!(f32::default_registry().len(), 1);
        assert_eq!(f64::default_registry().len(), 1);
    }
}
