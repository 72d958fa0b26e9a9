#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Element types known to the backend capability checks.
///
/// Only `Float32` and `Float64` have kernels in this crate; the half-precision
/// variants exist so accelerated-backend predicates can reason about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum DType {
    Float16,  // Half precision IEEE 754-2008
    BFloat16, // Brain floating point
    Float32,
    Float64,
}

impl DType {
    pub fn size(&self) -> usize {
        match self {
            DType::Float16 => 2,
            DType::BFloat16 => 2,
            DType::Float32 => 4,
            DType::Float64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::Float16 => "float16",
            DType::BFloat16 => "bfloat16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Get DType from Rust type
pub fn dtype_from_type<T: 'static>() -> DType {
    if std::any::TypeId::of::<T>() == std::any::TypeId::of::<f64>() {
        DType::Float64
    } else {
        DType::Float32
    }
}
