#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Logical extent of a tensor. Axis 1 is the channel axis for every
/// normalization routine in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    pub fn from_slice(dims: &[usize]) -> Self {
        Self {
            dims: dims.to_vec(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Size of the channel axis, if the shape has one
    pub fn num_channels(&self) -> Option<usize> {
        self.dims.get(1).copied()
    }

    /// Size of the batch axis, if the shape has one
    pub fn batch_size(&self) -> Option<usize> {
        self.dims.first().copied()
    }

    /// Number of elements reduced per channel (`numel / C`)
    pub fn reduction_size(&self) -> usize {
        match self.num_channels() {
            Some(c) if c > 0 => self.size() / c,
            _ => 0,
        }
    }

    /// Number of elements in one `(n, c)` plane (product of the spatial axes)
    pub fn image_size(&self) -> usize {
        self.dims.iter().skip(2).product()
    }

    /// Get an iterator over the dimensions
    pub fn iter(&self) -> std::slice::Iter<'_, usize> {
        self.dims.iter()
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.clone()
    }
}

impl Index<usize> for Shape {
    type Output = usize;

    fn index(&self, index: usize) -> &Self::Output {
        &self.dims[index]
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")
    }
}
