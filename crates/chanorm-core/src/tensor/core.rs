//! Core Tensor Structure and Properties
//!
//! The tensor structure itself, plus read access to its elements, views, and memory
//! format. Channel axis conventions live in [`Shape`](crate::Shape).

use crate::layout::{self, MemoryFormat};
use crate::{Device, Shape};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};

/// Core tensor structure that holds data and metadata
#[derive(Debug, Clone)]
pub struct Tensor<T> {
    pub(in crate::tensor) data: ArrayD<T>,
    pub(in crate::tensor) shape: Shape,
    pub(in crate::tensor) device: Device,
}

impl<T> Tensor<T> {
    /// Get the shape of the tensor
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Get the device where the tensor is located
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Get the data type of the tensor
    pub fn dtype(&self) -> crate::DType
    where
        T: 'static,
    {
        crate::dtype_from_type::<T>()
    }

    /// Borrow the elements as a (possibly strided) logical view
    pub fn view(&self) -> ArrayViewD<'_, T> {
        self.data.view()
    }

    pub(crate) fn view_mut(&mut self) -> ArrayViewMutD<'_, T> {
        self.data.view_mut()
    }

    /// Borrow the underlying array
    pub fn array(&self) -> &ArrayD<T> {
        &self.data
    }

    /// Get the value at a logical index
    pub fn get(&self, index: &[usize]) -> Option<T>
    where
        T: Clone,
    {
        if index.len() != self.data.ndim() {
            return None;
        }
        self.data.get(index).cloned()
    }

    /// Get the underlying data as a slice, if the tensor is in standard layout
    pub fn as_slice(&self) -> Option<&[T]> {
        self.data.as_slice()
    }

    /// Copy the elements out in logical (row-major) order, whatever the memory format
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.data.iter().cloned().collect()
    }

    /// Check if tensor is empty (has no elements)
    pub fn is_empty(&self) -> bool {
        self.shape.size() == 0
    }

    /// Get the total number of elements
    pub fn numel(&self) -> usize {
        self.shape.size()
    }

    /// Get the number of dimensions (rank)
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Check if tensor data is contiguous in standard (row-major) layout
    pub fn is_contiguous(&self) -> bool {
        self.data.is_standard_layout()
    }

    /// Check if tensor data is dense with the channel axis innermost
    pub fn is_channels_last_contiguous(&self) -> bool {
        layout::is_channels_last_contiguous(&self.data)
    }

    pub fn memory_format(&self) -> MemoryFormat {
        layout::infer_memory_format(&self.data)
    }
}

impl<T: PartialEq> PartialEq for Tensor<T> {
    /// Logical equality: same shape, device, and elements regardless of memory format
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.device == other.device && self.data == other.data
    }
}
