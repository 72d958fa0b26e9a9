//! Tensor Creation and Construction
//!
//! Constructors from vectors and arrays, fill patterns, and the memory-format
//! conversions used by the channels-last kernels.

use super::core::Tensor;
use crate::layout::{channels_last_dims, channels_last_inverse, channels_last_order};
use crate::{Device, Result, Shape, TensorError};
use ndarray::{ArrayD, IxDyn};
use num_traits::{One, Zero};

impl<T: Clone> Tensor<T> {
    /// Create a tensor filled with zeros
    pub fn zeros(shape: &[usize]) -> Self
    where
        T: Zero,
    {
        Self::from_array(ArrayD::zeros(IxDyn(shape)))
    }

    /// Create a tensor filled with ones
    pub fn ones(shape: &[usize]) -> Self
    where
        T: One,
    {
        Self::from_array(ArrayD::ones(IxDyn(shape)))
    }

    /// Create a tensor filled with a specific value
    pub fn full(shape: &[usize], value: T) -> Self {
        Self::from_array(ArrayD::from_elem(IxDyn(shape), value))
    }

    /// Create a tensor from an existing ndarray. Its memory format is preserved.
    pub fn from_array(array: ArrayD<T>) -> Self {
        let shape = Shape::from_slice(array.shape());
        Self {
            data: array,
            shape,
            device: Device::Cpu,
        }
    }

    /// Create a tensor from a vector of data in logical row-major order
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let total_size: usize = shape.iter().product();
        if data.len() != total_size {
            return Err(TensorError::invalid_shape(
                "from_vec",
                &format!(
                    "data length {} doesn't match shape {:?} (size {})",
                    data.len(),
                    shape,
                    total_size
                ),
                shape,
            ));
        }

        let array = ArrayD::from_shape_vec(IxDyn(shape), data)?;
        Ok(Self::from_array(array))
    }

    /// Create a channels-last tensor with logical shape `shape` (`[N, C, *spatial]`).
    ///
    /// `data` is given in memory order, i.e. row-major over `[N, *spatial, C]`.
    pub fn from_vec_channels_last(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        if shape.len() < 2 {
            return Err(TensorError::invalid_shape(
                "from_vec_channels_last",
                "channels-last tensors need at least 2 dimensions",
                shape,
            ));
        }
        let physical = channels_last_dims(shape);
        let total_size: usize = physical.iter().product();
        if data.len() != total_size {
            return Err(TensorError::invalid_shape(
                "from_vec_channels_last",
                &format!("data length {} doesn't match size {}", data.len(), total_size),
                shape,
            ));
        }
        let array = ArrayD::from_shape_vec(IxDyn(&physical), data)?
            .permuted_axes(channels_last_inverse(shape.len()));
        Ok(Self::from_array(array))
    }

    /// Copy into standard layout. Already-contiguous tensors are cloned.
    pub fn contiguous(&self) -> Self {
        if self.data.is_standard_layout() {
            return self.clone();
        }
        let array = self.data.as_standard_layout().into_owned();
        Self {
            data: array,
            shape: self.shape.clone(),
            device: self.device,
        }
    }

    /// Copy into channels-last memory format with the same logical values
    pub fn to_channels_last(&self) -> Result<Self> {
        let rank = self.rank();
        if rank < 2 {
            return Err(TensorError::invalid_shape(
                "to_channels_last",
                "channels-last tensors need at least 2 dimensions",
                self.shape.dims(),
            ));
        }
        let physical: Vec<T> = self
            .data
            .view()
            .permuted_axes(channels_last_order(rank))
            .iter()
            .cloned()
            .collect();
        let mut tensor = Self::from_vec_channels_last(physical, self.shape.dims())?;
        tensor.device = self.device;
        Ok(tensor)
    }

    /// Reinterpret a standard-layout tensor under a new shape with the same size
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let total_size: usize = shape.iter().product();
        if total_size != self.numel() {
            return Err(TensorError::invalid_shape(
                "reshape",
                &format!("cannot reshape {} into {:?}", self.shape, shape),
                shape,
            ));
        }
        let array = self
            .data
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(shape))?;
        let mut tensor = Self::from_array(array);
        tensor.device = self.device;
        Ok(tensor)
    }
}
