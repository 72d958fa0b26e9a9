//! Device placement
//!
//! Host storage is shared by every device tag; moving a tensor only changes the tag
//! an accelerated backend sees. Parameter/input device agreement is checked by the
//! normalization entry points.

use super::core::Tensor;
use crate::Device;

impl<T> Tensor<T> {
    /// Move the tensor to `device`
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Builder-style alias of [`Tensor::to_device`]
    pub fn with_device(self, device: Device) -> Self {
        self.to_device(device)
    }

    /// True when both tensors live on the same device
    pub fn same_device(&self, other: &Self) -> bool {
        self.device == other.device
    }
}
