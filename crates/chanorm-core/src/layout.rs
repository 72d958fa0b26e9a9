//! Memory format helpers
//!
//! Normalization kernels always see the channel axis at logical position 1. How the
//! elements are laid out in memory decides which fast path the forward transform may
//! take: standard (row-major) layout, channels-last layout (`[N, *spatial, C]` in
//! memory), or an arbitrary strided view.

use ndarray::{ArrayBase, Data, IxDyn};

/// Physical arrangement of a tensor's elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryFormat {
    /// Row-major over the logical axes: `[N, C, *spatial]`
    Contiguous,
    /// Channel axis innermost in memory: `[N, *spatial, C]`
    ChannelsLast,
    /// Anything else (transposed, sliced, broadcast views)
    Strided,
}

impl MemoryFormat {
    pub fn name(&self) -> &'static str {
        match self {
            MemoryFormat::Contiguous => "contiguous",
            MemoryFormat::ChannelsLast => "channels_last",
            MemoryFormat::Strided => "strided",
        }
    }
}

impl std::fmt::Display for MemoryFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Logical axes listed in channels-last memory order: `[0, 2, 3, .., rank-1, 1]`.
///
/// Permuting a logical view by this order yields the `[N, *spatial, C]` view.
pub fn channels_last_order(rank: usize) -> Vec<usize> {
    if rank < 2 {
        return (0..rank).collect();
    }
    let mut order = Vec::with_capacity(rank);
    order.push(0);
    order.extend(2..rank);
    order.push(1);
    order
}

/// Inverse of [`channels_last_order`]: maps an `[N, *spatial, C]` array back to logical
/// `[N, C, *spatial]` axes.
pub fn channels_last_inverse(rank: usize) -> Vec<usize> {
    if rank < 2 {
        return (0..rank).collect();
    }
    let mut order = Vec::with_capacity(rank);
    order.push(0);
    order.push(rank - 1);
    order.extend(1..rank - 1);
    order
}

/// Logical shape `[N, C, *spatial]` rearranged into channels-last order
pub fn channels_last_dims(dims: &[usize]) -> Vec<usize> {
    channels_last_order(dims.len())
        .into_iter()
        .map(|axis| dims[axis])
        .collect()
}

/// True when the array is dense with the channel axis innermost
pub fn is_channels_last_contiguous<S>(array: &ArrayBase<S, IxDyn>) -> bool
where
    S: Data,
{
    if array.ndim() < 2 {
        return false;
    }
    array
        .view()
        .permuted_axes(channels_last_order(array.ndim()))
        .is_standard_layout()
}

/// Classify an array's memory format. Standard layout wins over channels-last when
/// both hold (for instance `C == 1`).
pub fn infer_memory_format<S>(array: &ArrayBase<S, IxDyn>) -> MemoryFormat
where
    S: Data,
{
    if array.is_standard_layout() {
        MemoryFormat::Contiguous
    } else if is_channels_last_contiguous(array) {
        MemoryFormat::ChannelsLast
    } else {
        MemoryFormat::Strided
    }
}
