#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Where a tensor's storage lives.
///
/// Kernels in this crate run on the host; `Gpu` tags route work to a registered
/// accelerated backend and are otherwise carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum Device {
    #[default]
    Cpu,
    Gpu(usize),
}

impl Device {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }

    /// True for any device served by an accelerated backend
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Device::Gpu(_))
    }

    pub fn id(&self) -> usize {
        match self {
            Device::Cpu => 0,
            Device::Gpu(id) => *id,
        }
    }

    /// Parse a device string (e.g., "cpu", "gpu:0", "gpu:1")
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, String> {
        let s = s.trim().to_lowercase();

        if s == "cpu" {
            return Ok(Device::Cpu);
        }
        if s == "gpu" {
            return Ok(Device::Gpu(0));
        }
        if let Some(id_str) = s.strip_prefix("gpu:") {
            return id_str
                .parse::<usize>()
                .map(Device::Gpu)
                .map_err(|_| format!("Invalid GPU ID: {id_str}"));
        }

        Err(format!("Invalid device string: {s}"))
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(id) => write!(f, "gpu:{id}"),
        }
    }
}
