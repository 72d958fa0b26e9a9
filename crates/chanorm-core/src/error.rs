use crate::{DType, Device};
use thiserror::Error;

/// Errors raised by the normalization engine.
///
/// Every error is returned before any output is allocated and before any running
/// statistic is mutated.
#[derive(Error, Debug, Clone)]
pub enum TensorError {
    #[error("Shape mismatch in operation '{operation}': expected {expected}, got {got}")]
    ShapeMismatch {
        operation: String,
        expected: String,
        got: String,
        context: Option<ErrorContext>,
    },

    #[error("Incompatible devices in operation '{operation}': {device1} and {device2}")]
    DeviceMismatch {
        operation: String,
        device1: String,
        device2: String,
        context: Option<ErrorContext>,
    },

    #[error("Invalid shape in operation '{operation}': {reason}")]
    InvalidShape {
        operation: String,
        reason: String,
        shape: Option<Vec<usize>>,
        context: Option<ErrorContext>,
    },

    #[error("Invalid argument in operation '{operation}': {reason}")]
    InvalidArgument {
        operation: String,
        reason: String,
        context: Option<ErrorContext>,
    },

    #[error("Missing state in operation '{operation}': {reason}")]
    MissingState {
        operation: String,
        reason: String,
        context: Option<ErrorContext>,
    },

    #[error("Unsupported strategy in operation '{operation}': {tag}")]
    UnsupportedStrategy {
        operation: String,
        tag: String,
        context: Option<ErrorContext>,
    },

    #[error("Backend '{backend}' failed in operation '{operation}': {details}")]
    Backend {
        operation: String,
        backend: String,
        details: String,
        context: Option<ErrorContext>,
    },
}

/// Additional information about the inputs of a failed call
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Input tensor shapes
    pub input_shapes: Vec<Vec<usize>>,
    /// Input tensor devices
    pub input_devices: Vec<Device>,
    /// Input tensor data types
    pub input_dtypes: Vec<DType>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add input tensor information
    pub fn with_input_tensor(mut self, shape: &[usize], device: Device, dtype: DType) -> Self {
        self.input_shapes.push(shape.to_vec());
        self.input_devices.push(device);
        self.input_dtypes.push(dtype);
        self
    }
}

impl TensorError {
    /// Create a shape mismatch error
    pub fn shape_mismatch(operation: &str, expected: &str, got: &str) -> Self {
        Self::ShapeMismatch {
            operation: operation.to_string(),
            expected: expected.to_string(),
            got: got.to_string(),
            context: None,
        }
    }

    /// Create a shape mismatch error for a per-channel parameter of the wrong length
    pub fn parameter_length(
        operation: &str,
        parameter: &str,
        expected: usize,
        actual: usize,
    ) -> Self {
        Self::ShapeMismatch {
            operation: operation.to_string(),
            expected: format!("{parameter} with {expected} elements"),
            got: format!("{parameter} with {actual} elements"),
            context: None,
        }
    }

    /// Create a device mismatch error
    pub fn device_mismatch(operation: &str, device1: &str, device2: &str) -> Self {
        Self::DeviceMismatch {
            operation: operation.to_string(),
            device1: device1.to_string(),
            device2: device2.to_string(),
            context: None,
        }
    }

    /// Create an invalid argument error with operation context
    pub fn invalid_argument_op(operation: &str, reason: &str) -> Self {
        Self::InvalidArgument {
            operation: operation.to_string(),
            reason: reason.to_string(),
            context: None,
        }
    }

    /// Create an invalid shape error carrying the offending shape
    pub fn invalid_shape(operation: &str, reason: &str, shape: &[usize]) -> Self {
        Self::InvalidShape {
            operation: operation.to_string(),
            reason: reason.to_string(),
            shape: Some(shape.to_vec()),
            context: None,
        }
    }

    pub fn missing_state(operation: &str, reason: &str) -> Self {
        Self::MissingState {
            operation: operation.to_string(),
            reason: reason.to_string(),
            context: None,
        }
    }

    pub fn unsupported_strategy(operation: &str, tag: &str) -> Self {
        Self::UnsupportedStrategy {
            operation: operation.to_string(),
            tag: tag.to_string(),
            context: None,
        }
    }

    /// Wrap a failure reported by an accelerated backend
    pub fn backend(operation: &str, backend: &str, details: &str) -> Self {
        Self::Backend {
            operation: operation.to_string(),
            backend: backend.to_string(),
            details: details.to_string(),
            context: None,
        }
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        match &mut self {
            Self::ShapeMismatch { context: ctx, .. } => *ctx = Some(context),
            Self::DeviceMismatch { context: ctx, .. } => *ctx = Some(context),
            Self::InvalidShape { context: ctx, .. } => *ctx = Some(context),
            Self::InvalidArgument { context: ctx, .. } => *ctx = Some(context),
            Self::MissingState { context: ctx, .. } => *ctx = Some(context),
            Self::UnsupportedStrategy { context: ctx, .. } => *ctx = Some(context),
            Self::Backend { context: ctx, .. } => *ctx = Some(context),
        }
        self
    }

    /// Get the operation name for this error
    pub fn operation(&self) -> &str {
        match self {
            Self::ShapeMismatch { operation, .. } => operation,
            Self::DeviceMismatch { operation, .. } => operation,
            Self::InvalidShape { operation, .. } => operation,
            Self::InvalidArgument { operation, .. } => operation,
            Self::MissingState { operation, .. } => operation,
            Self::UnsupportedStrategy { operation, .. } => operation,
            Self::Backend { operation, .. } => operation,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::ShapeMismatch { context, .. }
            | Self::DeviceMismatch { context, .. }
            | Self::InvalidShape { context, .. }
            | Self::InvalidArgument { context, .. }
            | Self::MissingState { context, .. }
            | Self::UnsupportedStrategy { context, .. }
            | Self::Backend { context, .. } => context.as_ref(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TensorError>;

/// Convert from ndarray::ShapeError to TensorError
impl From<ndarray::ShapeError> for TensorError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::InvalidShape {
            operation: "tensor_creation".to_string(),
            reason: format!("Shape error: {err}"),
            shape: None,
            context: None,
        }
    }
}
