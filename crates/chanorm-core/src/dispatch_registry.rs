/// Normalization strategy registry
///
/// Each strategy pairs a capability predicate with forward and backward entry points.
/// A registry holds an ordered list of strategies (accelerated A, accelerated B, then
/// the native CPU implementation) and is immutable once built. The first strategy
/// whose predicate matches a call handles its forward, and the tag it records selects
/// the backward.
use crate::config::{AcceleratedALibrary, BackendCapabilities};
use crate::ops::normalization::{
    batch_norm::batch_norm_cpu, backward::batch_norm_backward, selector::ForwardState,
    GradientMask, Gradients, NormalizationParameters, SavedStatistics,
};
use crate::scalar::NormFloat;
use crate::{DType, Device, Result, Tensor, TensorError};
use std::sync::Arc;

/// Identifies the strategy that produced a forward result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StrategyTag {
    /// Portable CPU implementation (always available)
    Native = 0,
    /// First accelerated library
    AcceleratedA = 1,
    /// Second accelerated library
    AcceleratedB = 2,
}

impl StrategyTag {
    pub const ALL: [StrategyTag; 3] = [
        StrategyTag::Native,
        StrategyTag::AcceleratedA,
        StrategyTag::AcceleratedB,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Recover a tag from its integer index
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| TensorError::unsupported_strategy("strategy_tag", &index.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyTag::Native => "native",
            StrategyTag::AcceleratedA => "accelerated_a",
            StrategyTag::AcceleratedB => "accelerated_b",
        }
    }
}

impl From<StrategyTag> for usize {
    fn from(tag: StrategyTag) -> Self {
        tag.index()
    }
}

impl std::fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Properties of a forward call examined by capability predicates
#[derive(Debug, Clone)]
pub struct CapabilityQuery<'a> {
    pub device: Device,
    pub dtype: DType,
    pub rank: usize,
    pub batch_size: usize,
    pub weight_defined: bool,
    pub bias_defined: bool,
    pub running_mean_defined: bool,
    pub running_var_defined: bool,
    pub training: bool,
    pub eps: f64,
    pub capabilities: &'a BackendCapabilities,
}

impl<'a> CapabilityQuery<'a> {
    pub fn new<T: NormFloat>(
        input: &Tensor<T>,
        params: &NormalizationParameters<'_, T>,
        training: bool,
        eps: f64,
        capabilities: &'a BackendCapabilities,
    ) -> Self {
        Self {
            device: *input.device(),
            dtype: T::DTYPE,
            rank: input.rank(),
            batch_size: input.shape().batch_size().unwrap_or(0),
            weight_defined: params.weight.is_some(),
            bias_defined: params.bias.is_some(),
            running_mean_defined: params.running_mean.is_some(),
            running_var_defined: params.running_var.is_some(),
            training,
            eps,
            capabilities,
        }
    }

    /// Running statistics are both present, or both absent in training mode
    pub fn running_stats_consistent(&self) -> bool {
        (self.running_mean_defined && self.running_var_defined)
            || (!self.running_mean_defined && !self.running_var_defined && self.training)
    }
}

/// Largest batch the first accelerated library handles in training mode
pub const ACCELERATED_A_MAX_TRAINING_BATCH: usize = 880_801;

/// Largest batch the first accelerated library handles in evaluation mode
pub const ACCELERATED_A_MAX_EVAL_BATCH: usize = 65_535;

/// Largest rank the second accelerated library handles
pub const ACCELERATED_B_MAX_RANK: usize = 5;

/// Capability predicate of the first accelerated library
pub fn accelerated_a_applicable(query: &CapabilityQuery<'_>) -> bool {
    let library: &AcceleratedALibrary = match &query.capabilities.accelerated_a {
        Some(library) => library,
        None => return false,
    };
    let batch_limit = if query.training {
        ACCELERATED_A_MAX_TRAINING_BATCH
    } else {
        ACCELERATED_A_MAX_EVAL_BATCH
    };

    query.device.is_accelerated()
        && query.dtype != DType::BFloat16
        && query.weight_defined
        && query.bias_defined
        && query.running_stats_consistent()
        && query.rank >= 3
        && query.batch_size <= batch_limit
        && query.eps >= library.min_epsilon
        && query.capabilities.enabled
        && library.version >= AcceleratedALibrary::MIN_VERSION
}

/// Capability predicate of the second accelerated library
pub fn accelerated_b_applicable(query: &CapabilityQuery<'_>) -> bool {
    query.device.is_accelerated()
        && query.rank <= ACCELERATED_B_MAX_RANK
        && query.dtype != DType::Float64
        && query.dtype != DType::BFloat16
        && query.weight_defined
        && query.bias_defined
        && query.running_stats_consistent()
        && query.capabilities.accelerated_b_available
        && query.capabilities.enabled
}

pub type CapabilityPredicate = fn(&CapabilityQuery<'_>) -> bool;

/// Output of a strategy's forward entry point
#[derive(Debug, Clone)]
pub struct StrategyOutput<T> {
    pub output: Tensor<T>,
    /// Batch statistics for the backward pass (training mode)
    pub saved: Option<SavedStatistics<T>>,
    /// Opaque workspace handed back verbatim to the backward pass
    pub reserve: Vec<u8>,
}

/// An accelerated batch-norm implementation supplied by the caller
pub trait AcceleratedBackend<T: NormFloat>: Send + Sync {
    fn name(&self) -> &str;

    fn forward(
        &self,
        input: &Tensor<T>,
        params: &mut NormalizationParameters<'_, T>,
        training: bool,
        momentum: f64,
        eps: f64,
    ) -> Result<StrategyOutput<T>>;

    /// Compute all three gradients; the caller masks the ones it does not need
    #[allow(clippy::too_many_arguments)]
    fn backward(
        &self,
        input: &Tensor<T>,
        grad_output: &Tensor<T>,
        params: &NormalizationParameters<'_, T>,
        saved: Option<&SavedStatistics<T>>,
        reserve: &[u8],
        eps: f64,
    ) -> Result<Gradients<T>>;
}

/// Uniform interface over native and accelerated implementations
pub trait NormalizationStrategy<T: NormFloat>: Send + Sync {
    fn tag(&self) -> StrategyTag;

    fn name(&self) -> &str;

    fn is_applicable(&self, query: &CapabilityQuery<'_>) -> bool;

    fn forward(
        &self,
        input: &Tensor<T>,
        params: &mut NormalizationParameters<'_, T>,
        training: bool,
        momentum: f64,
        eps: f64,
    ) -> Result<StrategyOutput<T>>;

    #[allow(clippy::too_many_arguments)]
    fn backward(
        &self,
        state: &ForwardState<T>,
        input: &Tensor<T>,
        grad_output: &Tensor<T>,
        params: &NormalizationParameters<'_, T>,
        eps: f64,
        mask: GradientMask,
    ) -> Result<Gradients<T>>;
}

/// Portable CPU strategy built from the statistics, transform and backward kernels
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeStrategy;

impl<T: NormFloat> NormalizationStrategy<T> for NativeStrategy {
    fn tag(&self) -> StrategyTag {
        StrategyTag::Native
    }

    fn name(&self) -> &str {
        "native"
    }

    fn is_applicable(&self, _query: &CapabilityQuery<'_>) -> bool {
        true
    }

    fn forward(
        &self,
        input: &Tensor<T>,
        params: &mut NormalizationParameters<'_, T>,
        training: bool,
        momentum: f64,
        eps: f64,
    ) -> Result<StrategyOutput<T>> {
        let (output, saved) = batch_norm_cpu(input, params, training, momentum, eps)?;
        Ok(StrategyOutput {
            output,
            saved,
            reserve: Vec::new(),
        })
    }

    fn backward(
        &self,
        state: &ForwardState<T>,
        input: &Tensor<T>,
        grad_output: &Tensor<T>,
        params: &NormalizationParameters<'_, T>,
        eps: f64,
        mask: GradientMask,
    ) -> Result<Gradients<T>> {
        batch_norm_backward(
            grad_output,
            input,
            params.weight,
            params.running_mean(),
            params.running_var(),
            state.saved(),
            state.is_training(),
            eps,
            mask,
        )
    }
}

/// Adapter giving an [`AcceleratedBackend`] a tag and a capability predicate
pub struct AcceleratedStrategy<T: NormFloat> {
    tag: StrategyTag,
    predicate: CapabilityPredicate,
    backend: Arc<dyn AcceleratedBackend<T>>,
}

impl<T: NormFloat> AcceleratedStrategy<T> {
    pub fn new(
        tag: StrategyTag,
        predicate: CapabilityPredicate,
        backend: Arc<dyn AcceleratedBackend<T>>,
    ) -> Self {
        Self {
            tag,
            predicate,
            backend,
        }
    }
}

impl<T: NormFloat> NormalizationStrategy<T> for AcceleratedStrategy<T> {
    fn tag(&self) -> StrategyTag {
        self.tag
    }

    fn name(&self) -> &str {
        self.backend.name()
    }

    fn is_applicable(&self, query: &CapabilityQuery<'_>) -> bool {
        (self.predicate)(query)
    }

    fn forward(
        &self,
        input: &Tensor<T>,
        params: &mut NormalizationParameters<'_, T>,
        training: bool,
        momentum: f64,
        eps: f64,
    ) -> Result<StrategyOutput<T>> {
        self.backend
            .forward(input, params, training, momentum, eps)
    }

    fn backward(
        &self,
        state: &ForwardState<T>,
        input: &Tensor<T>,
        grad_output: &Tensor<T>,
        params: &NormalizationParameters<'_, T>,
        eps: f64,
        mask: GradientMask,
    ) -> Result<Gradients<T>> {
        let gradients = self.backend.backward(
            input,
            grad_output,
            params,
            state.saved(),
            state.reserve(),
            eps,
        )?;
        Ok(gradients.masked(mask))
    }
}

/// Ordered, immutable list of normalization strategies
pub struct StrategyRegistry<T: NormFloat> {
    strategies: Vec<Arc<dyn NormalizationStrategy<T>>>,
}

impl<T: NormFloat> StrategyRegistry<T> {
    pub fn builder() -> StrategyRegistryBuilder<T> {
        StrategyRegistryBuilder::new()
    }

    /// Registry containing only the native strategy
    pub fn native_only() -> Self {
        Self::builder().build()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Tags in selection order
    pub fn tags(&self) -> Vec<StrategyTag> {
        self.strategies.iter().map(|s| s.tag()).collect()
    }

    /// First strategy whose predicate matches
    pub fn select(&self, query: &CapabilityQuery<'_>) -> Option<&dyn NormalizationStrategy<T>> {
        self.strategies
            .iter()
            .find(|s| s.is_applicable(query))
            .map(|s| s.as_ref())
    }

    /// Strategy registered under `tag`
    pub fn get(&self, tag: StrategyTag) -> Result<&dyn NormalizationStrategy<T>> {
        self.strategies
            .iter()
            .find(|s| s.tag() == tag)
            .map(|s| s.as_ref())
            .ok_or_else(|| {
                TensorError::unsupported_strategy(
                    "strategy_registry",
                    &format!("{tag} is not registered"),
                )
            })
    }
}

/// Builder for [`StrategyRegistry`]; the native strategy is always appended last
pub struct StrategyRegistryBuilder<T: NormFloat> {
    accelerated_a: Option<Arc<dyn AcceleratedBackend<T>>>,
    accelerated_b: Option<Arc<dyn AcceleratedBackend<T>>>,
}

impl<T: NormFloat> Default for StrategyRegistryBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: NormFloat> StrategyRegistryBuilder<T> {
    pub fn new() -> Self {
        Self {
            accelerated_a: None,
            accelerated_b: None,
        }
    }

    pub fn with_accelerated_a(mut self, backend: Arc<dyn AcceleratedBackend<T>>) -> Self {
        self.accelerated_a = Some(backend);
        self
    }

    pub fn with_accelerated_b(mut self, backend: Arc<dyn AcceleratedBackend<T>>) -> Self {
        self.accelerated_b = Some(backend);
        self
    }

    pub fn build(self) -> StrategyRegistry<T> {
        let mut strategies: Vec<Arc<dyn NormalizationStrategy<T>>> = Vec::with_capacity(3);
        if let Some(backend) = self.accelerated_a {
            strategies.push(Arc::new(AcceleratedStrategy::new(
                StrategyTag::AcceleratedA,
                accelerated_a_applicable,
                backend,
            )));
        }
        if let Some(backend) = self.accelerated_b {
            strategies.push(Arc::new(AcceleratedStrategy::new(
                StrategyTag::AcceleratedB,
                accelerated_b_applicable,
                backend,
            )));
        }
        strategies.push(Arc::new(NativeStrategy));
        StrategyRegistry { strategies }
    }
}

lazy_static::lazy_static! {
    /// Global f32 strategy registry
    pub static ref F32_REGISTRY: StrategyRegistry<f32> = StrategyRegistry::native_only();

    /// Global f64 strategy registry
    pub static ref F64_REGISTRY: StrategyRegistry<f64> = StrategyRegistry::native_only();
}
