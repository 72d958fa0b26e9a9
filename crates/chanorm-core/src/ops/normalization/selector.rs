//! Backend selection for batch normalization
//!
//! [`BackendSelector::forward`] validates a call once, picks the first registered
//! strategy whose capability predicate matches, and returns the output together with
//! a [`ForwardState`] recording which strategy ran. [`BackendSelector::backward`]
//! consumes that state, so a backward pass always runs on the implementation that
//! produced the forward statistics.

use crate::config::{validate_hyper_parameters, BackendCapabilities};
use crate::dispatch_registry::{
    CapabilityQuery, NormalizationStrategy, StrategyRegistry, StrategyTag,
};
use crate::scalar::NormFloat;
use crate::{Result, Tensor, TensorError};
use tracing::debug;

use super::params::{GradientMask, Gradients, NormalizationParameters, SavedStatistics};

/// What a forward pass leaves behind for its backward pass
#[derive(Debug, Clone)]
pub struct ForwardState<T> {
    tag: StrategyTag,
    training: bool,
    saved: Option<SavedStatistics<T>>,
    reserve: Vec<u8>,
}

impl<T> ForwardState<T> {
    pub fn new(
        tag: StrategyTag,
        training: bool,
        saved: Option<SavedStatistics<T>>,
        reserve: Vec<u8>,
    ) -> Self {
        Self {
            tag,
            training,
            saved,
            reserve,
        }
    }

    /// Rebuild a state from an integer strategy index
    pub fn from_parts(
        index: usize,
        training: bool,
        saved: Option<SavedStatistics<T>>,
        reserve: Vec<u8>,
    ) -> Result<Self> {
        Ok(Self::new(
            StrategyTag::from_index(index)?,
            training,
            saved,
            reserve,
        ))
    }

    pub fn tag(&self) -> StrategyTag {
        self.tag
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Batch mean and variance representation saved by a training forward
    pub fn saved(&self) -> Option<&SavedStatistics<T>> {
        self.saved.as_ref()
    }

    /// Opaque accelerated-backend workspace
    pub fn reserve(&self) -> &[u8] {
        &self.reserve
    }
}

/// Output of [`BackendSelector::forward`]
#[derive(Debug, Clone)]
pub struct ForwardResult<T> {
    pub output: Tensor<T>,
    pub state: ForwardState<T>,
}

/// Routes batch-norm calls through a [`StrategyRegistry`]
pub struct BackendSelector<'r, T: NormFloat> {
    registry: &'r StrategyRegistry<T>,
}

impl<T: NormFloat> Default for BackendSelector<'static, T> {
    fn default() -> Self {
        Self::new(T::default_registry())
    }
}

impl<'r, T: NormFloat> BackendSelector<'r, T> {
    pub fn new(registry: &'r StrategyRegistry<T>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r StrategyRegistry<T> {
        self.registry
    }

    /// Strategy the registry would pick for an already validated call
    pub fn select(&self, query: &CapabilityQuery<'_>) -> Result<&'r dyn NormalizationStrategy<T>> {
        self.registry.select(query).ok_or_else(|| {
            TensorError::unsupported_strategy("batch_norm", "no registered strategy matches")
        })
    }

    /// Normalize `input`, updating running statistics in training mode.
    ///
    /// All validation happens before a strategy is consulted, so a rejected call leaves
    /// the running statistics untouched.
    pub fn forward(
        &self,
        input: &Tensor<T>,
        params: &mut NormalizationParameters<'_, T>,
        training: bool,
        momentum: f64,
        eps: f64,
        capabilities: &BackendCapabilities,
    ) -> Result<ForwardResult<T>> {
        validate_hyper_parameters("batch_norm", momentum, eps)?;
        params.validate(input, training, "batch_norm")?;

        let query = CapabilityQuery::new(input, params, training, eps, capabilities);
        let strategy = self.select(&query)?;
        debug!(
            strategy = strategy.name(),
            tag = %strategy.tag(),
            shape = %input.shape(),
            training,
            accelerated_host = capabilities.any_accelerated(),
            "selected batch norm strategy"
        );

        let out = strategy.forward(input, params, training, momentum, eps)?;
        Ok(ForwardResult {
            output: out.output,
            state: ForwardState::new(strategy.tag(), training, out.saved, out.reserve),
        })
    }

    /// Gradients of a forward pass described by `state`
    pub fn backward(
        &self,
        state: &ForwardState<T>,
        input: &Tensor<T>,
        grad_output: &Tensor<T>,
        params: &NormalizationParameters<'_, T>,
        eps: f64,
        mask: GradientMask,
    ) -> Result<Gradients<T>> {
        let strategy = self.registry.get(state.tag())?;
        debug!(
            strategy = strategy.name(),
            tag = %state.tag(),
            ?mask,
            "batch norm backward"
        );
        strategy.backward(state, input, grad_output, params, eps, mask)
    }
}
