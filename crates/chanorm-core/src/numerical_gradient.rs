//! Finite-difference gradient checking
//!
//! Analytical gradients are verified against a central (or forward) difference of a
//! scalar loss:
//!
//! ```text
//! dL/dx_i ≈ [L(x + ε e_i) - L(x - ε e_i)] / (2ε)
//! ```
//!
//! Normalization ops produce tensors, so the usual loss is the dot product of the op
//! output with a fixed upstream gradient, see [`dot_loss`]. Its finite difference is
//! then comparable with the input gradient returned by the backward pass for that
//! upstream gradient.
//!
//! # Example
//!
//! ```rust
//! use chanorm_core::numerical_gradient::{check_gradients, GradientCheckConfig};
//! use chanorm_core::Tensor;
//!
//! // L(x) = Σ x², dL/dx = 2x
//! let loss = |x: &Tensor<f64>| Ok(x.view().iter().map(|v| v * v).sum::<f64>());
//! let gradient = |x: &Tensor<f64>| Ok(Tensor::from_array(x.view().mapv(|v| 2.0 * v)));
//!
//! let x = Tensor::from_vec(vec![1.0, -2.0, 3.0], &[3]).unwrap();
//! let result = check_gradients(&x, loss, gradient, &GradientCheckConfig::default()).unwrap();
//! assert!(result.is_ok(), "{}", result.summary());
//! ```

use crate::scalar::{Accumulator, NormFloat};
use crate::{Result, Tensor, TensorError};
use num_traits::Zero;
use std::marker::PhantomData;

/// Configuration for numerical gradient checking
#[derive(Debug, Clone)]
pub struct GradientCheckConfig {
    /// Perturbation applied to one element at a time
    pub epsilon: f64,
    /// Relative tolerance
    pub rtol: f64,
    /// Absolute tolerance
    pub atol: f64,
    /// Record the indices of failing elements
    pub check_elementwise: bool,
    /// Central differences; forward differences when false
    pub use_central_difference: bool,
}

impl Default for GradientCheckConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-5,
            rtol: 1e-3,
            atol: 1e-5,
            check_elementwise: false,
            use_central_difference: true,
        }
    }
}

impl GradientCheckConfig {
    /// Tight tolerances, suitable for `f64`
    pub fn strict() -> Self {
        Self {
            epsilon: 1e-6,
            rtol: 1e-4,
            atol: 1e-6,
            check_elementwise: true,
            use_central_difference: true,
        }
    }

    /// Loose tolerances, suitable for `f32`
    pub fn relaxed() -> Self {
        Self {
            epsilon: 1e-3,
            rtol: 1e-2,
            atol: 1e-3,
            check_elementwise: false,
            use_central_difference: true,
        }
    }
}

/// Outcome of comparing a numerical and an analytical gradient
#[derive(Debug, Clone)]
pub struct GradientCheckResult {
    pub passed: bool,
    pub max_relative_error: f64,
    pub max_absolute_error: f64,
    pub num_elements_checked: usize,
    pub num_failures: usize,
    /// Filled only with `check_elementwise`
    pub failed_indices: Vec<usize>,
    pub error_message: Option<String>,
}

impl GradientCheckResult {
    pub fn is_ok(&self) -> bool {
        self.passed
    }

    /// Percentage of checked elements outside tolerance
    pub fn failure_rate(&self) -> f64 {
        if self.num_elements_checked == 0 {
            0.0
        } else {
            (self.num_failures as f64 / self.num_elements_checked as f64) * 100.0
        }
    }

    pub fn summary(&self) -> String {
        let status = if self.passed { "passed" } else { "FAILED" };
        let mut report = format!(
            "gradient check {status}: {} elements, {} failures ({:.2}%), \
             max relative error {:.2e}, max absolute error {:.2e}",
            self.num_elements_checked,
            self.num_failures,
            self.failure_rate(),
            self.max_relative_error,
            self.max_absolute_error,
        );
        if let Some(message) = &self.error_message {
            report.push_str(": ");
            report.push_str(message);
        }
        report
    }
}

/// Finite-difference gradient checker for scalar losses
pub struct NumericalGradientChecker<T> {
    config: GradientCheckConfig,
    _phantom: PhantomData<T>,
}

impl<T: NormFloat> NumericalGradientChecker<T> {
    pub fn new(config: GradientCheckConfig) -> Self {
        Self {
            config,
            _phantom: PhantomData,
        }
    }

    pub fn config(&self) -> &GradientCheckConfig {
        &self.config
    }

    /// Gradient of `loss` at `input`, one perturbed evaluation (or two) per element
    pub fn compute_numerical_gradient<F>(&self, input: &Tensor<T>, loss: F) -> Result<Tensor<T>>
    where
        F: Fn(&Tensor<T>) -> Result<f64>,
    {
        let dims = input.shape().dims();
        let base = input.to_vec();
        let epsilon = T::from_f64_lossy(self.config.epsilon);
        let perturbed = |index: usize, delta: T| -> Result<Tensor<T>> {
            let mut data = base.clone();
            data[index] = data[index] + delta;
            Ok(Tensor::from_vec(data, dims)?.to_device(*input.device()))
        };

        let f_x = if self.config.use_central_difference {
            None
        } else {
            Some(loss(input)?)
        };

        let mut gradient = Vec::with_capacity(base.len());
        for i in 0..base.len() {
            let f_plus = loss(&perturbed(i, epsilon)?)?;
            // step actually representable in T
            let step = ((base[i] + epsilon) - base[i]).to_acc().into_f64();
            let slope = match f_x {
                None => {
                    let f_minus = loss(&perturbed(i, -epsilon)?)?;
                    let back = (base[i] - (base[i] - epsilon)).to_acc().into_f64();
                    (f_plus - f_minus) / (step + back)
                }
                Some(f_x) => (f_plus - f_x) / step,
            };
            gradient.push(T::from_f64_lossy(slope));
        }

        Tensor::from_vec(gradient, dims)
    }

    /// Compare two gradients elementwise
    pub fn compare_gradients(
        &self,
        numerical: &Tensor<T>,
        analytical: &Tensor<T>,
    ) -> Result<GradientCheckResult> {
        if numerical.shape() != analytical.shape() {
            return Err(TensorError::shape_mismatch(
                "compare_gradients",
                &format!("analytical gradient with shape {}", numerical.shape()),
                &format!("analytical gradient with shape {}", analytical.shape()),
            ));
        }

        let GradientCheckConfig { rtol, atol, .. } = self.config;
        let mut max_relative_error = 0.0_f64;
        let mut max_absolute_error = 0.0_f64;
        let mut failed_indices = Vec::new();
        let mut num_failures = 0;

        let pairs = numerical.to_vec().into_iter().zip(analytical.to_vec());
        for (i, (num, ana)) in pairs.enumerate() {
            let num = num.to_acc().into_f64();
            let ana = ana.to_acc().into_f64();
            let abs_error = (num - ana).abs();
            let rel_error = if ana.abs() > 1e-10 {
                abs_error / ana.abs()
            } else {
                abs_error
            };
            max_relative_error = max_relative_error.max(rel_error);
            max_absolute_error = max_absolute_error.max(abs_error);

            if rel_error > rtol && abs_error > atol {
                num_failures += 1;
                if self.config.check_elementwise {
                    failed_indices.push(i);
                }
            }
        }

        let num_elements_checked = numerical.numel();
        let passed = num_failures == 0;
        Ok(GradientCheckResult {
            passed,
            max_relative_error,
            max_absolute_error,
            num_elements_checked,
            num_failures,
            failed_indices,
            error_message: (!passed).then(|| {
                format!(
                    "{num_failures} of {num_elements_checked} elements exceed tolerance \
                     (rtol={rtol}, atol={atol})"
                )
            }),
        })
    }

    /// Numerical gradient of `loss` compared against `gradient(input)`
    pub fn check<F, G>(&self, input: &Tensor<T>, loss: F, gradient: G) -> Result<GradientCheckResult>
    where
        F: Fn(&Tensor<T>) -> Result<f64>,
        G: Fn(&Tensor<T>) -> Result<Tensor<T>>,
    {
        let numerical = self.compute_numerical_gradient(input, loss)?;
        let analytical = gradient(input)?;
        self.compare_gradients(&numerical, &analytical)
    }
}

/// Convenience wrapper around [`NumericalGradientChecker::check`]
pub fn check_gradients<T, F, G>(
    input: &Tensor<T>,
    loss: F,
    gradient: G,
    config: &GradientCheckConfig,
) -> Result<GradientCheckResult>
where
    T: NormFloat,
    F: Fn(&Tensor<T>) -> Result<f64>,
    G: Fn(&Tensor<T>) -> Result<Tensor<T>>,
{
    NumericalGradientChecker::new(config.clone()).check(input, loss, gradient)
}

/// Scalar loss `Σ forward(x) ⊙ upstream`.
///
/// Its gradient with respect to `x` is the backward pass of `forward` evaluated for
/// the upstream gradient `upstream`.
pub fn dot_loss<'a, T, F>(upstream: &'a Tensor<T>, forward: F) -> impl Fn(&Tensor<T>) -> Result<f64> + 'a
where
    T: NormFloat,
    F: Fn(&Tensor<T>) -> Result<Tensor<T>> + 'a,
{
    move |x: &Tensor<T>| {
        let output = forward(x)?;
        if output.shape() != upstream.shape() {
            return Err(TensorError::shape_mismatch(
                "dot_loss",
                &format!("output with shape {}", upstream.shape()),
                &format!("output with shape {}", output.shape()),
            ));
        }
        let total = output
            .view()
            .iter()
            .zip(upstream.view().iter())
            .map(|(&y, &g)| y.to_acc() * g.to_acc())
            .fold(T::Acc::zero(), |acc, v| acc + v);
        Ok(total.into_f64())
    }
}
