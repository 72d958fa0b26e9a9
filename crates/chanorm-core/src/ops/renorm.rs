//! Max-Norm Renormalization
//!
//! Clamps the p-norm of every slice of a tensor along one dimension. Slices whose
//! norm exceeds `max_norm` are scaled down so their norm becomes `max_norm`; all other
//! slices are copied unchanged.

use crate::scalar::{Accumulator, NormFloat};
use crate::{Result, Tensor, TensorError};
use ndarray::Axis;
use num_traits::{Float, One, Zero};
use rayon::prelude::*;
use tracing::trace;

const OPERATION: &str = "renorm";

/// Order of the norm computed per slice
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NormOrder {
    L1,
    L2,
    Infinity,
    P(f64),
}

impl NormOrder {
    /// Classify a norm order, rejecting non-positive and NaN values
    pub fn from_p(p: f64) -> Result<Self> {
        if p.is_nan() || p <= 0.0 {
            return Err(TensorError::invalid_argument_op(
                OPERATION,
                &format!("p must be a positive real number, got {p}"),
            ));
        }
        Ok(if p == 1.0 {
            Self::L1
        } else if p == 2.0 {
            Self::L2
        } else if p.is_infinite() {
            Self::Infinity
        } else {
            Self::P(p)
        })
    }

    fn norm<T: NormFloat, I: Iterator<Item = T>>(self, values: I) -> T::Acc {
        let abs = values.map(|v| v.to_acc().abs());
        match self {
            Self::L1 => abs.fold(T::Acc::zero(), |acc, v| acc + v),
            Self::L2 => abs.fold(T::Acc::zero(), |acc, v| acc + v * v).sqrt(),
            Self::Infinity => abs.fold(T::Acc::zero(), |acc, v| acc.max(v)),
            Self::P(p) => {
                let p = T::Acc::from_f64_exact(p);
                abs.fold(T::Acc::zero(), |acc, v| acc + v.powf(p))
                    .powf(T::Acc::one() / p)
            }
        }
    }
}

/// Scale slices along `dim` whose p-norm exceeds `max_norm`.
///
/// `dim` may be negative and counts from the last axis. Each slice's norm is reduced
/// over every other axis in the accumulation type. A slice is multiplied by
/// `max_norm / norm` when `norm > max_norm` and left as is otherwise.
pub fn renorm<T: NormFloat>(
    input: &Tensor<T>,
    p: f64,
    dim: isize,
    max_norm: f64,
) -> Result<Tensor<T>> {
    let order = NormOrder::from_p(p)?;
    if max_norm.is_nan() || max_norm < 0.0 {
        return Err(TensorError::invalid_argument_op(
            OPERATION,
            &format!("max_norm must be non-negative, got {max_norm}"),
        ));
    }
    let rank = input.rank();
    if rank < 2 {
        return Err(TensorError::invalid_argument_op(
            OPERATION,
            &format!("input needs at least 2 dimensions, got {rank}"),
        ));
    }
    let axis = normalize_dim(dim, rank)?;
    trace!(shape = %input.shape(), ?order, axis, max_norm, "renorm");

    let view = input.view();
    let max_norm = T::Acc::from_f64_exact(max_norm);
    let scales: Vec<T::Acc> = view
        .axis_iter(Axis(axis))
        .into_par_iter()
        .map(|slice| {
            let norm = order.norm::<T, _>(slice.iter().copied());
            if norm > max_norm {
                max_norm / norm
            } else {
                T::Acc::one()
            }
        })
        .collect();

    let mut output = view.to_owned();
    output
        .axis_iter_mut(Axis(axis))
        .into_par_iter()
        .zip(scales.par_iter())
        .filter(|(_, scale)| **scale != T::Acc::one())
        .for_each(|(mut slice, &scale)| {
            slice.mapv_inplace(|x| T::from_acc(x.to_acc() * scale));
        });

    Ok(Tensor::from_array(output).to_device(*input.device()))
}

fn normalize_dim(dim: isize, rank: usize) -> Result<usize> {
    let signed_rank = rank as isize;
    if dim < -signed_rank || dim >= signed_rank {
        return Err(TensorError::invalid_argument_op(
            OPERATION,
            &format!("dim {dim} is out of range for a tensor of rank {rank}"),
        ));
    }
    let wrapped = if dim < 0 { dim + signed_rank } else { dim };
    Ok(wrapped as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rows_above_max_norm_are_clamped() {
        // row norms 10 and 2
        let input = Tensor::<f64>::from_vec(vec![6.0, 8.0, 0.0, 2.0], &[2, 2]).unwrap();
        let out = renorm(&input, 2.0, 0, 5.0).unwrap();

        assert_eq!(out.to_vec(), vec![3.0, 4.0, 0.0, 2.0]);
        let row0 = out.to_vec()[..2].iter().map(|v| v * v).sum::<f64>().sqrt();
        assert_abs_diff_eq!(row0, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_columns_with_negative_dim() {
        let input = Tensor::<f32>::from_vec(vec![3.0, 1.0, -4.0, 0.5], &[2, 2]).unwrap();
        // dim -1 is the column axis; column norms are 5 and ~1.118
        let out = renorm(&input, 2.0, -1, 2.0).unwrap();
        let values = out.to_vec();
        assert_abs_diff_eq!(values[0], 1.2, epsilon = 1e-6);
        assert_abs_diff_eq!(values[2], -1.6, epsilon = 1e-6);
        assert_eq!(values[1], 1.0);
        assert_eq!(values[3], 0.5);
    }

    #[test]
    fn test_l1_and_infinity_norms() {
        let input = Tensor::<f64>::from_vec(vec![1.0, -3.0, 2.0, 2.0], &[2, 2]).unwrap();

        // L1 row norms 4 and 4
        let l1 = renorm(&input, 1.0, 0, 2.0).unwrap();
        assert_eq!(l1.to_vec(), vec![0.5, -1.5, 1.0, 1.0]);

        // max-abs row norms 3 and 2
        let inf = renorm(&input, f64::INFINITY, 0, 2.0).unwrap();
        let values = inf.to_vec();
        assert_abs_diff_eq!(values[1], -2.0, epsilon = 1e-12);
        assert_eq!(&values[2..], &[2.0, 2.0]);
    }

    #[test]
    fn test_general_p_norm() {
        let input = Tensor::<f64>::from_vec(vec![1.0, 1.0, 0.0, 0.0], &[2, 2]).unwrap();
        // (1 + 1)^(1/3)
        let norm = 2f64.powf(1.0 / 3.0);
        let out = renorm(&input, 3.0, 0, 1.0).unwrap();
        assert_abs_diff_eq!(out.to_vec()[0], 1.0 / norm, epsilon = 1e-12);
        assert_eq!(&out.to_vec()[2..], &[0.0, 0.0]);
    }

    #[test]
    fn test_zero_max_norm_zeroes_nonzero_slices() {
        let input = Tensor::<f32>::from_vec(vec![1.0, 2.0, 0.0, 0.0], &[2, 2]).unwrap();
        let out = renorm(&input, 2.0, 0, 0.0).unwrap();
        assert_eq!(out.to_vec(), vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_three_dimensional_slices() {
        let input = Tensor::<f64>::full(&[2, 3, 4], 1.0);
        // each slice along dim 1 holds 8 ones, L2 norm sqrt(8)
        let out = renorm(&input, 2.0, 1, 1.0).unwrap();
        let expected = 1.0 / 8f64.sqrt();
        for v in out.to_vec() {
            assert_abs_diff_eq!(v, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rejects_invalid_arguments() {
        let input = Tensor::<f32>::ones(&[2, 2]);
        for (p, dim, max_norm) in [
            (0.0, 0, 1.0),
            (-1.0, 0, 1.0),
            (f64::NAN, 0, 1.0),
            (2.0, 0, -1.0),
            (2.0, 2, 1.0),
            (2.0, -3, 1.0),
        ] {
            assert!(matches!(
                renorm(&input, p, dim, max_norm),
                Err(TensorError::InvalidArgument { .. })
            ));
        }
        let vector = Tensor::<f32>::ones(&[4]);
        assert!(matches!(
            renorm(&vector, 2.0, 0, 1.0),
            Err(TensorError::InvalidArgument { .. })
        ));
    }
}
