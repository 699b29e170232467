// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Softmax activation operation.

use super::{check_same_shape, inner_len};
use crate::{Tensor, TensorError, TensorView};

/// Computes softmax along the last dimension: `output[i] = exp(x[i] - max) / sum(exp(x - max))`.
///
/// Uses the numerically stable variant that subtracts the row maximum
/// before exponentiation.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if input and output shapes differ.
pub fn softmax(input: &TensorView<'_>, output: &mut Tensor) -> Result<(), TensorError> {
    check_same_shape("softmax", input, output)?;

    let last_dim = inner_len(input.shape());
    if last_dim == 0 {
        return Ok(());
    }

    let src = input.as_f32_slice();
    let dst = output.as_f32_slice_mut();

    for (row_src, row_dst) in src.chunks_exact(last_dim).zip(dst.chunks_exact_mut(last_dim)) {
        let max_val = row_src.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let mut sum = 0.0f32;
        for (d, &s) in row_dst.iter_mut().zip(row_src) {
            let e = (s - max_val).exp();
            *d = e;
            sum += e;
        }

        if sum > 0.0 {
            let inv_sum = 1.0 / sum;
            row_dst.iter_mut().for_each(|d| *d *= inv_sum);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    fn approx_eq(a: &[f32], b: &[f32], tol: f32) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn test_softmax_uniform() {
        let input = Tensor::from_f32(Shape::vector(4), &[1.0, 1.0, 1.0, 1.0]).unwrap();
        let mut output = Tensor::zeros(Shape::vector(4));

        softmax(&input.view(), &mut output).unwrap();
        assert!(approx_eq(output.as_f32_slice(), &[0.25; 4], 1e-5));
    }

    #[test]
    fn test_softmax_sums_to_one_and_is_monotonic() {
        let input = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
        let mut output = Tensor::zeros(Shape::vector(3));

        softmax(&input.view(), &mut output).unwrap();

        let r = output.as_f32_slice();
        assert!((r.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(r[0] < r[1] && r[1] < r[2]);
    }

    #[test]
    fn test_softmax_rows() {
        let input =
            Tensor::from_f32(Shape::matrix(2, 3), &[1.0, 2.0, 3.0, 1.0, 1.0, 1.0]).unwrap();
        let mut output = Tensor::zeros(Shape::matrix(2, 3));

        softmax(&input.view(), &mut output).unwrap();

        let r = output.as_f32_slice();
        assert!((r[0..3].iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(approx_eq(&r[3..6], &[1.0 / 3.0; 3], 1e-5));
    }

    #[test]
    fn test_softmax_numerical_stability() {
        let input = Tensor::from_f32(Shape::vector(3), &[1000.0, 1001.0, 1002.0]).unwrap();
        let mut output = Tensor::zeros(Shape::vector(3));

        softmax(&input.view(), &mut output).unwrap();
        assert!(output.as_f32_slice().iter().all(|x| x.is_finite()));
    }
}
