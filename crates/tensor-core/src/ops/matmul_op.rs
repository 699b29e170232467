// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Matrix multiplication operation.

use crate::{Shape, Tensor, TensorError, TensorView};

/// Performs matrix multiplication: `output = lhs @ rhs`.
///
/// `lhs` is `[M, K]`, `rhs` is `[K, N]`, and `output` must be `[M, N]`.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if dimensions are incompatible.
pub fn matmul(
    lhs: &TensorView<'_>,
    rhs: &TensorView<'_>,
    output: &mut Tensor,
) -> Result<(), TensorError> {
    if !lhs.shape().is_matmul_compatible(rhs.shape()) {
        return Err(TensorError::ShapeMismatch {
            op: "matmul",
            lhs: lhs.shape().clone(),
            rhs: rhs.shape().clone(),
        });
    }

    let m = lhs.shape().dims()[0];
    let k = lhs.shape().dims()[1];
    let n = rhs.shape().dims()[1];

    let expected_shape = Shape::matrix(m, n);
    if output.shape() != &expected_shape {
        return Err(TensorError::ShapeMismatch {
            op: "matmul (output)",
            lhs: expected_shape,
            rhs: output.shape().clone(),
        });
    }

    matmul_f32_generic(
        lhs.as_f32_slice(),
        rhs.as_f32_slice(),
        output.as_f32_slice_mut(),
        m,
        k,
        n,
    );

    Ok(())
}

/// Portable f32 matrix multiplication in ikj loop order, so the inner loop
/// walks a row of `b` and a row of `c` sequentially.
fn matmul_f32_generic(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
    c.iter_mut().for_each(|x| *x = 0.0);

    for i in 0..m {
        let c_row = &mut c[i * n..(i + 1) * n];
        for p in 0..k {
            let a_ip = a[i * k + p];
            let b_row = &b[p * n..(p + 1) * n];
            for (c_ij, &b_pj) in c_row.iter_mut().zip(b_row) {
                *c_ij += a_ip * b_pj;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_2x3_times_3x2() {
        // [[1, 2, 3], [4, 5, 6]] @ [[7, 8], [9, 10], [11, 12]] = [[58, 64], [139, 154]]
        let a = Tensor::from_f32(Shape::matrix(2, 3), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b =
            Tensor::from_f32(Shape::matrix(3, 2), &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let mut c = Tensor::zeros(Shape::matrix(2, 2));

        matmul(&a.view(), &b.view(), &mut c).unwrap();

        assert_eq!(c.as_f32_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_row_vector_identity() {
        let x = Tensor::from_f32(Shape::matrix(1, 3), &[1.0, 2.0, 3.0]).unwrap();
        let eye = Tensor::from_f32(
            Shape::matrix(3, 3),
            &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        )
        .unwrap();
        let mut y = Tensor::zeros(Shape::matrix(1, 3));

        matmul(&x.view(), &eye.view(), &mut y).unwrap();
        assert_eq!(y.as_f32_slice(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = Tensor::zeros(Shape::matrix(2, 3));
        let b = Tensor::zeros(Shape::matrix(4, 2));
        let mut c = Tensor::zeros(Shape::matrix(2, 2));
        assert!(matmul(&a.view(), &b.view(), &mut c).is_err());
    }

    #[test]
    fn test_matmul_bad_output_shape() {
        let a = Tensor::zeros(Shape::matrix(1, 2));
        let b = Tensor::zeros(Shape::matrix(2, 2));
        let mut c = Tensor::zeros(Shape::matrix(2, 2));
        assert!(matmul(&a.view(), &b.view(), &mut c).is_err());
    }
}
