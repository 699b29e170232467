// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host compute kernels.
//!
//! Each kernel writes into a pre-allocated output tensor so that executing a
//! compiled plan does not allocate per layer beyond its activation slots.

mod activation_op;
mod matmul_op;
mod pool_op;
mod softmax_op;

pub use activation_op::{l2_normalize, relu, scale_channels};
pub use matmul_op::matmul;
pub use pool_op::global_avg_pool;
pub use softmax_op::softmax;

use crate::{Shape, Tensor, TensorError, TensorView};

/// Checks that an element-wise kernel's input and output shapes agree.
pub(crate) fn check_same_shape(
    op: &'static str,
    input: &TensorView<'_>,
    output: &Tensor,
) -> Result<(), TensorError> {
    if input.shape() != output.shape() {
        return Err(TensorError::ShapeMismatch {
            op,
            lhs: input.shape().clone(),
            rhs: output.shape().clone(),
        });
    }
    Ok(())
}

/// Returns the length of the innermost axis, treating rank-0 as length 1.
pub(crate) fn inner_len(shape: &Shape) -> usize {
    shape.last_dim().unwrap_or(1)
}
