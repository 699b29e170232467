// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Global average pooling over the spatial axes of a channel-first tensor.

use crate::{Shape, Tensor, TensorError, TensorView};

/// Reduces `[C, H, W]` to `[C]` by averaging each channel plane.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if the input is not rank 3 or the
/// output is not `[C]`.
pub fn global_avg_pool(input: &TensorView<'_>, output: &mut Tensor) -> Result<(), TensorError> {
    let dims = input.shape().dims();
    if dims.len() != 3 {
        return Err(TensorError::ShapeMismatch {
            op: "global_avg_pool (rank)",
            lhs: input.shape().clone(),
            rhs: Shape::chw(0, 0, 0),
        });
    }
    let expected = Shape::vector(dims[0]);
    if output.shape() != &expected {
        return Err(TensorError::ShapeMismatch {
            op: "global_avg_pool (output)",
            lhs: expected,
            rhs: output.shape().clone(),
        });
    }

    let plane = dims[1] * dims[2];
    if plane == 0 {
        output.fill_f32(0.0);
        return Ok(());
    }
    let inv = 1.0 / plane as f32;
    for (d, plane_src) in output
        .as_f32_slice_mut()
        .iter_mut()
        .zip(input.as_f32_slice().chunks_exact(plane))
    {
        *d = plane_src.iter().sum::<f32>() * inv;
    }
    Ok(())
}
