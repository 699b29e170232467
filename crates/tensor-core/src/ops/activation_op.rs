// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-wise and row-wise activations: ReLU, L2 normalisation and
//! per-channel affine scaling.

use super::{check_same_shape, inner_len};
use crate::{Tensor, TensorError, TensorView};

/// Applies `max(x, 0)` element-wise.
pub fn relu(input: &TensorView<'_>, output: &mut Tensor) -> Result<(), TensorError> {
    check_same_shape("relu", input, output)?;

    for (d, &x) in output.as_f32_slice_mut().iter_mut().zip(input.as_f32_slice()) {
        *d = x.max(0.0);
    }
    Ok(())
}

/// Normalises each row (last dimension) to unit Euclidean length:
/// `output = x / max(||x||, eps)`.
///
/// Face-embedding heads end with this so that downstream matching can use
/// plain dot products.
pub fn l2_normalize(
    input: &TensorView<'_>,
    eps: f32,
    output: &mut Tensor,
) -> Result<(), TensorError> {
    check_same_shape("l2_normalize", input, output)?;

    let last_dim = inner_len(input.shape());
    if last_dim == 0 {
        return Ok(());
    }

    let src = input.as_f32_slice();
    let dst = output.as_f32_slice_mut();
    for (row_src, row_dst) in src.chunks_exact(last_dim).zip(dst.chunks_exact_mut(last_dim)) {
        let norm = row_src.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm.is_nan() {
            return Err(TensorError::Numeric {
                op: "l2_normalize",
                detail: "row norm is NaN".into(),
            });
        }
        let inv = 1.0 / norm.max(eps);
        for (d, &s) in row_dst.iter_mut().zip(row_src) {
            *d = s * inv;
        }
    }
    Ok(())
}

/// Applies `output = x * scale[c] + shift[c]` where `c` indexes the first
/// dimension (the channel axis of a channel-first tensor).
///
/// `scale` and `shift` must both have length 1 (broadcast to every channel)
/// or length equal to the first dimension.
pub fn scale_channels(
    input: &TensorView<'_>,
    scale: &[f32],
    shift: &[f32],
    output: &mut Tensor,
) -> Result<(), TensorError> {
    check_same_shape("scale_channels", input, output)?;

    let channels = input.shape().dim(0).unwrap_or(1);
    for (name, params) in [("scale", scale), ("shift", shift)] {
        if params.len() != 1 && params.len() != channels {
            return Err(TensorError::Numeric {
                op: "scale_channels",
                detail: format!(
                    "{name} has {} values, expected 1 or {channels}",
                    params.len()
                ),
            });
        }
    }

    let per_channel = if channels == 0 {
        0
    } else {
        input.shape().num_elements() / channels
    };
    if per_channel == 0 {
        return Ok(());
    }

    let src = input.as_f32_slice();
    let dst = output.as_f32_slice_mut();
    for (c, (plane_src, plane_dst)) in src
        .chunks_exact(per_channel)
        .zip(dst.chunks_exact_mut(per_channel))
        .enumerate()
    {
        let a = scale[c.min(scale.len() - 1)];
        let b = shift[c.min(shift.len() - 1)];
        for (d, &s) in plane_dst.iter_mut().zip(plane_src) {
            *d = s * a + b;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    #[test]
    fn test_relu() {
        let input = Tensor::from_f32(Shape::vector(4), &[-1.0, 0.0, 2.0, -0.5]).unwrap();
        let mut output = Tensor::zeros(Shape::vector(4));
        relu(&input.view(), &mut output).unwrap();
        assert_eq!(output.as_f32_slice(), &[0.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let input = Tensor::from_f32(Shape::vector(2), &[3.0, 4.0]).unwrap();
        let mut output = Tensor::zeros(Shape::vector(2));
        l2_normalize(&input.view(), 1e-10, &mut output).unwrap();
        let r = output.as_f32_slice();
        assert!((r[0] - 0.6).abs() < 1e-6);
        assert!((r[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_row_stays_zero() {
        let input = Tensor::zeros(Shape::vector(3));
        let mut output = Tensor::zeros(Shape::vector(3));
        l2_normalize(&input.view(), 1e-10, &mut output).unwrap();
        assert!(output.as_f32_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_l2_normalize_nan_is_error() {
        let input = Tensor::from_f32(Shape::vector(2), &[f32::NAN, 1.0]).unwrap();
        let mut output = Tensor::zeros(Shape::vector(2));
        assert!(l2_normalize(&input.view(), 1e-10, &mut output).is_err());
    }

    #[test]
    fn test_scale_channels_per_channel() {
        let input = Tensor::from_f32(Shape::chw(2, 1, 2), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut output = Tensor::zeros(Shape::chw(2, 1, 2));
        scale_channels(&input.view(), &[2.0, 10.0], &[0.0, 1.0], &mut output).unwrap();
        assert_eq!(output.as_f32_slice(), &[2.0, 4.0, 31.0, 41.0]);
    }

    #[test]
    fn test_scale_channels_broadcast() {
        let input = Tensor::from_f32(Shape::chw(3, 1, 1), &[1.0, 2.0, 3.0]).unwrap();
        let mut output = Tensor::zeros(Shape::chw(3, 1, 1));
        scale_channels(&input.view(), &[0.5], &[-1.0], &mut output).unwrap();
        assert_eq!(output.as_f32_slice(), &[-0.5, 0.0, 0.5]);
    }

    #[test]
    fn test_scale_channels_bad_param_len() {
        let input = Tensor::zeros(Shape::chw(3, 1, 1));
        let mut output = Tensor::zeros(Shape::chw(3, 1, 1));
        assert!(scale_channels(&input.view(), &[1.0, 2.0], &[0.0], &mut output).is_err());
    }
}
