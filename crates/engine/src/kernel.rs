// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compiled operations and the per-image executor.
//!
//! A plan is a straight chain of [`Op`]s from the input binding to the
//! output binding. Each op owns its (precision-rounded) parameters and
//! knows its input and output shapes, so execution never re-infers shapes.

use tensor_core::{
    global_avg_pool, l2_normalize, matmul, relu, scale_channels, softmax, DType, Shape,
    Tensor, TensorError, TensorView,
};

/// Floor for the L2 norm, avoiding division by zero on all-zero rows.
pub const L2_EPSILON: f32 = 1e-10;

/// What an op computes, with its parameters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum OpKind {
    /// `y = flatten(x) @ W + b`, `W` is `[K, N]`.
    Dense {
        weights: Tensor,
        bias: Option<Vec<f32>>,
    },
    Relu,
    Softmax,
    L2Normalize {
        eps: f32,
    },
    GlobalAvgPool,
    Flatten,
    Scale {
        scale: Vec<f32>,
        shift: Vec<f32>,
    },
}

impl OpKind {
    pub fn label(&self) -> &'static str {
        match self {
            OpKind::Dense { .. } => "dense",
            OpKind::Relu => "relu",
            OpKind::Softmax => "softmax",
            OpKind::L2Normalize { .. } => "l2_normalize",
            OpKind::GlobalAvgPool => "global_avg_pool",
            OpKind::Flatten => "flatten",
            OpKind::Scale { .. } => "scale",
        }
    }
}

/// One compiled layer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Op {
    pub name: String,
    pub kind: OpKind,
    pub input_shape: Shape,
    pub output_shape: Shape,
}

impl Op {
    /// Bytes of parameters this op carries at `dtype`.
    pub fn weight_bytes(&self, dtype: DType) -> usize {
        let elems = match &self.kind {
            OpKind::Dense { weights, bias } => {
                weights.num_elements() + bias.as_ref().map_or(0, Vec::len)
            }
            OpKind::Scale { scale, shift } => scale.len() + shift.len(),
            _ => 0,
        };
        elems * dtype.size_bytes()
    }

    /// Checks that the parameters and shapes agree with what the op
    /// computes, so [`Op::apply`] can trust them.
    pub fn check(&self) -> Result<(), String> {
        let fail = |detail: String| Err(format!("op '{}' ({}): {detail}", self.name, self.kind.label()));
        let (Some(in_volume), Some(out_volume)) = (
            self.input_shape.checked_num_elements(),
            self.output_shape.checked_num_elements(),
        ) else {
            return fail("shape volume overflows".into());
        };
        match &self.kind {
            OpKind::Dense { weights, bias } => {
                let expected = Shape::matrix(in_volume, out_volume);
                if weights.shape() != &expected {
                    return fail(format!("weights are {}, expected {expected}", weights.shape()));
                }
                if let Some(bias) = bias {
                    if bias.len() != out_volume {
                        return fail(format!("bias has {} values, expected {out_volume}", bias.len()));
                    }
                }
            }
            OpKind::Relu | OpKind::Softmax => {
                if self.input_shape != self.output_shape {
                    return fail(format!("maps {} to {}", self.input_shape, self.output_shape));
                }
            }
            OpKind::L2Normalize { eps } => {
                if self.input_shape != self.output_shape {
                    return fail(format!("maps {} to {}", self.input_shape, self.output_shape));
                }
                if !eps.is_finite() || *eps < 0.0 {
                    return fail(format!("epsilon {eps} is not a finite non-negative value"));
                }
            }
            OpKind::GlobalAvgPool => {
                let dims = self.input_shape.dims();
                if dims.len() != 3 || self.output_shape != Shape::vector(dims[0]) {
                    return fail(format!("cannot pool {} to {}", self.input_shape, self.output_shape));
                }
            }
            OpKind::Flatten => {
                if in_volume != out_volume {
                    return fail(format!("{} and {} differ in volume", self.input_shape, self.output_shape));
                }
            }
            OpKind::Scale { scale, shift } => {
                if self.input_shape != self.output_shape {
                    return fail(format!("maps {} to {}", self.input_shape, self.output_shape));
                }
                let channels = self.input_shape.dim(0).unwrap_or(1);
                for (name, params) in [("scale", scale), ("shift", shift)] {
                    if params.len() != 1 && params.len() != channels {
                        return fail(format!(
                            "{name} has {} values, expected 1 or {channels}",
                            params.len()
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs the op on `input`, returning a fresh output tensor.
    pub fn apply(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        let mut output = Tensor::zeros(self.output_shape.clone());
        match &self.kind {
            OpKind::Dense { weights, bias } => {
                let k = input.num_elements();
                let n = self.output_shape.num_elements();
                let row_shape = Shape::matrix(1, k);
                let row = TensorView::from_parts(&row_shape, input.as_f32_slice())?;
                let mut product = Tensor::zeros(Shape::matrix(1, n));
                matmul(&row, &weights.view(), &mut product)?;
                if let Some(bias) = bias {
                    for (y, b) in product.as_f32_slice_mut().iter_mut().zip(bias) {
                        *y += b;
                    }
                }
                output = product.reshape(self.output_shape.clone())?;
            }
            OpKind::Relu => relu(&input.view(), &mut output)?,
            OpKind::Softmax => softmax(&input.view(), &mut output)?,
            OpKind::L2Normalize { eps } => l2_normalize(&input.view(), *eps, &mut output)?,
            OpKind::GlobalAvgPool => global_avg_pool(&input.view(), &mut output)?,
            OpKind::Flatten => {
                output = Tensor::from_f32(self.output_shape.clone(), input.as_f32_slice())?;
            }
            OpKind::Scale { scale, shift } => {
                scale_channels(&input.view(), scale, shift, &mut output)?
            }
        }
        Ok(output)
    }
}

/// Runs `ops` over one image already decoded to f32.
///
/// F16 plans round every intermediate activation to half precision so the
/// host executor matches what a half-precision device would produce.
pub fn run_chain(
    ops: &[Op],
    input_shape: &Shape,
    input: &[f32],
    precision: DType,
) -> Result<Tensor, TensorError> {
    let mut current = Tensor::from_f32(input_shape.clone(), input)?;
    for op in ops {
        current = op.apply(&current)?;
        current.round_to(precision);
    }
    Ok(current)
}
