// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer definitions for the computation-graph IR.
//!
//! Each [`LayerDef`] names one input tensor and one output tensor and owns
//! its parameters. Parameter order is fixed per layer type:
//!
//! | Type    | `weights`                                  |
//! |---------|--------------------------------------------|
//! | `dense` | `W [K, N]`, optional `bias [N]`            |
//! | `scale` | `scale [C or 1]`, `shift [C or 1]`         |
//! | others  | none                                       |

use crate::ModelError;
use tensor_core::{DType, Shape, Tensor};

/// The computation a layer performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerType {
    /// Fully connected: flattens the input to `K` values and projects to `N`.
    Dense,
    Relu,
    /// Softmax over the last dimension.
    Softmax,
    /// L2 normalization over the last dimension.
    L2Normalize,
    /// `[C, H, W]` → `[C]` spatial mean.
    GlobalAvgPool,
    Flatten,
    /// Per-channel affine transform on the first dimension.
    Scale,
}

impl LayerType {
    /// Parses a layer type from a model file.
    ///
    /// Accepts the snake_case names plus the aliases common in exported
    /// graphs (`"fc"`, `"inner_product"`, `"prob"`, `"batchnorm"`, ...).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dense" | "fc" | "linear" | "inner_product" | "innerproduct" => Some(Self::Dense),
            "relu" => Some(Self::Relu),
            "softmax" | "prob" => Some(Self::Softmax),
            "l2_normalize" | "l2norm" | "l2_norm" | "normalize" => Some(Self::L2Normalize),
            "global_avg_pool" | "globalavgpool" | "gap" => Some(Self::GlobalAvgPool),
            "flatten" => Some(Self::Flatten),
            "scale" | "batchnorm" | "batch_norm" | "affine" => Some(Self::Scale),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Relu => "relu",
            Self::Softmax => "softmax",
            Self::L2Normalize => "l2_normalize",
            Self::GlobalAvgPool => "global_avg_pool",
            Self::Flatten => "flatten",
            Self::Scale => "scale",
        }
    }

    /// Whether the layer carries parameters.
    pub fn has_weights(&self) -> bool {
        matches!(self, Self::Dense | Self::Scale)
    }
}

impl std::fmt::Display for LayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single layer of the graph.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayerDef {
    /// Unique layer name (e.g. `"fc1"`).
    pub name: String,
    pub layer_type: LayerType,
    /// Name of the tensor this layer reads.
    pub input: String,
    /// Name of the tensor this layer produces.
    pub output: String,
    /// Parameters, in the order given in the module docs.
    pub weights: Vec<Tensor>,
}

impl LayerDef {
    pub fn new(
        name: impl Into<String>,
        layer_type: LayerType,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            layer_type,
            input: input.into(),
            output: output.into(),
            weights: Vec::new(),
        }
    }

    pub fn with_weights(mut self, weights: Vec<Tensor>) -> Self {
        self.weights = weights;
        self
    }

    /// Bytes the parameters occupy at `dtype`.
    pub fn weight_bytes(&self, dtype: DType) -> usize {
        self.weights.iter().map(|w| w.shape().size_bytes(dtype)).sum()
    }

    fn invalid(&self, detail: impl Into<String>) -> ModelError {
        ModelError::InvalidLayer {
            layer: self.name.clone(),
            detail: detail.into(),
        }
    }

    /// Checks the parameters against `input` and returns the output shape.
    pub fn infer_output_shape(&self, input: &Shape) -> Result<Shape, ModelError> {
        match input.checked_num_elements() {
            None => return Err(self.invalid(format!("input {input} overflows the element count"))),
            Some(0) => return Err(self.invalid(format!("input {input} has zero elements"))),
            Some(_) => {}
        }
        if !self.layer_type.has_weights() && !self.weights.is_empty() {
            return Err(self.invalid(format!("{} takes no weights", self.layer_type)));
        }

        match self.layer_type {
            LayerType::Dense => {
                let w = self
                    .weights
                    .first()
                    .ok_or_else(|| self.invalid("dense layer needs a weight matrix"))?;
                let &[k, n] = w.shape().dims() else {
                    return Err(self.invalid(format!("weight must be rank 2, got {}", w.shape())));
                };
                if input.num_elements() != k {
                    return Err(self.invalid(format!(
                        "input {input} has {} values, weight expects {k}",
                        input.num_elements()
                    )));
                }
                match self.weights.len() {
                    1 => {}
                    2 if self.weights[1].num_elements() == n => {}
                    2 => {
                        return Err(self.invalid(format!(
                            "bias has {} values, expected {n}",
                            self.weights[1].num_elements()
                        )))
                    }
                    more => return Err(self.invalid(format!("expected at most 2 weights, got {more}"))),
                }
                Ok(Shape::vector(n))
            }
            LayerType::Relu | LayerType::Softmax | LayerType::L2Normalize => {
                Ok(input.clone())
            }
            LayerType::Scale => {
                let [scale, shift] = self.weights.as_slice() else {
                    return Err(self.invalid(format!(
                        "scale needs exactly 2 weights (scale, shift), got {}",
                        self.weights.len()
                    )));
                };
                let channels = input.dim(0).unwrap_or(1);
                for (what, t) in [("scale", scale), ("shift", shift)] {
                    let len = t.num_elements();
                    if len != 1 && len != channels {
                        return Err(self.invalid(format!(
                            "{what} has {len} values, expected 1 or {channels}"
                        )));
                    }
                }
                Ok(input.clone())
            }
            LayerType::GlobalAvgPool => match input.dims() {
                &[c, _, _] => Ok(Shape::vector(c)),
                _ => Err(self.invalid(format!("global_avg_pool needs [C, H, W], got {input}"))),
            },
            LayerType::Flatten => Ok(Shape::vector(input.num_elements())),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} ({}): {} -> {}, {} weight tensors",
            self.name,
            self.layer_type,
            self.input,
            self.output,
            self.weights.len(),
        )
    }
}
