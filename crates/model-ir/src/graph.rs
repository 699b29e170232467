// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model graph: named tensors connected by layers.
//!
//! # Type-State Pattern
//!
//! ```text
//! ModelGraph<Loaded>     : inputs, layers and outputs being populated by a parser.
//!       │  .validate()
//!       ▼
//! ModelGraph<Validated>  : every tensor resolved and shaped; ready to compile.
//! ```
//!
//! The builder only compiles a `ModelGraph<Validated>`, so it never sees a
//! dangling tensor reference or a shape it cannot execute.

use crate::{LayerDef, ModelError};
use std::collections::BTreeMap;
use std::fmt;
use tensor_core::{DType, Shape};

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: graph is being populated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph has been validated and every tensor has a shape.
#[derive(Debug, Clone)]
pub struct Validated;

pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

/// A graph input: tensor name plus its shape.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TensorDesc {
    pub name: String,
    pub shape: Shape,
}

// ── ModelGraph ─────────────────────────────────────────────────────

/// A computation graph whose layers are listed in execution order.
#[derive(Debug, Clone)]
pub struct ModelGraph<S: GraphState = Loaded> {
    /// Human-readable model name.
    pub name: String,
    inputs: Vec<TensorDesc>,
    outputs: Vec<String>,
    layers: Vec<LayerDef>,
    /// Shapes of every tensor; populated by validation.
    shapes: BTreeMap<String, Shape>,
    _state: std::marker::PhantomData<S>,
}

impl<S: GraphState> ModelGraph<S> {
    pub fn inputs(&self) -> &[TensorDesc] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn layers(&self) -> &[LayerDef] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// True when no layer has been added.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Whether `name` is a graph input or the output of some layer.
    pub fn has_tensor(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| i.name == name) || self.layers.iter().any(|l| l.output == name)
    }

    /// Parameter bytes of all layers at `dtype`.
    pub fn total_weight_bytes(&self, dtype: DType) -> usize {
        self.layers.iter().map(|l| l.weight_bytes(dtype)).sum()
    }
}

// ── Loaded state ───────────────────────────────────────────────────

impl ModelGraph<Loaded> {
    /// Creates an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            layers: Vec::new(),
            shapes: BTreeMap::new(),
            _state: std::marker::PhantomData,
        }
    }

    /// Declares a network input.
    pub fn add_input(&mut self, name: impl Into<String>, shape: Shape) -> Result<(), ModelError> {
        let name = name.into();
        if self.has_tensor(&name) {
            return Err(ModelError::DuplicateTensor { name });
        }
        self.inputs.push(TensorDesc { name, shape });
        Ok(())
    }

    /// Appends a layer. Layers execute in the order they are added.
    pub fn add_layer(&mut self, layer: LayerDef) {
        self.layers.push(layer);
    }

    /// Marks an existing tensor as a network output.
    pub fn mark_output(&mut self, name: &str) -> Result<(), ModelError> {
        if !self.has_tensor(name) {
            return Err(ModelError::TensorNotFound { name: name.into() });
        }
        if !self.outputs.iter().any(|o| o == name) {
            self.outputs.push(name.to_string());
        }
        Ok(())
    }

    /// Resolves every tensor reference, infers shapes and transitions to
    /// `Validated`.
    ///
    /// # Checks
    /// - At least one layer; exactly one input and one output.
    /// - Each layer reads a tensor defined earlier (input or prior layer).
    /// - No tensor is defined twice.
    /// - Each layer's parameters fit its input shape.
    pub fn validate(self) -> Result<ModelGraph<Validated>, ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::InvalidGraph(format!(
                "model '{}' contains no layers",
                self.name
            )));
        }
        if self.inputs.len() != 1 {
            return Err(ModelError::InvalidGraph(format!(
                "expected exactly one input, found {}",
                self.inputs.len()
            )));
        }
        if self.outputs.len() != 1 {
            return Err(ModelError::InvalidGraph(format!(
                "expected exactly one output, found {}",
                self.outputs.len()
            )));
        }

        let mut shapes = BTreeMap::new();
        for input in &self.inputs {
            shapes.insert(input.name.clone(), input.shape.clone());
        }

        for layer in &self.layers {
            let in_shape = shapes
                .get(&layer.input)
                .ok_or_else(|| ModelError::TensorNotFound {
                    name: layer.input.clone(),
                })?;
            let out_shape = layer.infer_output_shape(in_shape)?;
            if shapes.contains_key(&layer.output) {
                return Err(ModelError::DuplicateTensor {
                    name: layer.output.clone(),
                });
            }
            tracing::trace!(layer = %layer.name, output = %out_shape, "shape inferred");
            shapes.insert(layer.output.clone(), out_shape);
        }

        let used: std::collections::BTreeSet<&str> =
            self.layers.iter().map(|l| l.input.as_str()).collect();
        for layer in &self.layers {
            if layer.output != self.outputs[0] && !used.contains(layer.output.as_str()) {
                tracing::warn!(layer = %layer.name, "layer output is never consumed");
            }
        }

        Ok(ModelGraph {
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            layers: self.layers,
            shapes,
            _state: std::marker::PhantomData,
        })
    }
}

// ── Validated state ────────────────────────────────────────────────

impl ModelGraph<Validated> {
    /// The single network input.
    pub fn input(&self) -> &TensorDesc {
        &self.inputs[0]
    }

    /// The single network output and its shape.
    pub fn output(&self) -> TensorDesc {
        let name = self.outputs[0].clone();
        let shape = self.shapes[&name].clone();
        TensorDesc { name, shape }
    }

    pub fn shape_of(&self, tensor: &str) -> Option<&Shape> {
        self.shapes.get(tensor)
    }

    /// Size of the largest tensor in the graph at `dtype`, or `None` if
    /// some tensor's byte size overflows `usize`.
    pub fn max_activation_bytes(&self, dtype: DType) -> Option<usize> {
        self.shapes
            .values()
            .try_fold(0usize, |max, s| Some(max.max(s.checked_size_bytes(dtype)?)))
    }

    pub fn summary(&self) -> String {
        let out = self.output();
        format!(
            "Model '{}': {} layers, input {} {}, output {} {}, {:.1} KB weights (f32)",
            self.name,
            self.num_layers(),
            self.input().name,
            self.input().shape,
            out.name,
            out.shape,
            self.total_weight_bytes(DType::F32) as f64 / 1024.0,
        )
    }
}

// ── Shared implementations ─────────────────────────────────────────

impl<S: GraphState> fmt::Display for ModelGraph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ModelGraph '{}' ({} layers):", self.name, self.layers.len())?;
        for input in &self.inputs {
            writeln!(f, "  input  {} {}", input.name, input.shape)?;
        }
        for layer in &self.layers {
            writeln!(f, "  {}", layer.summary())?;
        }
        for output in &self.outputs {
            writeln!(f, "  output {output}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LayerType;
    use tensor_core::Tensor;

    /// input [3, 2, 2] → gap → fc(3→4) → softmax
    fn small_graph() -> ModelGraph<Loaded> {
        let mut g = ModelGraph::new("small");
        g.add_input("data", Shape::chw(3, 2, 2)).unwrap();
        g.add_layer(LayerDef::new("gap", LayerType::GlobalAvgPool, "data", "pooled"));
        g.add_layer(
            LayerDef::new("fc", LayerType::Dense, "pooled", "logits")
                .with_weights(vec![Tensor::zeros(Shape::matrix(3, 4))]),
        );
        g.add_layer(LayerDef::new("prob", LayerType::Softmax, "logits", "prob"));
        g
    }

    #[test]
    fn test_validate_ok() {
        let mut g = small_graph();
        g.mark_output("prob").unwrap();
        let v = g.validate().unwrap();
        assert_eq!(v.num_layers(), 3);
        assert_eq!(v.input().shape, Shape::chw(3, 2, 2));
        assert_eq!(v.output().shape, Shape::vector(4));
        assert_eq!(v.shape_of("pooled"), Some(&Shape::vector(3)));
    }

    #[test]
    fn test_validate_empty() {
        let mut g = ModelGraph::new("empty");
        g.add_input("data", Shape::vector(3)).unwrap();
        assert!(g.is_empty());
        assert!(matches!(g.validate(), Err(ModelError::InvalidGraph(_))));
    }

    #[test]
    fn test_mark_unknown_output() {
        let mut g = small_graph();
        assert!(matches!(
            g.mark_output("missing"),
            Err(ModelError::TensorNotFound { .. })
        ));
    }

    #[test]
    fn test_validate_requires_output() {
        assert!(matches!(
            small_graph().validate(),
            Err(ModelError::InvalidGraph(_))
        ));
    }

    #[test]
    fn test_validate_dangling_input() {
        let mut g = small_graph();
        g.add_layer(LayerDef::new("act", LayerType::Relu, "nowhere", "act"));
        g.mark_output("act").unwrap();
        assert!(matches!(
            g.validate(),
            Err(ModelError::TensorNotFound { name }) if name == "nowhere"
        ));
    }

    #[test]
    fn test_validate_forward_reference() {
        // A layer may only read tensors produced earlier in the list.
        let mut g = ModelGraph::new("fwd");
        g.add_input("data", Shape::vector(4)).unwrap();
        g.add_layer(LayerDef::new("b", LayerType::Relu, "a_out", "b_out"));
        g.add_layer(LayerDef::new("a", LayerType::Relu, "data", "a_out"));
        g.mark_output("b_out").unwrap();
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_duplicate_tensor() {
        let mut g = ModelGraph::new("dup");
        g.add_input("data", Shape::vector(4)).unwrap();
        assert!(g.add_input("data", Shape::vector(4)).is_err());
        g.add_layer(LayerDef::new("a", LayerType::Relu, "data", "x"));
        g.add_layer(LayerDef::new("b", LayerType::Relu, "x", "x"));
        g.mark_output("x").unwrap();
        assert!(matches!(g.validate(), Err(ModelError::DuplicateTensor { .. })));
    }

    #[test]
    fn test_max_activation_bytes() {
        let mut g = small_graph();
        g.mark_output("prob").unwrap();
        let v = g.validate().unwrap();
        // Largest tensor is the [3, 2, 2] input.
        assert_eq!(v.max_activation_bytes(DType::F32), Some(12 * 4));
        assert_eq!(v.max_activation_bytes(DType::F16), Some(12 * 2));
    }

    #[test]
    fn test_summary_and_display() {
        let mut g = small_graph();
        g.mark_output("prob").unwrap();
        let text = g.to_string();
        assert!(text.contains("input  data [3, 2, 2]"));
        assert!(text.contains("output prob"));
        let v = g.validate().unwrap();
        assert!(v.summary().contains("3 layers"));
    }
}
