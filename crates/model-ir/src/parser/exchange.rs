// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Exchange-format parser.
//!
//! File layout:
//!
//! ```json
//! {
//!   "name": "embedder",
//!   "layers": [
//!     { "name": "gap", "type": "global_avg_pool", "input": "input_1", "output": "pooled" },
//!     { "name": "fc",  "type": "dense", "input": "pooled", "output": "emb",
//!       "weights": [[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]], "bias": [0.0, 0.0] }
//!   ]
//! }
//! ```
//!
//! `weights` is row-major `[K][N]`. `scale` layers take `scale` and an
//! optional `shift` (default 0).

use super::read_model_file;
use crate::{LayerDef, LayerType, ModelError, ModelGraph};
use std::path::Path;
use tensor_core::{Shape, Tensor};
use tracing::{debug, warn};

#[derive(Debug, serde::Deserialize)]
struct ExchangeFile {
    name: String,
    layers: Vec<ExchangeLayer>,
}

#[derive(Debug, serde::Deserialize)]
struct ExchangeLayer {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    input: String,
    output: String,
    #[serde(default)]
    weights: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    bias: Option<Vec<f32>>,
    #[serde(default)]
    scale: Option<Vec<f32>>,
    #[serde(default)]
    shift: Option<Vec<f32>>,
}

impl ExchangeLayer {
    fn into_layer_def(self) -> Result<LayerDef, ModelError> {
        let layer_type =
            LayerType::from_str_loose(&self.kind).ok_or_else(|| ModelError::UnknownLayerType {
                layer: self.name.clone(),
                kind: self.kind.clone(),
            })?;

        let invalid = |detail: &str| ModelError::InvalidLayer {
            layer: self.name.clone(),
            detail: detail.to_string(),
        };

        let weights = match layer_type {
            LayerType::Dense => {
                let rows = self
                    .weights
                    .as_deref()
                    .ok_or_else(|| invalid("dense layer is missing 'weights'"))?;
                let mut weights = vec![matrix_from_rows(&self.name, rows)?];
                if let Some(bias) = &self.bias {
                    weights.push(Tensor::from_f32(Shape::vector(bias.len()), bias)?);
                }
                weights
            }
            LayerType::Scale => {
                let scale = self
                    .scale
                    .as_deref()
                    .ok_or_else(|| invalid("scale layer is missing 'scale'"))?;
                let shift = self.shift.clone().unwrap_or_else(|| vec![0.0]);
                vec![
                    Tensor::from_f32(Shape::vector(scale.len()), scale)?,
                    Tensor::from_vec(Shape::vector(shift.len()), shift)?,
                ]
            }
            _ => {
                if self.weights.is_some()
                    || self.bias.is_some()
                    || self.scale.is_some()
                    || self.shift.is_some()
                {
                    warn!(layer = %self.name, kind = %layer_type, "ignoring parameters on parameterless layer");
                }
                Vec::new()
            }
        };

        Ok(LayerDef::new(self.name, layer_type, self.input, self.output).with_weights(weights))
    }
}

/// Flattens `[K][N]` rows into a `[K, N]` tensor.
fn matrix_from_rows(layer: &str, rows: &[Vec<f32>]) -> Result<Tensor, ModelError> {
    let cols = rows.first().map_or(0, Vec::len);
    if cols == 0 || rows.iter().any(|r| r.len() != cols) {
        return Err(ModelError::InvalidLayer {
            layer: layer.to_string(),
            detail: "'weights' must be a non-empty rectangular matrix".into(),
        });
    }
    let data: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(Shape::matrix(rows.len(), cols), data)?)
}

/// Parser for exchange-format models.
///
/// Inputs and outputs are registered first; [`parse`](Self::parse) then
/// declares the inputs, appends the layers and marks the outputs.
#[derive(Debug, Default, Clone)]
pub struct ExchangeParser {
    inputs: Vec<(String, Shape)>,
    outputs: Vec<String>,
}

impl ExchangeParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_input(&mut self, name: impl Into<String>, shape: Shape) -> &mut Self {
        self.inputs.push((name.into(), shape));
        self
    }

    pub fn register_output(&mut self, name: impl Into<String>) -> &mut Self {
        self.outputs.push(name.into());
        self
    }

    /// Reads `path` and populates `graph`.
    pub fn parse(&self, path: &Path, graph: &mut ModelGraph) -> Result<(), ModelError> {
        let source = read_model_file(path)?;
        self.parse_str(&source, &path.display().to_string(), graph)
    }

    /// Populates `graph` from exchange-format JSON. `origin` names the
    /// source in error messages.
    pub fn parse_str(
        &self,
        source: &str,
        origin: &str,
        graph: &mut ModelGraph,
    ) -> Result<(), ModelError> {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(ModelError::InvalidGraph(
                "exchange parser needs a registered input and output".into(),
            ));
        }

        let file: ExchangeFile = serde_json::from_str(source).map_err(|e| ModelError::Format {
            origin: origin.to_string(),
            detail: e.to_string(),
        })?;

        graph.name = file.name;
        for (name, shape) in &self.inputs {
            graph.add_input(name.clone(), shape.clone())?;
        }
        let count = file.layers.len();
        for layer in file.layers {
            graph.add_layer(layer.into_layer_def()?);
        }
        for name in &self.outputs {
            graph.mark_output(name)?;
        }

        debug!(origin, model = %graph.name, layers = count, "exchange model parsed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "name": "tiny",
        "layers": [
            { "name": "gap", "type": "global_avg_pool", "input": "data", "output": "pooled" },
            { "name": "bn", "type": "scale", "input": "pooled", "output": "scaled", "scale": [2.0] },
            { "name": "fc", "type": "fc", "input": "scaled", "output": "emb",
              "weights": [[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]], "bias": [0.5, 0.5] },
            { "name": "norm", "type": "l2_normalize", "input": "emb", "output": "out" }
        ]
    }"#;

    fn parser() -> ExchangeParser {
        let mut p = ExchangeParser::new();
        p.register_input("data", Shape::chw(3, 4, 4)).register_output("out");
        p
    }

    #[test]
    fn test_parse_populates_graph() {
        let mut graph = ModelGraph::new("");
        parser().parse_str(MODEL, "tiny.json", &mut graph).unwrap();
        assert_eq!(graph.name, "tiny");
        assert_eq!(graph.num_layers(), 4);
        assert_eq!(graph.outputs(), &["out".to_string()]);

        let fc = &graph.layers()[2];
        assert_eq!(fc.layer_type, LayerType::Dense);
        assert_eq!(fc.weights[0].shape(), &Shape::matrix(3, 2));
        assert_eq!(fc.weights[1].as_f32_slice(), &[0.5, 0.5]);

        let bn = &graph.layers()[1];
        assert_eq!(bn.weights[1].as_f32_slice(), &[0.0]);

        let v = graph.validate().unwrap();
        assert_eq!(v.output().shape, Shape::vector(2));
    }

    #[test]
    fn test_unregistered_output_missing() {
        let mut p = ExchangeParser::new();
        p.register_input("data", Shape::chw(3, 4, 4))
            .register_output("not_there");
        let mut graph = ModelGraph::new("");
        assert!(matches!(
            p.parse_str(MODEL, "tiny.json", &mut graph),
            Err(ModelError::TensorNotFound { .. })
        ));
    }

    #[test]
    fn test_requires_registration() {
        let mut graph = ModelGraph::new("");
        assert!(ExchangeParser::new()
            .parse_str(MODEL, "tiny.json", &mut graph)
            .is_err());
    }

    #[test]
    fn test_unknown_layer_type() {
        let src = r#"{ "name": "x", "layers": [
            { "name": "c1", "type": "conv3d", "input": "data", "output": "out" } ] }"#;
        let mut graph = ModelGraph::new("");
        assert!(matches!(
            parser().parse_str(src, "x.json", &mut graph),
            Err(ModelError::UnknownLayerType { kind, .. }) if kind == "conv3d"
        ));
    }

    #[test]
    fn test_ragged_weights() {
        let src = r#"{ "name": "x", "layers": [
            { "name": "fc", "type": "dense", "input": "data", "output": "out",
              "weights": [[1.0, 2.0], [3.0]] } ] }"#;
        let mut graph = ModelGraph::new("");
        assert!(matches!(
            parser().parse_str(src, "x.json", &mut graph),
            Err(ModelError::InvalidLayer { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        let mut graph = ModelGraph::new("");
        assert!(matches!(
            parser().parse_str("{ not json", "bad.json", &mut graph),
            Err(ModelError::Format { origin, .. }) if origin == "bad.json"
        ));
    }

    #[test]
    fn test_parse_missing_file() {
        let mut graph = ModelGraph::new("");
        assert!(matches!(
            parser().parse(Path::new("/nonexistent/model.json"), &mut graph),
            Err(ModelError::Io { .. })
        ));
    }
}
