// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Vendor-format parser: deploy descriptor + SafeTensors weights.
//!
//! Deploy descriptor:
//!
//! ```json
//! {
//!   "name": "classifier",
//!   "input": "data",
//!   "input_shape": [3, 8, 8],
//!   "layers": [
//!     { "name": "pool", "type": "global_avg_pool", "bottom": "data", "top": "pool" },
//!     { "name": "fc", "type": "inner_product", "bottom": "pool", "top": "fc",
//!       "params": ["fc.weight", "fc.bias"] },
//!     { "name": "prob1", "type": "softmax", "bottom": "fc", "top": "prob1" }
//!   ]
//! }
//! ```
//!
//! Dense weights are stored output-major (`[N, K]`) and transposed on load.

use super::read_model_file;
use crate::weights::WeightFile;
use crate::{LayerDef, LayerType, ModelError, ModelGraph};
use std::collections::BTreeSet;
use std::path::Path;
use tensor_core::{Shape, Tensor};

/// The deploy descriptor: network input plus layer wiring.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct DeployDescriptor {
    pub name: String,
    pub input: String,
    pub input_shape: Vec<usize>,
    pub layers: Vec<DeployLayer>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct DeployLayer {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub bottom: String,
    pub top: String,
    /// Names of this layer's tensors in the weights file.
    #[serde(default)]
    pub params: Vec<String>,
}

impl DeployDescriptor {
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let source = read_model_file(path)?;
        Self::from_json(&source, &path.display().to_string())
    }

    pub fn from_json(source: &str, origin: &str) -> Result<Self, ModelError> {
        serde_json::from_str(source).map_err(|e| ModelError::Format {
            origin: origin.to_string(),
            detail: e.to_string(),
        })
    }
}

/// Every tensor a vendor parse produced, for output lookup by name.
#[derive(Debug, Clone, Default)]
pub struct BlobTable {
    blobs: BTreeSet<String>,
}

impl BlobTable {
    /// Returns the tensor called `name`, if the model produced one.
    pub fn find(&self, name: &str) -> Option<&str> {
        self.blobs.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blobs.iter().map(String::as_str)
    }
}

/// Parser for vendor-format models.
#[derive(Debug, Default, Clone, Copy)]
pub struct VendorParser;

impl VendorParser {
    pub fn new() -> Self {
        Self
    }

    /// Reads both files and populates `graph` with the declared input and
    /// every layer. No output is marked.
    pub fn parse(
        &self,
        deploy_file: &Path,
        weights_file: &Path,
        graph: &mut ModelGraph,
    ) -> Result<BlobTable, ModelError> {
        let deploy = DeployDescriptor::from_file(deploy_file)?;
        let weights = WeightFile::open(weights_file)?;
        self.populate(&deploy, &weights, graph)
    }

    /// Populates `graph` from an already-read descriptor.
    pub fn populate(
        &self,
        deploy: &DeployDescriptor,
        weights: &WeightFile,
        graph: &mut ModelGraph,
    ) -> Result<BlobTable, ModelError> {
        let mut table = BlobTable::default();

        graph.name = deploy.name.clone();
        graph.add_input(deploy.input.clone(), Shape::new(deploy.input_shape.clone()))?;
        table.blobs.insert(deploy.input.clone());

        for layer in &deploy.layers {
            graph.add_layer(resolve_layer(layer, weights)?);
            table.blobs.insert(layer.top.clone());
        }

        tracing::debug!(
            model = %deploy.name,
            layers = deploy.layers.len(),
            blobs = table.len(),
            "vendor model parsed"
        );
        Ok(table)
    }
}

fn resolve_layer(layer: &DeployLayer, weights: &WeightFile) -> Result<LayerDef, ModelError> {
    let layer_type =
        LayerType::from_str_loose(&layer.kind).ok_or_else(|| ModelError::UnknownLayerType {
            layer: layer.name.clone(),
            kind: layer.kind.clone(),
        })?;

    let expected = match layer_type {
        LayerType::Dense => 1..=2,
        LayerType::Scale => 1..=2,
        _ => 0..=0,
    };
    if !expected.contains(&layer.params.len()) {
        return Err(ModelError::InvalidLayer {
            layer: layer.name.clone(),
            detail: format!(
                "{layer_type} takes {}..={} params, got {}",
                expected.start(),
                expected.end(),
                layer.params.len()
            ),
        });
    }

    let mut tensors = layer
        .params
        .iter()
        .map(|p| weights.tensor(p))
        .collect::<Result<Vec<_>, _>>()?;

    match layer_type {
        LayerType::Dense => {
            tensors[0] = transpose(&layer.name, &tensors[0])?;
        }
        LayerType::Scale if tensors.len() == 1 => {
            tensors.push(Tensor::zeros(Shape::vector(1)));
        }
        _ => {}
    }

    Ok(LayerDef::new(
        layer.name.clone(),
        layer_type,
        layer.bottom.clone(),
        layer.top.clone(),
    )
    .with_weights(tensors))
}

/// `[N, K]` → `[K, N]`.
fn transpose(layer: &str, t: &Tensor) -> Result<Tensor, ModelError> {
    let &[rows, cols] = t.shape().dims() else {
        return Err(ModelError::InvalidLayer {
            layer: layer.to_string(),
            detail: format!("dense weight must be rank 2, got {}", t.shape()),
        });
    };
    let src = t.as_f32_slice();
    let mut out = vec![0.0f32; src.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = src[r * cols + c];
        }
    }
    Ok(Tensor::from_vec(Shape::matrix(cols, rows), out)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::save_weights;
    use std::collections::BTreeMap;
    use tensor_core::DType;

    const DEPLOY: &str = r#"{
        "name": "cls",
        "input": "data",
        "input_shape": [3, 2, 2],
        "layers": [
            { "name": "pool", "type": "global_avg_pool", "bottom": "data", "top": "pool" },
            { "name": "fc", "type": "InnerProduct", "bottom": "pool", "top": "fc",
              "params": ["fc.weight", "fc.bias"] },
            { "name": "prob1", "type": "Softmax", "bottom": "fc", "top": "prob1" }
        ]
    }"#;

    fn write_fixture(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let deploy = dir.join("deploy.json");
        std::fs::write(&deploy, DEPLOY).unwrap();

        // Output-major: 2 outputs × 3 inputs.
        let mut tensors = BTreeMap::new();
        tensors.insert(
            "fc.weight".to_string(),
            Tensor::from_f32(Shape::matrix(2, 3), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        );
        tensors.insert(
            "fc.bias".to_string(),
            Tensor::from_f32(Shape::vector(2), &[0.0, 1.0]).unwrap(),
        );
        let weights = dir.join("weights.safetensors");
        save_weights(&weights, &tensors, DType::F32).unwrap();
        (deploy, weights)
    }

    #[test]
    fn test_parse_and_mark_default_output() {
        let dir = tempfile::tempdir().unwrap();
        let (deploy, weights) = write_fixture(dir.path());

        let mut graph = ModelGraph::new("");
        let table = VendorParser::new().parse(&deploy, &weights, &mut graph).unwrap();
        assert_eq!(table.len(), 4);
        assert!(graph.outputs().is_empty());

        let out = table.find(crate::DEFAULT_VENDOR_OUTPUT).unwrap();
        graph.mark_output(out).unwrap();
        let v = graph.validate().unwrap();
        assert_eq!(v.input().shape, Shape::chw(3, 2, 2));
        assert_eq!(v.output().shape, Shape::vector(2));
    }

    #[test]
    fn test_dense_weight_is_transposed() {
        let dir = tempfile::tempdir().unwrap();
        let (deploy, weights) = write_fixture(dir.path());
        let mut graph = ModelGraph::new("");
        VendorParser::new().parse(&deploy, &weights, &mut graph).unwrap();

        let fc = &graph.layers()[1];
        assert_eq!(fc.weights[0].shape(), &Shape::matrix(3, 2));
        assert_eq!(fc.weights[0].as_f32_slice(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_find_unknown_blob() {
        let dir = tempfile::tempdir().unwrap();
        let (deploy, weights) = write_fixture(dir.path());
        let mut graph = ModelGraph::new("");
        let table = VendorParser::new().parse(&deploy, &weights, &mut graph).unwrap();
        assert!(table.find("prob").is_none());
        assert_eq!(table.find("fc"), Some("fc"));
    }

    #[test]
    fn test_missing_param_tensor() {
        let dir = tempfile::tempdir().unwrap();
        let (_, weights) = write_fixture(dir.path());
        let deploy = DeployDescriptor::from_json(
            r#"{ "name": "m", "input": "data", "input_shape": [3],
                 "layers": [ { "name": "fc", "type": "fc", "bottom": "data", "top": "out",
                               "params": ["other.weight"] } ] }"#,
            "inline",
        )
        .unwrap();
        let file = WeightFile::open(&weights).unwrap();
        let mut graph = ModelGraph::new("");
        assert!(matches!(
            VendorParser::new().populate(&deploy, &file, &mut graph),
            Err(ModelError::WeightNotFound { .. })
        ));
    }

    #[test]
    fn test_params_on_parameterless_layer() {
        let dir = tempfile::tempdir().unwrap();
        let (_, weights) = write_fixture(dir.path());
        let deploy = DeployDescriptor::from_json(
            r#"{ "name": "m", "input": "data", "input_shape": [3],
                 "layers": [ { "name": "r", "type": "relu", "bottom": "data", "top": "out",
                               "params": ["fc.bias"] } ] }"#,
            "inline",
        )
        .unwrap();
        let file = WeightFile::open(&weights).unwrap();
        let mut graph = ModelGraph::new("");
        assert!(matches!(
            VendorParser::new().populate(&deploy, &file, &mut graph),
            Err(ModelError::InvalidLayer { .. })
        ));
    }

    #[test]
    fn test_missing_deploy_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_, weights) = write_fixture(dir.path());
        let mut graph = ModelGraph::new("");
        assert!(matches!(
            VendorParser::new().parse(&dir.path().join("nope.json"), &weights, &mut graph),
            Err(ModelError::Io { .. })
        ));
    }
}
