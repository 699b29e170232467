// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! The computation-graph IR consumed by the engine builder, plus the two
//! model-format parsers that populate it.
//!
//! - [`LayerType`] / [`LayerDef`]: one layer, its tensor wiring and parameters.
//! - [`ModelGraph`]: named tensors connected by layers, with a
//!   **type-state pattern** (`Loaded` → `Validated`).
//! - [`ExchangeParser`]: single-file JSON graphs; I/O registered up front.
//! - [`VendorParser`]: deploy descriptor + SafeTensors weights; output marked
//!   afterwards via [`BlobTable::find`].
//! - [`ModelFormat`]: which of the two a model on disk uses.
//!
//! # Example
//! ```
//! use model_ir::{ExchangeParser, ModelGraph};
//! use tensor_core::Shape;
//!
//! let src = r#"{ "name": "id", "layers": [
//!     { "name": "act", "type": "relu", "input": "data", "output": "out" } ] }"#;
//!
//! let mut parser = ExchangeParser::new();
//! parser.register_input("data", Shape::chw(3, 2, 2)).register_output("out");
//!
//! let mut graph = ModelGraph::new("");
//! parser.parse_str(src, "inline", &mut graph).unwrap();
//! let graph = graph.validate().unwrap();
//! println!("{}", graph.summary());
//! ```

mod error;
pub mod graph;
mod layer;
pub mod parser;
mod weights;

pub use error::ModelError;
pub use graph::{ModelGraph, TensorDesc};
pub use layer::{LayerDef, LayerType};
pub use parser::{
    BlobTable, DeployDescriptor, DeployLayer, ExchangeParser, ModelFormat, VendorParser,
    DEFAULT_VENDOR_OUTPUT,
};
pub use weights::{save_weights, WeightFile};
