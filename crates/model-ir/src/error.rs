// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for model parsing and graph construction.

use std::path::PathBuf;

/// Errors that can occur while parsing a model or assembling its graph.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file was readable but its contents are not a valid model description.
    #[error("malformed model file '{origin}': {detail}")]
    Format { origin: String, detail: String },

    /// The weights file could not be mapped or decoded.
    #[error("weights file error: {0}")]
    SafeTensors(String),

    /// A parameter named by the deploy descriptor is absent from the weights file.
    #[error("weight tensor not found: {name}")]
    WeightNotFound { name: String },

    #[error("layer '{layer}' has unknown type '{kind}'")]
    UnknownLayerType { layer: String, kind: String },

    /// A tensor name does not resolve to a graph input or a layer output.
    #[error("tensor not found in graph: {name}")]
    TensorNotFound { name: String },

    #[error("tensor '{name}' is defined twice")]
    DuplicateTensor { name: String },

    #[error("invalid layer '{layer}': {detail}")]
    InvalidLayer { layer: String, detail: String },

    #[error("invalid model graph: {0}")]
    InvalidGraph(String),

    #[error(transparent)]
    Tensor(#[from] tensor_core::TensorError),
}
