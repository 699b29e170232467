// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model-format parsers that populate a [`ModelGraph`](crate::ModelGraph).
//!
//! - [`ExchangeParser`]: a single self-describing JSON graph. Input and
//!   output are registered by the caller before parsing.
//! - [`VendorParser`]: a deploy descriptor plus a SafeTensors weights file.
//!   The descriptor declares the input; the caller marks the output after
//!   parsing by looking it up in the returned [`BlobTable`].

mod exchange;
mod vendor;

pub use exchange::ExchangeParser;
pub use vendor::{BlobTable, DeployDescriptor, DeployLayer, VendorParser};

use std::path::PathBuf;
use tensor_core::Shape;

/// Output tensor marked on vendor-format models when none is given.
pub const DEFAULT_VENDOR_OUTPUT: &str = "prob1";

/// A model on disk and the metadata its parser needs.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelFormat {
    Exchange {
        model_file: PathBuf,
        input_name: String,
        input_shape: Shape,
        output_name: String,
    },
    Vendor {
        weights_file: PathBuf,
        deploy_file: PathBuf,
        /// Defaults to [`DEFAULT_VENDOR_OUTPUT`].
        output_name: Option<String>,
    },
}

impl ModelFormat {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelFormat::Exchange { .. } => "exchange",
            ModelFormat::Vendor { .. } => "vendor",
        }
    }
}

/// Reads a model file, mapping I/O failures to [`ModelError::Io`](crate::ModelError::Io).
pub(crate) fn read_model_file(path: &std::path::Path) -> Result<String, crate::ModelError> {
    std::fs::read_to_string(path).map_err(|source| crate::ModelError::Io {
        path: path.to_path_buf(),
        source,
    })
}
