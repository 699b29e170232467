// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the engine lifecycle and the inference pipeline.

use accel_device::DeviceError;
use std::path::PathBuf;

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad options or I/O metadata; raised before any device work.
    Configuration,
    /// The model could not be parsed or compiled.
    Build,
    /// A persisted plan could not be read back.
    Deserialization,
    /// Device or pinned memory could not be allocated.
    Resource,
    /// A device operation failed while serving a request.
    Inference,
    /// A lifecycle step was called out of order.
    Precondition,
    /// Writing a plan to disk failed.
    Io,
}

/// Errors raised by the engine crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("build error: {0}")]
    Build(String),

    /// Parsing or validating the model graph failed.
    #[error("build error: {0}")]
    Model(#[from] model_ir::ModelError),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("resource error: cannot allocate {what}: {source}")]
    Resource {
        what: &'static str,
        #[source]
        source: DeviceError,
    },

    /// A device operation failed. `image` is the index within the request,
    /// when known.
    #[error(
        "inference error{}: {source}",
        .image.map(|i| format!(" on image {i}")).unwrap_or_default()
    )]
    Inference {
        image: Option<usize>,
        #[source]
        source: DeviceError,
    },

    /// The request does not match the plan's input binding.
    #[error("inference error: {0}")]
    InvalidInput(String),

    /// Host-side encoding of an input or decoding of an output failed.
    #[error("inference error: {0}")]
    Tensor(#[from] tensor_core::TensorError),

    #[error("precondition error: {operation}: {reason}")]
    Precondition {
        operation: &'static str,
        reason: String,
    },

    #[error("failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Configuration(_) => ErrorKind::Configuration,
            EngineError::Build(_) | EngineError::Model(_) => ErrorKind::Build,
            EngineError::Deserialization(_) => ErrorKind::Deserialization,
            EngineError::Resource { .. } => ErrorKind::Resource,
            EngineError::Inference { .. }
            | EngineError::InvalidInput(_)
            | EngineError::Tensor(_) => ErrorKind::Inference,
            EngineError::Precondition { .. } => ErrorKind::Precondition,
            EngineError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Attaches the index of the failing image to an inference error.
    pub(crate) fn at_image(self, index: usize) -> Self {
        match self {
            EngineError::Inference { source, .. } => EngineError::Inference {
                image: Some(index),
                source,
            },
            other => other,
        }
    }

    pub(crate) fn device(source: DeviceError) -> Self {
        EngineError::Inference {
            image: None,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            EngineError::Configuration("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            EngineError::Model(model_ir::ModelError::InvalidGraph("x".into())).kind(),
            ErrorKind::Build
        );
        assert_eq!(
            EngineError::Resource {
                what: "device input buffer",
                source: DeviceError::ZeroSizedAllocation,
            }
            .kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            EngineError::InvalidInput("x".into()).kind(),
            ErrorKind::Inference
        );
    }

    #[test]
    fn test_at_image_sets_index() {
        let err = EngineError::device(DeviceError::KernelFailed {
            kernel: "k".into(),
            detail: "boom".into(),
        })
        .at_image(2);
        assert!(matches!(err, EngineError::Inference { image: Some(2), .. }));
        assert!(err.to_string().contains("on image 2"));
    }

    #[test]
    fn test_at_image_leaves_other_errors() {
        let err = EngineError::Build("x".into()).at_image(3);
        assert!(matches!(err, EngineError::Build(_)));
    }
}
