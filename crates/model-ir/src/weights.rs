// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! SafeTensors weight files.
//!
//! [`WeightFile`] memory-maps the file and decodes individual tensors on
//! request, so a deploy descriptor only pays for the parameters it names.

use crate::ModelError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tensor_core::{DType, Shape, Tensor};

/// A memory-mapped SafeTensors file.
pub struct WeightFile {
    path: PathBuf,
    mmap: memmap2::Mmap,
}

impl WeightFile {
    /// Maps `path` and checks that its header parses.
    pub fn open(path: &Path) -> Result<Self, ModelError> {
        let file = std::fs::File::open(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: the mapping is read-only and lives no longer than `self`.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| {
            ModelError::SafeTensors(format!("mmap of '{}' failed: {e}", path.display()))
        })?;

        let weights = Self {
            path: path.to_path_buf(),
            mmap,
        };
        let count = weights.header()?.len();
        tracing::debug!(path = %path.display(), tensors = count, "weights mapped");
        Ok(weights)
    }

    fn header(&self) -> Result<safetensors::SafeTensors<'_>, ModelError> {
        safetensors::SafeTensors::deserialize(&self.mmap).map_err(|e| {
            ModelError::SafeTensors(format!("'{}': {e}", self.path.display()))
        })
    }

    /// Tensor names in the file, sorted.
    pub fn names(&self) -> Result<Vec<String>, ModelError> {
        let mut names: Vec<String> = self.header()?.names().into_iter().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Decodes one tensor to f32.
    pub fn tensor(&self, name: &str) -> Result<Tensor, ModelError> {
        let header = self.header()?;
        let view = header.tensor(name).map_err(|_| ModelError::WeightNotFound {
            name: name.to_string(),
        })?;
        let dtype = convert_safetensor_dtype(view.dtype())?;
        let shape = Shape::new(view.shape().to_vec());
        let mut values = vec![0.0f32; shape.num_elements()];
        dtype.decode(view.data(), &mut values)?;
        Ok(Tensor::from_vec(shape, values)?)
    }
}

impl std::fmt::Debug for WeightFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightFile")
            .field("path", &self.path)
            .field("bytes", &self.mmap.len())
            .finish()
    }
}

/// Writes `tensors` to a SafeTensors file, encoded at `dtype`.
pub fn save_weights(
    path: &Path,
    tensors: &BTreeMap<String, Tensor>,
    dtype: DType,
) -> Result<(), ModelError> {
    let st_dtype = match dtype {
        DType::F32 => safetensors::Dtype::F32,
        DType::F16 => safetensors::Dtype::F16,
    };

    let mut encoded = Vec::with_capacity(tensors.len());
    for (name, tensor) in tensors {
        let mut bytes = vec![0u8; tensor.shape().size_bytes(dtype)];
        dtype.encode(tensor.as_f32_slice(), &mut bytes)?;
        encoded.push((name, tensor.shape().dims().to_vec(), bytes));
    }

    let views = encoded
        .iter()
        .map(|(name, dims, bytes)| {
            safetensors::tensor::TensorView::new(st_dtype, dims.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| ModelError::SafeTensors(format!("tensor '{name}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let blob = safetensors::serialize(views, &None)
        .map_err(|e| ModelError::SafeTensors(format!("serialize failed: {e}")))?;
    std::fs::write(path, blob).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn convert_safetensor_dtype(st_dtype: safetensors::Dtype) -> Result<DType, ModelError> {
    match st_dtype {
        safetensors::Dtype::F32 => Ok(DType::F32),
        safetensors::Dtype::F16 => Ok(DType::F16),
        other => Err(ModelError::SafeTensors(format!(
            "unsupported tensor dtype: {other:?}"
        ))),
    }
}
