// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Plan precisions and the byte codec for binding buffers.

use crate::TensorError;
use half::f16;

/// Numeric precision of a compiled plan.
///
/// The precision decides the element type of the input/output bindings, and
/// therefore the byte size of the pinned host and device buffers. Kernels
/// always compute in `f32`; `F16` plans store weights and binding data as
/// IEEE 754 half floats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit IEEE 754 floating point.
    #[default]
    F32,
    /// 16-bit IEEE 754 floating point.
    F16,
}

impl DType {
    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
        }
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
        }
    }

    /// Parses a precision name, accepting the usual aliases
    /// (`"fp32"`, `"float32"`, `"half"`, ...). Case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f32" | "fp32" | "float32" | "float" => Some(DType::F32),
            "f16" | "fp16" | "float16" | "half" => Some(DType::F16),
            _ => None,
        }
    }

    /// Rounds a value to the nearest representable value of this precision.
    #[inline]
    pub fn round(self, value: f32) -> f32 {
        match self {
            DType::F32 => value,
            DType::F16 => f16::from_f32(value).to_f32(),
        }
    }

    /// Encodes `values` into `dst` as little-endian elements of this precision.
    ///
    /// # Errors
    /// Returns [`TensorError::BufferSizeMismatch`] if `dst` is not exactly
    /// `values.len() * self.size_bytes()` bytes.
    pub fn encode(self, values: &[f32], dst: &mut [u8]) -> Result<(), TensorError> {
        let expected = values.len() * self.size_bytes();
        if dst.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: dst.len(),
            });
        }
        match self {
            DType::F32 => {
                for (chunk, v) in dst.chunks_exact_mut(4).zip(values) {
                    chunk.copy_from_slice(&v.to_le_bytes());
                }
            }
            DType::F16 => {
                for (chunk, v) in dst.chunks_exact_mut(2).zip(values) {
                    chunk.copy_from_slice(&f16::from_f32(*v).to_le_bytes());
                }
            }
        }
        Ok(())
    }

    /// Decodes little-endian elements of this precision from `src` into `dst`.
    ///
    /// # Errors
    /// Returns [`TensorError::BufferSizeMismatch`] if `src` is not exactly
    /// `dst.len() * self.size_bytes()` bytes.
    pub fn decode(self, src: &[u8], dst: &mut [f32]) -> Result<(), TensorError> {
        let expected = dst.len() * self.size_bytes();
        if src.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: src.len(),
            });
        }
        match self {
            DType::F32 => {
                for (d, chunk) in dst.iter_mut().zip(src.chunks_exact(4)) {
                    *d = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
            }
            DType::F16 => {
                for (d, chunk) in dst.iter_mut().zip(src.chunks_exact(2)) {
                    *d = f16::from_le_bytes([chunk[0], chunk[1]]).to_f32();
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
