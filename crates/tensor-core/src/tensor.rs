// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Core tensor type and view abstractions.

use crate::{DType, Shape, TensorError};

/// An owned, n-dimensional `f32` tensor stored in contiguous row-major memory.
///
/// Used for layer weights inside the graph and compiled plan, and for
/// intermediate activations while a plan executes.
///
/// Deserialization goes through [`Tensor::from_vec`], so a decoded tensor
/// always holds exactly as many elements as its shape describes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: Shape,
    data: Vec<f32>,
}

#[derive(serde::Deserialize)]
struct RawTensor {
    shape: Shape,
    data: Vec<f32>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = TensorError;

    fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
        Tensor::from_vec(raw.shape, raw.data)
    }
}

impl Tensor {
    /// Creates a new tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::zeros(Shape::matrix(2, 3));
    /// assert_eq!(t.num_elements(), 6);
    /// ```
    pub fn zeros(shape: Shape) -> Self {
        let n = shape.num_elements();
        Self {
            shape,
            data: vec![0.0; n],
        }
    }

    /// Creates a tensor by copying a slice of `f32` values.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
    /// assert_eq!(t.as_f32_slice(), &[1.0, 2.0, 3.0]);
    /// ```
    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        Self::from_vec(shape, values.to_vec())
    }

    /// Creates a tensor that takes ownership of `data`.
    ///
    /// Returns an error if `data.len()` does not match the shape's volume.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> Result<Self, TensorError> {
        let expected = shape
            .checked_num_elements()
            .ok_or_else(|| TensorError::VolumeOverflow(shape.clone()))?;
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the number of elements.
    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    /// Returns an immutable view over this tensor's data.
    pub fn view(&self) -> TensorView<'_> {
        TensorView {
            shape: &self.shape,
            data: &self.data,
        }
    }

    /// Returns the elements as a slice.
    pub fn as_f32_slice(&self) -> &[f32] {
        &self.data
    }

    /// Returns the elements as a mutable slice.
    pub fn as_f32_slice_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor and returns its backing buffer.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Fills the tensor with a constant value.
    pub fn fill_f32(&mut self, value: f32) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    /// Reinterprets the tensor with a new shape of the same volume.
    pub fn reshape(self, shape: Shape) -> Result<Self, TensorError> {
        Self::from_vec(shape, self.data)
    }

    /// Rounds every element to the nearest value representable in `dtype`.
    pub fn round_to(&mut self, dtype: DType) {
        if dtype == DType::F32 {
            return;
        }
        self.data.iter_mut().for_each(|x| *x = dtype.round(*x));
    }
}

/// A borrowed, read-only view over tensor data.
///
/// Views are zero-copy and tied to the lifetime of the source buffer.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
    shape: &'a Shape,
    data: &'a [f32],
}

impl<'a> TensorView<'a> {
    /// Creates a view from raw parts.
    ///
    /// Returns an error if `data.len()` does not match the shape's volume.
    pub fn from_parts(shape: &'a Shape, data: &'a [f32]) -> Result<Self, TensorError> {
        let expected = shape
            .checked_num_elements()
            .ok_or_else(|| TensorError::VolumeOverflow(shape.clone()))?;
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Returns the shape of the viewed tensor.
    pub fn shape(&self) -> &Shape {
        self.shape
    }

    /// Returns the viewed elements.
    pub fn as_f32_slice(&self) -> &'a [f32] {
        self.data
    }
}
