// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Shapes, numeric precisions and host compute kernels shared by the engine
//! builder and the accelerator device.
//!
//! This crate provides:
//! - [`DType`]: the precision of a compiled plan (`f32` or `f16`) and the
//!   little-endian byte codec used for binding buffers.
//! - [`Shape`]: dimension descriptors (channel-first for image inputs).
//! - [`Tensor`] / [`TensorView`]: owned and borrowed `f32` tensors used as
//!   layer weights and activations.
//! - Kernels: matrix multiplication, softmax, ReLU, L2 normalisation,
//!   per-channel scaling and global average pooling.
//!
//! # Design Goals
//! - Kernels write into pre-allocated outputs; no allocation in hot paths.
//! - Reduced precision is a storage concern: compute always runs in `f32`,
//!   values are rounded through `f16` at the plan boundary.
//! - Clean error types via `thiserror`.

mod dtype;
mod error;
mod ops;
mod shape;
mod tensor;

pub use dtype::DType;
pub use error::TensorError;
pub use ops::{global_avg_pool, l2_normalize, matmul, relu, scale_channels, softmax};
pub use shape::Shape;
pub use tensor::{Tensor, TensorView};
