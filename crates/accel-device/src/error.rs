// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use crate::memory::{DevicePtr, MemorySpace};

/// Errors raised by the accelerator device model.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Allocation would exceed the capacity of the address space.
    #[error(
        "out of {space} memory: requested {requested} bytes, \
         {available} of {capacity} bytes available"
    )]
    OutOfMemory {
        space: MemorySpace,
        requested: usize,
        available: usize,
        capacity: usize,
    },

    /// The requested size does not fit in `usize`.
    #[error("allocation of {dims:?} x {elem_bytes} B overflows the address space")]
    SizeOverflow { dims: Vec<usize>, elem_bytes: usize },

    #[error("zero-sized allocation requested")]
    ZeroSizedAllocation,

    /// The handle does not name a live device allocation.
    #[error("invalid device handle {0}")]
    InvalidHandle(DevicePtr),

    /// Source and destination of a transfer (or kernel bindings) disagree in size.
    #[error("{op}: size mismatch, expected {expected} bytes, got {actual}")]
    SizeMismatch {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A buffer from another device was handed to this device's stream.
    #[error("{op}: buffer belongs to a different device")]
    ForeignBuffer { op: &'static str },

    #[error("kernel '{kernel}' failed: {detail}")]
    KernelFailed { kernel: String, detail: String },

    #[error("invalid memory budget: {0}")]
    InvalidBudget(String),
}
