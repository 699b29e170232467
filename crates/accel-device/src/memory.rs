// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII handles for device allocations and page-locked host buffers.
//!
//! Both handle types hold an `Arc` back to the owning device. Dropping a
//! handle returns its bytes to the device's accounting, so a buffer can
//! never outlive the bookkeeping that admitted it.

use crate::device::{lock, DeviceInner};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Opaque address of a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePtr(pub(crate) u64);

impl DevicePtr {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The two address spaces a device accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySpace {
    Device,
    PinnedHost,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySpace::Device => f.write_str("device"),
            MemorySpace::PinnedHost => f.write_str("pinned host"),
        }
    }
}

// ── Device memory ──────────────────────────────────────────────

/// An allocation in device memory. Not host-addressable: contents move
/// only through stream transfers.
pub struct DeviceBuffer {
    ptr: DevicePtr,
    size_bytes: usize,
    device: Arc<DeviceInner>,
}

impl DeviceBuffer {
    pub(crate) fn new(ptr: DevicePtr, size_bytes: usize, device: Arc<DeviceInner>) -> Self {
        Self {
            ptr,
            size_bytes,
            device,
        }
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub(crate) fn device(&self) -> &Arc<DeviceInner> {
        &self.device
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.device.free_device(self.ptr, self.size_bytes);
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.ptr)
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

// ── Pinned host memory ─────────────────────────────────────────

/// A page-locked host buffer, the only legal endpoint of an async transfer.
///
/// The bytes are shared with any transfer still queued on a stream, so a
/// host write made before [`Stream::synchronize`](crate::Stream::synchronize)
/// is visible to a pending host-to-device copy, as on real hardware.
pub struct PinnedBuffer {
    host: Arc<Mutex<Vec<u8>>>,
    size_bytes: usize,
    device: Arc<DeviceInner>,
}

impl PinnedBuffer {
    pub(crate) fn new(size_bytes: usize, device: Arc<DeviceInner>) -> Self {
        Self {
            host: Arc::new(Mutex::new(vec![0u8; size_bytes])),
            size_bytes,
            device,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Runs `f` over the buffer contents.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(lock(&self.host).as_slice())
    }

    /// Runs `f` over the buffer contents with write access.
    pub fn write<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(lock(&self.host).as_mut_slice())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.read(<[u8]>::to_vec)
    }

    pub(crate) fn shared(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.host)
    }

    pub(crate) fn device(&self) -> &Arc<DeviceInner> {
        &self.device
    }
}

impl Drop for PinnedBuffer {
    fn drop(&mut self) {
        self.device.release_pinned(self.size_bytes);
    }
}

impl fmt::Debug for PinnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedBuffer")
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}
