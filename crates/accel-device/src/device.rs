// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The device handle: budgeted address spaces, stream creation and the
//! executor behind stream operations.

use crate::memory::{DeviceBuffer, DevicePtr, MemorySpace, PinnedBuffer};
use crate::stream::{Kernel, Stream};
use crate::{DeviceError, DeviceStats, MemoryBudget};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// Device allocations are aligned like a real allocator would align them.
const DEVICE_ALIGNMENT: u64 = 256;
const BASE_ADDRESS: u64 = 0x7f00_0000_0000;

/// Capacities for a simulated device.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_memory")]
    pub memory: MemoryBudget,
    #[serde(default = "default_pinned")]
    pub pinned_memory: MemoryBudget,
}

fn default_name() -> String {
    "sim0".into()
}
fn default_memory() -> MemoryBudget {
    MemoryBudget::from_mb(256)
}
fn default_pinned() -> MemoryBudget {
    MemoryBudget::from_mb(64)
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            memory: default_memory(),
            pinned_memory: default_pinned(),
        }
    }
}

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
/// Every critical section in this crate leaves its data consistent.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Shared state ───────────────────────────────────────────────

pub(crate) struct DeviceInner {
    name: String,
    device_capacity: usize,
    pinned_capacity: usize,
    device_used: AtomicUsize,
    pinned_used: AtomicUsize,
    next_address: AtomicU64,
    next_stream: AtomicU64,
    heap: Mutex<HashMap<DevicePtr, Vec<u8>>>,
    stats: Mutex<DeviceStats>,
    /// Launches left to succeed before an injected failure.
    launch_fault: Mutex<Option<u64>>,
}

impl DeviceInner {
    fn reserve(&self, space: MemorySpace, size: usize) -> Result<usize, DeviceError> {
        let (used, capacity) = match space {
            MemorySpace::Device => (&self.device_used, self.device_capacity),
            MemorySpace::PinnedHost => (&self.pinned_used, self.pinned_capacity),
        };
        match used.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            cur.checked_add(size).filter(|next| *next <= capacity)
        }) {
            Ok(prev) => Ok(prev + size),
            Err(cur) => {
                lock(&self.stats).record_oom();
                warn!(
                    device = %self.name,
                    %space,
                    requested = size,
                    in_use = cur,
                    capacity,
                    "allocation refused"
                );
                Err(DeviceError::OutOfMemory {
                    space,
                    requested: size,
                    available: capacity.saturating_sub(cur),
                    capacity,
                })
            }
        }
    }

    pub(crate) fn free_device(&self, ptr: DevicePtr, size: usize) {
        if lock(&self.heap).remove(&ptr).is_none() {
            warn!(device = %self.name, %ptr, "free of unknown device handle");
            return;
        }
        self.device_used.fetch_sub(size, Ordering::AcqRel);
        lock(&self.stats).record_free(MemorySpace::Device);
        trace!(device = %self.name, %ptr, size, "device free");
    }

    pub(crate) fn release_pinned(&self, size: usize) {
        self.pinned_used.fetch_sub(size, Ordering::AcqRel);
        lock(&self.stats).record_free(MemorySpace::PinnedHost);
        trace!(device = %self.name, size, "pinned free");
    }

    pub(crate) fn record_discarded(&self, count: usize) {
        lock(&self.stats).discarded_ops += count as u64;
    }

    pub(crate) fn record_synchronize(&self) {
        lock(&self.stats).synchronizations += 1;
    }

    // ── Stream operation executors ─────────────────────────────

    pub(crate) fn copy_htod(&self, src: &Mutex<Vec<u8>>, dst: DevicePtr) -> Result<(), DeviceError> {
        let host = lock(src);
        let mut heap = lock(&self.heap);
        let target = heap.get_mut(&dst).ok_or(DeviceError::InvalidHandle(dst))?;
        if target.len() != host.len() {
            return Err(DeviceError::SizeMismatch {
                op: "memcpy_htod",
                expected: target.len(),
                actual: host.len(),
            });
        }
        target.copy_from_slice(&host);
        drop(heap);
        lock(&self.stats).htod_copies += 1;
        Ok(())
    }

    pub(crate) fn copy_dtoh(&self, src: DevicePtr, dst: &Mutex<Vec<u8>>) -> Result<(), DeviceError> {
        let mut host = lock(dst);
        let heap = lock(&self.heap);
        let source = heap.get(&src).ok_or(DeviceError::InvalidHandle(src))?;
        if source.len() != host.len() {
            return Err(DeviceError::SizeMismatch {
                op: "memcpy_dtoh",
                expected: host.len(),
                actual: source.len(),
            });
        }
        host.copy_from_slice(source);
        drop(heap);
        lock(&self.stats).dtoh_copies += 1;
        Ok(())
    }

    pub(crate) fn launch(
        &self,
        kernel: &dyn Kernel,
        batch_size: usize,
        input: DevicePtr,
        output: DevicePtr,
    ) -> Result<(), DeviceError> {
        let result = if self.take_injected_fault() {
            Err(DeviceError::KernelFailed {
                kernel: kernel.name().to_string(),
                detail: "injected launch fault".into(),
            })
        } else {
            self.run_kernel(kernel, batch_size, input, output)
        };
        lock(&self.stats).record_launch(result.is_ok());
        result
    }

    fn run_kernel(
        &self,
        kernel: &dyn Kernel,
        batch_size: usize,
        input: DevicePtr,
        output: DevicePtr,
    ) -> Result<(), DeviceError> {
        let mut heap = lock(&self.heap);
        // Snapshot the input: the output stays resident, and input and
        // output may name the same allocation.
        let inp = heap
            .get(&input)
            .cloned()
            .ok_or(DeviceError::InvalidHandle(input))?;
        let out = heap
            .get_mut(&output)
            .ok_or(DeviceError::InvalidHandle(output))?;
        kernel
            .execute(batch_size, &inp, out)
            .map_err(|detail| DeviceError::KernelFailed {
                kernel: kernel.name().to_string(),
                detail,
            })
    }

    fn take_injected_fault(&self) -> bool {
        let mut fault = lock(&self.launch_fault);
        match *fault {
            Some(0) => {
                *fault = None;
                true
            }
            Some(n) => {
                *fault = Some(n - 1);
                false
            }
            None => false,
        }
    }
}

// ── Public handle ──────────────────────────────────────────────

/// Handle to one accelerator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Self {
        debug!(
            name = %config.name,
            memory = %config.memory,
            pinned = %config.pinned_memory,
            "device opened"
        );
        Self {
            inner: Arc::new(DeviceInner {
                name: config.name,
                device_capacity: config.memory.as_bytes(),
                pinned_capacity: config.pinned_memory.as_bytes(),
                device_used: AtomicUsize::new(0),
                pinned_used: AtomicUsize::new(0),
                next_address: AtomicU64::new(BASE_ADDRESS),
                next_stream: AtomicU64::new(1),
                heap: Mutex::new(HashMap::new()),
                stats: Mutex::new(DeviceStats::default()),
                launch_fault: Mutex::new(None),
            }),
        }
    }

    /// A device with the default capacities.
    pub fn simulated() -> Self {
        Self::new(DeviceConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn memory_capacity(&self) -> usize {
        self.inner.device_capacity
    }

    pub fn pinned_capacity(&self) -> usize {
        self.inner.pinned_capacity
    }

    pub fn memory_used(&self) -> usize {
        self.inner.device_used.load(Ordering::Acquire)
    }

    pub fn pinned_used(&self) -> usize {
        self.inner.pinned_used.load(Ordering::Acquire)
    }

    /// Allocates `size_bytes` of zeroed device memory.
    pub fn alloc(&self, size_bytes: usize) -> Result<DeviceBuffer, DeviceError> {
        if size_bytes == 0 {
            return Err(DeviceError::ZeroSizedAllocation);
        }
        let now = self.inner.reserve(MemorySpace::Device, size_bytes)?;
        let span = (size_bytes as u64).div_ceil(DEVICE_ALIGNMENT) * DEVICE_ALIGNMENT;
        let ptr = DevicePtr(self.inner.next_address.fetch_add(span, Ordering::Relaxed));
        lock(&self.inner.heap).insert(ptr, vec![0u8; size_bytes]);
        lock(&self.inner.stats).record_alloc(MemorySpace::Device, now);
        trace!(device = %self.inner.name, %ptr, size_bytes, "device alloc");
        Ok(DeviceBuffer::new(ptr, size_bytes, Arc::clone(&self.inner)))
    }

    /// Allocates `size_bytes` of zeroed page-locked host memory.
    pub fn alloc_pinned(&self, size_bytes: usize) -> Result<PinnedBuffer, DeviceError> {
        if size_bytes == 0 {
            return Err(DeviceError::ZeroSizedAllocation);
        }
        let now = self.inner.reserve(MemorySpace::PinnedHost, size_bytes)?;
        lock(&self.inner.stats).record_alloc(MemorySpace::PinnedHost, now);
        trace!(device = %self.inner.name, size_bytes, "pinned alloc");
        Ok(PinnedBuffer::new(size_bytes, Arc::clone(&self.inner)))
    }

    pub fn create_stream(&self) -> Stream {
        let id = self.inner.next_stream.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.stats).streams_created += 1;
        debug!(device = %self.inner.name, stream = id, "stream created");
        Stream::new(id, Arc::clone(&self.inner))
    }

    /// Snapshot of the device counters.
    pub fn stats(&self) -> DeviceStats {
        let mut snapshot = lock(&self.inner.stats).clone();
        snapshot.device_bytes_in_use = self.memory_used();
        snapshot.pinned_bytes_in_use = self.pinned_used();
        snapshot
    }

    /// Makes the launch after the next `successful` launches fail with
    /// [`DeviceError::KernelFailed`]. One-shot.
    pub fn fail_launch_after(&self, successful: u64) {
        *lock(&self.inner.launch_fault) = Some(successful);
    }

    pub fn clear_injected_faults(&self) {
        *lock(&self.inner.launch_fault) = None;
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.inner.name)
            .field("memory_used", &self.memory_used())
            .field("memory_capacity", &self.inner.device_capacity)
            .field("pinned_used", &self.pinned_used())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_device() -> Device {
        Device::new(DeviceConfig {
            name: "test".into(),
            memory: MemoryBudget::from_bytes(4096),
            pinned_memory: MemoryBudget::from_bytes(1024),
        })
    }

    #[test]
    fn test_alloc_and_drop() {
        let dev = small_device();
        let buf = dev.alloc(1000).unwrap();
        assert_eq!(buf.size_bytes(), 1000);
        assert_eq!(dev.memory_used(), 1000);
        drop(buf);
        assert_eq!(dev.memory_used(), 0);
        let stats = dev.stats();
        assert_eq!(stats.device_allocations, 1);
        assert_eq!(stats.device_frees, 1);
    }

    #[test]
    fn test_distinct_aligned_pointers() {
        let dev = small_device();
        let a = dev.alloc(10).unwrap();
        let b = dev.alloc(10).unwrap();
        assert_ne!(a.ptr(), b.ptr());
        assert_eq!(a.ptr().as_u64() % DEVICE_ALIGNMENT, 0);
        assert_eq!(b.ptr().as_u64() % DEVICE_ALIGNMENT, 0);
    }

    #[test]
    fn test_device_oom() {
        let dev = small_device();
        let _a = dev.alloc(3000).unwrap();
        let err = dev.alloc(2000).unwrap_err();
        match err {
            DeviceError::OutOfMemory {
                space,
                requested,
                available,
                capacity,
            } => {
                assert_eq!(space, MemorySpace::Device);
                assert_eq!(requested, 2000);
                assert_eq!(available, 1096);
                assert_eq!(capacity, 4096);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(dev.stats().oom_count, 1);
        assert_eq!(dev.memory_used(), 3000);
    }

    #[test]
    fn test_pinned_budget_is_separate() {
        let dev = small_device();
        let _d = dev.alloc(4096).unwrap();
        let p = dev.alloc_pinned(1024).unwrap();
        assert!(dev.alloc_pinned(1).is_err());
        drop(p);
        assert_eq!(dev.pinned_used(), 0);
        assert!(dev.alloc_pinned(1).is_ok());
    }

    #[test]
    fn test_zero_sized() {
        let dev = small_device();
        assert!(matches!(dev.alloc(0), Err(DeviceError::ZeroSizedAllocation)));
        assert!(matches!(dev.alloc_pinned(0), Err(DeviceError::ZeroSizedAllocation)));
    }

    #[test]
    fn test_clones_share_state() {
        let dev = small_device();
        let other = dev.clone();
        let _buf = other.alloc(100).unwrap();
        assert_eq!(dev.memory_used(), 100);
    }

    #[test]
    fn test_pinned_read_write() {
        let dev = small_device();
        let mut p = dev.alloc_pinned(4).unwrap();
        p.write(|bytes| bytes.copy_from_slice(&[1, 2, 3, 4]));
        assert_eq!(p.to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_config_from_json() {
        let cfg: DeviceConfig =
            serde_json::from_str(r#"{"memory": "8M", "pinned_memory": 65536}"#).unwrap();
        assert_eq!(cfg.name, "sim0");
        assert_eq!(cfg.memory.as_mb(), 8);
        assert_eq!(cfg.pinned_memory.as_bytes(), 65536);
    }

    #[test]
    fn test_stats_in_use_snapshot() {
        let dev = small_device();
        let _a = dev.alloc(512).unwrap();
        let _p = dev.alloc_pinned(128).unwrap();
        let s = dev.stats();
        assert_eq!(s.device_bytes_in_use, 512);
        assert_eq!(s.pinned_bytes_in_use, 128);
        assert_eq!(s.peak_device_bytes, 512);
        assert_eq!(s.live_allocations(), 2);
    }
}
