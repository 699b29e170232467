// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Resource accounting for a device.
//!
//! [`DeviceStats`] counts allocations, transfers and kernel launches so
//! callers (and tests) can check that every acquired resource was released
//! and every queued operation actually ran.

use crate::memory::MemorySpace;

/// Cumulative counters for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeviceStats {
    pub device_allocations: u64,
    pub device_frees: u64,
    pub pinned_allocations: u64,
    pub pinned_frees: u64,
    /// Device bytes currently allocated.
    pub device_bytes_in_use: usize,
    /// Pinned host bytes currently allocated.
    pub pinned_bytes_in_use: usize,
    /// High-water mark of device bytes.
    pub peak_device_bytes: usize,
    /// Allocation requests refused for lack of capacity.
    pub oom_count: u64,
    pub htod_copies: u64,
    pub dtoh_copies: u64,
    pub launches: u64,
    pub failed_launches: u64,
    pub synchronizations: u64,
    /// Queued operations dropped because an earlier one on the same stream failed.
    pub discarded_ops: u64,
    pub streams_created: u64,
}

impl DeviceStats {
    /// Allocations not yet matched by a free, across both spaces.
    pub fn live_allocations(&self) -> u64 {
        (self.device_allocations - self.device_frees)
            + (self.pinned_allocations - self.pinned_frees)
    }

    pub(crate) fn record_alloc(&mut self, space: MemorySpace, device_bytes_now: usize) {
        match space {
            MemorySpace::Device => {
                self.device_allocations += 1;
                self.peak_device_bytes = self.peak_device_bytes.max(device_bytes_now);
            }
            MemorySpace::PinnedHost => self.pinned_allocations += 1,
        }
    }

    pub(crate) fn record_free(&mut self, space: MemorySpace) {
        match space {
            MemorySpace::Device => self.device_frees += 1,
            MemorySpace::PinnedHost => self.pinned_frees += 1,
        }
    }

    pub(crate) fn record_oom(&mut self) {
        self.oom_count += 1;
    }

    pub(crate) fn record_launch(&mut self, ok: bool) {
        self.launches += 1;
        if !ok {
            self.failed_launches += 1;
        }
    }

    pub fn summary(&self) -> String {
        let peak_mb = self.peak_device_bytes as f64 / (1024.0 * 1024.0);
        format!(
            "device allocs {}/{} freed, pinned allocs {}/{} freed, peak {:.2} MB, {} OOMs; \
             copies {} htod / {} dtoh, {} launches ({} failed), {} syncs, {} ops discarded",
            self.device_allocations,
            self.device_frees,
            self.pinned_allocations,
            self.pinned_frees,
            peak_mb,
            self.oom_count,
            self.htod_copies,
            self.dtoh_copies,
            self.launches,
            self.failed_launches,
            self.synchronizations,
            self.discarded_ops,
        )
    }
}
