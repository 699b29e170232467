// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # accel-device
//!
//! A host-resident model of an inference accelerator: two budgeted address
//! spaces (device memory and page-locked host memory) and in-order streams
//! of asynchronous transfers and kernel launches.
//!
//! # Key Components
//!
//! - [`Device`]: cloneable handle; allocates buffers, creates streams and
//!   keeps [`DeviceStats`].
//! - [`DeviceBuffer`] / [`PinnedBuffer`]: RAII allocations. Dropping one
//!   returns its bytes to the device.
//! - [`Stream`]: queues `memcpy_htod_async`, `launch_async` and
//!   `memcpy_dtoh_async`; nothing executes until [`Stream::synchronize`].
//! - [`Kernel`]: the trait compiled engines implement to run on a stream.
//!
//! # Ownership Model
//!
//! ```text
//! Device::alloc(size)
//!       │
//!       ▼
//!   DeviceBuffer  ◄─── holds DevicePtr + Arc<DeviceInner>
//!       │
//!       │  drop()
//!       ▼
//!   DeviceInner::free_device()  ──► capacity returned, stats updated
//! ```
//!
//! # Example
//! ```
//! use accel_device::{Device, DeviceConfig, MemoryBudget};
//!
//! let dev = Device::new(DeviceConfig {
//!     name: "doc".into(),
//!     memory: MemoryBudget::from_mb(1),
//!     pinned_memory: MemoryBudget::from_mb(1),
//! });
//!
//! let mut host = dev.alloc_pinned(4).unwrap();
//! let back = dev.alloc_pinned(4).unwrap();
//! let buf = dev.alloc(4).unwrap();
//! let mut stream = dev.create_stream();
//!
//! host.write(|b| b.copy_from_slice(&[1, 2, 3, 4]));
//! stream.memcpy_htod_async(&buf, &host).unwrap();
//! stream.memcpy_dtoh_async(&back, &buf).unwrap();
//! stream.synchronize().unwrap();
//! assert_eq!(back.to_vec(), vec![1, 2, 3, 4]);
//! ```

mod budget;
mod device;
mod error;
mod memory;
mod stats;
mod stream;

pub use budget::MemoryBudget;
pub use device::{Device, DeviceConfig};
pub use error::DeviceError;
pub use memory::{DeviceBuffer, DevicePtr, MemorySpace, PinnedBuffer};
pub use stats::DeviceStats;
pub use stream::{Kernel, Stream};
