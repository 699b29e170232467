// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Ordered asynchronous work queues.
//!
//! Every `*_async` call validates its arguments and enqueues an operation
//! without running it. [`Stream::synchronize`] executes the queue in
//! submission order and is the only point where results become visible.

use crate::device::DeviceInner;
use crate::memory::{DeviceBuffer, DevicePtr, PinnedBuffer};
use crate::DeviceError;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Work that runs on the device between an input and an output binding.
pub trait Kernel: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Reads `input`, writes all of `output`. A returned message surfaces
    /// as [`DeviceError::KernelFailed`] at synchronization.
    fn execute(&self, batch_size: usize, input: &[u8], output: &mut [u8]) -> Result<(), String>;
}

enum StreamOp {
    CopyHtoD {
        src: Arc<Mutex<Vec<u8>>>,
        dst: DevicePtr,
    },
    CopyDtoH {
        src: DevicePtr,
        dst: Arc<Mutex<Vec<u8>>>,
    },
    Launch {
        kernel: Arc<dyn Kernel>,
        batch_size: usize,
        input: DevicePtr,
        output: DevicePtr,
    },
}

/// An in-order queue of transfers and launches on one device.
pub struct Stream {
    id: u64,
    device: Arc<DeviceInner>,
    queue: VecDeque<StreamOp>,
}

impl Stream {
    pub(crate) fn new(id: u64, device: Arc<DeviceInner>) -> Self {
        Self {
            id,
            device,
            queue: VecDeque::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Operations enqueued but not yet executed.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Enqueues a copy of the whole pinned buffer into `dst`.
    pub fn memcpy_htod_async(
        &mut self,
        dst: &DeviceBuffer,
        src: &PinnedBuffer,
    ) -> Result<(), DeviceError> {
        self.check_owner("memcpy_htod", dst.device())?;
        self.check_owner("memcpy_htod", src.device())?;
        check_size("memcpy_htod", dst.size_bytes(), src.size_bytes())?;
        self.queue.push_back(StreamOp::CopyHtoD {
            src: src.shared(),
            dst: dst.ptr(),
        });
        Ok(())
    }

    /// Enqueues a copy of the whole device buffer into `dst`.
    pub fn memcpy_dtoh_async(
        &mut self,
        dst: &PinnedBuffer,
        src: &DeviceBuffer,
    ) -> Result<(), DeviceError> {
        self.check_owner("memcpy_dtoh", dst.device())?;
        self.check_owner("memcpy_dtoh", src.device())?;
        check_size("memcpy_dtoh", dst.size_bytes(), src.size_bytes())?;
        self.queue.push_back(StreamOp::CopyDtoH {
            src: src.ptr(),
            dst: dst.shared(),
        });
        Ok(())
    }

    /// Enqueues `kernel` over the given bindings.
    pub fn launch_async(
        &mut self,
        kernel: Arc<dyn Kernel>,
        batch_size: usize,
        input: &DeviceBuffer,
        output: &DeviceBuffer,
    ) -> Result<(), DeviceError> {
        self.check_owner("launch", input.device())?;
        self.check_owner("launch", output.device())?;
        self.queue.push_back(StreamOp::Launch {
            kernel,
            batch_size,
            input: input.ptr(),
            output: output.ptr(),
        });
        Ok(())
    }

    /// Runs every queued operation in order and blocks until done.
    ///
    /// On the first failure the remaining operations are discarded and the
    /// error is returned; the stream is empty and reusable afterwards.
    pub fn synchronize(&mut self) -> Result<(), DeviceError> {
        let submitted = self.queue.len();
        let mut outcome = Ok(());
        while let Some(op) = self.queue.pop_front() {
            if let Err(err) = self.run(op) {
                let discarded = self.queue.len();
                self.queue.clear();
                self.device.record_discarded(discarded);
                warn!(stream = self.id, discarded, error = %err, "stream faulted");
                outcome = Err(err);
                break;
            }
        }
        self.device.record_synchronize();
        debug!(stream = self.id, submitted, ok = outcome.is_ok(), "stream synchronized");
        outcome
    }

    fn run(&self, op: StreamOp) -> Result<(), DeviceError> {
        match op {
            StreamOp::CopyHtoD { src, dst } => self.device.copy_htod(&src, dst),
            StreamOp::CopyDtoH { src, dst } => self.device.copy_dtoh(src, &dst),
            StreamOp::Launch {
                kernel,
                batch_size,
                input,
                output,
            } => self.device.launch(kernel.as_ref(), batch_size, input, output),
        }
    }

    fn check_owner(&self, op: &'static str, owner: &Arc<DeviceInner>) -> Result<(), DeviceError> {
        if Arc::ptr_eq(&self.device, owner) {
            Ok(())
        } else {
            Err(DeviceError::ForeignBuffer { op })
        }
    }
}

fn check_size(op: &'static str, expected: usize, actual: usize) -> Result<(), DeviceError> {
    if expected == actual {
        Ok(())
    } else {
        Err(DeviceError::SizeMismatch {
            op,
            expected,
            actual,
        })
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if !self.queue.is_empty() {
            debug!(stream = self.id, pending = self.queue.len(), "stream destroyed with pending work");
            self.device.record_discarded(self.queue.len());
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("pending", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Device, DeviceConfig, MemoryBudget};

    /// Adds one to every byte.
    #[derive(Debug)]
    struct Increment;

    impl Kernel for Increment {
        fn name(&self) -> &str {
            "increment"
        }

        fn execute(&self, _batch: usize, input: &[u8], output: &mut [u8]) -> Result<(), String> {
            if input.len() != output.len() {
                return Err("binding sizes differ".into());
            }
            for (o, i) in output.iter_mut().zip(input) {
                *o = i.wrapping_add(1);
            }
            Ok(())
        }
    }

    fn device() -> Device {
        Device::new(DeviceConfig {
            name: "stream-test".into(),
            memory: MemoryBudget::from_bytes(1 << 16),
            pinned_memory: MemoryBudget::from_bytes(1 << 16),
        })
    }

    #[test]
    fn test_round_trip_through_kernel() {
        let dev = device();
        let mut h_in = dev.alloc_pinned(4).unwrap();
        let h_out = dev.alloc_pinned(4).unwrap();
        let d_in = dev.alloc(4).unwrap();
        let d_out = dev.alloc(4).unwrap();
        let mut stream = dev.create_stream();

        h_in.write(|b| b.copy_from_slice(&[1, 2, 3, 4]));
        stream.memcpy_htod_async(&d_in, &h_in).unwrap();
        stream.launch_async(Arc::new(Increment), 1, &d_in, &d_out).unwrap();
        stream.memcpy_dtoh_async(&h_out, &d_out).unwrap();

        // Nothing has run yet.
        assert_eq!(stream.pending(), 3);
        assert_eq!(h_out.to_vec(), vec![0, 0, 0, 0]);

        stream.synchronize().unwrap();
        assert_eq!(stream.pending(), 0);
        assert_eq!(h_out.to_vec(), vec![2, 3, 4, 5]);

        let stats = dev.stats();
        assert_eq!(stats.htod_copies, 1);
        assert_eq!(stats.launches, 1);
        assert_eq!(stats.dtoh_copies, 1);
        assert_eq!(stats.synchronizations, 1);
    }

    #[test]
    fn test_size_mismatch_rejected_at_enqueue() {
        let dev = device();
        let h = dev.alloc_pinned(8).unwrap();
        let d = dev.alloc(4).unwrap();
        let mut stream = dev.create_stream();
        let err = stream.memcpy_htod_async(&d, &h).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::SizeMismatch {
                expected: 4,
                actual: 8,
                ..
            }
        ));
        assert_eq!(stream.pending(), 0);
    }

    #[test]
    fn test_foreign_buffer_rejected() {
        let a = device();
        let b = device();
        let h = a.alloc_pinned(4).unwrap();
        let d = b.alloc(4).unwrap();
        let mut stream = a.create_stream();
        assert!(matches!(
            stream.memcpy_htod_async(&d, &h),
            Err(DeviceError::ForeignBuffer { .. })
        ));
    }

    #[test]
    fn test_injected_fault_discards_rest_and_recovers() {
        let dev = device();
        let h_out = dev.alloc_pinned(4).unwrap();
        let d_in = dev.alloc(4).unwrap();
        let d_out = dev.alloc(4).unwrap();
        let mut stream = dev.create_stream();

        dev.fail_launch_after(1);
        stream.launch_async(Arc::new(Increment), 1, &d_in, &d_out).unwrap();
        stream.synchronize().unwrap();

        stream.launch_async(Arc::new(Increment), 1, &d_in, &d_out).unwrap();
        stream.memcpy_dtoh_async(&h_out, &d_out).unwrap();
        let err = stream.synchronize().unwrap_err();
        assert!(matches!(err, DeviceError::KernelFailed { .. }));
        assert_eq!(stream.pending(), 0);

        let stats = dev.stats();
        assert_eq!(stats.failed_launches, 1);
        assert_eq!(stats.discarded_ops, 1);
        assert_eq!(stats.dtoh_copies, 0);

        // One-shot: the next launch runs normally.
        stream.launch_async(Arc::new(Increment), 1, &d_in, &d_out).unwrap();
        stream.memcpy_dtoh_async(&h_out, &d_out).unwrap();
        stream.synchronize().unwrap();
        assert_eq!(h_out.to_vec(), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_kernel_error_surfaces_at_sync() {
        let dev = device();
        let d_in = dev.alloc(4).unwrap();
        let d_out = dev.alloc(8).unwrap();
        let mut stream = dev.create_stream();
        stream.launch_async(Arc::new(Increment), 1, &d_in, &d_out).unwrap();
        match stream.synchronize() {
            Err(DeviceError::KernelFailed { kernel, detail }) => {
                assert_eq!(kernel, "increment");
                assert!(detail.contains("sizes differ"));
            }
            other => panic!("expected kernel failure, got {other:?}"),
        }
    }

    #[test]
    fn test_freed_buffer_fails_pending_copy() {
        let dev = device();
        let h = dev.alloc_pinned(4).unwrap();
        let d = dev.alloc(4).unwrap();
        let ptr = d.ptr();
        let mut stream = dev.create_stream();
        stream.memcpy_htod_async(&d, &h).unwrap();
        drop(d);
        match stream.synchronize() {
            Err(DeviceError::InvalidHandle(p)) => assert_eq!(p, ptr),
            other => panic!("expected invalid handle, got {other:?}"),
        }
    }

    #[test]
    fn test_launch_in_place() {
        let dev = device();
        let mut h = dev.alloc_pinned(3).unwrap();
        let d = dev.alloc(3).unwrap();
        let mut stream = dev.create_stream();
        h.write(|b| b.copy_from_slice(&[0, 10, 254]));
        stream.memcpy_htod_async(&d, &h).unwrap();
        stream.launch_async(Arc::new(Increment), 1, &d, &d).unwrap();
        stream.memcpy_dtoh_async(&h, &d).unwrap();
        stream.synchronize().unwrap();
        assert_eq!(h.to_vec(), vec![1, 11, 255]);
        assert_eq!(dev.stats().launches, 1);
        assert_eq!(dev.stats().failed_launches, 0);
    }

    #[test]
    fn test_freed_output_reported_and_input_kept() {
        let dev = device();
        let h = dev.alloc_pinned(2).unwrap();
        let d_in = dev.alloc(2).unwrap();
        let d_out = dev.alloc(2).unwrap();
        let out_ptr = d_out.ptr();
        let mut stream = dev.create_stream();
        stream.launch_async(Arc::new(Increment), 1, &d_in, &d_out).unwrap();
        drop(d_out);
        match stream.synchronize() {
            Err(DeviceError::InvalidHandle(p)) => assert_eq!(p, out_ptr),
            other => panic!("expected invalid handle, got {other:?}"),
        }
        stream.memcpy_dtoh_async(&h, &d_in).unwrap();
        stream.synchronize().unwrap();
        assert_eq!(h.to_vec(), vec![0, 0]);
    }

    #[test]
    fn test_host_write_before_sync_is_visible() {
        let dev = device();
        let mut h_in = dev.alloc_pinned(2).unwrap();
        let h_out = dev.alloc_pinned(2).unwrap();
        let d = dev.alloc(2).unwrap();
        let mut stream = dev.create_stream();
        stream.memcpy_htod_async(&d, &h_in).unwrap();
        h_in.write(|b| b.copy_from_slice(&[7, 9]));
        stream.memcpy_dtoh_async(&h_out, &d).unwrap();
        stream.synchronize().unwrap();
        assert_eq!(h_out.to_vec(), vec![7, 9]);
    }
}
