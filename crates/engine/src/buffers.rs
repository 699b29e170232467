// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Paired host/device buffers for one session.
//!
//! ```text
//!  h_input (pinned) ──htod──► d_input ──plan──► d_output ──dtoh──► h_output (pinned)
//! ```
//!
//! Sizes come from the plan's binding volumes and never change. Every
//! buffer is RAII: dropping the set returns all four allocations and the
//! stream to the device.

use crate::{Binding, EngineError, EnginePlan};
use accel_device::{Device, DeviceBuffer, DeviceError, PinnedBuffer, Stream};
use tensor_core::DType;

/// The four transfer buffers plus the stream that orders work on them.
#[derive(Debug)]
pub struct BufferSet {
    pub(crate) h_input: PinnedBuffer,
    pub(crate) h_output: PinnedBuffer,
    pub(crate) d_input: DeviceBuffer,
    pub(crate) d_output: DeviceBuffer,
    pub(crate) stream: Stream,
    input_volume: usize,
    output_volume: usize,
    dtype: DType,
}

impl BufferSet {
    /// Allocates pinned host and device memory for both bindings of `plan`.
    ///
    /// # Errors
    /// [`EngineError::Resource`] if any allocation is refused or a binding's
    /// byte size overflows. Buffers allocated before the failure are released.
    pub fn allocate(device: &Device, plan: &EnginePlan) -> Result<Self, EngineError> {
        let dtype = plan.precision();
        let resource = |what: &'static str| move |source| EngineError::Resource { what, source };
        let sized = |binding: &Binding, what: &'static str| {
            let volume = binding.shape.checked_num_elements();
            match (volume, binding.shape.checked_size_bytes(dtype)) {
                (Some(volume), Some(bytes)) => Ok((volume, bytes)),
                _ => Err(resource(what)(DeviceError::SizeOverflow {
                    dims: binding.shape.dims().to_vec(),
                    elem_bytes: dtype.size_bytes(),
                })),
            }
        };
        let (input_volume, input_bytes) = sized(plan.input(), "pinned input buffer")?;
        let (output_volume, output_bytes) = sized(plan.output(), "pinned output buffer")?;

        let h_input = device
            .alloc_pinned(input_bytes)
            .map_err(resource("pinned input buffer"))?;
        let h_output = device
            .alloc_pinned(output_bytes)
            .map_err(resource("pinned output buffer"))?;
        let d_input = device
            .alloc(input_bytes)
            .map_err(resource("device input buffer"))?;
        let d_output = device
            .alloc(output_bytes)
            .map_err(resource("device output buffer"))?;
        let stream = device.create_stream();

        tracing::info!(
            plan = plan.name(),
            input_bytes,
            output_bytes,
            stream = stream.id(),
            "buffers allocated"
        );

        Ok(Self {
            h_input,
            h_output,
            d_input,
            d_output,
            stream,
            input_volume,
            output_volume,
            dtype,
        })
    }

    pub fn input_volume(&self) -> usize {
        self.input_volume
    }

    pub fn output_volume(&self) -> usize {
        self.output_volume
    }

    pub fn input_bytes(&self) -> usize {
        self.d_input.size_bytes()
    }

    pub fn output_bytes(&self) -> usize {
        self.d_output.size_bytes()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn stream_id(&self) -> u64 {
        self.stream.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tests::pooling_plan;
    use crate::ErrorKind;
    use accel_device::{DeviceConfig, MemoryBudget};
    use tensor_core::Shape;

    #[test]
    fn test_sizes_follow_plan() {
        let device = Device::simulated();
        let set = BufferSet::allocate(&device, &pooling_plan(DType::F16)).unwrap();
        assert_eq!(set.input_volume(), 6);
        assert_eq!(set.output_volume(), 3);
        assert_eq!(set.input_bytes(), 12);
        assert_eq!(set.output_bytes(), 6);
        assert_eq!(set.h_input.size_bytes(), set.input_bytes());
        assert_eq!(set.h_output.size_bytes(), set.output_bytes());
        assert_eq!(device.memory_used(), 18);
        assert_eq!(device.pinned_used(), 18);
    }

    #[test]
    fn test_drop_releases_everything() {
        let device = Device::simulated();
        let set = BufferSet::allocate(&device, &pooling_plan(DType::F32)).unwrap();
        drop(set);
        let stats = device.stats();
        assert_eq!(stats.live_allocations(), 0);
        assert_eq!(stats.device_bytes_in_use, 0);
        assert_eq!(stats.pinned_bytes_in_use, 0);
    }

    #[test]
    fn test_allocation_failure_is_resource_error() {
        let device = Device::new(DeviceConfig {
            name: "tiny".into(),
            memory: MemoryBudget::from_bytes(30),
            pinned_memory: MemoryBudget::from_mb(1),
        });
        let err = BufferSet::allocate(&device, &pooling_plan(DType::F32)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(err.to_string().contains("device output buffer"));
        // The partial allocations were returned.
        assert_eq!(device.stats().live_allocations(), 0);
    }

    #[test]
    fn test_overflowing_binding_is_resource_error() {
        let mut compiled = pooling_plan(DType::F16).compiled().clone();
        compiled.bindings[1].shape = Shape::vector(usize::MAX);
        let plan = EnginePlan::new(compiled);
        let device = Device::simulated();
        let err = BufferSet::allocate(&device, &plan).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(err.to_string().contains("pinned output buffer"), "{err}");
        assert_eq!(device.stats().live_allocations(), 0);
    }
}
