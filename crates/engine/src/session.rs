// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Inference sessions.
//!
//! A session walks through its lifecycle one step at a time:
//!
//! ```text
//! Uninitialized ─load_plan─► PlanLoaded ─allocate_buffers─► BuffersAllocated
//!        ─create_context─► ContextReady ─activate─► Ready
//! ```
//!
//! Each step checks the current state and fails with
//! [`EngineError::Precondition`] when called out of order. `inference` is
//! only accepted in `Ready` and never touches the device otherwise.

use crate::buffers::BufferSet;
use crate::metrics::InferenceMetrics;
use crate::preprocess::{decode_output, encode_image};
use crate::{EngineError, EnginePlan};
use accel_device::{Device, DeviceBuffer, Kernel, Stream};
use ndarray::{Array2, ArrayView1, ArrayView4};
use num_traits::AsPrimitive;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Lifecycle position of an [`InferenceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    PlanLoaded,
    BuffersAllocated,
    ContextReady,
    Ready,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::PlanLoaded => "plan_loaded",
            SessionState::BuffersAllocated => "buffers_allocated",
            SessionState::ContextReady => "context_ready",
            SessionState::Ready => "ready",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Execution context ──────────────────────────────────────────

/// Device-side execution state for one plan.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    kernel: Arc<dyn Kernel>,
    max_batch_size: usize,
}

impl ExecutionContext {
    pub fn new(plan: &EnginePlan) -> Self {
        Self {
            max_batch_size: plan.max_batch_size(),
            kernel: Arc::new(plan.clone()),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Enqueues one execution of the plan on `stream`.
    ///
    /// # Errors
    /// [`EngineError::Configuration`] if `batch_size` is outside
    /// `1..=max_batch_size`; nothing is enqueued in that case.
    pub fn execute_async(
        &self,
        stream: &mut Stream,
        batch_size: usize,
        input: &DeviceBuffer,
        output: &DeviceBuffer,
    ) -> Result<(), EngineError> {
        if batch_size == 0 || batch_size > self.max_batch_size {
            return Err(EngineError::Configuration(format!(
                "batch size {batch_size} outside 1..={}",
                self.max_batch_size
            )));
        }
        stream
            .launch_async(Arc::clone(&self.kernel), batch_size, input, output)
            .map_err(EngineError::device)
    }
}

// ── Session ────────────────────────────────────────────────────

/// One plan, its buffers, its context and its stream.
///
/// `inference` takes `&mut self`; serving several callers needs one
/// session each or external locking.
#[derive(Debug)]
pub struct InferenceSession {
    device: Device,
    state: SessionState,
    plan: Option<EnginePlan>,
    buffers: Option<BufferSet>,
    context: Option<ExecutionContext>,
    staging: Vec<f32>,
    output_row: Vec<f32>,
    last_metrics: Option<InferenceMetrics>,
}

impl InferenceSession {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            state: SessionState::Uninitialized,
            plan: None,
            buffers: None,
            context: None,
            staging: Vec::new(),
            output_row: Vec::new(),
            last_metrics: None,
        }
    }

    /// Runs the whole lifecycle for `plan`.
    pub fn from_plan(device: Device, plan: EnginePlan) -> Result<Self, EngineError> {
        let mut session = Self::new(device);
        session.load_plan(plan)?;
        session.allocate_buffers()?;
        session.create_context()?;
        session.activate()?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn plan(&self) -> Option<&EnginePlan> {
        self.plan.as_ref()
    }

    pub fn buffers(&self) -> Option<&BufferSet> {
        self.buffers.as_ref()
    }

    /// Metrics of the last successful `inference` call.
    pub fn last_metrics(&self) -> Option<&InferenceMetrics> {
        self.last_metrics.as_ref()
    }

    fn require(&self, operation: &'static str, expected: SessionState) -> Result<(), EngineError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EngineError::Precondition {
                operation,
                reason: format!("requires {expected}, session is {}", self.state),
            })
        }
    }

    fn advance(&mut self, next: SessionState) {
        info!(from = %self.state, to = %next, "session state");
        self.state = next;
    }

    pub fn load_plan(&mut self, plan: EnginePlan) -> Result<(), EngineError> {
        self.require("load_plan", SessionState::Uninitialized)?;
        self.plan = Some(plan);
        self.advance(SessionState::PlanLoaded);
        Ok(())
    }

    /// Loads a persisted plan from `path`.
    pub fn load_plan_file(&mut self, path: &Path) -> Result<(), EngineError> {
        self.require("load_plan", SessionState::Uninitialized)?;
        let plan = crate::runtime::load_plan(path)?;
        self.load_plan(plan)
    }

    pub fn allocate_buffers(&mut self) -> Result<(), EngineError> {
        self.require("allocate_buffers", SessionState::PlanLoaded)?;
        let plan = self.loaded_plan("allocate_buffers")?;
        let buffers = BufferSet::allocate(&self.device, plan)?;
        self.staging = Vec::with_capacity(buffers.input_volume());
        self.output_row = vec![0.0; buffers.output_volume()];
        self.buffers = Some(buffers);
        self.advance(SessionState::BuffersAllocated);
        Ok(())
    }

    pub fn create_context(&mut self) -> Result<(), EngineError> {
        self.require("create_context", SessionState::BuffersAllocated)?;
        let context = ExecutionContext::new(self.loaded_plan("create_context")?);
        self.context = Some(context);
        self.advance(SessionState::ContextReady);
        Ok(())
    }

    /// Marks the session ready to serve.
    pub fn activate(&mut self) -> Result<(), EngineError> {
        self.require("activate", SessionState::ContextReady)?;
        self.advance(SessionState::Ready);
        Ok(())
    }

    fn loaded_plan(&self, operation: &'static str) -> Result<&EnginePlan, EngineError> {
        self.plan.as_ref().ok_or_else(|| EngineError::Precondition {
            operation,
            reason: "no plan loaded".into(),
        })
    }

    /// Runs the plan over a batch of `(N, H, W, C)` images.
    ///
    /// Images are processed one at a time: stage into the pinned input
    /// buffer, copy to the device, execute, copy back, synchronize. Row `i`
    /// of the result belongs to image `i`.
    ///
    /// # Errors
    /// - [`EngineError::Precondition`] unless the session is `Ready`.
    /// - [`EngineError::InvalidInput`] if the image shape does not match
    ///   the input binding; checked before any device work.
    /// - [`EngineError::Inference`] if a device operation fails. No
    ///   partial result is returned.
    pub fn inference<T>(&mut self, images: ArrayView4<'_, T>) -> Result<Array2<f32>, EngineError>
    where
        T: AsPrimitive<f32>,
    {
        self.require("inference", SessionState::Ready)?;
        let Self {
            plan: Some(plan),
            buffers: Some(buffers),
            context: Some(context),
            staging,
            output_row,
            last_metrics,
            ..
        } = self
        else {
            return Err(EngineError::Precondition {
                operation: "inference",
                reason: "session is ready but not fully initialised".into(),
            });
        };

        let (n, h, w, c) = images.dim();
        let expected = plan.input().shape.dims();
        if expected != [c, h, w] {
            return Err(EngineError::InvalidInput(format!(
                "images are {n}×{h}×{w}×{c} (N×H×W×C), input binding '{}' expects {}",
                plan.input().name,
                plan.input().shape
            )));
        }

        let started = Instant::now();
        let dtype = buffers.dtype();
        let mut metrics = InferenceMetrics::new(plan.name());
        let mut result = Array2::<f32>::zeros((n, buffers.output_volume()));
        *last_metrics = None;

        for (i, image) in images.outer_iter().enumerate() {
            let image_started = Instant::now();
            buffers
                .h_input
                .write(|dst| encode_image(image, dtype, staging, dst))?;
            run_image(buffers, context).map_err(|e| e.at_image(i))?;
            buffers
                .h_output
                .read(|src| decode_output(dtype, src, output_row))?;
            result.row_mut(i).assign(&ArrayView1::from(output_row.as_slice()));

            let elapsed = image_started.elapsed();
            debug!(image = i, micros = elapsed.as_micros() as u64, "image done");
            metrics.record_image(elapsed);
        }

        metrics.finish(started.elapsed());
        debug!("{}", metrics.summary());
        *last_metrics = Some(metrics);
        Ok(result)
    }
}

/// Enqueues copy in, execute, copy out for one staged image and waits.
fn run_image(buffers: &mut BufferSet, context: &ExecutionContext) -> Result<(), EngineError> {
    let BufferSet {
        h_input,
        h_output,
        d_input,
        d_output,
        stream,
        ..
    } = buffers;
    stream
        .memcpy_htod_async(d_input, h_input)
        .map_err(EngineError::device)?;
    context.execute_async(stream, 1, d_input, d_output)?;
    stream
        .memcpy_dtoh_async(h_output, d_output)
        .map_err(EngineError::device)?;
    stream.synchronize().map_err(EngineError::device)
}
