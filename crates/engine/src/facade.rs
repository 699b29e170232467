// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! One-call engine setup: load a plan, resolve its I/O metadata against
//! the model registry, and bring a session to `Ready`.

use crate::registry::ModelRegistry;
use crate::session::{InferenceSession, SessionState};
use crate::{EngineError, EnginePlan, InferenceMetrics};
use accel_device::Device;
use ndarray::{Array2, ArrayView4};
use num_traits::AsPrimitive;
use std::path::Path;
use tensor_core::Shape;

/// I/O metadata supplied by the caller. Unset or empty values fall back
/// to the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoSpec {
    pub input_name: Option<String>,
    pub output_name: Option<String>,
    /// Channel-first input shape.
    pub input_shape: Option<Vec<usize>>,
}

impl IoSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_name(mut self, name: impl Into<String>) -> Self {
        self.input_name = Some(name.into());
        self
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    pub fn with_input_shape(mut self, shape: Vec<usize>) -> Self {
        self.input_shape = Some(shape);
        self
    }
}

/// Input/output names and input shape after registry lookup and overrides.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResolvedIO {
    pub input_name: String,
    pub output_name: String,
    pub input_shape: Shape,
    /// Registry identifier that matched the engine path, if any.
    pub model_name: Option<String>,
}

impl ResolvedIO {
    /// Seeds names and shape from the registry entry matching `filepath`,
    /// then lets every non-empty value in `spec` override.
    ///
    /// # Errors
    /// [`EngineError::Configuration`] if an explicit shape is not
    /// channel-first, or if either name or the shape is still missing.
    pub fn resolve(
        registry: &ModelRegistry,
        filepath: &str,
        spec: &IoSpec,
    ) -> Result<Self, EngineError> {
        let matched = registry.lookup(filepath);
        let model_name = matched.map(|(id, _)| id.to_string());

        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
        let input_name = non_empty(&spec.input_name).or_else(|| matched.map(|(_, e)| e.input.clone()));
        let output_name =
            non_empty(&spec.output_name).or_else(|| matched.map(|(_, e)| e.output.clone()));

        let input_shape = match spec.input_shape.as_deref().filter(|s| !s.is_empty()) {
            Some(shape) => {
                if shape[0] != 3 {
                    return Err(EngineError::Configuration(format!(
                        "input shape {shape:?} to engine should be in channels-first mode"
                    )));
                }
                Some(shape.to_vec())
            }
            None => matched.map(|(_, e)| e.input_shape.clone()),
        };

        let (Some(input_name), Some(output_name)) = (input_name, output_name) else {
            return Err(EngineError::Configuration(format!(
                "I/O names for {filepath} not detected or provided"
            )));
        };
        let Some(input_shape) = input_shape.filter(|s| !s.is_empty()) else {
            return Err(EngineError::Configuration(format!(
                "input shape for {filepath} not detected or provided"
            )));
        };

        Ok(Self {
            input_name,
            output_name,
            input_shape: Shape::new(input_shape),
            model_name,
        })
    }
}

/// A ready-to-serve engine: plan, resolved I/O and session.
#[derive(Debug)]
pub struct EngineFacade {
    io: ResolvedIO,
    session: InferenceSession,
}

impl EngineFacade {
    /// Loads the plan at `filepath` and prepares it for inference.
    pub fn open(
        device: Device,
        registry: &ModelRegistry,
        filepath: &Path,
        spec: &IoSpec,
    ) -> Result<Self, EngineError> {
        let mut session = InferenceSession::new(device);
        session.load_plan_file(filepath)?;
        Self::finish(session, registry, &filepath.display().to_string(), spec)
    }

    /// Like [`open`](Self::open) for a plan already in memory. `label`
    /// stands in for the file path during registry lookup.
    pub fn from_plan(
        device: Device,
        registry: &ModelRegistry,
        plan: EnginePlan,
        label: &str,
        spec: &IoSpec,
    ) -> Result<Self, EngineError> {
        let mut session = InferenceSession::new(device);
        session.load_plan(plan)?;
        Self::finish(session, registry, label, spec)
    }

    fn finish(
        mut session: InferenceSession,
        registry: &ModelRegistry,
        label: &str,
        spec: &IoSpec,
    ) -> Result<Self, EngineError> {
        let io = ResolvedIO::resolve(registry, label, spec)?;
        if let Some(plan) = session.plan() {
            warn_on_mismatch(plan, &io);
        }
        session.allocate_buffers()?;
        session.create_context()?;
        session.activate()?;
        tracing::info!(
            engine = label,
            model = io.model_name.as_deref().unwrap_or("-"),
            input = %io.input_name,
            output = %io.output_name,
            shape = %io.input_shape,
            "engine ready"
        );
        Ok(Self { io, session })
    }

    /// See [`InferenceSession::inference`].
    pub fn inference<T>(&mut self, images: ArrayView4<'_, T>) -> Result<Array2<f32>, EngineError>
    where
        T: AsPrimitive<f32>,
    {
        self.session.inference(images)
    }

    pub fn io(&self) -> &ResolvedIO {
        &self.io
    }

    pub fn session(&self) -> &InferenceSession {
        &self.session
    }

    pub fn plan(&self) -> Option<&EnginePlan> {
        self.session.plan()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn last_metrics(&self) -> Option<&InferenceMetrics> {
        self.session.last_metrics()
    }
}

fn warn_on_mismatch(plan: &EnginePlan, io: &ResolvedIO) {
    if plan.input().name != io.input_name || plan.output().name != io.output_name {
        tracing::warn!(
            plan_input = %plan.input().name,
            plan_output = %plan.output().name,
            input = %io.input_name,
            output = %io.output_name,
            "resolved I/O names differ from the plan's bindings"
        );
    }
    if plan.input().shape != io.input_shape {
        tracing::warn!(
            plan_shape = %plan.input().shape,
            shape = %io.input_shape,
            "resolved input shape differs from the plan's input binding"
        );
    }
}
