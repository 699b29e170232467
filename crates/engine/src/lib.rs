// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # engine
//!
//! Build, persist, load and serve compiled inference plans.
//!
//! # Lifecycle
//! ```text
//! ModelFormat ─GraphBuilder─► EnginePlan ─write/load_plan─► EnginePlan
//!                                              │
//!                    BufferSet + ExecutionContext + Stream
//!                                              │
//!                         InferenceSession::inference(images)
//! ```
//!
//! - [`GraphBuilder`]: `configure`, `parse`, `build`, `write`.
//! - [`EnginePlan`]: immutable, reference-counted compiled plan with exactly
//!   two bindings (input 0, output 1).
//! - [`Runtime`] / [`load_plan`]: scoped deserialization of plan files.
//! - [`BufferSet`]: pinned host and device buffers sized once per session.
//! - [`InferenceSession`]: the `Uninitialized → … → Ready` state machine and
//!   the per-image copy/execute/copy/synchronize pipeline.
//! - [`EngineFacade`]: plan file + [`ModelRegistry`] lookup + session in one.
//!
//! # Example
//! ```
//! use accel_device::Device;
//! use engine::{BuilderConfig, EngineFacade, GraphBuilder, IoSpec, ModelFormat, ModelRegistry};
//! use tensor_core::Shape;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let model = dir.path().join("pool.json");
//! std::fs::write(&model, r#"{ "name": "pool", "layers": [
//!     { "name": "gap", "type": "global_avg_pool", "input": "data", "output": "pooled" } ] }"#).unwrap();
//!
//! let mut builder = GraphBuilder::new(BuilderConfig::default()).unwrap();
//! let engine_file = dir.path().join("pool.plan");
//! builder.build_and_write(&ModelFormat::Exchange {
//!     model_file: model,
//!     input_name: "data".into(),
//!     input_shape: Shape::chw(3, 2, 2),
//!     output_name: "pooled".into(),
//! }, &engine_file).unwrap();
//!
//! let spec = IoSpec::new()
//!     .with_input_name("data")
//!     .with_output_name("pooled")
//!     .with_input_shape(vec![3, 2, 2]);
//! let mut engine = EngineFacade::open(Device::simulated(), &ModelRegistry::new(), &engine_file, &spec).unwrap();
//!
//! let images = ndarray::Array4::<u8>::from_elem((2, 2, 2, 3), 4);
//! let out = engine.inference(images.view()).unwrap();
//! assert_eq!(out.dim(), (2, 3));
//! ```

mod buffers;
mod builder;
mod config;
mod error;
mod facade;
mod kernel;
mod metrics;
mod plan;
pub mod preprocess;
mod registry;
mod runtime;
mod session;

pub use buffers::BufferSet;
pub use builder::GraphBuilder;
pub use config::{BuilderConfig, EngineConfig, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_WORKSPACE_BYTES};
pub use error::{EngineError, ErrorKind};
pub use facade::{EngineFacade, IoSpec, ResolvedIO};
pub use kernel::{Op, OpKind, L2_EPSILON};
pub use metrics::{BuildTimings, InferenceMetrics};
pub use model_ir::ModelFormat;
pub use plan::{Binding, EnginePlan, INPUT_BINDING, OUTPUT_BINDING, PLAN_FORMAT_VERSION, PLAN_MAGIC};
pub use registry::{ModelEntry, ModelRegistry, HOME_ENV};
pub use runtime::{load_plan, Runtime};
pub use session::{ExecutionContext, InferenceSession, SessionState};
