// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Plan deserialization.
//!
//! A [`Runtime`] is the scope in which persisted plans are turned back into
//! [`EnginePlan`]s. It is acquired for the duration of a load and released
//! when dropped, on success and failure alike.

use crate::plan::{CompiledPlan, EnginePlan, HEADER_LEN, PLAN_FORMAT_VERSION, PLAN_MAGIC};
use crate::EngineError;
use std::path::Path;
use tracing::{debug, info};

/// Deserialization scope for persisted plans.
#[derive(Debug)]
pub struct Runtime {
    plans_loaded: usize,
}

impl Runtime {
    pub fn new() -> Self {
        debug!("runtime acquired");
        Self { plans_loaded: 0 }
    }

    /// Number of plans this runtime has produced.
    pub fn plans_loaded(&self) -> usize {
        self.plans_loaded
    }

    /// Decodes a persisted plan.
    ///
    /// # Errors
    /// [`EngineError::Deserialization`] for a short buffer, wrong magic,
    /// another format version, an undecodable or trailing body, or a plan
    /// whose bindings and ops disagree.
    pub fn deserialize_plan(&mut self, bytes: &[u8]) -> Result<EnginePlan, EngineError> {
        if bytes.len() < HEADER_LEN {
            return Err(EngineError::Deserialization(format!(
                "plan truncated: {} bytes, header alone is {HEADER_LEN}",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(HEADER_LEN);
        if header[..4] != PLAN_MAGIC {
            return Err(EngineError::Deserialization(
                "not an engine plan (bad magic)".into(),
            ));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != PLAN_FORMAT_VERSION {
            return Err(EngineError::Deserialization(format!(
                "plan format version {version}, this runtime reads version {PLAN_FORMAT_VERSION}"
            )));
        }

        let (compiled, rest): (CompiledPlan, &[u8]) = postcard::take_from_bytes(body)
            .map_err(|e| EngineError::Deserialization(format!("corrupt plan body: {e}")))?;
        if !rest.is_empty() {
            return Err(EngineError::Deserialization(format!(
                "{} trailing bytes after plan body",
                rest.len()
            )));
        }
        compiled
            .check()
            .map_err(|e| EngineError::Deserialization(format!("inconsistent plan: {e}")))?;

        self.plans_loaded += 1;
        Ok(EnginePlan::new(compiled))
    }

    /// Reads `path` fully and deserializes it.
    pub fn load(&mut self, path: &Path) -> Result<EnginePlan, EngineError> {
        let bytes = std::fs::read(path).map_err(|e| {
            EngineError::Deserialization(format!("cannot read plan '{}': {e}", path.display()))
        })?;
        let plan = self.deserialize_plan(&bytes)?;
        info!(path = %path.display(), "{}", plan.summary());
        Ok(plan)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        debug!(plans = self.plans_loaded, "runtime released");
    }
}

/// Loads a plan file inside a scoped [`Runtime`].
pub fn load_plan(path: &Path) -> Result<EnginePlan, EngineError> {
    Runtime::new().load(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tests::pooling_plan;
    use crate::plan::{Binding, INPUT_BINDING};
    use crate::ErrorKind;
    use tensor_core::{DType, Shape};

    #[test]
    fn test_round_trip() {
        let plan = pooling_plan(DType::F16);
        let bytes = plan.serialize().unwrap();
        let mut rt = Runtime::new();
        let back = rt.deserialize_plan(&bytes).unwrap();
        assert_eq!(back, plan);
        assert!(!back.ptr_eq(&plan));
        assert_eq!(rt.plans_loaded(), 1);
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = pooling_plan(DType::F32).serialize().unwrap();
        bytes[4..8].copy_from_slice(&(PLAN_FORMAT_VERSION + 1).to_le_bytes());
        let err = Runtime::new().deserialize_plan(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deserialization);
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = pooling_plan(DType::F32).serialize().unwrap();
        bytes[0] = b'X';
        assert_eq!(
            Runtime::new().deserialize_plan(&bytes).unwrap_err().kind(),
            ErrorKind::Deserialization
        );
    }

    #[test]
    fn test_truncated() {
        let bytes = pooling_plan(DType::F32).serialize().unwrap();
        for len in [0, 3, HEADER_LEN, bytes.len() - 1] {
            let err = Runtime::new().deserialize_plan(&bytes[..len]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Deserialization, "len {len}");
        }
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = pooling_plan(DType::F32).serialize().unwrap();
        bytes.push(0);
        assert!(Runtime::new().deserialize_plan(&bytes).is_err());
    }

    fn framed(body: Vec<u8>) -> Vec<u8> {
        let mut bytes = PLAN_MAGIC.to_vec();
        bytes.extend_from_slice(&PLAN_FORMAT_VERSION.to_le_bytes());
        bytes.extend(body);
        bytes
    }

    /// Wire-compatible stand-ins for the plan types that can carry a weight
    /// tensor whose data disagrees with its declared shape.
    mod wire {
        use crate::plan::Binding;
        use tensor_core::{DType, Shape};

        #[derive(serde::Serialize)]
        pub struct Plan {
            pub name: String,
            pub precision: DType,
            pub max_batch_size: usize,
            pub workspace_bytes: usize,
            pub bindings: [Binding; 2],
            pub ops: Vec<Op>,
        }

        #[derive(serde::Serialize)]
        pub struct Op {
            pub name: String,
            pub kind: Kind,
            pub input_shape: Shape,
            pub output_shape: Shape,
        }

        #[derive(serde::Serialize)]
        pub enum Kind {
            Dense {
                weights: Tensor,
                bias: Option<Vec<f32>>,
            },
        }

        #[derive(serde::Serialize)]
        pub struct Tensor {
            pub shape: Shape,
            pub data: Vec<f32>,
        }
    }

    fn dense_wire_plan(weights: wire::Tensor) -> Vec<u8> {
        let binding = |name: &str, shape: Shape| Binding {
            name: name.into(),
            shape,
            dtype: DType::F32,
        };
        let plan = wire::Plan {
            name: "fc".into(),
            precision: DType::F32,
            max_batch_size: 1,
            workspace_bytes: 64,
            bindings: [binding("data", Shape::vector(3)), binding("out", Shape::vector(2))],
            ops: vec![wire::Op {
                name: "fc".into(),
                kind: wire::Kind::Dense {
                    weights,
                    bias: None,
                },
                input_shape: Shape::vector(3),
                output_shape: Shape::vector(2),
            }],
        };
        framed(postcard::to_allocvec(&plan).unwrap())
    }

    #[test]
    fn test_wire_stand_ins_match_plan_encoding() {
        let good = dense_wire_plan(wire::Tensor {
            shape: Shape::matrix(3, 2),
            data: vec![1.0; 6],
        });
        let plan = Runtime::new().deserialize_plan(&good).unwrap();
        assert_eq!(plan.ops().len(), 1);
        assert_eq!(plan.serialize().unwrap(), good);
    }

    #[test]
    fn test_weights_shorter_than_shape_rejected() {
        let bytes = dense_wire_plan(wire::Tensor {
            shape: Shape::matrix(3, 2),
            data: vec![1.0],
        });
        let err = Runtime::new().deserialize_plan(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deserialization);
        assert!(err.to_string().contains("corrupt plan body"), "{err}");
    }

    #[test]
    fn test_weights_disagreeing_with_op_shapes_rejected() {
        let bytes = dense_wire_plan(wire::Tensor {
            shape: Shape::matrix(2, 3),
            data: vec![1.0; 6],
        });
        let err = Runtime::new().deserialize_plan(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deserialization);
        assert!(err.to_string().contains("weights are [2, 3]"), "{err}");
    }

    #[test]
    fn test_overflowing_binding_rejected() {
        let mut compiled = pooling_plan(DType::F32).compiled().clone();
        let huge = Shape::chw(3, 1 << 40, 1 << 40);
        compiled.bindings[INPUT_BINDING].shape = huge.clone();
        compiled.ops[0].input_shape = huge;
        let bytes = framed(postcard::to_allocvec(&compiled).unwrap());
        let err = Runtime::new().deserialize_plan(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deserialization);
        assert!(err.to_string().contains("overflows"), "{err}");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_plan(Path::new("/nonexistent/model.plan")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deserialization);
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.plan");
        let plan = pooling_plan(DType::F32);
        plan.write(&path).unwrap();
        assert_eq!(load_plan(&path).unwrap(), plan);
    }
}
