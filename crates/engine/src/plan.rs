// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The compiled, immutable execution plan and its on-disk format.
//!
//! # File Format
//! ```text
//! +--------+-------------------+------------------------------+
//! | "APLN" | version (u32, LE) | postcard-encoded CompiledPlan |
//! +--------+-------------------+------------------------------+
//! ```
//!
//! A plan always has exactly two bindings: index 0 is the input, index 1
//! the output.

use crate::kernel::{run_chain, Op};
use crate::EngineError;
use accel_device::Kernel;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tensor_core::{DType, Shape};

pub const PLAN_MAGIC: [u8; 4] = *b"APLN";
pub const PLAN_FORMAT_VERSION: u32 = 1;
pub(crate) const HEADER_LEN: usize = 8;

/// Binding index of the network input.
pub const INPUT_BINDING: usize = 0;
/// Binding index of the network output.
pub const OUTPUT_BINDING: usize = 1;

/// A named, shaped tensor the host exchanges with the plan.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Binding {
    pub name: String,
    pub shape: Shape,
    pub dtype: DType,
}

impl Binding {
    /// Number of elements for one image.
    pub fn volume(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn size_bytes(&self) -> usize {
        self.shape.size_bytes(self.dtype)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct CompiledPlan {
    pub name: String,
    pub precision: DType,
    pub max_batch_size: usize,
    pub workspace_bytes: usize,
    pub bindings: [Binding; 2],
    pub ops: Vec<Op>,
}

impl CompiledPlan {
    /// Structural consistency: bindings agree with the precision, every op's
    /// parameters fit its shapes, and the op chain connects the input shape
    /// to the output shape.
    pub fn check(&self) -> Result<(), String> {
        if self.max_batch_size == 0 {
            return Err("max batch size is zero".into());
        }
        for b in &self.bindings {
            if b.dtype != self.precision {
                return Err(format!(
                    "binding '{}' is {}, plan precision is {}",
                    b.name, b.dtype, self.precision
                ));
            }
            match b.shape.checked_size_bytes(b.dtype) {
                None => return Err(format!("binding '{}' shape {} overflows", b.name, b.shape)),
                Some(0) => return Err(format!("binding '{}' has zero volume", b.name)),
                Some(_) => {}
            }
        }
        let (first, last) = match (self.ops.first(), self.ops.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Err("plan has no operations".into()),
        };
        if first.input_shape != self.bindings[INPUT_BINDING].shape {
            return Err("first op does not consume the input binding".into());
        }
        if last.output_shape != self.bindings[OUTPUT_BINDING].shape {
            return Err("last op does not produce the output binding".into());
        }
        for op in &self.ops {
            op.check()?;
        }
        for pair in self.ops.windows(2) {
            if pair[0].output_shape != pair[1].input_shape {
                return Err(format!(
                    "op '{}' output {} does not match op '{}' input {}",
                    pair[0].name, pair[0].output_shape, pair[1].name, pair[1].input_shape
                ));
            }
        }
        Ok(())
    }

    /// Runs `batch_size` images from `input` bytes into `output` bytes.
    fn execute_bytes(&self, batch_size: usize, input: &[u8], output: &mut [u8]) -> Result<(), String> {
        if batch_size == 0 || batch_size > self.max_batch_size {
            return Err(format!(
                "batch size {batch_size} outside 1..={}",
                self.max_batch_size
            ));
        }
        let [in_binding, out_binding] = &self.bindings;
        let in_bytes = in_binding.size_bytes();
        let out_bytes = out_binding.size_bytes();
        if input.len() < batch_size.saturating_mul(in_bytes)
            || output.len() < batch_size.saturating_mul(out_bytes)
        {
            return Err(format!(
                "bindings hold {} / {} bytes, batch of {batch_size} needs {} / {}",
                input.len(),
                output.len(),
                batch_size * in_bytes,
                batch_size * out_bytes
            ));
        }

        let mut values = vec![0.0f32; in_binding.volume()];
        for (src, dst) in input
            .chunks_exact(in_bytes)
            .zip(output.chunks_exact_mut(out_bytes))
            .take(batch_size)
        {
            self.precision.decode(src, &mut values).map_err(|e| e.to_string())?;
            let result = run_chain(&self.ops, &in_binding.shape, &values, self.precision)
                .map_err(|e| e.to_string())?;
            self.precision
                .encode(result.as_f32_slice(), dst)
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// A compiled execution plan. Cheap to clone; clones share the same
/// immutable data and may be used from several sessions at once.
#[derive(Clone)]
pub struct EnginePlan {
    inner: Arc<CompiledPlan>,
}

impl EnginePlan {
    pub(crate) fn new(plan: CompiledPlan) -> Self {
        Self {
            inner: Arc::new(plan),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn precision(&self) -> DType {
        self.inner.precision
    }

    pub fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size
    }

    /// Scratch memory the plan was compiled against.
    pub fn workspace_bytes(&self) -> usize {
        self.inner.workspace_bytes
    }

    pub fn bindings(&self) -> &[Binding; 2] {
        &self.inner.bindings
    }

    pub fn input(&self) -> &Binding {
        &self.inner.bindings[INPUT_BINDING]
    }

    pub fn output(&self) -> &Binding {
        &self.inner.bindings[OUTPUT_BINDING]
    }

    pub fn ops(&self) -> &[Op] {
        &self.inner.ops
    }

    pub fn weight_bytes(&self) -> usize {
        self.inner
            .ops
            .iter()
            .map(|op| op.weight_bytes(self.inner.precision))
            .sum()
    }

    /// Encodes the plan into its persisted form.
    pub fn serialize(&self) -> Result<Vec<u8>, EngineError> {
        let body = postcard::to_allocvec(self.inner.as_ref())
            .map_err(|e| EngineError::Build(format!("plan serialization failed: {e}")))?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.extend_from_slice(&PLAN_MAGIC);
        bytes.extend_from_slice(&PLAN_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Writes the serialized plan to `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<(), EngineError> {
        let bytes = self.serialize()?;
        std::fs::write(path, &bytes).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "plan written");
        Ok(())
    }

    /// Whether two handles share the same compiled data.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn compiled(&self) -> &CompiledPlan {
        &self.inner
    }

    pub fn summary(&self) -> String {
        let input = self.input();
        let output = self.output();
        format!(
            "Plan '{}': {} ops, {}, max batch {}, input '{}' {}, output '{}' {}, \
             {:.1} KB weights, {} B workspace",
            self.name(),
            self.ops().len(),
            self.precision(),
            self.max_batch_size(),
            input.name,
            input.shape,
            output.name,
            output.shape,
            self.weight_bytes() as f64 / 1024.0,
            self.workspace_bytes(),
        )
    }
}

impl PartialEq for EnginePlan {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl fmt::Debug for EnginePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnginePlan")
            .field("name", &self.inner.name)
            .field("precision", &self.inner.precision)
            .field("max_batch_size", &self.inner.max_batch_size)
            .field("ops", &self.inner.ops.len())
            .finish()
    }
}

impl fmt::Display for EnginePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for (i, b) in self.bindings().iter().enumerate() {
            writeln!(f, "  binding {i}: {} {} {} ({} B)", b.name, b.shape, b.dtype, b.size_bytes())?;
        }
        for op in self.ops() {
            writeln!(
                f,
                "  {} ({}): {} -> {}",
                op.name,
                op.kind.label(),
                op.input_shape,
                op.output_shape
            )?;
        }
        Ok(())
    }
}

impl Kernel for EnginePlan {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn execute(&self, batch_size: usize, input: &[u8], output: &mut [u8]) -> Result<(), String> {
        self.inner.execute_bytes(batch_size, input, output)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::kernel::OpKind;

    /// `[3, 1, 2]` → global_avg_pool → `[3]`.
    pub(crate) fn pooling_plan(precision: DType) -> EnginePlan {
        EnginePlan::new(CompiledPlan {
            name: "pool".into(),
            precision,
            max_batch_size: 1,
            workspace_bytes: 64,
            bindings: [
                Binding {
                    name: "data".into(),
                    shape: Shape::chw(3, 1, 2),
                    dtype: precision,
                },
                Binding {
                    name: "pooled".into(),
                    shape: Shape::vector(3),
                    dtype: precision,
                },
            ],
            ops: vec![Op {
                name: "gap".into(),
                kind: OpKind::GlobalAvgPool,
                input_shape: Shape::chw(3, 1, 2),
                output_shape: Shape::vector(3),
            }],
        })
    }

    #[test]
    fn test_binding_sizes() {
        let plan = pooling_plan(DType::F16);
        assert_eq!(plan.input().volume(), 6);
        assert_eq!(plan.input().size_bytes(), 12);
        assert_eq!(plan.output().size_bytes(), 6);
    }

    #[test]
    fn test_serialize_header() {
        let bytes = pooling_plan(DType::F32).serialize().unwrap();
        assert_eq!(&bytes[..4], b"APLN");
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), PLAN_FORMAT_VERSION);
        assert!(bytes.len() > HEADER_LEN);
    }

    #[test]
    fn test_kernel_execute() {
        let plan = pooling_plan(DType::F32);
        let mut input = vec![0u8; 24];
        DType::F32
            .encode(&[1.0, 3.0, 2.0, 4.0, 5.0, 5.0], &mut input)
            .unwrap();
        let mut output = vec![0u8; 12];
        plan.execute(1, &input, &mut output).unwrap();
        let mut values = [0.0f32; 3];
        DType::F32.decode(&output, &mut values).unwrap();
        assert_eq!(values, [2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_kernel_rejects_batch_over_max() {
        let plan = pooling_plan(DType::F32);
        let mut output = vec![0u8; 24];
        let err = plan.execute(2, &[0u8; 48], &mut output).unwrap_err();
        assert!(err.contains("batch size 2"));
    }

    #[test]
    fn test_check_detects_broken_chain() {
        let plan = pooling_plan(DType::F32);
        let mut compiled = plan.compiled().clone();
        compiled.ops[0].output_shape = Shape::vector(4);
        assert!(compiled.check().is_err());

        let mut compiled = plan.compiled().clone();
        compiled.bindings[1].dtype = DType::F16;
        assert!(compiled.check().is_err());

        assert!(plan.compiled().check().is_ok());
    }

    #[test]
    fn test_check_validates_op_parameters() {
        let mut compiled = pooling_plan(DType::F32).compiled().clone();
        compiled.ops[0].kind = OpKind::Scale {
            scale: vec![1.0; 2],
            shift: vec![0.0],
        };
        compiled.ops[0].output_shape = Shape::chw(3, 1, 2);
        compiled.bindings[1].shape = Shape::chw(3, 1, 2);
        let err = compiled.check().unwrap_err();
        assert!(err.contains("scale has 2 values"), "{err}");
    }

    #[test]
    fn test_clones_share_data() {
        let a = pooling_plan(DType::F32);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a, pooling_plan(DType::F32));
    }

    #[test]
    fn test_display_lists_bindings() {
        let text = pooling_plan(DType::F32).to_string();
        assert!(text.contains("binding 0: data [3, 1, 2] f32"));
        assert!(text.contains("gap (global_avg_pool)"));
    }
}
