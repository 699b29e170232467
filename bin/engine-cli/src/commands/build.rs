// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `accel-rt build`: parse a model, compile it and write the engine file.

use crate::{BuildFormat, BuildOptions};
use accel_device::MemoryBudget;
use engine::{EngineConfig, GraphBuilder, ModelFormat};
use tensor_core::{DType, Shape};

pub async fn execute(
    config: &EngineConfig,
    options: BuildOptions,
    format: BuildFormat,
) -> anyhow::Result<()> {
    let mut builder_config = config.builder_config();
    if let Some(p) = options.precision.as_deref() {
        builder_config.precision =
            DType::parse(p).ok_or_else(|| anyhow::anyhow!("unknown precision '{p}' (f32 or f16)"))?;
    }
    if let Some(n) = options.max_batch_size {
        builder_config.max_batch_size = n;
    }
    if let Some(w) = options.max_workspace.as_deref() {
        builder_config.max_workspace_bytes = MemoryBudget::parse(w)?.as_bytes();
    }

    let format = match format {
        BuildFormat::Exchange {
            model,
            input_name,
            input_shape,
            output_name,
        } => ModelFormat::Exchange {
            model_file: model,
            input_name,
            input_shape: Shape::new(input_shape.0),
            output_name,
        },
        BuildFormat::Vendor {
            weights,
            deploy,
            output_name,
        } => ModelFormat::Vendor {
            weights_file: weights,
            deploy_file: deploy,
            output_name,
        },
    };

    let mut builder = GraphBuilder::new(builder_config)?;
    let plan = builder.build_and_write(&format, &options.output)?;

    println!("{}", plan.summary());
    println!("{}", builder.timings().summary());
    if builder.fast_math() {
        println!("fast math enabled (f16)");
    }
    println!("wrote {}", options.output.display());
    Ok(())
}
