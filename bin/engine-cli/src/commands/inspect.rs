// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `accel-rt inspect`: print an engine's bindings and layers.

use std::path::PathBuf;

pub async fn execute(engine: PathBuf) -> anyhow::Result<()> {
    let plan = engine::load_plan(&engine)?;

    println!("  Engine: {}", engine.display());
    println!("  Model: {}", plan.name());
    println!("  Precision: {}", plan.precision());
    println!("  Max batch size: {}", plan.max_batch_size());
    println!("  Workspace: {} B", plan.workspace_bytes());
    println!(
        "  Weights: {:.2} KB",
        plan.weight_bytes() as f64 / 1024.0
    );
    println!();

    println!("  {:<4} {:<24} {:<16} {:>10}", "Idx", "Binding", "Shape", "Bytes");
    println!("  {}", "-".repeat(58));
    for (i, b) in plan.bindings().iter().enumerate() {
        println!(
            "  {:<4} {:<24} {:<16} {:>10}",
            i,
            b.name,
            b.shape.to_string(),
            b.size_bytes()
        );
    }
    println!();

    println!("  {:<4} {:<24} {:<16} {:<14} {:<14}", "Idx", "Layer", "Type", "Input", "Output");
    println!("  {}", "-".repeat(76));
    for (i, op) in plan.ops().iter().enumerate() {
        println!(
            "  {:<4} {:<24} {:<16} {:<14} {:<14}",
            i,
            op.name,
            op.kind.label(),
            op.input_shape.to_string(),
            op.output_shape.to_string()
        );
    }
    println!();
    Ok(())
}
