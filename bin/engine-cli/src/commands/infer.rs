// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `accel-rt infer`: push synthetic images through an engine.
//!
//! Inference blocks on stream synchronization, so it runs on a blocking
//! task. `--timeout-ms` bounds how long the command waits for it.

use accel_device::Device;
use engine::{EngineConfig, EngineFacade, IoSpec};
use ndarray::Array4;
use std::path::PathBuf;
use std::time::Duration;

pub async fn execute(
    config: &EngineConfig,
    engine: PathBuf,
    spec: IoSpec,
    images: usize,
    value: u8,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let registry = super::load_registry(config)?;
    let device = Device::new(config.device_config());
    tracing::debug!(engine = %engine.display(), images, ?timeout_ms, "starting inference task");

    let task = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
        let mut facade = EngineFacade::open(device.clone(), &registry, &engine, &spec)?;
        let &[c, h, w] = facade.io().input_shape.dims() else {
            anyhow::bail!("input shape {} is not [C, H, W]", facade.io().input_shape);
        };
        let batch = Array4::<u8>::from_elem((images, h, w, c), value);
        let output = facade.inference(batch.view())?;

        let mut report = String::new();
        for (i, row) in output.rows().into_iter().enumerate() {
            let shown: Vec<String> = row.iter().take(8).map(|v| format!("{v:.4}")).collect();
            let more = if row.len() > 8 { ", ..." } else { "" };
            report.push_str(&format!("  image {i}: [{}{more}]\n", shown.join(", ")));
        }
        if let Some(metrics) = facade.last_metrics() {
            report.push_str(&format!("{}\n", metrics.summary()));
        }
        report.push_str(&device.stats().summary());
        Ok(report)
    });

    let joined = match timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), task)
            .await
            .map_err(|_| anyhow::anyhow!("inference did not finish within {ms} ms"))?,
        None => task.await,
    };
    let report = joined.map_err(|e| anyhow::anyhow!("inference task failed: {e}"))??;
    println!("{report}");
    Ok(())
}
