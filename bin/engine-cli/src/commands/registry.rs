// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `accel-rt registry`: list known models or resolve an engine path.

use engine::EngineConfig;

pub async fn execute(config: &EngineConfig, lookup: Option<String>) -> anyhow::Result<()> {
    let registry = super::load_registry(config)?;

    match lookup {
        Some(path) => match registry.lookup(&path) {
            Some((id, entry)) => println!(
                "{path} -> {id}: input '{}', output '{}', shape {:?}",
                entry.input, entry.output, entry.input_shape
            ),
            None => println!("{path}: no registry entry matches"),
        },
        None => {
            if registry.is_empty() {
                println!("registry is empty");
            }
            for (id, entry) in registry.iter() {
                println!(
                    "  {:<24} {:<16} {:<16} {:?}",
                    id, entry.input, entry.output, entry.input_shape
                );
            }
        }
    }
    Ok(())
}
