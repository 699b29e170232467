// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommand implementations and the helpers they share.

pub mod build;
pub mod infer;
pub mod inspect;
pub mod registry;

use anyhow::Context;
use engine::{EngineConfig, ModelRegistry};
use std::path::Path;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Reads `--config`, or returns the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config '{}'", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// The configured registry file, or the default location.
pub fn load_registry(config: &EngineConfig) -> anyhow::Result<ModelRegistry> {
    let registry = match &config.registry_path {
        Some(path) => ModelRegistry::from_file(path)
            .with_context(|| format!("loading registry '{}'", path.display()))?,
        None => ModelRegistry::load_default()?,
    };
    Ok(registry)
}

/// Comma-separated shape argument, e.g. `3,224,224`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeArg(pub Vec<usize>);

impl FromStr for ShapeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(|d| {
                d.trim()
                    .parse::<usize>()
                    .map_err(|e| format!("invalid dimension '{d}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ShapeArg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_arg() {
        assert_eq!("3,224,224".parse::<ShapeArg>().unwrap().0, vec![3, 224, 224]);
        assert_eq!(" 3, 8 ,8".parse::<ShapeArg>().unwrap().0, vec![3, 8, 8]);
        assert!("3,x".parse::<ShapeArg>().is_err());
        assert!("".parse::<ShapeArg>().is_err());
    }
}
