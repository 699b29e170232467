// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Builder options and file-based engine configuration.
//!
//! # TOML Format
//! ```toml
//! precision = "f16"
//! max_batch_size = 1
//! max_workspace = "1M"
//! device_memory = "256M"
//! pinned_memory = "64M"
//! registry_path = "./config/models.json"
//! ```

use crate::EngineError;
use accel_device::{DeviceConfig, MemoryBudget};
use std::path::{Path, PathBuf};
use tensor_core::DType;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 1;
pub const DEFAULT_MAX_WORKSPACE_BYTES: usize = 1 << 20;

/// Options the graph builder compiles with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BuilderConfig {
    /// Element type of weights, activations and bindings.
    pub precision: DType,
    /// Largest batch an execution context accepts.
    pub max_batch_size: usize,
    /// Upper bound on scratch memory the compiled plan may need.
    pub max_workspace_bytes: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            precision: DType::F32,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_workspace_bytes: DEFAULT_MAX_WORKSPACE_BYTES,
        }
    }
}

impl BuilderConfig {
    pub fn with_precision(mut self, precision: DType) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_max_workspace_bytes(mut self, bytes: usize) -> Self {
        self.max_workspace_bytes = bytes;
        self
    }

    /// Rejects zero batch sizes and workspaces.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_batch_size == 0 {
            return Err(EngineError::Configuration(
                "max_batch_size must be a positive integer".into(),
            ));
        }
        if self.max_workspace_bytes == 0 {
            return Err(EngineError::Configuration(
                "max_workspace_bytes must be a positive integer".into(),
            ));
        }
        Ok(())
    }
}

/// Engine configuration loaded from TOML.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub precision: DType,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Human-readable workspace limit, e.g. `"1M"`.
    #[serde(default = "default_workspace")]
    pub max_workspace: MemoryBudget,
    #[serde(default = "default_device_memory")]
    pub device_memory: MemoryBudget,
    #[serde(default = "default_pinned_memory")]
    pub pinned_memory: MemoryBudget,
    /// Model registry file; the default location is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_path: Option<PathBuf>,
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}
fn default_workspace() -> MemoryBudget {
    MemoryBudget::from_bytes(DEFAULT_MAX_WORKSPACE_BYTES)
}
fn default_device_memory() -> MemoryBudget {
    DeviceConfig::default().memory
}
fn default_pinned_memory() -> MemoryBudget {
    DeviceConfig::default().pinned_memory
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            precision: DType::F32,
            max_batch_size: default_max_batch_size(),
            max_workspace: default_workspace(),
            device_memory: default_device_memory(),
            pinned_memory: default_pinned_memory(),
            registry_path: None,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| EngineError::Configuration(format!("TOML parse error: {e}")))?;
        config.builder_config().validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self)
            .map_err(|e| EngineError::Configuration(format!("TOML serialise error: {e}")))
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            precision: self.precision,
            max_batch_size: self.max_batch_size,
            max_workspace_bytes: self.max_workspace.as_bytes(),
        }
    }

    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            memory: self.device_memory,
            pinned_memory: self.pinned_memory,
            ..DeviceConfig::default()
        }
    }
}
