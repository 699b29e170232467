// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Static model registry: known models and their I/O metadata.
//!
//! # JSON Format
//! ```json
//! {
//!   "resnet50": { "input": "data", "output": "prob1", "input_shape": [3, 224, 224] }
//! }
//! ```
//!
//! An entry matches an engine file when its identifier occurs anywhere in
//! the file path.

use crate::EngineError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable naming the installation root.
pub const HOME_ENV: &str = "ACCEL_RT_HOME";
const REGISTRY_RELATIVE_PATH: &str = "config/models.json";

/// I/O metadata for one known model.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModelEntry {
    pub input: String,
    pub output: String,
    /// Channel-first, channel count 3.
    pub input_shape: Vec<usize>,
}

/// Immutable identifier → [`ModelEntry`] table.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ModelRegistry {
    entries: BTreeMap<String, ModelEntry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, id: impl Into<String>, entry: ModelEntry) -> &mut Self {
        self.entries.insert(id.into(), entry);
        self
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("cannot read registry '{}': {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let registry: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Configuration(format!("registry parse error: {e}")))?;
        for (id, entry) in &registry.entries {
            if id.is_empty() {
                return Err(EngineError::Configuration(
                    "registry contains an empty model identifier".into(),
                ));
            }
            if entry.input_shape.first() != Some(&3) {
                return Err(EngineError::Configuration(format!(
                    "registry entry '{id}': input_shape {:?} is not channel-first with 3 channels",
                    entry.input_shape
                )));
            }
        }
        Ok(registry)
    }

    /// `$ACCEL_RT_HOME/config/models.json`, or `./config/models.json` when
    /// the variable is unset.
    pub fn default_path() -> PathBuf {
        let root = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        root.join(REGISTRY_RELATIVE_PATH)
    }

    /// Loads the registry from [`default_path`](Self::default_path). A
    /// missing file yields an empty registry.
    pub fn load_default() -> Result<Self, EngineError> {
        let path = Self::default_path();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "no model registry found, using an empty one");
            return Ok(Self::new());
        }
        let registry = Self::from_file(&path)?;
        tracing::debug!(path = %path.display(), models = registry.len(), "model registry loaded");
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&ModelEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelEntry)> {
        self.entries.iter().map(|(id, e)| (id.as_str(), e))
    }

    /// Finds the entry whose identifier occurs in `filepath`.
    ///
    /// When several match, the longest identifier wins; among equally long
    /// ones the lexicographically smallest.
    pub fn lookup(&self, filepath: &str) -> Option<(&str, &ModelEntry)> {
        // Ascending iteration: a strictly longer match is needed to replace.
        let mut best: Option<(&str, &ModelEntry)> = None;
        for (id, entry) in self.iter() {
            if filepath.contains(id) && best.map_or(true, |(b, _)| id.len() > b.len()) {
                best = Some((id, entry));
            }
        }
        best
    }
}
