// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model → [`EnginePlan`] compilation.
//!
//! ```text
//! ModelFormat ──parse──► ModelGraph ──validate──► chain of Ops ──► EnginePlan ──write──► file
//! ```

use crate::config::BuilderConfig;
use crate::kernel::{Op, OpKind, L2_EPSILON};
use crate::metrics::BuildTimings;
use crate::plan::{Binding, CompiledPlan};
use crate::{EngineError, EnginePlan};
use model_ir::graph::Validated;
use model_ir::{
    DeployDescriptor, ExchangeParser, LayerDef, LayerType, ModelError, ModelFormat, ModelGraph,
    TensorDesc, VendorParser, WeightFile, DEFAULT_VENDOR_OUTPUT,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Instant;
use tensor_core::{DType, Shape};
use tracing::{info, warn};

/// Required leading dimension of every input shape.
const INPUT_CHANNELS: usize = 3;

/// Builds engine plans from models on disk.
#[derive(Debug)]
pub struct GraphBuilder {
    config: BuilderConfig,
    fast_math: bool,
    graph: Option<ModelGraph>,
    last_plan: Option<EnginePlan>,
    timings: BuildTimings,
}

impl GraphBuilder {
    pub fn new(config: BuilderConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            fast_math: config.precision == DType::F16,
            config,
            graph: None,
            last_plan: None,
            timings: BuildTimings::default(),
        })
    }

    /// Replaces the build options. Half precision turns on fast math.
    pub fn configure(&mut self, config: BuilderConfig) -> Result<(), EngineError> {
        config.validate()?;
        self.fast_math = config.precision == DType::F16;
        self.config = config;
        info!(
            precision = %config.precision,
            max_batch_size = config.max_batch_size,
            max_workspace_bytes = config.max_workspace_bytes,
            fast_math = self.fast_math,
            "builder configured"
        );
        Ok(())
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn fast_math(&self) -> bool {
        self.fast_math
    }

    pub fn timings(&self) -> &BuildTimings {
        &self.timings
    }

    /// The graph populated by the last successful `parse`.
    pub fn graph(&self) -> Option<&ModelGraph> {
        self.graph.as_ref()
    }

    pub fn last_plan(&self) -> Option<&EnginePlan> {
        self.last_plan.as_ref()
    }

    /// Populates a fresh graph from `format`, replacing any earlier one.
    ///
    /// # Errors
    /// - [`EngineError::Configuration`] for empty I/O names or an input
    ///   shape that is not channel-first with 3 channels. For exchange
    ///   models this is checked before the model file is opened; for
    ///   vendor models before the weights file is opened.
    /// - [`EngineError::Model`] if a file cannot be read or parsed, or
    ///   the requested output tensor does not exist.
    pub fn parse(&mut self, format: &ModelFormat) -> Result<(), EngineError> {
        let started = Instant::now();
        let mut graph = ModelGraph::new("");

        match format {
            ModelFormat::Exchange {
                model_file,
                input_name,
                input_shape,
                output_name,
            } => {
                check_channels_first(input_shape.dims())?;
                if input_name.is_empty() || output_name.is_empty() {
                    return Err(EngineError::Configuration(
                        "exchange models need non-empty input and output names".into(),
                    ));
                }
                let mut parser = ExchangeParser::new();
                parser
                    .register_input(input_name.clone(), input_shape.clone())
                    .register_output(output_name.clone());
                parser.parse(model_file, &mut graph)?;
            }
            ModelFormat::Vendor {
                weights_file,
                deploy_file,
                output_name,
            } => {
                let deploy = DeployDescriptor::from_file(deploy_file)?;
                check_channels_first(&deploy.input_shape)?;
                let weights = WeightFile::open(weights_file)?;
                let blobs = VendorParser::new().populate(&deploy, &weights, &mut graph)?;

                let name = output_name.as_deref().unwrap_or(DEFAULT_VENDOR_OUTPUT);
                let output = blobs.find(name).ok_or_else(|| ModelError::TensorNotFound {
                    name: name.to_string(),
                })?;
                graph.mark_output(output)?;
            }
        }

        let elapsed = started.elapsed();
        self.timings = BuildTimings {
            parse: Some(elapsed),
            build: None,
        };
        info!(
            format = format.kind(),
            model = %graph.name,
            layers = graph.num_layers(),
            millis = elapsed.as_secs_f64() * 1000.0,
            "model parsed"
        );
        self.graph = Some(graph);
        Ok(())
    }

    /// Compiles the parsed graph into a plan.
    ///
    /// # Errors
    /// [`EngineError::Build`] or [`EngineError::Model`] if nothing was
    /// parsed, the graph is empty or malformed, or it needs more workspace
    /// than configured.
    pub fn build(&mut self) -> Result<EnginePlan, EngineError> {
        let started = Instant::now();
        let graph = self
            .graph
            .clone()
            .ok_or_else(|| EngineError::Build("no model has been parsed".into()))?;
        if graph.is_empty() {
            return Err(EngineError::Build(format!(
                "model '{}' has no layers",
                graph.name
            )));
        }
        let graph = graph.validate()?;
        let precision = self.config.precision;

        let workspace_bytes = graph
            .max_activation_bytes(precision)
            .and_then(|bytes| bytes.checked_mul(2)?.checked_mul(self.config.max_batch_size))
            .filter(|&w| w <= self.config.max_workspace_bytes)
            .ok_or_else(|| {
                EngineError::Build(format!(
                    "model '{}' needs more than the {} B workspace limit at batch size {}",
                    graph.name, self.config.max_workspace_bytes, self.config.max_batch_size
                ))
            })?;

        let ops = lower_chain(&graph, precision)?;
        let binding = |desc: TensorDesc| Binding {
            name: desc.name,
            shape: desc.shape,
            dtype: precision,
        };
        let compiled = CompiledPlan {
            name: graph.name.clone(),
            precision,
            max_batch_size: self.config.max_batch_size,
            workspace_bytes,
            bindings: [binding(graph.input().clone()), binding(graph.output())],
            ops,
        };
        compiled.check().map_err(EngineError::Build)?;

        let plan = EnginePlan::new(compiled);
        let elapsed = started.elapsed();
        self.timings.build = Some(elapsed);
        info!(millis = elapsed.as_secs_f64() * 1000.0, "{}", plan.summary());
        self.last_plan = Some(plan.clone());
        Ok(plan)
    }

    /// Persists the last built plan.
    pub fn write(&self, target: &Path) -> Result<(), EngineError> {
        self.last_plan
            .as_ref()
            .ok_or_else(|| EngineError::Build("no plan has been built".into()))?
            .write(target)
    }

    /// `parse`, `build` and `write` in one call.
    pub fn build_and_write(
        &mut self,
        format: &ModelFormat,
        target: &Path,
    ) -> Result<EnginePlan, EngineError> {
        self.parse(format)?;
        let plan = self.build()?;
        plan.write(target)?;
        Ok(plan)
    }
}

fn check_channels_first(dims: &[usize]) -> Result<(), EngineError> {
    if dims.first() == Some(&INPUT_CHANNELS) {
        Ok(())
    } else {
        Err(EngineError::Configuration(format!(
            "input shape {dims:?} is not channels-first with {INPUT_CHANNELS} channels"
        )))
    }
}

/// Walks producers back from the output to the input and lowers that chain.
fn lower_chain(graph: &ModelGraph<Validated>, precision: DType) -> Result<Vec<Op>, EngineError> {
    let producers: BTreeMap<&str, &LayerDef> = graph
        .layers()
        .iter()
        .map(|l| (l.output.as_str(), l))
        .collect();

    let input = graph.input().name.as_str();
    let output = graph.output().name;
    let mut chain = Vec::new();
    let mut tensor = output.as_str();
    while tensor != input {
        let layer = producers.get(tensor).ok_or_else(|| {
            EngineError::Build(format!("output '{output}' is not reachable from input '{input}'"))
        })?;
        chain.push(*layer);
        tensor = layer.input.as_str();
    }
    chain.reverse();

    if chain.len() < graph.num_layers() {
        let kept: BTreeSet<&str> = chain.iter().map(|l| l.name.as_str()).collect();
        for layer in graph.layers().iter().filter(|l| !kept.contains(l.name.as_str())) {
            warn!(layer = %layer.name, "layer does not feed the output and is pruned");
        }
    }

    chain
        .into_iter()
        .map(|layer| lower_layer(graph, layer, precision))
        .collect()
}

fn lower_layer(
    graph: &ModelGraph<Validated>,
    layer: &LayerDef,
    precision: DType,
) -> Result<Op, EngineError> {
    let shape = |name: &str| -> Result<Shape, EngineError> {
        graph
            .shape_of(name)
            .cloned()
            .ok_or_else(|| EngineError::Build(format!("tensor '{name}' has no inferred shape")))
    };
    let rounded = |idx: usize| -> Vec<f32> {
        layer.weights.get(idx).map_or_else(Vec::new, |t| {
            t.as_f32_slice().iter().map(|&v| precision.round(v)).collect()
        })
    };

    let kind = match layer.layer_type {
        LayerType::Dense => {
            let mut weights = layer.weights.first().cloned().ok_or_else(|| {
                EngineError::Build(format!("dense layer '{}' has no weights", layer.name))
            })?;
            weights.round_to(precision);
            OpKind::Dense {
                weights,
                bias: (layer.weights.len() > 1).then(|| rounded(1)),
            }
        }
        LayerType::Relu => OpKind::Relu,
        LayerType::Softmax => OpKind::Softmax,
        LayerType::L2Normalize => OpKind::L2Normalize { eps: L2_EPSILON },
        LayerType::GlobalAvgPool => OpKind::GlobalAvgPool,
        LayerType::Flatten => OpKind::Flatten,
        LayerType::Scale => OpKind::Scale {
            scale: rounded(0),
            shift: rounded(1),
        },
    };

    Ok(Op {
        name: layer.name.clone(),
        kind,
        input_shape: shape(&layer.input)?,
        output_shape: shape(&layer.output)?,
    })
}
