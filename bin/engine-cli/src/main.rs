// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # accel-rt
//!
//! Command-line interface for building and serving accelerator engine plans.
//!
//! ## Usage
//! ```bash
//! # Compile an exchange-format model
//! accel-rt build --output embedder.plan --precision f16 exchange \
//!     --model embedder.json --input-name data --input-shape 3,160,160 --output-name emb
//!
//! # Compile a vendor-format model (output defaults to "prob1")
//! accel-rt build --output cls.plan vendor --deploy deploy.json --weights cls.safetensors
//!
//! # Show bindings and layers of an engine
//! accel-rt inspect --engine cls.plan
//!
//! # Run synthetic images through an engine with a watchdog
//! accel-rt infer --engine cls.plan --images 8 --timeout-ms 2000
//!
//! # List the model registry or resolve one engine path against it
//! accel-rt registry --lookup engines/resnet50_fp16.plan
//! ```

mod commands;

use clap::{Args, Parser, Subcommand};
use commands::ShapeArg;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "accel-rt",
    about = "Build, inspect and run accelerator inference engines",
    version,
    author
)]
struct Cli {
    /// Path to a TOML engine configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by both build formats. Unset values come from the config.
#[derive(Args, Debug)]
pub struct BuildOptions {
    /// Where to write the engine file.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Element precision: f32 or f16.
    #[arg(short, long)]
    pub precision: Option<String>,

    /// Largest batch the execution context accepts.
    #[arg(long)]
    pub max_batch_size: Option<usize>,

    /// Workspace limit (e.g., "1M", "512K").
    #[arg(long)]
    pub max_workspace: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum BuildFormat {
    /// Single JSON graph; input and output are named on the command line.
    Exchange {
        /// Path to the exchange-format model.
        #[arg(short, long)]
        model: PathBuf,

        #[arg(long)]
        input_name: String,

        /// Channel-first input shape, e.g. "3,224,224".
        #[arg(long)]
        input_shape: ShapeArg,

        #[arg(long)]
        output_name: String,
    },

    /// Deploy descriptor plus SafeTensors weights.
    Vendor {
        /// Path to the SafeTensors weights.
        #[arg(short, long)]
        weights: PathBuf,

        /// Path to the deploy descriptor.
        #[arg(short, long)]
        deploy: PathBuf,

        /// Output tensor to mark (default "prob1").
        #[arg(long)]
        output_name: Option<String>,
    },
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a model, compile it and write the engine file.
    Build {
        #[command(flatten)]
        options: BuildOptions,

        #[command(subcommand)]
        format: BuildFormat,
    },

    /// Print an engine's bindings, precision and layers.
    Inspect {
        /// Path to the engine file.
        #[arg(short, long)]
        engine: PathBuf,
    },

    /// Run synthetic constant images through an engine.
    Infer {
        /// Path to the engine file.
        #[arg(short, long)]
        engine: PathBuf,

        /// Input tensor name (overrides the registry).
        #[arg(long)]
        input_name: Option<String>,

        /// Output tensor name (overrides the registry).
        #[arg(long)]
        output_name: Option<String>,

        /// Channel-first input shape (overrides the registry).
        #[arg(long)]
        input_shape: Option<ShapeArg>,

        /// Number of images in the batch.
        #[arg(short = 'n', long, default_value_t = 4)]
        images: usize,

        /// Pixel value every image is filled with.
        #[arg(long, default_value_t = 127)]
        value: u8,

        /// Abort if inference has not finished after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List registry entries, or show how an engine path resolves.
    Registry {
        /// Engine path to resolve against the registry.
        #[arg(long)]
        lookup: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Build { options, format } => {
            commands::build::execute(&config, options, format).await
        }
        Commands::Inspect { engine } => commands::inspect::execute(engine).await,
        Commands::Infer {
            engine,
            input_name,
            output_name,
            input_shape,
            images,
            value,
            timeout_ms,
        } => {
            let spec = ::engine::IoSpec {
                input_name,
                output_name,
                input_shape: input_shape.map(|s| s.0),
            };
            commands::infer::execute(&config, engine, spec, images, value, timeout_ms).await
        }
        Commands::Registry { lookup } => commands::registry::execute(&config, lookup).await,
    }
}
