// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engine_common::AnalysisPriority;
use engine_session::{ProcessSpawner, SimulatedSpawner, WorkerSpawner};
use std::path::PathBuf;
use std::sync::Arc;

mod commands;
mod config;

use crate::config::CliConfig;

/// Run position analyses on a pool of UCI engines
#[derive(Parser, Debug)]
#[command(name = "enginepool", version, about = "Pooled UCI engine analysis")]
pub struct Cli {
    /// Path to configuration file (TOML, overrides $ENGINEPOOL_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Engine executable (overrides the configured program)
    #[arg(long, global = true, conflicts_with = "simulate")]
    pub engine: Option<PathBuf>,

    /// Extra argument for the engine executable; repeatable
    #[arg(long = "engine-arg", global = true, allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Use the built-in simulated engine instead of a real one
    #[arg(long, global = true)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze one position and print the evaluation as JSON
    Analyze {
        /// `startpos [moves ...]`, `fen ...` or a bare FEN
        #[arg(default_value = "startpos")]
        position: String,

        /// Target depth; 0 searches for --time-ms instead
        #[arg(long)]
        depth: Option<u32>,

        /// Time budget in milliseconds
        #[arg(long)]
        time_ms: Option<u64>,

        #[arg(long)]
        multi_pv: Option<u32>,

        #[arg(long, default_value = "normal")]
        priority: AnalysisPriority,

        /// Print progressive updates before the final evaluation
        #[arg(long)]
        progress: bool,
    },

    /// Fire concurrent analyses at the pool and report its metrics
    Bench {
        #[arg(long, default_value_t = 16)]
        requests: usize,

        #[arg(long, default_value_t = 12)]
        depth: u32,

        /// Print pool events to stderr while the bench runs
        #[arg(long)]
        events: bool,
    },

    /// Start a single session, report its identity and readiness latency
    Probe,

    /// Print the effective configuration as TOML
    Config,
}

fn spawner(cli: &Cli, config: &CliConfig) -> Result<Arc<dyn WorkerSpawner>> {
    if cli.simulate {
        return Ok(Arc::new(SimulatedSpawner::default()));
    }

    let program = cli
        .engine
        .clone()
        .or_else(|| config.engine.program.clone())
        .context("no engine configured: pass --engine <path>, set [engine] program, or use --simulate")?;
    let args = if cli.engine_args.is_empty() { config.engine.args.clone() } else { cli.engine_args.clone() };
    Ok(Arc::new(ProcessSpawner::new(program).with_args(args)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries JSON; logs go to stderr.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = CliConfig::resolve(cli.config.clone(), |key| std::env::var(key).ok())?;

    match &cli.command {
        Commands::Analyze {
            position,
            depth,
            time_ms,
            multi_pv,
            priority,
            progress,
        } => {
            let options = commands::analysis_options(&config, *depth, *time_ms, *multi_pv);
            commands::analyze(&config, spawner(&cli, &config)?, position, options, *priority, *progress).await?;
        }
        Commands::Bench { requests, depth, events } => {
            commands::bench(&config, spawner(&cli, &config)?, *requests, *depth, *events).await?;
        }
        Commands::Probe => {
            commands::probe(&config, spawner(&cli, &config)?).await?;
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
