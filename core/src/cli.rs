use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, CONFIG_PATH_VAR};
use crate::engine::Engine;
use crate::types::RunOptions;

#[derive(Parser)]
#[command(name = "lmtagscript")]
#[command(about = "LMTagScript - validate, compile and run TASK/ACTION/GOAL prompt scripts", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a script for missing, duplicate or empty sections
    Validate {
        /// Script to validate
        file: PathBuf,
    },

    /// Compile a script to its JSON form (best effort, diagnostics included)
    Compile {
        /// Script to compile
        file: PathBuf,
    },

    /// Validate, compile and execute a script
    Run {
        /// Script to run
        file: PathBuf,

        /// JSON object file handed to resolvers as context
        #[arg(long)]
        ctx: Option<PathBuf>,
    },

    /// Serve the HTTP API
    Serve {
        /// Host to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config)
        #[arg(short = 'p', long)]
        port: Option<u16>,
    },

    /// Serve line-delimited JSON RPC on stdin/stdout
    Rpc,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

/// Install the stderr subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    if let Some(config_path) = &cli.config {
        std::env::set_var(CONFIG_PATH_VAR, config_path);
    }

    // Load configuration before any command so config errors surface first
    let mut config = Config::load()?;
    init_tracing(&config);

    let engine = Engine::default();

    match cli.command {
        Commands::Validate { file } => {
            let source = read_source(&file)?;
            print_json(&engine.validate(&source))?;
        }

        Commands::Compile { file } => {
            let source = read_source(&file)?;
            print_json(&engine.compile(&source))?;
        }

        Commands::Run { file, ctx } => {
            let source = read_source(&file)?;
            let options = RunOptions {
                ctx: ctx.as_deref().map(read_context).transpose()?,
            };
            let result = engine.run(&source, options).await?;
            print_json(&result)?;
        }

        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            crate::server::serve(&config, engine).await?;
        }

        Commands::Rpc => {
            crate::rpc::serve_stdio(&engine).await?;
        }
    }

    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_context(path: &Path) -> Result<serde_json::Map<String, serde_json::Value>> {
    let text = read_source(path)?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} must contain a JSON object", path.display()))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
