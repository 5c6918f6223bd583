//! Configuration for the LMTagScript binary and adapters.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a TOML file: `LMTAGSCRIPT_CONFIG_PATH` (set by `--config`), else
//!    `lmtagscript.toml` in the working directory if it exists
//! 3. `LMTAGSCRIPT_*` environment variables, `__` between nested keys
//!    (`LMTAGSCRIPT_SERVER__PORT=8080`)
//! 4. `PORT`, which overrides `server.port`
//!
//! A `.env` file is loaded first, so its values count as environment.

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;

pub const CONFIG_PATH_VAR: &str = "LMTAGSCRIPT_CONFIG_PATH";
const ENV_PREFIX: &str = "LMTAGSCRIPT";
const DEFAULT_FILE: &str = "lmtagscript.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` wins over this
    pub filter: String,
}

impl Config {
    /// Load from the process environment
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_env(&vars)
    }

    /// Load using `vars` in place of the process environment
    pub fn from_env(vars: &HashMap<String, String>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("logging.filter", "info")?;

        builder = match vars.get(CONFIG_PATH_VAR) {
            Some(path) => builder.add_source(File::new(path, FileFormat::Toml).required(true)),
            None => builder.add_source(File::new(DEFAULT_FILE, FileFormat::Toml).required(false)),
        };

        let env_vars: config::Map<String, String> = vars
            .iter()
            .filter(|(key, _)| key.as_str() != CONFIG_PATH_VAR)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(env_vars)),
        );

        if let Some(port) = vars.get("PORT") {
            let port: u16 = port
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{}'", port))?;
            builder = builder.set_override("server.port", i64::from(port))?;
        }

        let config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
