//! Startup configuration loading and validation
//!
//! Configuration is a TOML file. Queue counts, block size and burst sizes
//! have no compiled defaults: they must be supplied, and a missing or
//! invalid value is fatal before the pipeline starts.
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. `<user config dir>/ptdaf/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "PTDAF_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DafConfig {
    pub queues: QueueConfig,

    pub flow_control: FlowControlConfig,

    #[serde(default)]
    pub population: PopulationConfig,

    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Work queue cardinality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queues serving the phases that run before zone data exists
    pub work_queues: usize,

    /// Leading work queues that receive the zone data broadcast. Every
    /// later phase is served by these queues only.
    pub broadcast_queues: usize,
}

/// Block sizing for the household processing phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowControlConfig {
    /// Maximum records per block
    pub max_block_size: usize,

    /// Blocks sent to each queue when the phase starts
    pub initial_burst: usize,

    /// Blocks sent to a queue per refill request
    pub secondary_burst: usize,
}

/// Where the synthetic population comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// JSON file with `households` and `persons`; synthesized when absent
    #[serde(default)]
    pub households_file: Option<PathBuf>,

    /// Households to synthesize when no file is given
    #[serde(default = "default_synthetic_households")]
    pub synthetic_households: usize,

    /// Number of zones in the zone system
    #[serde(default = "default_zones")]
    pub zones: usize,

    /// Random seed for synthesis and the model context
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            households_file: None,
            synthetic_households: default_synthetic_households(),
            zones: default_zones(),
            seed: default_seed(),
        }
    }
}

/// Output artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Completion marker written after the results writer acknowledges
    pub done_file: PathBuf,

    /// Processed households as JSON lines (optional)
    #[serde(default)]
    pub results_file: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_synthetic_households() -> usize {
    1000
}

fn default_zones() -> usize {
    4141
}

fn default_seed() -> u64 {
    2002
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DafConfig {
    /// Load and validate a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DafConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let queues = &self.queues;
        if queues.work_queues == 0 {
            return Err(Error::Config("queues.work_queues must be at least 1".to_string()));
        }
        if queues.broadcast_queues == 0 {
            return Err(Error::Config("queues.broadcast_queues must be at least 1".to_string()));
        }
        if queues.broadcast_queues > queues.work_queues {
            return Err(Error::Config(format!(
                "queues.broadcast_queues ({}) exceeds queues.work_queues ({})",
                queues.broadcast_queues, queues.work_queues
            )));
        }

        let flow = &self.flow_control;
        for (name, value) in [
            ("flow_control.max_block_size", flow.max_block_size),
            ("flow_control.initial_burst", flow.initial_burst),
            ("flow_control.secondary_burst", flow.secondary_burst),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{} must be at least 1", name)));
            }
        }

        if self.population.zones == 0 {
            return Err(Error::Config("population.zones must be at least 1".to_string()));
        }

        if self.output.done_file.as_os_str().is_empty() {
            return Err(Error::Config("output.done_file must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Resolve the config file path: CLI argument, then environment, then the
/// per-user config directory.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let default = dirs::config_dir()
        .map(|d| d.join("ptdaf").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if default.exists() {
        Ok(default)
    } else {
        Err(Error::Config(format!(
            "No config file given and {} does not exist",
            default.display()
        )))
    }
}
