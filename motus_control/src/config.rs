//! Machine configuration loading for the host binary.
//!
//! The configuration is read once, validated as a whole and then handed
//! to the core by value. Nothing in it changes after startup.

use std::path::{Path, PathBuf};

use tracing::info;

use motus_common::config::{ConfigError, ConfigLoader};
use motus_common::consts::DEFAULT_CONFIG_PATH;
use motus_common::hal::driver::BoardInfo;
use motus_common::motion::config::MachineConfig;
use motus_common::motion::error::ConfigurationError;

/// Validated configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub machine: MachineConfig,
    /// `None` when parsed from a string.
    pub source: Option<PathBuf>,
}

impl LoadedConfig {
    /// `EnvFilter` directive for the configured log level.
    pub fn log_directive(&self) -> &'static str {
        self.machine.shared.log_level.as_directive()
    }
}

/// Path used when none is given on the command line.
pub fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Load and validate a machine TOML file.
pub fn load_config(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let machine = MachineConfig::load_validated(path)?;
    info!(
        path = %path.display(),
        service = %machine.shared.service_name,
        axes = machine.axis_count(),
        tick_us = machine.scheduler.tick_us,
        "configuration loaded"
    );
    Ok(LoadedConfig {
        machine,
        source: Some(path.to_path_buf()),
    })
}

/// Parse and validate a machine configuration from a TOML string.
pub fn load_config_from_str(content: &str) -> Result<LoadedConfig, ConfigError> {
    let machine = MachineConfig::from_toml(content)?;
    machine.shared.validate()?;
    machine
        .validate()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
    Ok(LoadedConfig { machine, source: None })
}

/// The board must carry exactly one driver per configured axis.
pub fn check_board(machine: &MachineConfig, board: &BoardInfo) -> Result<(), ConfigurationError> {
    if board.chain_length != machine.axis_count() {
        return Err(ConfigurationError::OutOfRange {
            field: "axes",
            value: machine.axis_count() as f64,
            min: board.chain_length as f64,
            max: board.chain_length as f64,
        });
    }
    Ok(())
}
