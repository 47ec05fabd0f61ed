//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use crate::port::{BaudRate, DataBits, StopBits};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_TERM";

/// Config file name in the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config file name looked up in the current directory
const LOCAL_CONFIG_FILE_NAME: &str = "serial-term.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_TERM_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_TERM_CONFIG` environment variable (explicit path, must exist)
    /// 2. `./serial-term.toml`
    /// 3. `config.toml` in the platform config directory
    /// 4. Built-in defaults
    ///
    /// Environment variables then override individual values.
    pub fn load() -> ConfigResult<Self> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load_from(explicit);
        }

        let config_path = resolve_config_path();
        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }

        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file, no overrides).
    pub fn with_defaults() -> Self {
        Self {
            config_path: None,
            config: Config::default(),
        }
    }

    /// The file the configuration came from, if any.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path using standard locations.
///
/// The explicit `SERIAL_TERM_CONFIG` path is handled by [`ConfigLoader::load`].
pub fn resolve_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }

    get_default_config_path().filter(|path| path.exists())
}

/// Platform config directory, e.g. `~/.config/serial-term` on Linux.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-term").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the config file in the platform config directory.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    debug!("Loaded configuration from {}", path.display());
    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Apply `SERIAL_TERM_<SECTION>_<KEY>` environment overrides.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    apply_overrides(config, |var| std::env::var(var).ok())
}

/// Apply overrides from an arbitrary variable source.
pub(crate) fn apply_overrides<F>(config: &mut Config, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| format!("{ENV_PREFIX}_{key}");
    let get = |key: &str| lookup(&var(key));

    // Serial overrides
    if let Some(val) = get("SERIAL_DEVICE") {
        config.serial.device = Some(val);
    }
    if let Some(val) = get("SERIAL_BAUD_RATE") {
        let raw: u32 = parse(&var("SERIAL_BAUD_RATE"), &val)?;
        config.serial.baud_rate = BaudRate::try_from(raw)
            .map_err(|e| ConfigError::env_parse(var("SERIAL_BAUD_RATE"), e.to_string()))?;
    }
    if let Some(val) = get("SERIAL_DATA_BITS") {
        let raw: u8 = parse(&var("SERIAL_DATA_BITS"), &val)?;
        config.serial.data_bits = DataBits::try_from(raw)
            .map_err(|e| ConfigError::env_parse(var("SERIAL_DATA_BITS"), e.to_string()))?;
    }
    if let Some(val) = get("SERIAL_PARITY") {
        config.serial.parity = parse(&var("SERIAL_PARITY"), &val)?;
    }
    if let Some(val) = get("SERIAL_STOP_BITS") {
        let raw: u8 = parse(&var("SERIAL_STOP_BITS"), &val)?;
        config.serial.stop_bits = StopBits::try_from(raw)
            .map_err(|e| ConfigError::env_parse(var("SERIAL_STOP_BITS"), e.to_string()))?;
    }
    if let Some(val) = get("SERIAL_FLOW_CONTROL") {
        config.serial.flow_control = parse(&var("SERIAL_FLOW_CONTROL"), &val)?;
    }
    if let Some(val) = get("SERIAL_TERMINATOR") {
        config.serial.terminator = parse(&var("SERIAL_TERMINATOR"), &val)?;
    }

    // Monitor overrides
    if let Some(val) = get("MONITOR_POLL_INTERVAL_MS") {
        config.monitor.poll_interval_ms = parse(&var("MONITOR_POLL_INTERVAL_MS"), &val)?;
    }
    if let Some(val) = get("MONITOR_READ_CHUNK") {
        config.monitor.read_chunk = parse(&var("MONITOR_READ_CHUNK"), &val)?;
    }

    // Logging overrides
    if let Some(val) = get("LOGGING_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = get("LOGGING_FORMAT") {
        config.logging.format = parse(&var("LOGGING_FORMAT"), &val)?;
    }

    Ok(())
}

fn parse<T>(var: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::env_parse(var, e.to_string()))
}
