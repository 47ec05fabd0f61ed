//! Configuration module for serial-term.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! 1. `SERIAL_TERM_CONFIG` environment variable (explicit path)
//! 2. `./serial-term.toml` (current directory)
//! 3. `config.toml` in the platform config directory
//!    (`~/.config/serial-term` on Linux)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Values can be overridden with `SERIAL_TERM_<SECTION>_<KEY>`, e.g.
//! `SERIAL_TERM_SERIAL_BAUD_RATE=9600` or `SERIAL_TERM_LOGGING_LEVEL=debug`.
//!
//! Settings are read once at startup and never written back.
//!
//! # Example
//!
//! ```no_run
//! use serial_term::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//! println!("Default baud: {}", config.serial.baud_rate.label());
//! # Ok::<(), serial_term::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{Config, LogFormat, LoggingConfig, MonitorConfig, SerialConfig};
