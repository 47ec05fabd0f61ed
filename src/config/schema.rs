//! Configuration schema definitions.
//!
//! Every section uses `#[serde(default)]`, so a file only needs the keys it
//! wants to change.

use super::error::{ConfigError, ConfigResult};
use crate::port::{
    BaudRate, DataBits, FlowControl, Parity, PortConfiguration, StopBits, Terminator,
    TerminatorMode,
};
use crate::session::SessionSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Line settings and device
    pub serial: SerialConfig,
    /// Read and line-monitor tuning
    pub monitor: MonitorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        self.serial.validate()?;
        self.monitor.validate()
    }
}

/// `[serial]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0`; may be supplied on the command line instead
    pub device: Option<String>,
    pub baud_rate: BaudRate,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    pub terminator: TerminatorMode,
    /// Bytes used when `terminator = "custom"`
    pub terminator_bytes: Option<Vec<u8>>,
}

impl SerialConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.resolve_terminator().map(|_| ())
    }

    /// Terminator bytes for the configured mode.
    pub fn resolve_terminator(&self) -> ConfigResult<Terminator> {
        match (self.terminator, &self.terminator_bytes) {
            (TerminatorMode::Custom, Some(bytes)) if !bytes.is_empty() => {
                Ok(Terminator::custom(bytes.clone()))
            }
            (TerminatorMode::Custom, _) => Err(ConfigError::validation(
                "serial.terminator_bytes",
                "a custom terminator needs at least one byte",
            )),
            (mode, _) => Terminator::for_mode(mode).ok_or_else(|| {
                ConfigError::validation("serial.terminator", format!("no bytes for {mode:?}"))
            }),
        }
    }

    /// Build the immutable port configuration.
    ///
    /// # Errors
    ///
    /// `MissingRequired` when no device is set, `ValidationError` for a bad
    /// terminator or an empty device path.
    pub fn to_port_configuration(&self) -> ConfigResult<PortConfiguration> {
        let device = self
            .device
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired("serial.device".to_string()))?;

        PortConfiguration::builder(device)
            .baud_rate(self.baud_rate)
            .data_bits(self.data_bits)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .flow_control(self.flow_control)
            .terminator(self.resolve_terminator()?)
            .build()
            .map_err(|e| ConfigError::from_port("serial.device", e))
    }
}

/// `[monitor]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Control line sampling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum bytes delivered per readable event
    pub read_chunk: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let settings = SessionSettings::default();
        Self {
            poll_interval_ms: settings.poll_interval.as_millis() as u64,
            read_chunk: settings.read_chunk,
        }
    }
}

impl MonitorConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::validation(
                "monitor.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.read_chunk == 0 {
            return Err(ConfigError::validation(
                "monitor.read_chunk",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            read_chunk: self.read_chunk,
            poll_interval: self.poll_interval(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    Pretty,
    /// Compact format
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        })
    }
}
