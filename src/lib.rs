//! serial-term library
//!
//! The core of an interactive RS-232 terminal: line settings, the
//! translation of those settings into terminal attributes, a non-blocking
//! connection to a character device, handshake line monitoring, and the
//! session that ties a connection to a cooperative event loop.
//!
//! # Modules
//!
//! - `port`: configuration value, attribute translation, device connection and mock
//! - `monitor`: DTR/DSR/RTS/CTS change detection
//! - `session`: connect/disconnect state machine and the host/listener seams
//! - `event_loop`: `poll(2)` based host used by the binary
//! - `config`: TOML configuration with environment overrides
//! - `console`: stdin command parsing and the stdout/stderr listener
//! - `logging`: tracing subscriber setup
//! - `error`: front-end error type

pub mod config;
pub mod console;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod port;
pub mod session;

#[cfg(unix)]
pub mod event_loop;

// Re-export commonly used types for convenience
pub use error::{AppError, AppResult};
pub use monitor::{ControlLineMonitor, LineChange};
pub use port::{
    BaudRate, ControlLine, ControlLines, DataBits, FlowControl, MockOpener, MockSerialPort,
    Parity, PortConfiguration, PortError, PortOpener, ReadinessSource, SerialPortAdapter,
    StopBits, Terminator, TerminatorMode,
};
pub use session::{
    DisconnectReason, EventHost, HostEvent, Sent, Session, SessionListener, SessionSettings,
    SessionState, SourceId,
};

#[cfg(unix)]
pub use event_loop::PollLoop;
#[cfg(unix)]
pub use port::{TtyOpener, TtyPort};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
