//! Port abstraction layer for serial communication.
//!
//! Provides the configuration value, the line-attribute translation, the real
//! character-device connection and a mock, all behind `SerialPortAdapter` so
//! the session can be tested without hardware.

pub mod error;
pub mod mock;
pub mod traits;

#[cfg(unix)]
pub mod attributes;
#[cfg(unix)]
pub mod tty;

pub use error::PortError;
pub use mock::{MockOpener, MockSerialPort};
pub use traits::*;

#[cfg(unix)]
pub use attributes::{translate, LineAttributes};
#[cfg(unix)]
pub use tty::{TtyOpener, TtyPort};
