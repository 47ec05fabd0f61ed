use crate::config::ConfigError;
use crate::port::PortError;
use std::fmt;

/// A specialized `Result` type for the terminal front end.
pub type AppResult<T> = Result<T, AppError>;

/// Unified application error type.
///
/// Library code returns `PortError` or `ConfigError`; the binary folds both
/// into this type so `main` can report one thing.
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Port(PortError),
    Io(std::io::Error),
    /// A command line or interactive command that could not be understood.
    Usage(String),
}

impl AppError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Port(e) => write!(f, "Serial port error: {e}"),
            Self::Io(e) => write!(f, "An I/O error occurred: {e}"),
            Self::Usage(details) => write!(f, "{details}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Port(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Usage(_) => None,
        }
    }
}

// `From` conversions so `?` works across layers.
impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<PortError> for AppError {
    fn from(err: PortError) -> Self {
        AppError::Port(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}
