/*!
 * Error types for the dvremote core crate.
 */
use thiserror::Error;

/// Error type for core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Logging setup error
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new configuration error
    pub fn config<S: AsRef<str>>(msg: S) -> Self {
        Error::Config(msg.as_ref().to_string())
    }

    /// Create a new logging error
    pub fn logging<S: AsRef<str>>(msg: S) -> Self {
        Error::Logging(msg.as_ref().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("missing section");
        assert_eq!(err.to_string(), "Configuration error: missing section");

        let err = Error::logging("already set");
        assert_eq!(err.to_string(), "Logging error: already set");
    }
}
