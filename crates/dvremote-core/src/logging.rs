/*!
 * Logging functionality for dvremote.
 *
 * This module provides tracing setup and span helpers so every crate in the
 * workspace logs the same way.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Initialize the logging system with a specific filter
///
/// `RUST_LOG` takes precedence over `filter` when it is set.
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "dvremote_devices=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .map_err(|e| Error::logging(format!("Invalid log filter {:?}: {}", filter, e)))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for one DVR session
///
/// # Arguments
///
/// * `name` - The friendly name of the device
/// * `id` - The device's unique identifier
pub fn session_span(name: &str, id: &str) -> Span {
    tracing::info_span!("session", name = %name, id = %id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        // A second global subscriber is rejected, so only the first call in
        // the process can succeed.
        let _ = init_with_filter("info");
        assert!(init_with_filter("debug").is_err());
    }

    #[test]
    fn test_session_span() {
        let span = session_span("Living Room", "8480001234567890");
        let _guard = span.enter();
        tracing::debug!("inside session span");
    }
}
