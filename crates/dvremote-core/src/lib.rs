/*!
 * dvremote Core
 *
 * This crate provides the ambient pieces shared by the dvremote crates:
 * configuration, logging setup, error types and identifiers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

/// dvremote core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization driven by a loaded configuration
pub fn init_with_config(config: &config::Config) -> Result<(), error::Error> {
    logging::init_with_filter(&config.logging.level)?;
    tracing::info!("dvremote core {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
