//! Command implementations.

pub mod products;
pub mod shell;

use thiserror::Error;
use vitrine_storefront::StorefrontError;
use vitrine_storefront::config::ConfigError;

/// Errors that end a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The storefront client failed.
    #[error(transparent)]
    Storefront(#[from] StorefrontError),

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
