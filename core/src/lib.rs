//! dockersource core - configuration and error types shared by the
//! interception engine and the CLI.

pub mod config;
pub mod error;

pub use config::WrapperConfig;
pub use error::{Result, WrapperError};

/// dockersource version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix for every diagnostic written to stderr.
pub const DIAGNOSTIC_PREFIX: &str = "[dockersource]:";
