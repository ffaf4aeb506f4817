pub mod thread_pool;

use thiserror::Error;

/// A configuration value failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);
