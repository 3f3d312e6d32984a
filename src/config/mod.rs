//! Deployment configuration
//!
//! Loads a YAML or TOML document describing servers, authentication,
//! upload sets, and command groups, and validates it into typed
//! descriptors. A document is either accepted whole or rejected.

mod loader;
mod model;
mod validate;

use std::path::PathBuf;

pub use loader::ConfigFormat;
pub use model::{
    AuthMethod, Config, ConfigSource, LocalCommandSpec, ServerDescriptor, UploadMode, UploadTask,
};
pub use validate::DEFAULT_PORT;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },

    #[error("cannot parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unknown server '{0}'")]
    UnknownServer(String),
}

/// Expand a leading `~` against the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
