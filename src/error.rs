//! Error type shared by the simulation library.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriveError {
    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for `SimConfig`.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// A config value is outside the range the solver can handle.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The chassis body was removed from the physics world behind our back.
    #[error("chassis body missing from physics world")]
    MissingChassis,

    /// WebSocket listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl DriveError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }
}
