/*
[INPUT]:  Failures from settings, worker lifecycle, and the update pipeline
[OUTPUT]: Domain error taxonomy surfaced through the dispatcher
[POS]:    Error layer - what the user can be told, and what is only logged
[UPDATE]: When adding a new class of user-visible failure
*/

use std::path::PathBuf;

use thiserror::Error;

use crate::command::WorkerId;

/// Task settings could not be loaded, saved or validated. Blocks `Start`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path} could not be read: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} could not be written: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is not a JSON object: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config key {key} must be {expected}")]
    InvalidField { key: &'static str, expected: &'static str },

    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("no config directory available on this platform")]
    NoConfigDir,
}

/// Worker lifecycle rejections. Logged and dropped, never fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("{0} is still running")]
    AlreadyActive(WorkerId),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}
