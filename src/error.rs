use thiserror::Error;

use crate::core::task::{Domain, TaskId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Queue for domain '{domain}' is full (max depth: {max_depth})")]
    QueueFull { domain: Domain, max_depth: usize },

    #[error("Target domain '{domain}' is saturated")]
    TargetSaturated { domain: Domain },

    #[error("Context hash mismatch for task {task_id}")]
    ContextMismatch { task_id: TaskId },

    #[error("Processing failed for task {task_id}: {message}")]
    ProcessingFailed { task_id: TaskId, message: String },

    #[error("Health probe for domain '{domain}' timed out after {timeout:?}")]
    ProbeTimeout {
        domain: Domain,
        timeout: std::time::Duration,
    },

    #[error("Invalid bridge transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unknown bridge handle: {0}")]
    UnknownBridge(String),
}

pub type Result<T> = std::result::Result<T, Error>;
