//! Harness-level error taxonomy
//!
//! Only errors that abort a session or a scenario's setup live here. Upload
//! rejections are data (see [`crate::types::UploadOutcome`]) and are judged by
//! the verifier, never propagated as `HarnessError`.

use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Errors that stop the harness before a scenario can be judged
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to start storage server container {image}: {reason}")]
    ContainerStart { image: String, reason: String },

    #[error("failed to stop storage server container {id}: {reason}")]
    ContainerStop { id: String, reason: String },

    #[error("storage server not ready after {waited:?} ({attempts} probes, last: {last_observation})")]
    ReadinessTimeout {
        waited: Duration,
        attempts: u32,
        last_observation: String,
    },

    #[error("scenario ran against a server that is not ready (state: {0})")]
    NotReady(String),

    #[error("bucket creation failed for {bucket}: {reason}")]
    BucketCreation { bucket: String, reason: String },

    #[error("operation cancelled during {0}")]
    Cancelled(&'static str),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
