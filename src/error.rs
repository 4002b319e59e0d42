//! Error types

use std::process::ExitStatus;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamerError {
    #[error("invalid resolution '{0}': expected WIDTHxHEIGHT (e.g. 1920x1080)")]
    InvalidResolution(String),

    #[error("invalid port '{0}': expected a number between 1 and 65535")]
    InvalidPort(String),

    #[error("invalid framerate '{0}': expected a positive number")]
    InvalidFramerate(String),

    #[error("nothing to capture: audio and video are both disabled")]
    NothingToCapture,

    #[error("malformed settings file {path}: {reason}")]
    MalformedSettings { path: String, reason: String },

    #[error("the following needed commands are missing: {}", .0.join(", "))]
    MissingCommands(Vec<String>),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited unexpectedly ({status})")]
    ProcessFailed { program: String, status: ExitStatus },

    #[error("{program} ended unexpectedly")]
    ProcessEnded { program: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StreamerError>;
