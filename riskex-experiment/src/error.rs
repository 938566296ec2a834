use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset {0} not found")]
    NotFound(String),

    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not decode {path}: {reason}")]
    Decode { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("could not read parameter file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parameter file is not valid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parameter payload must be a JSON object")]
    NotAnObject,
}

/// Reasons a session cannot begin.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no subject selected")]
    NoSubject,

    #[error("failed to load subject parameters: {0}")]
    Parameters(#[from] ParameterError),

    #[error("failed to load assets: {0}")]
    Assets(#[from] AssetError),
}
