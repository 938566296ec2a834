use std::path::PathBuf;

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize session record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("primary sink failed ({primary}); fallback failed ({fallback})")]
    AllSinksFailed {
        primary: Box<StoreError>,
        fallback: Box<StoreError>,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
