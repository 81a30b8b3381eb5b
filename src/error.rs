use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Failure of a single browser capture session.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation to target page failed: {0}")]
    Navigation(String),
    #[error("no matching API response within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("matching response body is not valid JSON: {0}")]
    MalformedPayload(#[source] serde_json::Error),
    #[error("browser error: {0}")]
    Browser(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("snapshot {0} already exists")]
    Collision(String),
    #[error("no snapshot has been published yet")]
    NotReady,
    #[error("pointer is corrupt: {0}")]
    CorruptPointer(String),
    #[error("snapshot {0} referenced by pointer is missing")]
    MissingSnapshot(String),
    #[error("snapshot {name} is corrupt: {reason}")]
    CorruptSnapshot { name: String, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a capture attempt produced no snapshot.
#[derive(Debug, Error)]
pub enum FailureReason {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("persisting snapshot failed: {0}")]
    Persist(#[from] StoreError),
}
