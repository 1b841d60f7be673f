use std::{io, path::PathBuf, time::Duration};

use reqwest::StatusCode;
use thiserror::Error;

/// Everything that can go wrong inside a single poll cycle. None of these are
/// fatal: the poller logs them and waits for the next cycle.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("no complete answer from camera within {0:?}")]
    Timeout(Duration),

    #[error("camera answered with status {status}")]
    Status { status: StatusCode },

    #[error("digest authentication failed: {0}")]
    Auth(String),

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PollError {
    pub fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PollError::Filesystem { path: path.into(), source }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            PollError::Timeout(_) => true,
            PollError::Network(e) => e.is_timeout(),
            _ => false,
        }
    }
}
