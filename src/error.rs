//! Error types.

use std::io;

use thiserror::Error;

/// Recoverable failures surfaced to callers.
///
/// Shape mismatches between vectors and the units a model declares are not
/// represented here; those are programming errors and panic.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid training parameters, detected before any training happens.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A parameter or data file could not be read or written.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A parameter file could not be encoded or decoded.
    #[error("malformed parameter file: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A dataset file has an unexpected layout.
    #[error("malformed dataset: {0}")]
    Dataset(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}
