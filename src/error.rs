//! Error types for workq.
//!
//! "Nothing to claim" and "stale handle" are not errors; they come back as
//! `Ok(None)` and `Ok(false)`. Everything here is a real failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid lease duration: {0}")]
    InvalidLease(String),

    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
