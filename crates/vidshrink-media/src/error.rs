//! Errors raised while reading or writing MP4 files.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Box structure that cannot be parsed.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    #[error("Missing required atom: {0}")]
    MissingAtom(&'static str),

    /// Valid MP4 using something this crate does not handle.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Writer used out of order: unknown track, oversized sample and so on.
    #[error("Invalid writer state: {0}")]
    InvalidState(String),
}

impl Error {
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}
