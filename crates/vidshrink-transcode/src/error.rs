//! Error types for vidshrink-transcode.

use crate::capability::CapabilityError;
use crate::muxer::TrackRole;
use serde::Serialize;
use std::fmt;

/// Result type alias using [`TranscodeError`].
pub type Result<T> = std::result::Result<T, TranscodeError>;

/// Errors that end a transcode.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    /// The source could not be opened or parsed.
    #[error("unreadable source: {0}")]
    UnreadableSource(#[source] CapabilityError),

    /// The source lacks a video or an audio track.
    #[error("no {kind} track in source")]
    NoMatchingTrack { kind: &'static str },

    /// A format lacks a key the pipeline needs to make a decision.
    #[error("{kind} format is missing `{key}`")]
    MissingFormatKey { kind: &'static str, key: &'static str },

    /// Re-encoding is required but nothing can encode the target mime.
    #[error("no encoder available for {mime}")]
    NoCodecAvailable { mime: String },

    /// A capability failed during setup or while stepping.
    #[error("codec fault: {0}")]
    CodecFault(#[from] CapabilityError),

    /// The pipeline saw a sequence no well-behaved codec produces.
    #[error("{role} track: {message}")]
    Protocol { role: TrackRole, message: String },

    /// A determined output format failed validation.
    #[error("invalid {role} output format: {message}")]
    InvalidOutputFormat { role: TrackRole, message: String },

    /// The caller cancelled the transcode.
    #[error("transcode canceled")]
    Canceled,

    /// Releasing the muxer failed after an otherwise successful run.
    #[error("failed to release muxer: {0}")]
    ReleaseFault(#[source] CapabilityError),

    /// Releasing a codec or the demuxer failed.
    #[error("failed to release native resources: {0}")]
    ShutdownFault(#[source] CapabilityError),
}

impl TranscodeError {
    pub fn protocol(role: TrackRole, message: impl Into<String>) -> Self {
        Self::Protocol {
            role,
            message: message.into(),
        }
    }

    pub fn invalid_output(role: TrackRole, message: impl Into<String>) -> Self {
        Self::InvalidOutputFormat {
            role,
            message: message.into(),
        }
    }

    /// Failure category, `None` for cancellation.
    pub fn reason(&self) -> Option<FailureReason> {
        Some(match self {
            Self::UnreadableSource(_) | Self::MissingFormatKey { .. } => {
                FailureReason::UnreadableSource
            }
            Self::NoMatchingTrack { .. } => FailureReason::NoMatchingTrack,
            Self::NoCodecAvailable { .. } => FailureReason::NoCodecAvailable,
            Self::CodecFault(_) | Self::Protocol { .. } | Self::InvalidOutputFormat { .. } => {
                FailureReason::CodecFault
            }
            Self::ReleaseFault(_) => FailureReason::ReleaseFault,
            Self::ShutdownFault(_) => FailureReason::ShutdownFault,
            Self::Canceled => return None,
        })
    }
}

/// Why a transcode failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    UnreadableSource,
    NoMatchingTrack,
    NoCodecAvailable,
    CodecFault,
    ReleaseFault,
    ShutdownFault,
    /// The worker itself died (panic or runtime shutdown).
    Internal,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnreadableSource => "unreadable source",
            Self::NoMatchingTrack => "no matching track",
            Self::NoCodecAvailable => "no codec available",
            Self::CodecFault => "codec fault",
            Self::ReleaseFault => "release fault",
            Self::ShutdownFault => "shutdown fault",
            Self::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// A failed transcode: category plus the rendered error chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub reason: FailureReason,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

/// Final result of a transcode as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TranscodeOutcome {
    Success,
    Canceled,
    Failed(Failure),
}

impl TranscodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Failed(failure) => Some(failure.reason),
            _ => None,
        }
    }
}

impl From<Result<()>> for TranscodeOutcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(err) => match err.reason() {
                None => Self::Canceled,
                Some(reason) => Self::Failed(Failure {
                    reason,
                    message: err.to_string(),
                }),
            },
        }
    }
}
