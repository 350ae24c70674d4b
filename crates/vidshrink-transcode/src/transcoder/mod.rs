//! Per-track transcoders.
//!
//! A [`TrackTranscoder`] drives one source track to completion in small
//! non-blocking steps. Both variants share the same contract:
//!
//! - `setup` selects the source track and prepares codecs; a pass-through
//!   track registers its (source) format with the muxer right away.
//! - `step` moves at most one sample through each internal stage and reports
//!   whether anything moved. Once finished or failed it is a no-op.
//! - `release` frees native resources exactly once.

mod active;
mod passthrough;

pub use active::ActiveTranscoder;
pub use passthrough::PassThroughTranscoder;

use crate::capability::{CapabilityError, CodecProvider, Demuxer};
use crate::error::Result;
use crate::format::TrackFormat;
use crate::muxer::{DeferredMuxer, TrackRole};
use serde::Serialize;
use std::fmt;

/// Lifecycle of a track transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscoderState {
    Created,
    Configured,
    Running,
    /// The source is exhausted; codecs are flushing.
    Draining,
    Finished,
    Failed,
}

impl TranscoderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for TranscoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One track's transcoder.
#[derive(Debug)]
pub enum TrackTranscoder {
    /// Decode, then encode to a new format.
    Active(ActiveTranscoder),
    /// Copy samples unchanged.
    PassThrough(PassThroughTranscoder),
}

impl TrackTranscoder {
    pub fn active(
        role: TrackRole,
        track_index: usize,
        input_format: TrackFormat,
        output_format: TrackFormat,
    ) -> Self {
        Self::Active(ActiveTranscoder::new(
            role,
            track_index,
            input_format,
            output_format,
        ))
    }

    pub fn pass_through(role: TrackRole, track_index: usize, format: TrackFormat) -> Self {
        Self::PassThrough(PassThroughTranscoder::new(role, track_index, format))
    }

    pub fn setup(
        &mut self,
        demuxer: &mut dyn Demuxer,
        codecs: &dyn CodecProvider,
        mux: &mut DeferredMuxer,
    ) -> Result<()> {
        match self {
            Self::Active(t) => t.setup(demuxer, codecs),
            Self::PassThrough(t) => t.setup(demuxer, mux),
        }
    }

    pub fn step(&mut self, demuxer: &mut dyn Demuxer, mux: &mut DeferredMuxer) -> Result<bool> {
        match self {
            Self::Active(t) => t.step(demuxer, mux),
            Self::PassThrough(t) => t.step(demuxer, mux),
        }
    }

    pub fn release(&mut self) -> std::result::Result<(), CapabilityError> {
        match self {
            Self::Active(t) => t.release(),
            Self::PassThrough(t) => t.release(),
        }
    }

    pub fn role(&self) -> TrackRole {
        match self {
            Self::Active(t) => t.role(),
            Self::PassThrough(t) => t.role(),
        }
    }

    pub fn state(&self) -> TranscoderState {
        match self {
            Self::Active(t) => t.state(),
            Self::PassThrough(t) => t.state(),
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough(_))
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TranscoderState::Finished
    }

    /// Presentation time of the last sample handed to the muxer.
    pub fn written_presentation_time_us(&self) -> i64 {
        match self {
            Self::Active(t) => t.written_presentation_time_us(),
            Self::PassThrough(t) => t.written_presentation_time_us(),
        }
    }
}
