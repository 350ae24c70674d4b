//! Verbatim track copy.

use super::TranscoderState;
use crate::capability::{CapabilityError, Demuxer, ReadSample};
use crate::error::Result;
use crate::format::TrackFormat;
use crate::muxer::{DeferredMuxer, TrackRole};
use crate::sample::Sample;
use tracing::{debug, trace};

/// Copies every sample of one track to the muxer unchanged.
#[derive(Debug)]
pub struct PassThroughTranscoder {
    role: TrackRole,
    track_index: usize,
    format: TrackFormat,
    state: TranscoderState,
    written_pts_us: i64,
}

impl PassThroughTranscoder {
    pub fn new(role: TrackRole, track_index: usize, format: TrackFormat) -> Self {
        Self {
            role,
            track_index,
            format,
            state: TranscoderState::Created,
            written_pts_us: 0,
        }
    }

    /// Select the track and register the source format as the output format.
    pub fn setup(&mut self, demuxer: &mut dyn Demuxer, mux: &mut DeferredMuxer) -> Result<()> {
        let result = demuxer
            .select_track(self.track_index)
            .map_err(Into::into)
            .and_then(|()| mux.register_track(self.role, self.format.clone()));
        self.state = match result {
            Ok(()) => TranscoderState::Configured,
            Err(_) => TranscoderState::Failed,
        };
        debug!(role = %self.role, track = self.track_index, "pass-through configured");
        result
    }

    pub fn step(&mut self, demuxer: &mut dyn Demuxer, mux: &mut DeferredMuxer) -> Result<bool> {
        if self.state.is_terminal() {
            return Ok(false);
        }
        let result = self.copy_one(demuxer, mux);
        if result.is_err() {
            self.state = TranscoderState::Failed;
        }
        result
    }

    fn copy_one(&mut self, demuxer: &mut dyn Demuxer, mux: &mut DeferredMuxer) -> Result<bool> {
        self.state = TranscoderState::Running;
        match demuxer.read_sample(self.track_index)? {
            ReadSample::OtherTrack => Ok(false),
            ReadSample::Sample(sample) => {
                trace!(role = %self.role, pts = sample.presentation_time_us, size = sample.len(), "copy");
                self.written_pts_us = sample.presentation_time_us;
                mux.write(self.role, sample)?;
                Ok(true)
            }
            ReadSample::EndOfStream => {
                mux.write(self.role, Sample::end_of_stream(self.written_pts_us))?;
                self.state = TranscoderState::Finished;
                debug!(role = %self.role, "pass-through finished");
                Ok(true)
            }
        }
    }

    /// Nothing native is held; kept for symmetry with the active variant.
    pub fn release(&mut self) -> std::result::Result<(), CapabilityError> {
        Ok(())
    }

    pub fn role(&self) -> TrackRole {
        self.role
    }

    pub fn state(&self) -> TranscoderState {
        self.state
    }

    pub fn written_presentation_time_us(&self) -> i64 {
        self.written_pts_us
    }
}
