//! Pipeline driver loop.

use crate::capability::Demuxer;
use crate::config::PipelineSettings;
use crate::error::{Result, TranscodeError};
use crate::muxer::DeferredMuxer;
use crate::progress::{Progress, ProgressSender, ProgressTracker};
use crate::transcoder::TrackTranscoder;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Steps every track transcoder until all of them are finished.
#[derive(Debug)]
pub struct PipelineDriver {
    backoff: Duration,
    progress_interval: u64,
    duration_us: Option<i64>,
    tracker: ProgressTracker,
}

impl PipelineDriver {
    pub fn new(settings: &PipelineSettings, duration_us: Option<i64>) -> Self {
        Self {
            backoff: settings.backoff(),
            progress_interval: settings.progress_interval.max(1),
            duration_us: duration_us.filter(|d| *d > 0),
            tracker: ProgressTracker::default(),
        }
    }

    /// Fraction complete: the mean over tracks of `1.0` when finished,
    /// otherwise written time over duration. `None` without a duration.
    pub fn measure(&self, transcoders: &[TrackTranscoder]) -> Option<f64> {
        let duration = self.duration_us? as f64;
        if transcoders.is_empty() {
            return Some(1.0);
        }
        let sum: f64 = transcoders
            .iter()
            .map(|t| {
                if t.is_finished() {
                    1.0
                } else {
                    (t.written_presentation_time_us() as f64 / duration).min(1.0)
                }
            })
            .sum();
        Some(sum / transcoders.len() as f64)
    }

    /// Drive to completion, or until `cancel` fires or a step fails.
    pub fn run(
        &mut self,
        transcoders: &mut [TrackTranscoder],
        demuxer: &mut dyn Demuxer,
        mux: &mut DeferredMuxer,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<()> {
        if self.duration_us.is_none() {
            progress.send(Progress::Unknown);
        }

        let mut iterations: u64 = 0;
        while !transcoders.iter().all(TrackTranscoder::is_finished) {
            if cancel.is_cancelled() {
                debug!(iterations, "cancellation observed");
                return Err(TranscodeError::Canceled);
            }

            let mut stepped = false;
            for transcoder in transcoders.iter_mut() {
                // Every transcoder gets its turn even if an earlier one moved.
                stepped |= transcoder.step(demuxer, mux)?;
            }

            iterations += 1;
            if !stepped {
                trace!(iterations, "no progress, backing off");
                if !self.backoff.is_zero() {
                    std::thread::sleep(self.backoff);
                }
            }
            if iterations % self.progress_interval == 0 {
                self.report(transcoders, progress);
            }
        }

        if self.duration_us.is_some() {
            self.tracker.observe(1.0);
            progress.send(Progress::Fraction(1.0));
        }
        debug!(iterations, "all tracks finished");
        Ok(())
    }

    fn report(&mut self, transcoders: &[TrackTranscoder], progress: &ProgressSender) {
        if let Some(measured) = self.measure(transcoders) {
            let value = self.tracker.observe(measured);
            trace!(progress = value, "progress");
            progress.send(Progress::Fraction(value));
        }
    }
}
