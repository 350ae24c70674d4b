//! Deferred multiplexer.
//!
//! Container muxers fix their track headers before the first sample, but a
//! re-encoded track only knows its output format once the encoder has
//! produced something. [`DeferredMuxer`] hides this: tracks register their
//! determined formats whenever they learn them, samples written before the
//! last registration are queued, and the real muxer is started (tracks added
//! in [`TrackRole`] order) and fed the queue the moment everything is known.

use crate::capability::{CapabilityError, Muxer};
use crate::error::{Result, TranscodeError};
use crate::format::TrackFormat;
use crate::policy;
use crate::sample::Sample;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use tracing::{debug, info, trace};

/// Which output track a sample belongs to.
///
/// The declaration order is the order tracks are added to the muxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackRole {
    Video,
    Audio,
}

impl TrackRole {
    pub const ALL: [TrackRole; 2] = [TrackRole::Video, TrackRole::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for TrackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Phase {
    /// Waiting for formats; samples queue up in arrival order.
    Buffering { queue: VecDeque<(TrackRole, Sample)> },
    /// The real muxer is started; writes go straight through.
    Forwarding { destinations: BTreeMap<TrackRole, usize> },
    Stopped,
}

/// Buffers samples until every expected track has a determined format.
pub struct DeferredMuxer {
    muxer: Box<dyn Muxer>,
    expected: Vec<TrackRole>,
    formats: BTreeMap<TrackRole, TrackFormat>,
    phase: Phase,
    validate_formats: bool,
    released: bool,
}

impl DeferredMuxer {
    /// Wrap `muxer`, waiting for a format for every role in `expected`.
    pub fn new(muxer: Box<dyn Muxer>, expected: impl IntoIterator<Item = TrackRole>) -> Self {
        let mut expected: Vec<TrackRole> = expected.into_iter().collect();
        expected.sort();
        expected.dedup();
        Self {
            muxer,
            expected,
            formats: BTreeMap::new(),
            phase: Phase::Buffering {
                queue: VecDeque::new(),
            },
            validate_formats: false,
            released: false,
        }
    }

    /// Check determined formats against the output requirements before start.
    pub fn with_format_validation(mut self, enabled: bool) -> Self {
        self.validate_formats = enabled;
        self
    }

    /// Pass the rotation hint through; only possible before the muxer starts.
    pub fn set_orientation_hint(&mut self, degrees: u32) -> Result<()> {
        if self.is_started() {
            return Err(TranscodeError::protocol(
                TrackRole::Video,
                "orientation hint after muxer start",
            ));
        }
        self.muxer.set_orientation_hint(degrees)?;
        Ok(())
    }

    /// Record the determined format for `role`; starts the muxer when this
    /// was the last one missing.
    pub fn register_track(&mut self, role: TrackRole, format: TrackFormat) -> Result<()> {
        if !self.expected.contains(&role) {
            return Err(TranscodeError::protocol(role, "track is not part of this output"));
        }
        if self.formats.contains_key(&role) {
            return Err(TranscodeError::protocol(role, "output format determined twice"));
        }
        debug!(%role, %format, "output format determined");
        self.formats.insert(role, format);

        if self.expected.iter().all(|r| self.formats.contains_key(r)) {
            self.start()?;
        }
        Ok(())
    }

    /// Queue or forward one sample.
    pub fn write(&mut self, role: TrackRole, sample: Sample) -> Result<()> {
        match &mut self.phase {
            Phase::Buffering { queue } => {
                trace!(%role, pts = sample.presentation_time_us, queued = queue.len() + 1, "buffering sample");
                queue.push_back((role, sample));
                Ok(())
            }
            Phase::Forwarding { destinations } => {
                let index = *destinations
                    .get(&role)
                    .ok_or_else(|| TranscodeError::protocol(role, "no output track"))?;
                self.muxer.write_sample(index, &sample)?;
                Ok(())
            }
            Phase::Stopped => Err(TranscodeError::protocol(role, "sample written after stop")),
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.validate_formats {
            for (role, format) in &self.formats {
                policy::validate_output_format(*role, format)?;
            }
        }

        let mut destinations = BTreeMap::new();
        for role in &self.expected {
            if let Some(format) = self.formats.get(role) {
                destinations.insert(*role, self.muxer.add_track(format)?);
            }
        }
        self.muxer.start()?;

        let queue = match std::mem::replace(
            &mut self.phase,
            Phase::Forwarding {
                destinations: destinations.clone(),
            },
        ) {
            Phase::Buffering { queue } => queue,
            _ => VecDeque::new(),
        };

        info!(buffered = queue.len(), "muxer started");
        for (role, sample) in queue {
            if let Some(&index) = destinations.get(&role) {
                self.muxer.write_sample(index, &sample)?;
            }
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        !matches!(self.phase, Phase::Buffering { .. })
    }

    /// Samples waiting for the muxer to start.
    pub fn buffered_len(&self) -> usize {
        match &self.phase {
            Phase::Buffering { queue } => queue.len(),
            _ => 0,
        }
    }

    /// Index the real muxer assigned to `role`, once started.
    pub fn destination_index(&self, role: TrackRole) -> Option<usize> {
        match &self.phase {
            Phase::Forwarding { destinations } => destinations.get(&role).copied(),
            _ => None,
        }
    }

    pub fn format(&self, role: TrackRole) -> Option<&TrackFormat> {
        self.formats.get(&role)
    }

    /// Finalize the output. Fails if the muxer never started.
    pub fn stop(&mut self) -> Result<()> {
        match self.phase {
            Phase::Forwarding { .. } => {
                self.muxer.stop()?;
                self.phase = Phase::Stopped;
                Ok(())
            }
            Phase::Stopped => Ok(()),
            Phase::Buffering { .. } => {
                let missing = self
                    .expected
                    .iter()
                    .copied()
                    .find(|r| !self.formats.contains_key(r))
                    .unwrap_or(TrackRole::Video);
                Err(TranscodeError::protocol(
                    missing,
                    "stream ended before its output format was determined",
                ))
            }
        }
    }

    /// Release the underlying muxer; later calls are no-ops.
    pub fn release(&mut self) -> std::result::Result<(), CapabilityError> {
        if std::mem::replace(&mut self.released, true) {
            return Ok(());
        }
        if let Phase::Buffering { queue } = &mut self.phase {
            queue.clear();
        }
        self.muxer.release()
    }
}

impl fmt::Debug for DeferredMuxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredMuxer")
            .field("expected", &self.expected)
            .field("registered", &self.formats.keys().collect::<Vec<_>>())
            .field("started", &self.is_started())
            .field("buffered", &self.buffered_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{keys, MIME_AUDIO_AAC, MIME_VIDEO_AVC};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        AddTrack(String),
        Start,
        Write(usize, i64),
        Stop,
        Release,
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Call>>>);

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Muxer for Recorder {
        fn set_orientation_hint(&mut self, _: u32) -> std::result::Result<(), CapabilityError> {
            Ok(())
        }
        fn add_track(&mut self, format: &TrackFormat) -> std::result::Result<usize, CapabilityError> {
            let mut calls = self.0.lock().unwrap();
            let index = calls.iter().filter(|c| matches!(c, Call::AddTrack(_))).count();
            calls.push(Call::AddTrack(format.mime().unwrap_or_default().to_string()));
            Ok(index)
        }
        fn start(&mut self) -> std::result::Result<(), CapabilityError> {
            self.0.lock().unwrap().push(Call::Start);
            Ok(())
        }
        fn write_sample(&mut self, track: usize, sample: &Sample) -> std::result::Result<(), CapabilityError> {
            self.0
                .lock()
                .unwrap()
                .push(Call::Write(track, sample.presentation_time_us));
            Ok(())
        }
        fn stop(&mut self) -> std::result::Result<(), CapabilityError> {
            self.0.lock().unwrap().push(Call::Stop);
            Ok(())
        }
        fn release(&mut self) -> std::result::Result<(), CapabilityError> {
            self.0.lock().unwrap().push(Call::Release);
            Ok(())
        }
    }

    fn deferred() -> (DeferredMuxer, Recorder) {
        let recorder = Recorder::default();
        let mux = DeferredMuxer::new(Box::new(recorder.clone()), TrackRole::ALL);
        (mux, recorder)
    }

    #[test]
    fn test_buffers_until_all_formats_known() {
        let (mut mux, recorder) = deferred();
        mux.register_track(TrackRole::Audio, TrackFormat::new(MIME_AUDIO_AAC))
            .unwrap();
        mux.write(TrackRole::Audio, Sample::new(vec![1], 0)).unwrap();
        mux.write(TrackRole::Audio, Sample::new(vec![2], 23_219)).unwrap();
        assert!(!mux.is_started());
        assert_eq!(mux.buffered_len(), 2);
        assert!(recorder.calls().is_empty());

        mux.register_track(TrackRole::Video, TrackFormat::new(MIME_VIDEO_AVC))
            .unwrap();
        mux.write(TrackRole::Video, Sample::new(vec![3], 0)).unwrap();

        assert_eq!(
            recorder.calls(),
            vec![
                Call::AddTrack(MIME_VIDEO_AVC.into()),
                Call::AddTrack(MIME_AUDIO_AAC.into()),
                Call::Start,
                Call::Write(1, 0),
                Call::Write(1, 23_219),
                Call::Write(0, 0),
            ]
        );
        assert_eq!(mux.destination_index(TrackRole::Video), Some(0));
        assert_eq!(mux.destination_index(TrackRole::Audio), Some(1));
    }

    #[test]
    fn test_flush_keeps_arrival_order_across_tracks() {
        let (mut mux, recorder) = deferred();
        mux.write(TrackRole::Audio, Sample::new(vec![1], 10)).unwrap();
        mux.write(TrackRole::Video, Sample::new(vec![1], 20)).unwrap();
        mux.write(TrackRole::Audio, Sample::new(vec![1], 30)).unwrap();
        mux.register_track(TrackRole::Video, TrackFormat::new(MIME_VIDEO_AVC))
            .unwrap();
        mux.register_track(TrackRole::Audio, TrackFormat::new(MIME_AUDIO_AAC))
            .unwrap();

        let writes: Vec<Call> = recorder
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Write(..)))
            .collect();
        assert_eq!(writes, vec![Call::Write(1, 10), Call::Write(0, 20), Call::Write(1, 30)]);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let (mut mux, _) = deferred();
        mux.register_track(TrackRole::Audio, TrackFormat::new(MIME_AUDIO_AAC))
            .unwrap();
        let err = mux
            .register_track(TrackRole::Audio, TrackFormat::new(MIME_AUDIO_AAC))
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Protocol { role: TrackRole::Audio, .. }));
    }

    #[test]
    fn test_unexpected_role_is_rejected() {
        let recorder = Recorder::default();
        let mut mux = DeferredMuxer::new(Box::new(recorder), [TrackRole::Video]);
        assert!(mux
            .register_track(TrackRole::Audio, TrackFormat::new(MIME_AUDIO_AAC))
            .is_err());
    }

    #[test]
    fn test_stop_before_start_fails_and_release_is_once() {
        let (mut mux, recorder) = deferred();
        mux.register_track(TrackRole::Audio, TrackFormat::new(MIME_AUDIO_AAC))
            .unwrap();
        let err = mux.stop().unwrap_err();
        assert!(matches!(err, TranscodeError::Protocol { role: TrackRole::Video, .. }));

        mux.release().unwrap();
        mux.release().unwrap();
        assert_eq!(recorder.calls(), vec![Call::Release]);
    }

    #[test]
    fn test_validation_rejects_non_baseline_video() {
        let (mux, recorder) = deferred();
        let mut mux = mux.with_format_validation(true);
        // avcC record advertising High profile (100).
        let video = TrackFormat::new(MIME_VIDEO_AVC).with_bytes(keys::CSD_0, vec![1, 100, 0, 40]);
        mux.register_track(TrackRole::Audio, TrackFormat::new(MIME_AUDIO_AAC))
            .unwrap();
        let err = mux.register_track(TrackRole::Video, video).unwrap_err();
        assert!(matches!(err, TranscodeError::InvalidOutputFormat { .. }));
        assert!(recorder.calls().is_empty());
    }
}
