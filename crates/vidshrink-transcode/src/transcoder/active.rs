//! Decode + encode transcoder.

use super::TranscoderState;
use crate::capability::{CapabilityError, Codec, CodecProvider, Demuxer, Drain, Feed, ReadSample};
use crate::error::{Result, TranscodeError};
use crate::format::TrackFormat;
use crate::muxer::{DeferredMuxer, TrackRole};
use crate::sample::Sample;
use tracing::{debug, trace};

/// Runs one track through a decoder and an encoder.
///
/// Each step tries, in order: encoder output to the muxer, decoder output to
/// the encoder, demuxer input to the decoder. A sample a codec refused
/// (`Feed::Busy`) is held and offered again on the next step.
pub struct ActiveTranscoder {
    role: TrackRole,
    track_index: usize,
    input_format: TrackFormat,
    output_format: TrackFormat,
    decoder: Option<Box<dyn Codec>>,
    encoder: Option<Box<dyn Codec>>,
    pending_input: Option<Sample>,
    pending_frame: Option<Sample>,
    format_registered: bool,
    input_eos: bool,
    decoder_eos: bool,
    state: TranscoderState,
    last_input_pts_us: i64,
    written_pts_us: i64,
}

impl ActiveTranscoder {
    pub fn new(
        role: TrackRole,
        track_index: usize,
        input_format: TrackFormat,
        output_format: TrackFormat,
    ) -> Self {
        Self {
            role,
            track_index,
            input_format,
            output_format,
            decoder: None,
            encoder: None,
            pending_input: None,
            pending_frame: None,
            format_registered: false,
            input_eos: false,
            decoder_eos: false,
            state: TranscoderState::Created,
            last_input_pts_us: 0,
            written_pts_us: 0,
        }
    }

    /// Select the source track and create both codecs.
    ///
    /// The output format is registered later, when the encoder reports it.
    pub fn setup(&mut self, demuxer: &mut dyn Demuxer, codecs: &dyn CodecProvider) -> Result<()> {
        let result = self.create_codecs(demuxer, codecs);
        self.state = match result {
            Ok(()) => TranscoderState::Configured,
            Err(_) => TranscoderState::Failed,
        };
        result
    }

    fn create_codecs(&mut self, demuxer: &mut dyn Demuxer, codecs: &dyn CodecProvider) -> Result<()> {
        demuxer.select_track(self.track_index)?;
        self.decoder = Some(codecs.create_decoder(&self.input_format)?);
        self.encoder = Some(codecs.create_encoder(&self.output_format)?);
        debug!(
            role = %self.role,
            track = self.track_index,
            input = %self.input_format,
            output = %self.output_format,
            "codecs configured"
        );
        Ok(())
    }

    pub fn step(&mut self, demuxer: &mut dyn Demuxer, mux: &mut DeferredMuxer) -> Result<bool> {
        if self.state.is_terminal() {
            return Ok(false);
        }
        if self.state == TranscoderState::Configured {
            self.state = TranscoderState::Running;
        }
        let result = self.run_stages(demuxer, mux);
        if result.is_err() {
            self.state = TranscoderState::Failed;
        }
        result
    }

    fn run_stages(&mut self, demuxer: &mut dyn Demuxer, mux: &mut DeferredMuxer) -> Result<bool> {
        let mut moved = self.drain_encoder(mux)?;
        if self.state.is_terminal() {
            return Ok(moved);
        }
        moved |= self.drain_decoder()?;
        moved |= self.feed_decoder(demuxer)?;
        Ok(moved)
    }

    fn drain_encoder(&mut self, mux: &mut DeferredMuxer) -> Result<bool> {
        let role = self.role;
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(TranscodeError::protocol(role, "encoder not configured"));
        };
        match encoder.drain()? {
            Drain::NoOutputYet => Ok(false),
            Drain::FormatChanged(format) => {
                if self.format_registered {
                    return Err(TranscodeError::protocol(role, "encoder changed its output format twice"));
                }
                self.format_registered = true;
                mux.register_track(role, format)?;
                Ok(true)
            }
            Drain::Sample(sample) if sample.is_codec_config() => {
                // Already carried by the output format's csd.
                trace!(%role, size = sample.len(), "dropping codec config sample");
                Ok(true)
            }
            Drain::Sample(sample) => {
                if !self.format_registered {
                    return Err(TranscodeError::protocol(role, "encoder output before its format"));
                }
                trace!(%role, pts = sample.presentation_time_us, size = sample.len(), "encoded");
                self.written_pts_us = sample.presentation_time_us;
                mux.write(role, sample)?;
                Ok(true)
            }
            Drain::EndOfStream => {
                mux.write(role, Sample::end_of_stream(self.written_pts_us))?;
                self.state = TranscoderState::Finished;
                debug!(%role, written_pts_us = self.written_pts_us, "encoder finished");
                Ok(true)
            }
        }
    }

    fn drain_decoder(&mut self) -> Result<bool> {
        let role = self.role;
        let mut moved = false;

        if self.pending_frame.is_none() && !self.decoder_eos {
            let Some(decoder) = self.decoder.as_mut() else {
                return Err(TranscodeError::protocol(role, "decoder not configured"));
            };
            match decoder.drain()? {
                Drain::NoOutputYet => return Ok(false),
                Drain::FormatChanged(format) => {
                    debug!(%role, %format, "decoder output format");
                    return Ok(true);
                }
                Drain::Sample(frame) => self.pending_frame = Some(frame),
                Drain::EndOfStream => {
                    self.decoder_eos = true;
                    self.pending_frame = Some(Sample::end_of_stream(self.last_input_pts_us));
                }
            }
            moved = true;
        }

        if let Some(frame) = self.pending_frame.as_ref() {
            let Some(encoder) = self.encoder.as_mut() else {
                return Err(TranscodeError::protocol(role, "encoder not configured"));
            };
            if encoder.feed(frame)? == Feed::Accepted {
                self.pending_frame = None;
                moved = true;
            }
        }
        Ok(moved)
    }

    fn feed_decoder(&mut self, demuxer: &mut dyn Demuxer) -> Result<bool> {
        if self.input_eos {
            return Ok(false);
        }
        let mut moved = false;

        if self.pending_input.is_none() {
            match demuxer.read_sample(self.track_index)? {
                ReadSample::OtherTrack => return Ok(false),
                ReadSample::Sample(sample) => {
                    self.last_input_pts_us = sample.presentation_time_us;
                    self.pending_input = Some(sample);
                }
                ReadSample::EndOfStream => {
                    self.pending_input = Some(Sample::end_of_stream(self.last_input_pts_us));
                }
            }
            moved = true;
        }

        if let Some(input) = self.pending_input.as_ref() {
            let Some(decoder) = self.decoder.as_mut() else {
                return Err(TranscodeError::protocol(self.role, "decoder not configured"));
            };
            if decoder.feed(input)? == Feed::Accepted {
                if input.is_end_of_stream() {
                    self.input_eos = true;
                    self.state = TranscoderState::Draining;
                    debug!(role = %self.role, "source exhausted, draining codecs");
                }
                self.pending_input = None;
                moved = true;
            }
        }
        Ok(moved)
    }

    /// Release both codecs. Both are attempted; the first error is returned.
    pub fn release(&mut self) -> std::result::Result<(), CapabilityError> {
        let decoder = self.decoder.take().map(|mut codec| codec.release());
        let encoder = self.encoder.take().map(|mut codec| codec.release());
        decoder.unwrap_or(Ok(())).and(encoder.unwrap_or(Ok(())))
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

impl std::fmt::Debug for ActiveTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveTranscoder")
            .field("role", &self.role)
            .field("track_index", &self.track_index)
            .field("state", &self.state)
            .field("format_registered", &self.format_registered)
            .field("written_pts_us", &self.written_pts_us)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CodecDescriptor, MetadataKey, Muxer};
    use crate::format::MIME_VIDEO_AVC;
    use std::collections::VecDeque;

    /// Codec whose drain results are scripted.
    struct Scripted(VecDeque<Drain>);

    impl Codec for Scripted {
        fn feed(&mut self, _: &Sample) -> std::result::Result<Feed, CapabilityError> {
            Ok(Feed::Accepted)
        }
        fn drain(&mut self) -> std::result::Result<Drain, CapabilityError> {
            Ok(self.0.pop_front().unwrap_or(Drain::NoOutputYet))
        }
        fn release(&mut self) -> std::result::Result<(), CapabilityError> {
            Ok(())
        }
    }

    struct Provider(Vec<Drain>);

    impl CodecProvider for Provider {
        fn list_encoders(&self, _: &str) -> Vec<CodecDescriptor> {
            Vec::new()
        }
        fn create_decoder(&self, _: &TrackFormat) -> std::result::Result<Box<dyn Codec>, CapabilityError> {
            Ok(Box::new(Scripted(VecDeque::new())))
        }
        fn create_encoder(&self, _: &TrackFormat) -> std::result::Result<Box<dyn Codec>, CapabilityError> {
            Ok(Box::new(Scripted(self.0.clone().into())))
        }
    }

    struct Empty;

    impl Demuxer for Empty {
        fn track_count(&self) -> usize {
            1
        }
        fn track_format(&self, _: usize) -> std::result::Result<TrackFormat, CapabilityError> {
            Ok(TrackFormat::new(MIME_VIDEO_AVC))
        }
        fn select_track(&mut self, _: usize) -> std::result::Result<(), CapabilityError> {
            Ok(())
        }
        fn metadata(&self, _: MetadataKey) -> Option<String> {
            None
        }
        fn read_sample(&mut self, _: usize) -> std::result::Result<ReadSample, CapabilityError> {
            Ok(ReadSample::OtherTrack)
        }
        fn release(&mut self) -> std::result::Result<(), CapabilityError> {
            Ok(())
        }
    }

    struct Sink;

    impl Muxer for Sink {
        fn set_orientation_hint(&mut self, _: u32) -> std::result::Result<(), CapabilityError> {
            Ok(())
        }
        fn add_track(&mut self, _: &TrackFormat) -> std::result::Result<usize, CapabilityError> {
            Ok(0)
        }
        fn start(&mut self) -> std::result::Result<(), CapabilityError> {
            Ok(())
        }
        fn write_sample(&mut self, _: usize, _: &Sample) -> std::result::Result<(), CapabilityError> {
            Ok(())
        }
        fn stop(&mut self) -> std::result::Result<(), CapabilityError> {
            Ok(())
        }
        fn release(&mut self) -> std::result::Result<(), CapabilityError> {
            Ok(())
        }
    }

    fn transcoder(script: Vec<Drain>) -> (ActiveTranscoder, Empty, DeferredMuxer) {
        let mut demuxer = Empty;
        let mut active = ActiveTranscoder::new(
            TrackRole::Video,
            0,
            TrackFormat::video(MIME_VIDEO_AVC, 1920, 1080),
            TrackFormat::video(MIME_VIDEO_AVC, 640, 480),
        );
        active.setup(&mut demuxer, &Provider(script)).unwrap();
        let mux = DeferredMuxer::new(Box::new(Sink), [TrackRole::Video]);
        (active, demuxer, mux)
    }

    #[test]
    fn test_second_format_change_is_a_protocol_error() {
        let format = TrackFormat::video(MIME_VIDEO_AVC, 640, 480);
        let (mut active, mut demuxer, mut mux) = transcoder(vec![
            Drain::FormatChanged(format.clone()),
            Drain::FormatChanged(format),
        ]);

        assert!(active.step(&mut demuxer, &mut mux).unwrap());
        assert!(mux.is_started());
        let err = active.step(&mut demuxer, &mut mux).unwrap_err();
        assert!(matches!(err, TranscodeError::Protocol { role: TrackRole::Video, .. }));
        assert_eq!(active.state(), TranscoderState::Failed);
        assert!(!active.step(&mut demuxer, &mut mux).unwrap());
    }

    #[test]
    fn test_codec_config_is_swallowed() {
        let format = TrackFormat::video(MIME_VIDEO_AVC, 640, 480);
        let (mut active, mut demuxer, mut mux) = transcoder(vec![
            Drain::Sample(Sample::new(vec![0, 0, 0, 1, 0x67], 0).with_codec_config()),
            Drain::FormatChanged(format),
            Drain::Sample(Sample::new(vec![1, 2, 3], 33_333).with_key_frame(true)),
            Drain::EndOfStream,
        ]);

        for _ in 0..4 {
            active.step(&mut demuxer, &mut mux).unwrap();
        }
        assert_eq!(active.state(), TranscoderState::Finished);
        assert_eq!(active.written_presentation_time_us(), 33_333);
    }

    #[test]
    fn test_output_before_format_is_rejected() {
        let (mut active, mut demuxer, mut mux) =
            transcoder(vec![Drain::Sample(Sample::new(vec![9], 0))]);
        assert!(active.step(&mut demuxer, &mut mux).is_err());
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut active, _, _) = transcoder(Vec::new());
        assert!(active.release().is_ok());
        assert!(active.release().is_ok());
    }
}
