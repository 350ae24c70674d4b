//! Shared fakes for integration tests.
//!
//! [`FakeBackend`] hands out a scripted demuxer, pass-through codecs and a
//! muxer, all of which append to one shared [`Log`] so tests can assert on
//! call order and releases.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vidshrink_transcode::format::{keys, MIME_AUDIO_AAC, MIME_VIDEO_AVC};
use vidshrink_transcode::{
    CapabilityError, Codec, CodecDescriptor, CodecProvider, Demuxer, Drain, Feed, MediaBackend,
    MetadataKey, Muxer, PipelineSettings, ReadSample, Sample, SourceHandle, TrackFormat,
    TranscodeSettings,
};

/// Something a fake capability did.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DemuxerReleased,
    DecoderReleased,
    EncoderReleased,
    OrientationHint(u32),
    AddTrack(TrackFormat),
    Start,
    Write { track: usize, sample: Sample },
    Stop,
    MuxerReleased,
}

#[derive(Debug, Clone, Default)]
pub struct Log(Arc<Mutex<Vec<Event>>>);

impl Log {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn contains(&self, event: &Event) -> bool {
        self.position(event).is_some()
    }

    /// Samples written to muxer track `track`, in order.
    pub fn written(&self, track: usize) -> Vec<Sample> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write { track: t, sample } if t == track => Some(sample),
                _ => None,
            })
            .collect()
    }

    pub fn added_tracks(&self) -> Vec<TrackFormat> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::AddTrack(format) => Some(format),
                _ => None,
            })
            .collect()
    }
}

/// Failure injection points.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub open_source: bool,
    pub decoder_feed: bool,
    pub decoder_release: bool,
    pub demuxer_release: bool,
    pub muxer_release: bool,
    /// Encoder reports its output format twice.
    pub encoder_double_format: bool,
}

/// Source description: tracks and their samples in file order.
#[derive(Debug, Clone)]
pub struct FakeSource {
    pub formats: Vec<TrackFormat>,
    /// `(track, sample)` in file order.
    pub samples: Vec<(usize, Sample)>,
    pub duration_ms: Option<String>,
    pub rotation: Option<String>,
}

impl FakeSource {
    /// Video track 0 and AAC audio track 1, `count` samples each, interleaved.
    pub fn video_audio(width: u32, height: u32, count: usize) -> Self {
        let video = TrackFormat::video(MIME_VIDEO_AVC, width, height)
            .with_bytes(keys::CSD_0, vec![1, 100, 0, 40]);
        let audio = TrackFormat::audio(MIME_AUDIO_AAC, 44_100, 2).with_bytes(keys::CSD_0, vec![0x12, 0x10]);
        let mut samples = Vec::new();
        for i in 0..count {
            let video_pts = i as i64 * 33_333;
            let audio_pts = i as i64 * 23_220;
            samples.push((
                0,
                Sample::new(vec![0xAA, i as u8, 0x01], video_pts).with_key_frame(i % 30 == 0),
            ));
            samples.push((1, Sample::new(vec![0x21, i as u8], audio_pts).with_key_frame(true)));
        }
        let duration_ms = (count as i64 * 33_333 / 1000).to_string();
        Self {
            formats: vec![video, audio],
            samples,
            duration_ms: Some(duration_ms),
            rotation: Some("90".into()),
        }
    }

    pub fn source_samples(&self, track: usize) -> Vec<Sample> {
        self.samples
            .iter()
            .filter(|(t, _)| *t == track)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

pub struct FakeDemuxer {
    source: FakeSource,
    queue: VecDeque<(usize, Sample)>,
    selected: Vec<bool>,
    log: Log,
    faults: Faults,
}

impl Demuxer for FakeDemuxer {
    fn track_count(&self) -> usize {
        self.source.formats.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat, CapabilityError> {
        self.source
            .formats
            .get(index)
            .cloned()
            .ok_or_else(|| CapabilityError::new("track format", "out of range"))
    }

    fn select_track(&mut self, index: usize) -> Result<(), CapabilityError> {
        self.selected[index] = true;
        Ok(())
    }

    fn metadata(&self, key: MetadataKey) -> Option<String> {
        match key {
            MetadataKey::DurationMs => self.source.duration_ms.clone(),
            MetadataKey::Rotation => self.source.rotation.clone(),
        }
    }

    fn read_sample(&mut self, track: usize) -> Result<ReadSample, CapabilityError> {
        if !self.queue.iter().any(|(t, _)| *t == track) {
            return Ok(ReadSample::EndOfStream);
        }
        let next = self
            .queue
            .iter()
            .position(|(t, _)| self.selected[*t])
            .ok_or_else(|| CapabilityError::new("read sample", "track not selected"))?;
        if self.queue[next].0 != track {
            return Ok(ReadSample::OtherTrack);
        }
        let (_, sample) = self.queue.remove(next).unwrap();
        Ok(ReadSample::Sample(sample))
    }

    fn release(&mut self) -> Result<(), CapabilityError> {
        self.log.push(Event::DemuxerReleased);
        if self.faults.demuxer_release {
            return Err(CapabilityError::new("release demuxer", "handle leaked"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CodecKind {
    Decoder,
    Encoder,
}

/// A codec that hands inputs straight back as outputs, two at a time.
///
/// An encoder first emits a codec-config sample, then its output format once
/// it has been fed `format_after` frames.
pub struct FakeCodec {
    kind: CodecKind,
    output_format: Option<TrackFormat>,
    pending_config: bool,
    formats_left: usize,
    format_after: usize,
    fed: usize,
    queue: VecDeque<Sample>,
    log: Log,
    faults: Faults,
}

const CODEC_SLOTS: usize = 2;

impl Codec for FakeCodec {
    fn feed(&mut self, sample: &Sample) -> Result<Feed, CapabilityError> {
        if self.kind == CodecKind::Decoder && self.faults.decoder_feed {
            return Err(CapabilityError::new("feed decoder", "corrupt bitstream"));
        }
        if self.queue.len() >= CODEC_SLOTS.max(self.format_after) {
            return Ok(Feed::Busy);
        }
        if !sample.is_end_of_stream() {
            self.fed += 1;
        }
        self.queue.push_back(sample.clone());
        Ok(Feed::Accepted)
    }

    fn drain(&mut self) -> Result<Drain, CapabilityError> {
        if self.pending_config {
            self.pending_config = false;
            return Ok(Drain::Sample(
                Sample::new(vec![0, 0, 0, 1, 0x67, 66], 0).with_codec_config(),
            ));
        }
        if self.formats_left > 0 {
            if let Some(format) = &self.output_format {
                if self.fed < self.format_after {
                    return Ok(Drain::NoOutputYet);
                }
                self.formats_left -= 1;
                return Ok(Drain::FormatChanged(format.clone()));
            }
        }
        match self.queue.pop_front() {
            None => Ok(Drain::NoOutputYet),
            Some(sample) if sample.is_end_of_stream() => Ok(Drain::EndOfStream),
            Some(sample) => Ok(Drain::Sample(sample)),
        }
    }

    fn release(&mut self) -> Result<(), CapabilityError> {
        match self.kind {
            CodecKind::Decoder => {
                self.log.push(Event::DecoderReleased);
                if self.faults.decoder_release {
                    return Err(CapabilityError::new("release decoder", "native handle leaked"));
                }
            }
            CodecKind::Encoder => self.log.push(Event::EncoderReleased),
        }
        Ok(())
    }
}

pub struct FakeCodecs {
    pub encoders: Vec<CodecDescriptor>,
    /// Frames an encoder takes in before reporting its output format.
    pub format_after: usize,
    log: Log,
    faults: Faults,
}

impl CodecProvider for FakeCodecs {
    fn list_encoders(&self, mime: &str) -> Vec<CodecDescriptor> {
        self.encoders.iter().filter(|e| e.mime == mime).cloned().collect()
    }

    fn create_decoder(&self, _format: &TrackFormat) -> Result<Box<dyn Codec>, CapabilityError> {
        Ok(Box::new(FakeCodec {
            kind: CodecKind::Decoder,
            output_format: None,
            pending_config: false,
            formats_left: 0,
            format_after: 0,
            fed: 0,
            queue: VecDeque::new(),
            log: self.log.clone(),
            faults: self.faults.clone(),
        }))
    }

    fn create_encoder(&self, format: &TrackFormat) -> Result<Box<dyn Codec>, CapabilityError> {
        let output = format.clone().with_bytes(keys::CSD_0, vec![1, 66, 0xC0, 30]);
        Ok(Box::new(FakeCodec {
            kind: CodecKind::Encoder,
            output_format: Some(output),
            pending_config: true,
            formats_left: if self.faults.encoder_double_format { 2 } else { 1 },
            format_after: self.format_after,
            fed: 0,
            queue: VecDeque::new(),
            log: self.log.clone(),
            faults: self.faults.clone(),
        }))
    }
}

pub struct FakeMuxer {
    log: Log,
    faults: Faults,
    started: bool,
    tracks: usize,
}

impl Muxer for FakeMuxer {
    fn set_orientation_hint(&mut self, degrees: u32) -> Result<(), CapabilityError> {
        self.log.push(Event::OrientationHint(degrees));
        Ok(())
    }

    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, CapabilityError> {
        self.log.push(Event::AddTrack(format.clone()));
        self.tracks += 1;
        Ok(self.tracks - 1)
    }

    fn start(&mut self) -> Result<(), CapabilityError> {
        self.started = true;
        self.log.push(Event::Start);
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &Sample) -> Result<(), CapabilityError> {
        if !self.started {
            return Err(CapabilityError::new("write sample", "muxer not started"));
        }
        self.log.push(Event::Write {
            track,
            sample: sample.clone(),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CapabilityError> {
        self.log.push(Event::Stop);
        Ok(())
    }

    fn release(&mut self) -> Result<(), CapabilityError> {
        self.log.push(Event::MuxerReleased);
        if self.faults.muxer_release {
            return Err(CapabilityError::new("release muxer", "close failed"));
        }
        Ok(())
    }
}

/// Backend wiring the fakes together.
pub struct FakeBackend {
    pub source: FakeSource,
    pub log: Log,
    pub faults: Faults,
    pub muxers_created: AtomicUsize,
    codecs: FakeCodecs,
    gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

/// Test side of a gated `open_source`.
pub struct OpenGate {
    entered: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl OpenGate {
    /// Block until the worker is inside `open_source`.
    pub fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(10))
            .expect("open_source never called");
    }

    /// Let `open_source` return.
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

impl FakeBackend {
    /// Backend with one AVC encoder.
    pub fn new(source: FakeSource) -> Self {
        Self::with_faults(source, Faults::default())
    }

    pub fn with_faults(source: FakeSource, faults: Faults) -> Self {
        let log = Log::default();
        let codecs = FakeCodecs {
            encoders: vec![CodecDescriptor {
                name: "fake.avc.encoder".into(),
                mime: MIME_VIDEO_AVC.into(),
                hardware_accelerated: false,
            }],
            format_after: 0,
            log: log.clone(),
            faults: faults.clone(),
        };
        Self {
            source,
            log,
            faults,
            muxers_created: AtomicUsize::new(0),
            codecs,
            gate: Mutex::new(None),
        }
    }

    /// Make `open_source` announce itself, then block until released.
    pub fn gated(self) -> (Self, OpenGate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
        let gate = OpenGate {
            entered: entered_rx,
            release: release_tx,
        };
        (self, gate)
    }

    /// Encoders hold back their output format until fed `frames` frames.
    pub fn with_late_encoder_format(mut self, frames: usize) -> Self {
        self.codecs.format_after = frames;
        self
    }

    /// Backend without any encoder.
    pub fn without_encoders(source: FakeSource) -> Self {
        let mut backend = Self::new(source);
        backend.codecs.encoders.clear();
        backend
    }

    pub fn muxers_created(&self) -> usize {
        self.muxers_created.load(Ordering::SeqCst)
    }
}

impl MediaBackend for FakeBackend {
    fn open_source(&self, _source: &SourceHandle) -> Result<Box<dyn Demuxer>, CapabilityError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }
        if self.faults.open_source {
            return Err(CapabilityError::new("open source", "not a media file"));
        }
        Ok(Box::new(FakeDemuxer {
            queue: self.source.samples.iter().cloned().collect(),
            selected: vec![false; self.source.formats.len()],
            source: self.source.clone(),
            log: self.log.clone(),
            faults: self.faults.clone(),
        }))
    }

    fn create_muxer(&self, output: &Path) -> Result<Box<dyn Muxer>, CapabilityError> {
        self.muxers_created.fetch_add(1, Ordering::SeqCst);
        std::fs::write(output, b"partial")
            .map_err(|e| CapabilityError::new("create muxer", e.to_string()))?;
        Ok(Box::new(FakeMuxer {
            log: self.log.clone(),
            faults: self.faults.clone(),
            started: false,
            tracks: 0,
        }))
    }

    fn codecs(&self) -> &dyn CodecProvider {
        &self.codecs
    }
}

/// Settings for tests: no sleeping, progress on every iteration.
pub fn fast_settings() -> TranscodeSettings {
    TranscodeSettings {
        pipeline: PipelineSettings {
            backoff_ms: 0,
            progress_interval: 1,
            validate_output_formats: false,
        },
        ..TranscodeSettings::default()
    }
}
