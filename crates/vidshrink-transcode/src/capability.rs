//! External media capabilities: demuxer, codecs and muxer.
//!
//! The pipeline never touches container bytes or codec internals itself. A
//! [`MediaBackend`] opens sources and creates muxers, and its
//! [`CodecProvider`] hands out decoders and encoders. All calls are
//! non-blocking: a codec that cannot take input right now answers
//! [`Feed::Busy`], one with nothing to give answers [`Drain::NoOutputYet`].

use crate::format::TrackFormat;
use crate::sample::Sample;
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};

/// Error reported by a capability implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed: {message}")]
pub struct CapabilityError {
    pub operation: String,
    pub message: String,
}

impl CapabilityError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Where the source media comes from.
#[derive(Debug, Clone)]
pub enum SourceHandle {
    File(PathBuf),
    Bytes(Bytes),
}

impl SourceHandle {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Bytes(bytes) => write!(f, "<{} bytes in memory>", bytes.len()),
        }
    }
}

/// Container-level metadata keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKey {
    /// Duration in milliseconds, as text.
    DurationMs,
    /// Clockwise video rotation in degrees, as text.
    Rotation,
}

/// Result of reading from the demuxer on behalf of one track.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadSample {
    Sample(Sample),
    /// The next sample in file order belongs to another selected track.
    OtherTrack,
    /// No samples remain for this track.
    EndOfStream,
}

/// Container reader shared by all track transcoders.
pub trait Demuxer: Send {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> Result<TrackFormat, CapabilityError>;

    /// Include a track in [`read_sample`](Self::read_sample) interleaving.
    fn select_track(&mut self, index: usize) -> Result<(), CapabilityError>;

    fn metadata(&self, key: MetadataKey) -> Option<String>;

    /// Take the next sample of `track` if it is next in file order.
    fn read_sample(&mut self, track: usize) -> Result<ReadSample, CapabilityError>;

    fn release(&mut self) -> Result<(), CapabilityError>;
}

/// Outcome of offering input to a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Accepted,
    /// No input slot free; offer the same sample again later.
    Busy,
}

/// Outcome of pulling output from a codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Drain {
    Sample(Sample),
    NoOutputYet,
    EndOfStream,
    /// The codec settled its output format; precedes the first sample.
    FormatChanged(TrackFormat),
}

/// A decoder or encoder instance.
pub trait Codec: Send {
    fn feed(&mut self, sample: &Sample) -> Result<Feed, CapabilityError>;

    fn drain(&mut self) -> Result<Drain, CapabilityError>;

    fn release(&mut self) -> Result<(), CapabilityError>;
}

/// An encoder the platform advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub name: String,
    pub mime: String,
    pub hardware_accelerated: bool,
}

/// Source of decoders and encoders.
pub trait CodecProvider: Send + Sync {
    fn list_encoders(&self, mime: &str) -> Vec<CodecDescriptor>;

    fn create_decoder(&self, format: &TrackFormat) -> Result<Box<dyn Codec>, CapabilityError>;

    fn create_encoder(&self, format: &TrackFormat) -> Result<Box<dyn Codec>, CapabilityError>;
}

/// Container writer.
pub trait Muxer: Send {
    fn set_orientation_hint(&mut self, degrees: u32) -> Result<(), CapabilityError>;

    /// Add a track before [`start`](Self::start); returns its index.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, CapabilityError>;

    fn start(&mut self) -> Result<(), CapabilityError>;

    fn write_sample(&mut self, track: usize, sample: &Sample) -> Result<(), CapabilityError>;

    fn stop(&mut self) -> Result<(), CapabilityError>;

    fn release(&mut self) -> Result<(), CapabilityError>;
}

/// Everything the engine needs from the platform.
pub trait MediaBackend: Send + Sync {
    fn open_source(&self, source: &SourceHandle) -> Result<Box<dyn Demuxer>, CapabilityError>;

    fn create_muxer(&self, output: &Path) -> Result<Box<dyn Muxer>, CapabilityError>;

    fn codecs(&self) -> &dyn CodecProvider;
}

/// Provider with no codecs at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCodecs;

impl CodecProvider for NoCodecs {
    fn list_encoders(&self, _mime: &str) -> Vec<CodecDescriptor> {
        Vec::new()
    }

    fn create_decoder(&self, format: &TrackFormat) -> Result<Box<dyn Codec>, CapabilityError> {
        Err(CapabilityError::new(
            "create decoder",
            format!("no decoder for {}", format.mime().unwrap_or("unknown mime")),
        ))
    }

    fn create_encoder(&self, format: &TrackFormat) -> Result<Box<dyn Codec>, CapabilityError> {
        Err(CapabilityError::new(
            "create encoder",
            format!("no encoder for {}", format.mime().unwrap_or("unknown mime")),
        ))
    }
}
