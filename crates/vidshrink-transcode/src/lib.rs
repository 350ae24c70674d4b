//! # vidshrink-transcode
//!
//! Shrinks a video + audio container: the video track is re-encoded to a
//! smaller resolution and bitrate when it is large enough to be worth it,
//! the audio track is copied untouched.
//!
//! The demuxer, codecs and muxer are external capabilities ([`capability`]).
//! This crate provides the orchestration around them:
//!
//! - **[`metadata`]** -- duration, rotation and the first video/audio track.
//! - **[`policy`]** -- pass-through vs re-encode and the target format.
//! - **[`transcoder`]** -- per-track state machines (`Active`, `PassThrough`).
//! - **[`DeferredMuxer`]** -- buffers samples until every track's output
//!   format is known, then starts the real muxer and flushes in order.
//! - **[`PipelineDriver`]** -- steps the transcoders, backs off when idle,
//!   reports progress and honours cancellation.
//! - **[`TranscodeEngine`]** -- one synchronous transcode with guaranteed
//!   resource release.
//! - **[`TranscodeManager`]** -- runs the engine on a blocking worker and
//!   hands back a cancellable [`TranscodeTask`].
//!
//! ## Features
//!
//! - `mp4` (default) -- [`backend::Mp4Backend`], a pure Rust MP4 demuxer and
//!   muxer without codecs.

pub mod capability;
pub mod config;
pub mod driver;
pub mod engine;
mod error;
pub mod format;
pub mod manager;
pub mod metadata;
pub mod muxer;
pub mod policy;
pub mod progress;
pub mod sample;
pub mod transcoder;

#[cfg(feature = "mp4")]
pub mod backend;

// Re-export key types at the crate root.
pub use capability::{
    CapabilityError, Codec, CodecDescriptor, CodecProvider, Demuxer, Drain, Feed, MediaBackend,
    MetadataKey, Muxer, NoCodecs, ReadSample, SourceHandle,
};
pub use config::{PipelineSettings, TranscodeSettings};
pub use driver::PipelineDriver;
pub use engine::{Attempt, TranscodeEngine};
pub use error::{Failure, FailureReason, Result, TranscodeError, TranscodeOutcome};
pub use format::TrackFormat;
pub use manager::{TranscodeManager, TranscodeTask};
pub use muxer::{DeferredMuxer, TrackRole};
pub use policy::{TargetSettings, VideoPlan};
pub use progress::{Progress, ProgressSender};
pub use sample::{Sample, SampleFlags};
pub use transcoder::{TrackTranscoder, TranscoderState};
