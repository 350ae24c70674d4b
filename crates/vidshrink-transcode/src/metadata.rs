//! Track metadata resolution.

use crate::capability::{Demuxer, MetadataKey};
use crate::error::{Result, TranscodeError};
use crate::format::TrackFormat;
use tracing::{debug, warn};

/// One track picked from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedTrack {
    pub index: usize,
    pub format: TrackFormat,
}

/// What the pipeline needs to know about a source before setting up.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    /// Overall duration; `None` when absent or unparsable.
    pub duration_us: Option<i64>,
    /// Clockwise rotation in degrees, normalized to `0..360`.
    pub rotation: u32,
    pub video: SelectedTrack,
    pub audio: SelectedTrack,
    /// Tracks present in the source that will not be copied.
    pub ignored_tracks: usize,
}

/// Duration metadata is milliseconds as text; anything else is unknown.
pub fn parse_duration_us(value: Option<&str>) -> Option<i64> {
    let ms: i64 = value?.trim().parse().ok()?;
    (ms > 0).then(|| ms.saturating_mul(1000))
}

/// Rotation metadata is degrees as text; unparsable means no rotation.
pub fn parse_rotation(value: Option<&str>) -> u32 {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map_or(0, |deg| deg.rem_euclid(360) as u32)
}

/// Read duration and rotation and pick the first video and first audio track.
pub fn resolve(demuxer: &dyn Demuxer) -> Result<SourceMetadata> {
    let duration_us = parse_duration_us(demuxer.metadata(MetadataKey::DurationMs).as_deref());
    let rotation = parse_rotation(demuxer.metadata(MetadataKey::Rotation).as_deref());

    let mut video = None;
    let mut audio = None;
    let count = demuxer.track_count();
    for index in 0..count {
        let format = demuxer
            .track_format(index)
            .map_err(TranscodeError::UnreadableSource)?;
        let slot = if format.is_video() {
            &mut video
        } else if format.is_audio() {
            &mut audio
        } else {
            continue;
        };
        if slot.is_none() {
            *slot = Some(SelectedTrack { index, format });
        }
    }

    let video = video.ok_or(TranscodeError::NoMatchingTrack { kind: "video" })?;
    let audio = audio.ok_or(TranscodeError::NoMatchingTrack { kind: "audio" })?;
    let ignored_tracks = count - 2;
    if ignored_tracks > 0 {
        warn!(
            ignored_tracks,
            "source has extra tracks; only the first video and first audio track are kept"
        );
    }
    debug!(
        ?duration_us,
        rotation,
        video_track = video.index,
        audio_track = audio.index,
        "resolved source metadata"
    );

    Ok(SourceMetadata {
        duration_us,
        rotation,
        video,
        audio,
        ignored_tracks,
    })
}
