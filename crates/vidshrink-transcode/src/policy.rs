//! Format decision policy.
//!
//! Decides whether the video track is worth re-encoding and, if so, what the
//! encoder should produce. Audio is always copied.

use crate::capability::CodecProvider;
use crate::error::{Result, TranscodeError};
use crate::format::{keys, TrackFormat, COLOR_FORMAT_SURFACE, MIME_AUDIO_AAC, MIME_VIDEO_AVC};
use crate::muxer::TrackRole;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// AVC profile_idc of the Baseline profile.
pub const AVC_PROFILE_BASELINE: u8 = 66;

/// Target of a re-encode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    /// Longer edge of the output.
    pub width: u32,
    /// Shorter edge of the output.
    pub height: u32,
    /// Bits per second.
    pub bitrate: u32,
    pub frame_rate: u32,
    pub key_frame_interval_secs: u32,
    pub mime: String,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            bitrate: 500_000,
            frame_rate: 30,
            key_frame_interval_secs: 3,
            mime: MIME_VIDEO_AVC.to_string(),
        }
    }
}

/// What to do with the video track.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoPlan {
    PassThrough,
    /// Re-encode to this format.
    Reencode(TrackFormat),
}

impl VideoPlan {
    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough)
    }
}

/// Output dimensions keeping the source orientation: landscape and square
/// sources get `width x height`, portrait sources the swapped pair.
pub fn target_dimensions(source_width: u32, source_height: u32, target: &TargetSettings) -> (u32, u32) {
    if source_width >= source_height {
        (target.width, target.height)
    } else {
        (target.height, target.width)
    }
}

/// Decide pass-through or re-encode for a video format, without looking at
/// which encoders exist.
pub fn plan_video(input: &TrackFormat, target: &TargetSettings) -> Result<VideoPlan> {
    let (width, height) = input.dimensions().ok_or(TranscodeError::MissingFormatKey {
        kind: "video",
        key: keys::WIDTH,
    })?;
    let longer = width.max(height);
    let shorter = width.min(height);

    if shorter <= target.height || longer <= target.width {
        debug!(width, height, "source already small, passing video through");
        return Ok(VideoPlan::PassThrough);
    }

    let (out_width, out_height) = target_dimensions(width, height, target);
    let output = TrackFormat::video(target.mime.clone(), out_width, out_height)
        .with_int(keys::BIT_RATE, target.bitrate as i64)
        .with_int(keys::FRAME_RATE, target.frame_rate as i64)
        .with_int(keys::I_FRAME_INTERVAL, target.key_frame_interval_secs as i64)
        .with_int(keys::COLOR_FORMAT, COLOR_FORMAT_SURFACE);
    Ok(VideoPlan::Reencode(output))
}

/// [`plan_video`], then make sure a re-encode can actually happen.
pub fn decide_video(
    input: &TrackFormat,
    target: &TargetSettings,
    codecs: &dyn CodecProvider,
) -> Result<VideoPlan> {
    let plan = plan_video(input, target)?;
    if let VideoPlan::Reencode(output) = &plan {
        let encoders = codecs.list_encoders(&target.mime);
        let Some(encoder) = encoders.first() else {
            return Err(TranscodeError::NoCodecAvailable {
                mime: target.mime.clone(),
            });
        };
        info!(encoder = %encoder.name, format = %output, "re-encoding video");
    }
    Ok(plan)
}

/// profile_idc from codec specific data, either an avcC record or an
/// Annex-B stream starting with the SPS.
pub fn avc_profile_idc(csd: &[u8]) -> Option<u8> {
    if csd.first() == Some(&1) {
        // avcC: configurationVersion, AVCProfileIndication, ...
        return csd.get(1).copied();
    }

    let start = if csd.starts_with(&[0, 0, 0, 1]) {
        4
    } else if csd.starts_with(&[0, 0, 1]) {
        3
    } else {
        return None;
    };
    let nal_header = *csd.get(start)?;
    if nal_header & 0x1F != 7 {
        return None;
    }
    csd.get(start + 1).copied()
}

/// Output requirements checked before the muxer starts: Baseline AVC video
/// and AAC audio.
pub fn validate_output_format(role: TrackRole, format: &TrackFormat) -> Result<()> {
    let mime = format.mime().unwrap_or_default();
    match role {
        TrackRole::Video => {
            if mime != MIME_VIDEO_AVC {
                return Err(TranscodeError::invalid_output(
                    role,
                    format!("expected {MIME_VIDEO_AVC}, got {mime}"),
                ));
            }
            let profile = format
                .get_bytes(keys::CSD_0)
                .and_then(avc_profile_idc)
                .ok_or_else(|| TranscodeError::invalid_output(role, "no SPS in csd-0"))?;
            if profile != AVC_PROFILE_BASELINE {
                return Err(TranscodeError::invalid_output(
                    role,
                    format!("non-baseline AVC profile {profile}"),
                ));
            }
        }
        TrackRole::Audio => {
            if mime != MIME_AUDIO_AAC {
                return Err(TranscodeError::invalid_output(
                    role,
                    format!("expected {MIME_AUDIO_AAC}, got {mime}"),
                ));
            }
        }
    }
    Ok(())
}
