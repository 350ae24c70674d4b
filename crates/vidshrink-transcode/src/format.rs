//! Track format descriptions.
//!
//! A [`TrackFormat`] is an open key/value map, like the format objects of
//! platform media APIs: the pipeline only interprets a handful of keys and
//! carries everything else through untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known format keys.
pub mod keys {
    pub const MIME: &str = "mime";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const BIT_RATE: &str = "bitrate";
    pub const FRAME_RATE: &str = "frame-rate";
    pub const I_FRAME_INTERVAL: &str = "i-frame-interval";
    pub const COLOR_FORMAT: &str = "color-format";
    pub const SAMPLE_RATE: &str = "sample-rate";
    pub const CHANNEL_COUNT: &str = "channel-count";
    pub const DURATION_US: &str = "durationUs";
    /// Codec specific data: avcC record or SPS for video, AudioSpecificConfig for AAC.
    pub const CSD_0: &str = "csd-0";
    /// Raw sample entry box of an MP4 source track.
    pub const MP4_SAMPLE_ENTRY: &str = "mp4-sample-entry";
    /// Media timescale of an MP4 source track.
    pub const MP4_TIMESCALE: &str = "mp4-timescale";
}

pub const MIME_VIDEO_AVC: &str = "video/avc";
pub const MIME_VIDEO_HEVC: &str = "video/hevc";
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";

/// Colour format hint asking an encoder to take its input from a surface.
pub const COLOR_FORMAT_SURFACE: i64 = 0x7F00_0789;

/// A single format value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Key/value schema of one track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackFormat {
    entries: BTreeMap<String, FormatValue>,
}

impl TrackFormat {
    pub fn new(mime: impl Into<String>) -> Self {
        let mut format = Self::default();
        format.set_str(keys::MIME, mime);
        format
    }

    /// Video format with dimensions.
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self::new(mime)
            .with_int(keys::WIDTH, width as i64)
            .with_int(keys::HEIGHT, height as i64)
    }

    /// Audio format with sample rate and channel count.
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channels: u32) -> Self {
        Self::new(mime)
            .with_int(keys::SAMPLE_RATE, sample_rate as i64)
            .with_int(keys::CHANNEL_COUNT, channels as i64)
    }

    pub fn set(&mut self, key: impl Into<String>, value: FormatValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.set(key, FormatValue::Int(value));
    }

    pub fn set_float(&mut self, key: impl Into<String>, value: f64) {
        self.set(key, FormatValue::Float(value));
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, FormatValue::Str(value.into()));
    }

    pub fn set_bytes(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.set(key, FormatValue::Bytes(value.into()));
    }

    pub fn with_int(mut self, key: impl Into<String>, value: i64) -> Self {
        self.set_int(key, value);
        self
    }

    pub fn with_str(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_str(key, value);
        self
    }

    pub fn with_bytes(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.set_bytes(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FormatValue> {
        self.entries.remove(key)
    }

    /// Integer value; floats are truncated.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            FormatValue::Int(v) => Some(*v),
            FormatValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.entries.get(key)? {
            FormatValue::Float(v) => Some(*v),
            FormatValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            FormatValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.entries.get(key)? {
            FormatValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn mime(&self) -> Option<&str> {
        self.get_str(keys::MIME)
    }

    pub fn is_video(&self) -> bool {
        self.mime().is_some_and(|m| m.starts_with("video/"))
    }

    pub fn is_audio(&self) -> bool {
        self.mime().is_some_and(|m| m.starts_with("audio/"))
    }

    /// Width and height, when both are present and positive.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let width = u32::try_from(self.get_int(keys::WIDTH)?).ok()?;
        let height = u32::try_from(self.get_int(keys::HEIGHT)?).ok()?;
        (width > 0 && height > 0).then_some((width, height))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for TrackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let format = TrackFormat::video(MIME_VIDEO_AVC, 1920, 1080)
            .with_bytes(keys::CSD_0, vec![1, 2, 3]);

        assert_eq!(format.mime(), Some("video/avc"));
        assert_eq!(format.dimensions(), Some((1920, 1080)));
        assert_eq!(format.get_bytes(keys::CSD_0), Some(&[1u8, 2, 3][..]));
        assert_eq!(format.get_str(keys::WIDTH), None);
        assert!(format.is_video());
        assert!(!format.is_audio());
    }

    #[test]
    fn test_dimensions_rejects_non_positive() {
        let format = TrackFormat::new(MIME_VIDEO_AVC)
            .with_int(keys::WIDTH, 0)
            .with_int(keys::HEIGHT, 480);
        assert_eq!(format.dimensions(), None);

        let format = TrackFormat::new(MIME_VIDEO_AVC).with_int(keys::WIDTH, -640);
        assert_eq!(format.dimensions(), None);
    }

    #[test]
    fn test_numeric_coercion() {
        let mut format = TrackFormat::default();
        format.set_float(keys::FRAME_RATE, 29.97);
        format.set_int(keys::BIT_RATE, 500_000);
        assert_eq!(format.get_int(keys::FRAME_RATE), Some(29));
        assert_eq!(format.get_float(keys::BIT_RATE), Some(500_000.0));
    }

    #[test]
    fn test_display_hides_binary_values() {
        let format = TrackFormat::audio(MIME_AUDIO_AAC, 44_100, 2)
            .with_bytes(keys::CSD_0, vec![0x12, 0x10]);
        assert_eq!(
            format.to_string(),
            "{channel-count=2, csd-0=<2 bytes>, mime=audio/mp4a-latm, sample-rate=44100}"
        );
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let format = TrackFormat::new(MIME_AUDIO_AAC).with_int(keys::CHANNEL_COUNT, 1);
        let json = serde_json::to_string(&format).unwrap();
        assert_eq!(json, r#"{"channel-count":{"int":1},"mime":{"str":"audio/mp4a-latm"}}"#);
    }
}
