//! Media samples flowing through the pipeline.

use bytes::Bytes;

/// Per-sample flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub key_frame: bool,
    /// Last sample of the stream; usually carries no data.
    pub end_of_stream: bool,
    /// Codec configuration (SPS/PPS and the like) rather than media data.
    pub codec_config: bool,
}

/// A buffer of encoded or raw media plus its timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub data: Bytes,
    pub presentation_time_us: i64,
    /// Decode time when it differs from presentation time (reordered video).
    pub decode_time_us: Option<i64>,
    pub flags: SampleFlags,
}

impl Sample {
    pub fn new(data: impl Into<Bytes>, presentation_time_us: i64) -> Self {
        Self {
            data: data.into(),
            presentation_time_us,
            decode_time_us: None,
            flags: SampleFlags::default(),
        }
    }

    /// Empty end-of-stream marker.
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self {
            data: Bytes::new(),
            presentation_time_us,
            decode_time_us: None,
            flags: SampleFlags {
                end_of_stream: true,
                ..SampleFlags::default()
            },
        }
    }

    pub fn with_decode_time(mut self, decode_time_us: i64) -> Self {
        self.decode_time_us = Some(decode_time_us);
        self
    }

    pub fn with_key_frame(mut self, key_frame: bool) -> Self {
        self.flags.key_frame = key_frame;
        self
    }

    pub fn with_codec_config(mut self) -> Self {
        self.flags.codec_config = true;
        self
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.end_of_stream
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags.codec_config
    }

    /// Decode time, falling back to presentation time.
    pub fn decode_time(&self) -> i64 {
        self.decode_time_us.unwrap_or(self.presentation_time_us)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
