//! MP4 container parsing and writing.
//!
//! Reading resolves every track of a file into a flat sample table plus the
//! raw sample description; writing produces a progressive MP4 from samples
//! appended in any interleaving.

mod atoms;
mod reader;
mod sample_table;
mod writer;

pub use atoms::{Atom, AtomType, HandlerType, SampleDescription, TrackInfo};
pub use reader::{esds_decoder_config, Mp4Reader};
pub use sample_table::{SampleEntry, SampleTable, SampleTableBuilder};
pub use writer::{Mp4Writer, SampleEntrySource, TrackConfig};

use crate::Result;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Parsed MP4 file.
#[derive(Debug)]
pub struct Mp4File {
    /// Duration in movie timescale units.
    pub duration: u64,
    /// Movie timescale (time units per second).
    pub timescale: u32,
    /// Every track in moov order.
    pub tracks: Vec<TrackInfo>,
    /// Whether moov precedes mdat.
    pub has_faststart: bool,
}

impl Mp4File {
    /// Parse an MP4 file from the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::parse(&mut reader)
    }

    /// Parse an MP4 file from a reader.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        Mp4Reader::new(reader).parse()
    }

    /// Get the duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }

    /// Movie duration in milliseconds, `None` when the header carries none.
    pub fn duration_ms(&self) -> Option<u64> {
        if self.timescale == 0 || self.duration == 0 {
            return None;
        }
        Some((self.duration as u128 * 1000 / self.timescale as u128) as u64)
    }

    pub fn first_video(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.handler_type.is_video())
    }

    pub fn first_audio(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.handler_type.is_audio())
    }

    /// Rotation of the first video track.
    pub fn rotation(&self) -> u16 {
        self.first_video().map_or(0, |t| t.rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(duration: u64, timescale: u32, tracks: Vec<TrackInfo>) -> Mp4File {
        Mp4File {
            duration,
            timescale,
            tracks,
            has_faststart: false,
        }
    }

    #[test]
    fn test_mp4_file_duration() {
        let mp4 = file(120_000, 1000, vec![]);
        assert!((mp4.duration_secs() - 120.0).abs() < 0.001);
        assert_eq!(mp4.duration_ms(), Some(120_000));
    }

    #[test]
    fn test_mp4_file_zero_timescale() {
        let mp4 = file(120_000, 0, vec![]);
        assert_eq!(mp4.duration_secs(), 0.0);
        assert_eq!(mp4.duration_ms(), None);
    }

    #[test]
    fn test_duration_ms_from_other_timescale() {
        let mp4 = file(90_000 * 7, 90_000, vec![]);
        assert_eq!(mp4.duration_ms(), Some(7000));
    }

    #[test]
    fn test_first_tracks_by_handler() {
        let mut audio = TrackInfo::new(1);
        audio.handler_type = HandlerType::Audio;
        let mut video = TrackInfo::new(2);
        video.handler_type = HandlerType::Video;
        video.rotation = 90;
        let mut second_video = TrackInfo::new(3);
        second_video.handler_type = HandlerType::Video;

        let mp4 = file(0, 1000, vec![audio, video, second_video]);
        assert_eq!(mp4.first_video().map(|t| t.track_id), Some(2));
        assert_eq!(mp4.first_audio().map(|t| t.track_id), Some(1));
        assert_eq!(mp4.rotation(), 90);
    }
}
