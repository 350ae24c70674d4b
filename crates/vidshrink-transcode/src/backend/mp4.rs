//! MP4 demuxer and muxer on top of `vidshrink-media`.
//!
//! No codecs ship with this backend: sources that need re-encoding fail with
//! `NoCodecAvailable` unless a [`CodecProvider`] is injected with
//! [`Mp4Backend::with_codecs`].

use super::{ticks_to_us, us_to_ticks};
use crate::capability::{
    CapabilityError, CodecProvider, Demuxer, MediaBackend, MetadataKey, Muxer, NoCodecs,
    ReadSample, SourceHandle,
};
use crate::format::{keys, TrackFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC, MIME_VIDEO_HEVC};
use crate::sample::Sample;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use vidshrink_media::mp4::{
    HandlerType, Mp4File, Mp4Writer, SampleDescription, SampleEntrySource, TrackConfig, TrackInfo,
};

/// Timescale for tracks built from scratch rather than copied.
const DEFAULT_VIDEO_TIMESCALE: u32 = 90_000;

/// Opens MP4 files and writes MP4 files.
#[derive(Clone)]
pub struct Mp4Backend {
    codecs: Arc<dyn CodecProvider>,
}

impl Mp4Backend {
    pub fn new() -> Self {
        Self {
            codecs: Arc::new(NoCodecs),
        }
    }

    /// Use `codecs` for decoding and encoding.
    pub fn with_codecs(codecs: Arc<dyn CodecProvider>) -> Self {
        Self { codecs }
    }
}

impl Default for Mp4Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Mp4Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4Backend").finish_non_exhaustive()
    }
}

impl MediaBackend for Mp4Backend {
    fn open_source(&self, source: &SourceHandle) -> Result<Box<dyn Demuxer>, CapabilityError> {
        let demuxer = match source {
            SourceHandle::File(path) => {
                let file = File::open(path)
                    .map_err(|e| CapabilityError::new("open source", format!("{}: {e}", path.display())))?;
                Mp4Demuxer::new(Box::new(BufReader::new(file)))?
            }
            SourceHandle::Bytes(bytes) => Mp4Demuxer::new(Box::new(Cursor::new(bytes.clone())))?,
        };
        Ok(Box::new(demuxer))
    }

    fn create_muxer(&self, output: &Path) -> Result<Box<dyn Muxer>, CapabilityError> {
        Ok(Box::new(Mp4Muxer::create(output)?))
    }

    fn codecs(&self) -> &dyn CodecProvider {
        self.codecs.as_ref()
    }
}

trait SourceReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> SourceReader for T {}

fn media_error(operation: &str, err: vidshrink_media::Error) -> CapabilityError {
    CapabilityError::new(operation, err.to_string())
}

/// Mime type for a track, from its handler and sample entry fourcc.
fn track_mime(track: &TrackInfo) -> String {
    let fourcc = track.fourcc().unwrap_or(*b"    ");
    match (track.handler_type, &fourcc) {
        (HandlerType::Video, b"avc1" | b"avc3") => MIME_VIDEO_AVC.to_string(),
        (HandlerType::Video, b"hvc1" | b"hev1") => MIME_VIDEO_HEVC.to_string(),
        (HandlerType::Audio, b"mp4a") => MIME_AUDIO_AAC.to_string(),
        (handler, code) => {
            let kind = match handler {
                HandlerType::Video => "video",
                HandlerType::Audio => "audio",
                HandlerType::Text => "text",
                _ => "application",
            };
            let name = String::from_utf8_lossy(code).trim().to_ascii_lowercase();
            format!("{kind}/{name}")
        }
    }
}

fn track_format(track: &TrackInfo) -> TrackFormat {
    let mime = track_mime(track);
    let mut format = match track.handler_type {
        HandlerType::Audio => TrackFormat::audio(
            mime,
            track.sample_rate.unwrap_or(0),
            track.channels.unwrap_or(0) as u32,
        ),
        _ => TrackFormat::new(mime),
    };
    if let (Some(width), Some(height)) = (track.width, track.height) {
        if track.handler_type.is_video() {
            format.set_int(keys::WIDTH, width as i64);
            format.set_int(keys::HEIGHT, height as i64);
        }
    }
    if let Some(csd) = &track.codec_data {
        format.set_bytes(keys::CSD_0, csd.clone());
    }
    if let Some(description) = &track.sample_description {
        format.set_bytes(keys::MP4_SAMPLE_ENTRY, description.bytes.clone());
    }
    format.set_int(keys::MP4_TIMESCALE, track.timescale as i64);
    if track.duration > 0 {
        format.set_int(keys::DURATION_US, ticks_to_us(track.duration, track.timescale));
    }
    format
}

/// Reads samples of the selected tracks in file order.
pub struct Mp4Demuxer {
    reader: Option<Box<dyn SourceReader>>,
    file: Mp4File,
    formats: Vec<TrackFormat>,
    selected: Vec<bool>,
    cursors: Vec<usize>,
}

impl Mp4Demuxer {
    fn new(mut reader: Box<dyn SourceReader>) -> Result<Self, CapabilityError> {
        let file = Mp4File::parse(&mut reader).map_err(|e| media_error("parse source", e))?;
        let formats: Vec<TrackFormat> = file.tracks.iter().map(track_format).collect();
        debug!(
            tracks = file.tracks.len(),
            duration_ms = ?file.duration_ms(),
            faststart = file.has_faststart,
            "opened mp4 source"
        );
        let count = file.tracks.len();
        Ok(Self {
            reader: Some(reader),
            file,
            formats,
            selected: vec![false; count],
            cursors: vec![0; count],
        })
    }

    /// Selected track whose next sample comes first in the file.
    fn next_in_file_order(&self) -> Option<usize> {
        self.file
            .tracks
            .iter()
            .enumerate()
            .filter(|(index, _)| self.selected[*index])
            .filter_map(|(index, track)| {
                track
                    .sample_table
                    .samples
                    .get(self.cursors[index])
                    .map(|entry| (entry.offset, index))
            })
            .min()
            .map(|(_, index)| index)
    }

    fn check_track(&self, index: usize) -> Result<(), CapabilityError> {
        if index < self.file.tracks.len() {
            Ok(())
        } else {
            Err(CapabilityError::new(
                "select track",
                format!("track {index} out of range ({} tracks)", self.file.tracks.len()),
            ))
        }
    }
}

impl Demuxer for Mp4Demuxer {
    fn track_count(&self) -> usize {
        self.file.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat, CapabilityError> {
        self.formats
            .get(index)
            .cloned()
            .ok_or_else(|| CapabilityError::new("track format", format!("no track {index}")))
    }

    fn select_track(&mut self, index: usize) -> Result<(), CapabilityError> {
        self.check_track(index)?;
        self.selected[index] = true;
        Ok(())
    }

    fn metadata(&self, key: MetadataKey) -> Option<String> {
        match key {
            MetadataKey::DurationMs => self.file.duration_ms().map(|ms| ms.to_string()),
            MetadataKey::Rotation => Some(self.file.rotation().to_string()),
        }
    }

    fn read_sample(&mut self, track: usize) -> Result<ReadSample, CapabilityError> {
        self.check_track(track)?;
        if !self.selected[track] {
            return Err(CapabilityError::new("read sample", format!("track {track} not selected")));
        }
        let timescale = self.file.tracks[track].timescale;
        let Some(entry) = self.file.tracks[track]
            .sample_table
            .samples
            .get(self.cursors[track])
            .copied()
        else {
            return Ok(ReadSample::EndOfStream);
        };
        if self.next_in_file_order() != Some(track) {
            return Ok(ReadSample::OtherTrack);
        }

        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| CapabilityError::new("read sample", "demuxer released"))?;
        let mut data = vec![0u8; entry.size as usize];
        reader
            .seek(SeekFrom::Start(entry.offset))
            .and_then(|_| reader.read_exact(&mut data))
            .map_err(|e| CapabilityError::new("read sample", e.to_string()))?;
        self.cursors[track] += 1;

        let mut sample = Sample::new(data, ticks_to_us(entry.pts(), timescale))
            .with_key_frame(entry.is_keyframe);
        if entry.cts_offset != 0 {
            sample = sample.with_decode_time(ticks_to_us(entry.dts, timescale));
        }
        Ok(ReadSample::Sample(sample))
    }

    fn release(&mut self) -> Result<(), CapabilityError> {
        self.reader = None;
        Ok(())
    }
}

/// Output track bookkeeping.
#[derive(Debug, Clone, Copy)]
struct OutputTrack {
    timescale: u32,
}

/// Writes a progressive MP4 file.
pub struct Mp4Muxer {
    path: PathBuf,
    writer: Option<Mp4Writer<BufWriter<File>>>,
    tracks: Vec<OutputTrack>,
    started: bool,
}

impl Mp4Muxer {
    pub fn create(path: &Path) -> Result<Self, CapabilityError> {
        let file = File::create(path)
            .map_err(|e| CapabilityError::new("create muxer", format!("{}: {e}", path.display())))?;
        let writer = Mp4Writer::new(BufWriter::new(file)).map_err(|e| media_error("create muxer", e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            tracks: Vec::new(),
            started: false,
        })
    }

    fn writer(&mut self, operation: &str) -> Result<&mut Mp4Writer<BufWriter<File>>, CapabilityError> {
        self.writer
            .as_mut()
            .ok_or_else(|| CapabilityError::new(operation, "muxer already stopped"))
    }
}

/// Track configuration for a determined format.
///
/// Formats read from an MP4 carry their sample entry and timescale, so a
/// copied track is written with the exact original description.
fn track_config(format: &TrackFormat) -> Result<TrackConfig, CapabilityError> {
    let (width, height) = format.dimensions().unwrap_or((0, 0));
    let sample_rate = format.get_int(keys::SAMPLE_RATE).unwrap_or(0).max(0) as u32;
    let channels = format.get_int(keys::CHANNEL_COUNT).unwrap_or(0).clamp(0, u16::MAX as i64) as u16;
    let timescale = format
        .get_int(keys::MP4_TIMESCALE)
        .and_then(|ts| u32::try_from(ts).ok())
        .filter(|ts| *ts > 0);

    let copied = format
        .get_bytes(keys::MP4_SAMPLE_ENTRY)
        .filter(|entry| entry.len() >= 8)
        .map(|entry| {
            let mut fourcc = [0u8; 4];
            fourcc.copy_from_slice(&entry[4..8]);
            SampleEntrySource::Copy(SampleDescription {
                fourcc,
                bytes: entry.to_vec(),
            })
        });

    let mime = format.mime().unwrap_or_default();
    let csd = || {
        format
            .get_bytes(keys::CSD_0)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| CapabilityError::new("add track", format!("{mime} format has no csd-0")))
    };

    if format.is_video() {
        let entry = match copied {
            Some(entry) => entry,
            None if mime == MIME_VIDEO_AVC => SampleEntrySource::Avc { config: csd()? },
            None => return Err(CapabilityError::new("add track", format!("cannot mux {mime}"))),
        };
        let timescale = timescale.unwrap_or(DEFAULT_VIDEO_TIMESCALE);
        Ok(TrackConfig::video(width, height, timescale, entry))
    } else if format.is_audio() {
        let entry = match copied {
            Some(entry) => entry,
            None if mime == MIME_AUDIO_AAC => SampleEntrySource::Aac { config: csd()? },
            None => return Err(CapabilityError::new("add track", format!("cannot mux {mime}"))),
        };
        let timescale = timescale
            .or((sample_rate > 0).then_some(sample_rate))
            .ok_or_else(|| CapabilityError::new("add track", "audio format has no sample rate"))?;
        Ok(TrackConfig::audio(sample_rate, channels, timescale, entry))
    } else {
        Err(CapabilityError::new("add track", format!("cannot mux {mime}")))
    }
}

impl Muxer for Mp4Muxer {
    fn set_orientation_hint(&mut self, degrees: u32) -> Result<(), CapabilityError> {
        if self.started {
            return Err(CapabilityError::new("set orientation hint", "muxer already started"));
        }
        self.writer("set orientation hint")?
            .set_rotation((degrees % 360) as u16);
        Ok(())
    }

    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, CapabilityError> {
        if self.started {
            return Err(CapabilityError::new("add track", "muxer already started"));
        }
        let config = track_config(format)?;
        let timescale = config.timescale;
        let index = self
            .writer("add track")?
            .add_track(config)
            .map_err(|e| media_error("add track", e))?;
        self.tracks.push(OutputTrack { timescale });
        debug!(index, %format, "mp4 track added");
        Ok(index)
    }

    fn start(&mut self) -> Result<(), CapabilityError> {
        if self.tracks.is_empty() {
            return Err(CapabilityError::new("start muxer", "no tracks added"));
        }
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &Sample) -> Result<(), CapabilityError> {
        if !self.started {
            return Err(CapabilityError::new("write sample", "muxer not started"));
        }
        if sample.is_end_of_stream() && sample.is_empty() {
            return Ok(());
        }
        let OutputTrack { timescale } = *self
            .tracks
            .get(track)
            .ok_or_else(|| CapabilityError::new("write sample", format!("no track {track}")))?;

        let dts = us_to_ticks(sample.decode_time(), timescale);
        let pts = us_to_ticks(sample.presentation_time_us, timescale);
        let cts_offset = i32::try_from(pts - dts)
            .map_err(|_| CapabilityError::new("write sample", "composition offset out of range"))?;
        self.writer("write sample")?
            .write_sample(track, &sample.data, dts.max(0) as u64, cts_offset, sample.flags.key_frame)
            .map_err(|e| media_error("write sample", e))
    }

    fn stop(&mut self) -> Result<(), CapabilityError> {
        if !self.started {
            return Err(CapabilityError::new("stop muxer", "muxer never started"));
        }
        let writer = self
            .writer
            .take()
            .ok_or_else(|| CapabilityError::new("stop muxer", "muxer already stopped"))?;
        writer.finish().map_err(|e| media_error("stop muxer", e))?;
        info!(path = %self.path.display(), tracks = self.tracks.len(), "mp4 written");
        Ok(())
    }

    fn release(&mut self) -> Result<(), CapabilityError> {
        // An unfinished writer leaves an incomplete file behind.
        self.writer = None;
        Ok(())
    }
}
