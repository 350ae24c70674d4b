//! Progressive MP4 writer.
//!
//! Layout: `ftyp`, then one `mdat` that grows as samples arrive, then `moov`
//! once [`Mp4Writer::finish`] is called. The mdat header always uses the
//! 64-bit size form so it can be patched in place whatever the final size.
//! Every sample is its own chunk.

use super::atoms::rotation_matrix;
use super::{HandlerType, SampleDescription};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use std::io::{Seek, SeekFrom, Write};

const MOVIE_TIMESCALE: u32 = 1000;

/// Sample description to write for a track.
#[derive(Debug, Clone)]
pub enum SampleEntrySource {
    /// Reuse a sample entry read from another file.
    Copy(SampleDescription),
    /// Build an `avc1` entry around an avcC record.
    Avc { config: Vec<u8> },
    /// Build an `mp4a` entry around an AudioSpecificConfig.
    Aac { config: Vec<u8> },
}

/// Static description of one output track.
#[derive(Debug, Clone)]
pub struct TrackConfig {
    pub handler: HandlerType,
    pub timescale: u32,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub entry: SampleEntrySource,
}

impl TrackConfig {
    pub fn video(width: u32, height: u32, timescale: u32, entry: SampleEntrySource) -> Self {
        Self {
            handler: HandlerType::Video,
            timescale,
            width,
            height,
            sample_rate: 0,
            channels: 0,
            entry,
        }
    }

    pub fn audio(sample_rate: u32, channels: u16, timescale: u32, entry: SampleEntrySource) -> Self {
        Self {
            handler: HandlerType::Audio,
            timescale,
            width: 0,
            height: 0,
            sample_rate,
            channels,
            entry,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WrittenSample {
    offset: u64,
    size: u32,
    dts: u64,
    cts_offset: i32,
    is_keyframe: bool,
}

#[derive(Debug)]
struct TrackState {
    config: TrackConfig,
    samples: Vec<WrittenSample>,
}

impl TrackState {
    /// Per-sample durations from consecutive decode times; the last sample
    /// repeats the previous delta.
    fn durations(&self) -> Vec<u32> {
        let mut durations: Vec<u32> = self
            .samples
            .windows(2)
            .map(|w| w[1].dts.saturating_sub(w[0].dts).min(u32::MAX as u64) as u32)
            .collect();
        if !self.samples.is_empty() {
            durations.push(durations.last().copied().unwrap_or(0));
        }
        durations
    }

    fn duration(&self) -> u64 {
        self.durations().iter().map(|&d| d as u64).sum()
    }
}

/// Writes a progressive (non-fragmented) MP4 file.
pub struct Mp4Writer<W: Write + Seek> {
    inner: W,
    mdat_start: u64,
    position: u64,
    tracks: Vec<TrackState>,
    rotation: u16,
}

impl<W: Write + Seek> Mp4Writer<W> {
    /// Write `ftyp` and the mdat header.
    pub fn new(mut inner: W) -> Result<Self> {
        let mut head = BytesMut::with_capacity(48);
        write_ftyp(&mut head);
        let mdat_start = head.len() as u64;
        head.put_u32(1);
        head.put_slice(b"mdat");
        head.put_u64(0); // patched in finish()

        inner.write_all(&head)?;
        Ok(Self {
            inner,
            mdat_start,
            position: head.len() as u64,
            tracks: Vec::new(),
            rotation: 0,
        })
    }

    /// Clockwise rotation stored in the video track header.
    pub fn set_rotation(&mut self, degrees: u16) {
        self.rotation = degrees;
    }

    /// Add a track and return its index for [`write_sample`](Self::write_sample).
    pub fn add_track(&mut self, config: TrackConfig) -> Result<usize> {
        if config.timescale == 0 {
            return Err(Error::invalid_state("track timescale must be non-zero"));
        }
        self.tracks.push(TrackState {
            config,
            samples: Vec::new(),
        });
        Ok(self.tracks.len() - 1)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Append one sample. Times are in the track's timescale.
    pub fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        dts: u64,
        cts_offset: i32,
        is_keyframe: bool,
    ) -> Result<()> {
        let state = self
            .tracks
            .get_mut(track)
            .ok_or_else(|| Error::invalid_state(format!("unknown track {track}")))?;
        let size = u32::try_from(data.len())
            .map_err(|_| Error::unsupported(format!("sample of {} bytes", data.len())))?;

        self.inner.write_all(data)?;
        state.samples.push(WrittenSample {
            offset: self.position,
            size,
            dts,
            cts_offset,
            is_keyframe,
        });
        self.position += data.len() as u64;
        Ok(())
    }

    /// Patch the mdat size, append `moov` and hand back the sink.
    pub fn finish(mut self) -> Result<W> {
        let mdat_size = self.position - self.mdat_start;
        self.inner.seek(SeekFrom::Start(self.mdat_start + 8))?;
        self.inner.write_all(&mdat_size.to_be_bytes())?;
        self.inner.seek(SeekFrom::Start(self.position))?;

        let mut moov = BytesMut::with_capacity(4096);
        self.write_moov(&mut moov);
        self.inner.write_all(&moov)?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn write_moov(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, b"moov");

        let movie_duration = self
            .tracks
            .iter()
            .map(|t| t.duration() * MOVIE_TIMESCALE as u64 / t.config.timescale as u64)
            .max()
            .unwrap_or(0);
        write_mvhd(buf, movie_duration, self.tracks.len() as u32 + 1);

        for (i, track) in self.tracks.iter().enumerate() {
            let rotation = if track.config.handler.is_video() {
                self.rotation
            } else {
                0
            };
            write_trak(buf, track, i as u32 + 1, rotation);
        }

        end_box(buf, start);
    }
}

fn begin_box(buf: &mut BytesMut, fourcc: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0); // placeholder size
    buf.put_slice(fourcc);
    start
}

fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn full_box(buf: &mut BytesMut, fourcc: &[u8; 4], version: u8, flags: u32) -> usize {
    let start = begin_box(buf, fourcc);
    buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
    start
}

fn write_ftyp(buf: &mut BytesMut) {
    let start = begin_box(buf, b"ftyp");
    buf.put_slice(b"isom"); // major brand
    buf.put_u32(0x200); // minor version
    for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
        buf.put_slice(brand);
    }
    end_box(buf, start);
}

fn write_matrix(buf: &mut BytesMut, rotation: u16) {
    let [a, b, c, d] = rotation_matrix(rotation);
    for value in [a, b, 0, c, d, 0, 0, 0, 0x4000_0000] {
        buf.put_i32(value);
    }
}

fn write_mvhd(buf: &mut BytesMut, duration: u64, next_track_id: u32) {
    let start = full_box(buf, b"mvhd", 1, 0);
    buf.put_u64(0); // creation time
    buf.put_u64(0); // modification time
    buf.put_u32(MOVIE_TIMESCALE);
    buf.put_u64(duration);
    buf.put_u32(0x0001_0000); // rate = 1.0
    buf.put_u16(0x0100); // volume = 1.0
    buf.put_u16(0);
    buf.put_u64(0);
    write_matrix(buf, 0);
    buf.put_slice(&[0; 24]); // pre_defined
    buf.put_u32(next_track_id);
    end_box(buf, start);
}

fn write_trak(buf: &mut BytesMut, track: &TrackState, track_id: u32, rotation: u16) {
    let start = begin_box(buf, b"trak");
    let config = &track.config;
    let is_video = config.handler.is_video();
    let media_duration = track.duration();

    let tkhd = full_box(buf, b"tkhd", 1, 0x3); // enabled, in movie
    buf.put_u64(0);
    buf.put_u64(0);
    buf.put_u32(track_id);
    buf.put_u32(0);
    buf.put_u64(media_duration * MOVIE_TIMESCALE as u64 / config.timescale as u64);
    buf.put_u64(0);
    buf.put_u16(0); // layer
    buf.put_u16(0); // alternate group
    buf.put_u16(if config.handler.is_audio() { 0x0100 } else { 0 });
    buf.put_u16(0);
    write_matrix(buf, rotation);
    let (w, h) = if is_video { (config.width, config.height) } else { (0, 0) };
    buf.put_u32(w << 16);
    buf.put_u32(h << 16);
    end_box(buf, tkhd);

    let mdia = begin_box(buf, b"mdia");

    let mdhd = full_box(buf, b"mdhd", 1, 0);
    buf.put_u64(0);
    buf.put_u64(0);
    buf.put_u32(config.timescale);
    buf.put_u64(media_duration);
    buf.put_u16(0x55C4); // language: und
    buf.put_u16(0);
    end_box(buf, mdhd);

    let (name, media_header) = match config.handler {
        HandlerType::Video => (&b"VideoHandler"[..], b"vmhd"),
        HandlerType::Audio => (&b"SoundHandler"[..], b"smhd"),
        _ => (&b"DataHandler"[..], b"nmhd"),
    };
    let hdlr = full_box(buf, b"hdlr", 0, 0);
    buf.put_u32(0); // pre_defined
    buf.put_slice(&config.handler.code());
    buf.put_slice(&[0; 12]);
    buf.put_slice(name);
    buf.put_u8(0);
    end_box(buf, hdlr);

    let minf = begin_box(buf, b"minf");
    match media_header {
        b"vmhd" => {
            let vmhd = full_box(buf, b"vmhd", 0, 1);
            buf.put_u64(0); // graphics mode + opcolor
            end_box(buf, vmhd);
        }
        b"smhd" => {
            let smhd = full_box(buf, b"smhd", 0, 0);
            buf.put_u32(0); // balance + reserved
            end_box(buf, smhd);
        }
        _ => {
            let nmhd = full_box(buf, b"nmhd", 0, 0);
            end_box(buf, nmhd);
        }
    }

    let dinf = begin_box(buf, b"dinf");
    let dref = full_box(buf, b"dref", 0, 0);
    buf.put_u32(1);
    let url = full_box(buf, b"url ", 0, 1); // self-contained
    end_box(buf, url);
    end_box(buf, dref);
    end_box(buf, dinf);

    write_stbl(buf, track);

    end_box(buf, minf);
    end_box(buf, mdia);
    end_box(buf, start);
}

fn write_stbl(buf: &mut BytesMut, track: &TrackState) {
    let start = begin_box(buf, b"stbl");
    let samples = &track.samples;

    let stsd = full_box(buf, b"stsd", 0, 0);
    buf.put_u32(1);
    write_sample_entry(buf, &track.config);
    end_box(buf, stsd);

    let stts = full_box(buf, b"stts", 0, 0);
    let runs = run_lengths(track.durations());
    buf.put_u32(runs.len() as u32);
    for (count, delta) in runs {
        buf.put_u32(count);
        buf.put_u32(delta);
    }
    end_box(buf, stts);

    if samples.iter().any(|s| s.cts_offset != 0) {
        let ctts = full_box(buf, b"ctts", 1, 0);
        let runs = run_lengths(samples.iter().map(|s| s.cts_offset).collect());
        buf.put_u32(runs.len() as u32);
        for (count, offset) in runs {
            buf.put_u32(count);
            buf.put_i32(offset);
        }
        end_box(buf, ctts);
    }

    if !samples.iter().all(|s| s.is_keyframe) {
        let stss = full_box(buf, b"stss", 0, 0);
        let sync: Vec<u32> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_keyframe)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        buf.put_u32(sync.len() as u32);
        for number in sync {
            buf.put_u32(number);
        }
        end_box(buf, stss);
    }

    let stsc = full_box(buf, b"stsc", 0, 0);
    if samples.is_empty() {
        buf.put_u32(0);
    } else {
        buf.put_u32(1);
        buf.put_u32(1); // first chunk
        buf.put_u32(1); // samples per chunk
        buf.put_u32(1); // sample description index
    }
    end_box(buf, stsc);

    let stsz = full_box(buf, b"stsz", 0, 0);
    buf.put_u32(0);
    buf.put_u32(samples.len() as u32);
    for sample in samples {
        buf.put_u32(sample.size);
    }
    end_box(buf, stsz);

    if samples.iter().any(|s| s.offset > u32::MAX as u64) {
        let co64 = full_box(buf, b"co64", 0, 0);
        buf.put_u32(samples.len() as u32);
        for sample in samples {
            buf.put_u64(sample.offset);
        }
        end_box(buf, co64);
    } else {
        let stco = full_box(buf, b"stco", 0, 0);
        buf.put_u32(samples.len() as u32);
        for sample in samples {
            buf.put_u32(sample.offset as u32);
        }
        end_box(buf, stco);
    }

    end_box(buf, start);
}

fn write_sample_entry(buf: &mut BytesMut, config: &TrackConfig) {
    match &config.entry {
        SampleEntrySource::Copy(description) => buf.put_slice(&description.bytes),
        SampleEntrySource::Avc { config: avcc } => {
            let start = begin_box(buf, b"avc1");
            buf.put_slice(&[0; 6]);
            buf.put_u16(1); // data reference index
            buf.put_slice(&[0; 16]); // pre_defined + reserved
            buf.put_u16(config.width as u16);
            buf.put_u16(config.height as u16);
            buf.put_u32(0x0048_0000); // 72 dpi
            buf.put_u32(0x0048_0000);
            buf.put_u32(0);
            buf.put_u16(1); // frame count
            buf.put_slice(&[0; 32]); // compressor name
            buf.put_u16(0x0018); // depth
            buf.put_i16(-1);
            let avcc_box = begin_box(buf, b"avcC");
            buf.put_slice(avcc);
            end_box(buf, avcc_box);
            end_box(buf, start);
        }
        SampleEntrySource::Aac { config: asc } => {
            let start = begin_box(buf, b"mp4a");
            buf.put_slice(&[0; 6]);
            buf.put_u16(1);
            buf.put_u64(0); // version, revision, vendor
            buf.put_u16(config.channels);
            buf.put_u16(16); // sample size
            buf.put_u32(0); // compression id + packet size
            buf.put_u32(config.sample_rate.min(0xFFFF) << 16);
            write_esds(buf, asc);
            end_box(buf, start);
        }
    }
}

fn write_esds(buf: &mut BytesMut, asc: &[u8]) {
    let mut decoder_config = Vec::with_capacity(32);
    decoder_config.push(0x40); // MPEG-4 audio
    decoder_config.push(0x15); // audio stream
    decoder_config.extend_from_slice(&[0; 11]); // buffer size, max and avg bitrate
    if !asc.is_empty() {
        decoder_config.push(0x05);
        write_descriptor_length(&mut decoder_config, asc.len());
        decoder_config.extend_from_slice(asc);
    }

    let mut es = vec![0x00, 0x01, 0x00]; // ES_ID, flags
    es.push(0x04);
    write_descriptor_length(&mut es, decoder_config.len());
    es.extend_from_slice(&decoder_config);
    es.extend_from_slice(&[0x06, 0x01, 0x02]); // SLConfigDescriptor

    let start = full_box(buf, b"esds", 0, 0);
    let mut head = vec![0x03];
    write_descriptor_length(&mut head, es.len());
    buf.put_slice(&head);
    buf.put_slice(&es);
    end_box(buf, start);
}

/// MPEG-4 descriptor length: 7 bits per byte, high bit marks continuation.
fn write_descriptor_length(out: &mut Vec<u8>, len: usize) {
    let mut shift = 21;
    while shift > 0 && len >> shift == 0 {
        shift -= 7;
    }
    while shift > 0 {
        out.push(0x80 | ((len >> shift) & 0x7F) as u8);
        shift -= 7;
    }
    out.push((len & 0x7F) as u8);
}

fn run_lengths<T: PartialEq + Copy>(values: Vec<T>) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((count, last)) if *last == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_length() {
        let mut out = Vec::new();
        write_descriptor_length(&mut out, 0x19);
        assert_eq!(out, vec![0x19]);

        out.clear();
        write_descriptor_length(&mut out, 200);
        assert_eq!(out, vec![0x81, 0x48]);
    }

    #[test]
    fn test_run_lengths() {
        assert_eq!(
            run_lengths(vec![1024, 1024, 1024, 512]),
            vec![(3, 1024), (1, 512)]
        );
        assert!(run_lengths(Vec::<u32>::new()).is_empty());
    }

    #[test]
    fn test_unknown_track_is_rejected() {
        let mut writer = Mp4Writer::new(std::io::Cursor::new(Vec::new())).unwrap();
        let err = writer.write_sample(3, b"abc", 0, 0, true).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_mdat_size_is_patched() {
        let mut writer = Mp4Writer::new(std::io::Cursor::new(Vec::new())).unwrap();
        let track = writer
            .add_track(TrackConfig::audio(
                44100,
                2,
                44100,
                SampleEntrySource::Aac { config: vec![0x12, 0x10] },
            ))
            .unwrap();
        writer.write_sample(track, &[7; 10], 0, 0, true).unwrap();
        writer.write_sample(track, &[8; 6], 1024, 0, true).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let ftyp_size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(&bytes[ftyp_size + 4..ftyp_size + 8], b"mdat");
        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[ftyp_size + 8..ftyp_size + 16]);
        assert_eq!(u64::from_be_bytes(size), 16 + 16);
        assert_eq!(&bytes[ftyp_size + 32 + 4..ftyp_size + 32 + 8], b"moov");
    }
}
