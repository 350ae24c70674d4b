//! MP4 moov parser.

use super::atoms::rotation_from_matrix;
use super::{
    Atom, AtomType, HandlerType, Mp4File, SampleDescription, SampleTableBuilder, TrackInfo,
};
use crate::{Error, Result};
use std::io::{Read, Seek, SeekFrom};

/// Maximum allowed atom data size (64 MB) to prevent OOM on malformed files.
const MAX_ATOM_DATA_SIZE: u64 = 64 * 1024 * 1024;

/// Offset of the first child box inside a VisualSampleEntry (box header,
/// SampleEntry fields and the 70 bytes of visual fields).
const VISUAL_ENTRY_CHILDREN: usize = 86;
/// Offset of the first child box inside an AudioSampleEntry.
const AUDIO_ENTRY_CHILDREN: usize = 36;

fn be_u16(data: &[u8], pos: usize) -> Option<u16> {
    let b = data.get(pos..pos + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

fn be_u32(data: &[u8], pos: usize) -> Option<u32> {
    let b = data.get(pos..pos + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn be_u64(data: &[u8], pos: usize) -> Option<u64> {
    let hi = be_u32(data, pos)? as u64;
    let lo = be_u32(data, pos + 4)? as u64;
    Some((hi << 32) | lo)
}

/// Iterate over the boxes packed in `data`, yielding (fourcc, start, end)
/// with `start` pointing at the box header.
fn child_boxes(data: &[u8]) -> impl Iterator<Item = ([u8; 4], usize, usize)> + '_ {
    let mut pos = 0usize;
    std::iter::from_fn(move || {
        let size = be_u32(data, pos)? as usize;
        let fourcc = data.get(pos + 4..pos + 8)?;
        if size < 8 || pos + size > data.len() {
            return None;
        }
        let item = ([fourcc[0], fourcc[1], fourcc[2], fourcc[3]], pos, pos + size);
        pos += size;
        Some(item)
    })
}

/// Extract the DecoderSpecificInfo (AudioSpecificConfig for AAC) from an
/// esds payload that still carries its version/flags word.
pub fn esds_decoder_config(esds: &[u8]) -> Option<Vec<u8>> {
    fn descriptor(data: &[u8], mut pos: usize) -> Option<(u8, usize, usize)> {
        let tag = *data.get(pos)?;
        pos += 1;
        let mut len = 0usize;
        for _ in 0..4 {
            let b = *data.get(pos)?;
            pos += 1;
            len = (len << 7) | (b & 0x7f) as usize;
            if b & 0x80 == 0 {
                break;
            }
        }
        Some((tag, pos, len))
    }

    // ES_Descriptor
    let (tag, mut pos, _) = descriptor(esds, 4)?;
    if tag != 0x03 {
        return None;
    }
    let flags = *esds.get(pos + 2)?;
    pos += 3;
    if flags & 0x80 != 0 {
        pos += 2;
    }
    if flags & 0x40 != 0 {
        pos += 1 + *esds.get(pos)? as usize;
    }
    if flags & 0x20 != 0 {
        pos += 2;
    }

    // DecoderConfigDescriptor, then its DecoderSpecificInfo
    let (tag, pos, _) = descriptor(esds, pos)?;
    if tag != 0x04 {
        return None;
    }
    let (tag, start, len) = descriptor(esds, pos + 13)?;
    if tag != 0x05 {
        return None;
    }
    esds.get(start..start + len).map(<[u8]>::to_vec)
}

/// MP4 file reader.
pub struct Mp4Reader<R> {
    reader: R,
    file_size: u64,
}

impl<R: Read + Seek> Mp4Reader<R> {
    pub fn new(mut reader: R) -> Self {
        let file_size = reader.seek(SeekFrom::End(0)).unwrap_or(0);
        let _ = reader.seek(SeekFrom::Start(0));
        Self { reader, file_size }
    }

    /// Parse the top-level layout and the moov atom.
    pub fn parse(&mut self) -> Result<Mp4File> {
        let mut mp4 = Mp4File {
            duration: 0,
            timescale: 1000,
            tracks: Vec::new(),
            has_faststart: false,
        };

        let atoms = self.read_atoms(0, self.file_size)?;
        if atoms.first().map(|a| a.atom_type) != Some(AtomType::FTYP) {
            return Err(Error::invalid_mp4("file does not start with ftyp"));
        }

        let moov = atoms
            .iter()
            .find(|a| a.atom_type == AtomType::MOOV)
            .ok_or(Error::MissingAtom("moov"))?;
        self.parse_moov(moov, &mut mp4)?;

        let moov_pos = moov.data_offset - moov.header_size as u64;
        mp4.has_faststart = atoms
            .iter()
            .filter(|a| a.atom_type == AtomType::MDAT)
            .all(|a| moov_pos < a.data_offset);

        Ok(mp4)
    }

    fn read_atoms(&mut self, start: u64, end: u64) -> Result<Vec<Atom>> {
        let mut atoms = Vec::new();
        let mut pos = start;

        while pos + 8 <= end {
            self.reader.seek(SeekFrom::Start(pos))?;
            let mut header = [0u8; 8];
            if self.reader.read_exact(&mut header).is_err() {
                break;
            }

            let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
            let atom_type = AtomType([header[4], header[5], header[6], header[7]]);

            let (actual_size, header_size) = match size {
                1 => {
                    let mut ext = [0u8; 8];
                    self.reader.read_exact(&mut ext)?;
                    (u64::from_be_bytes(ext), 16u8)
                }
                0 => (end - pos, 8u8),
                _ => (size, 8u8),
            };

            if actual_size < header_size as u64 || pos + actual_size > end {
                break;
            }

            atoms.push(Atom {
                atom_type,
                size: actual_size,
                data_offset: pos + header_size as u64,
                header_size,
            });
            pos += actual_size;
        }

        Ok(atoms)
    }

    fn read_atom_data(&mut self, atom: &Atom) -> Result<Vec<u8>> {
        let size = atom.data_size();
        if size > MAX_ATOM_DATA_SIZE {
            return Err(Error::invalid_mp4(format!(
                "atom {} data size {} exceeds maximum {}",
                atom.atom_type, size, MAX_ATOM_DATA_SIZE
            )));
        }
        self.reader.seek(SeekFrom::Start(atom.data_offset))?;
        let mut data = vec![0u8; size as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }

    fn children(&mut self, parent: &Atom) -> Result<Vec<Atom>> {
        self.read_atoms(parent.data_offset, parent.data_end())
    }

    fn parse_moov(&mut self, moov: &Atom, mp4: &mut Mp4File) -> Result<()> {
        for child in self.children(moov)? {
            match child.atom_type {
                AtomType::MVHD => self.parse_mvhd(&child, mp4)?,
                AtomType::TRAK => mp4.tracks.push(self.parse_trak(&child)?),
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_mvhd(&mut self, atom: &Atom, mp4: &mut Mp4File) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        let parsed = match data.first() {
            Some(0) => be_u32(&data, 12).zip(be_u32(&data, 16).map(u64::from)),
            Some(_) => be_u32(&data, 20).zip(be_u64(&data, 24)),
            None => None,
        };
        if let Some((timescale, duration)) = parsed {
            mp4.timescale = timescale;
            mp4.duration = duration;
        }
        Ok(())
    }

    fn parse_trak(&mut self, trak: &Atom) -> Result<TrackInfo> {
        let mut track = TrackInfo::new(0);
        for child in self.children(trak)? {
            match child.atom_type {
                AtomType::TKHD => self.parse_tkhd(&child, &mut track)?,
                AtomType::MDIA => self.parse_mdia(&child, &mut track)?,
                _ => {}
            }
        }
        Ok(track)
    }

    /// Track id, display size and the rotation encoded in the matrix.
    fn parse_tkhd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        let (id_pos, matrix_pos) = match data.first() {
            Some(0) => (12, 40),
            Some(_) => (20, 52),
            None => return Ok(()),
        };

        if let Some(id) = be_u32(&data, id_pos) {
            track.track_id = id;
        }

        let m = |i: usize| be_u32(&data, matrix_pos + i * 4).map(|v| v as i32);
        if let (Some(a), Some(b), Some(c), Some(d)) = (m(0), m(1), m(3), m(4)) {
            track.rotation = rotation_from_matrix(a, b, c, d);
        }

        let size_pos = matrix_pos + 36;
        if let (Some(w), Some(h)) = (be_u32(&data, size_pos), be_u32(&data, size_pos + 4)) {
            if w > 0 && h > 0 {
                track.width = Some(w >> 16);
                track.height = Some(h >> 16);
            }
        }
        Ok(())
    }

    fn parse_mdia(&mut self, mdia: &Atom, track: &mut TrackInfo) -> Result<()> {
        // hdlr decides how stsd is read, so resolve it before minf.
        let children = self.children(mdia)?;
        for child in &children {
            match child.atom_type {
                AtomType::MDHD => self.parse_mdhd(child, track)?,
                AtomType::HDLR => self.parse_hdlr(child, track)?,
                _ => {}
            }
        }
        if let Some(minf) = children.iter().find(|a| a.atom_type == AtomType::MINF) {
            for child in self.children(minf)? {
                if child.atom_type == AtomType::STBL {
                    self.parse_stbl(&child, track)?;
                }
            }
        }
        Ok(())
    }

    fn parse_mdhd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        let parsed = match data.first() {
            Some(0) => be_u32(&data, 12).zip(be_u32(&data, 16).map(u64::from)),
            Some(_) => be_u32(&data, 20).zip(be_u64(&data, 24)),
            None => None,
        };
        if let Some((timescale, duration)) = parsed {
            track.timescale = timescale;
            track.duration = duration;
        }
        Ok(())
    }

    fn parse_hdlr(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        if let Some(code) = data.get(8..12) {
            track.handler_type = HandlerType::from_bytes([code[0], code[1], code[2], code[3]]);
        }
        Ok(())
    }

    fn parse_stbl(&mut self, stbl: &Atom, track: &mut TrackInfo) -> Result<()> {
        let mut builder = SampleTableBuilder::new();

        for child in self.children(stbl)? {
            if child.atom_type == AtomType::STSD {
                self.parse_stsd(&child, track)?;
                continue;
            }
            let table = match child.atom_type {
                AtomType::STTS
                | AtomType::STSS
                | AtomType::STSC
                | AtomType::STSZ
                | AtomType::STCO
                | AtomType::CO64
                | AtomType::CTTS => self.read_atom_data(&child)?,
                _ => continue,
            };
            let count = be_u32(&table, 4).unwrap_or(0) as usize;

            match child.atom_type {
                AtomType::STTS => builder.set_stts(
                    (0..count)
                        .map_while(|i| be_u32(&table, 8 + i * 8).zip(be_u32(&table, 12 + i * 8)))
                        .collect(),
                ),
                AtomType::STSS => builder.set_sync_samples(
                    (0..count).map_while(|i| be_u32(&table, 8 + i * 4)).collect(),
                ),
                AtomType::STSC => builder.set_stsc(
                    (0..count)
                        .map_while(|i| {
                            let base = 8 + i * 12;
                            Some((
                                be_u32(&table, base)?,
                                be_u32(&table, base + 4)?,
                                be_u32(&table, base + 8)?,
                            ))
                        })
                        .collect(),
                ),
                AtomType::STSZ => {
                    // stsz has no entry-count word at 4: that slot is the uniform size.
                    let uniform = be_u32(&table, 4).unwrap_or(0);
                    let sample_count = be_u32(&table, 8).unwrap_or(0);
                    let sizes = if uniform == 0 {
                        (0..sample_count as usize)
                            .map_while(|i| be_u32(&table, 12 + i * 4))
                            .collect()
                    } else {
                        Vec::new()
                    };
                    builder.set_stsz(uniform, sample_count, sizes);
                }
                AtomType::STCO => builder.set_chunk_offsets(
                    (0..count)
                        .map_while(|i| be_u32(&table, 8 + i * 4).map(u64::from))
                        .collect(),
                ),
                AtomType::CO64 => builder.set_chunk_offsets(
                    (0..count).map_while(|i| be_u64(&table, 8 + i * 8)).collect(),
                ),
                AtomType::CTTS => builder.set_ctts(
                    (0..count)
                        .map_while(|i| {
                            let n = be_u32(&table, 8 + i * 8)?;
                            // Version 0 offsets are unsigned on paper but
                            // written signed by most muxers.
                            let offset = be_u32(&table, 12 + i * 8)? as i32;
                            Some((n, offset))
                        })
                        .collect(),
                ),
                _ => {}
            }
        }

        track.sample_table = builder.build();
        Ok(())
    }

    /// Keep the first sample entry verbatim and pull out the fields a
    /// format description needs.
    fn parse_stsd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        let Some((fourcc, start, end)) = data.get(8..).and_then(|d| child_boxes(d).next()) else {
            return Ok(());
        };
        let entry = &data[8 + start..8 + end];

        if track.handler_type.is_video() {
            if let (Some(w), Some(h)) = (be_u16(entry, 32), be_u16(entry, 34)) {
                track.width = Some(w as u32);
                track.height = Some(h as u32);
            }
            if let Some(children) = entry.get(VISUAL_ENTRY_CHILDREN..) {
                track.codec_data = child_boxes(children)
                    .find(|(t, _, _)| t == b"avcC" || t == b"hvcC")
                    .map(|(_, s, e)| children[s + 8..e].to_vec());
            }
        } else if track.handler_type.is_audio() {
            track.channels = be_u16(entry, 24);
            track.sample_rate = be_u32(entry, 32).map(|r| r >> 16);
            if let Some(children) = entry.get(AUDIO_ENTRY_CHILDREN..) {
                track.codec_data = child_boxes(children)
                    .find(|(t, _, _)| t == b"esds")
                    .and_then(|(_, s, e)| esds_decoder_config(&children[s + 8..e]));
            }
        }

        track.sample_description = Some(SampleDescription {
            fourcc,
            bytes: entry.to_vec(),
        });
        Ok(())
    }
}
