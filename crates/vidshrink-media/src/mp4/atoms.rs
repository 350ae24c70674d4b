//! MP4 atom definitions and track descriptions.

use super::SampleTable;

/// Four-character atom type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomType(pub [u8; 4]);

impl AtomType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const CTTS: Self = Self(*b"ctts");

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for AtomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed atom header.
#[derive(Debug, Clone)]
pub struct Atom {
    pub atom_type: AtomType,
    /// Atom size including header.
    pub size: u64,
    /// File offset where atom data starts (after header).
    pub data_offset: u64,
    /// 8, or 16 for 64-bit sizes.
    pub header_size: u8,
}

impl Atom {
    pub fn data_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }

    pub fn data_end(&self) -> u64 {
        self.data_offset + self.data_size()
    }
}

/// Handler type for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Hint,
    Meta,
    Text,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            b"hint" => Self::Hint,
            b"meta" => Self::Meta,
            b"text" => Self::Text,
            _ => Self::Unknown(bytes),
        }
    }

    /// The hdlr code written for this handler.
    pub fn code(&self) -> [u8; 4] {
        match self {
            Self::Video => *b"vide",
            Self::Audio => *b"soun",
            Self::Hint => *b"hint",
            Self::Meta => *b"meta",
            Self::Text => *b"text",
            Self::Unknown(code) => *code,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

/// First entry of a track's stsd box, kept verbatim.
///
/// `bytes` is the complete box (size, fourcc and payload), which lets a
/// writer reproduce the exact sample description of a copied track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleDescription {
    pub fourcc: [u8; 4],
    pub bytes: Vec<u8>,
}

impl SampleDescription {
    pub fn fourcc_str(&self) -> &str {
        std::str::from_utf8(&self.fourcc).unwrap_or("????")
    }
}

/// Track information extracted from a trak atom.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    pub handler_type: HandlerType,
    /// Track duration in media timescale.
    pub duration: u64,
    /// Media timescale (ticks per second for this track).
    pub timescale: u32,
    pub sample_table: SampleTable,
    pub sample_description: Option<SampleDescription>,
    /// Codec configuration: the avcC/hvcC record for video, the
    /// AudioSpecificConfig carried in esds for audio.
    pub codec_data: Option<Vec<u8>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// Clockwise display rotation taken from the tkhd matrix.
    pub rotation: u16,
}

impl TrackInfo {
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            handler_type: HandlerType::Unknown([0; 4]),
            duration: 0,
            timescale: 1,
            sample_table: SampleTable::default(),
            sample_description: None,
            codec_data: None,
            width: None,
            height: None,
            sample_rate: None,
            channels: None,
            rotation: 0,
        }
    }

    /// Get duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }

    /// Sample entry fourcc (`avc1`, `mp4a`, ...), if a description was found.
    pub fn fourcc(&self) -> Option<[u8; 4]> {
        self.sample_description.as_ref().map(|d| d.fourcc)
    }
}

/// Display matrix entries (a, b, c, d) in 16.16 fixed point for a rotation.
pub(crate) fn rotation_matrix(degrees: u16) -> [i32; 4] {
    const ONE: i32 = 0x0001_0000;
    match degrees % 360 {
        90 => [0, ONE, -ONE, 0],
        180 => [-ONE, 0, 0, -ONE],
        270 => [0, -ONE, ONE, 0],
        _ => [ONE, 0, 0, ONE],
    }
}

/// Inverse of [`rotation_matrix`]; anything that is not a quarter turn is 0.
pub(crate) fn rotation_from_matrix(a: i32, b: i32, c: i32, d: i32) -> u16 {
    const ONE: i32 = 0x0001_0000;
    match (a, b, c, d) {
        (0, ONE, n, 0) if n == -ONE => 90,
        (n, 0, 0, m) if n == -ONE && m == -ONE => 180,
        (0, n, ONE, 0) if n == -ONE => 270,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_matrix_inverse() {
        for degrees in [0u16, 90, 180, 270] {
            let [a, b, c, d] = rotation_matrix(degrees);
            assert_eq!(rotation_from_matrix(a, b, c, d), degrees);
        }
    }

    #[test]
    fn test_rotation_matrix_unknown_angle_is_identity() {
        assert_eq!(rotation_matrix(45), rotation_matrix(0));
        assert_eq!(rotation_from_matrix(0x8000, 0, 0, 0x8000), 0);
    }

    #[test]
    fn test_handler_code() {
        assert_eq!(&HandlerType::Video.code(), b"vide");
        assert_eq!(HandlerType::from_bytes(*b"soun"), HandlerType::Audio);
        assert_eq!(&HandlerType::Unknown(*b"abcd").code(), b"abcd");
    }
}
