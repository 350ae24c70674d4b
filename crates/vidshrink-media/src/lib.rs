//! vidshrink-media: MP4 container reading and writing.
//!
//! The transcoding pipeline in `vidshrink-transcode` treats containers as
//! external capabilities. This crate provides the pure-Rust MP4 side of
//! those capabilities:
//!
//! - `mp4::Mp4File` parses the moov atom of a source file and resolves every
//!   track's sample table (offsets, sizes, timestamps, keyframes) together
//!   with the raw sample description, so a track can be copied losslessly.
//! - `mp4::Mp4Writer` writes a progressive MP4: `ftyp`, a growing `mdat`,
//!   and a `moov` built from the collected sample tables on `finish`.

pub mod error;
pub mod mp4;

pub use error::{Error, Result};
pub use mp4::{Mp4File, Mp4Writer};
