//! Built-in media backends.

mod mp4;

pub use self::mp4::{Mp4Backend, Mp4Demuxer, Mp4Muxer};

/// Media timescale ticks to microseconds, rounding half up.
pub fn ticks_to_us(ticks: u64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    let ts = timescale as i128;
    ((ticks as i128 * 1_000_000 + ts / 2) / ts) as i64
}

/// Microseconds to media timescale ticks, rounding half up.
///
/// Inverse of [`ticks_to_us`] for any timescale below 1 MHz.
pub fn us_to_ticks(us: i64, timescale: u32) -> i64 {
    ((us as i128 * timescale as i128 + 500_000).div_euclid(1_000_000)) as i64
}
