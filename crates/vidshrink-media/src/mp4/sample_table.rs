//! MP4 sample table resolution.
//!
//! A track's samples are described by several parallel boxes:
//! - stts: sample durations (decoding time)
//! - stss: sync samples (keyframes)
//! - stsc: sample-to-chunk mapping
//! - stsz: sample sizes
//! - stco/co64: chunk offsets
//! - ctts: composition time offsets
//!
//! [`SampleTableBuilder`] collects the raw entries and flattens them into one
//! [`SampleEntry`] per sample.

use std::collections::HashSet;

/// A fully resolved sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    /// Sample index (0-based).
    pub index: u32,
    /// File offset where sample data starts.
    pub offset: u64,
    pub size: u32,
    /// Decode timestamp in media timescale.
    pub dts: u64,
    /// Decode duration in media timescale.
    pub duration: u32,
    /// Composition time offset (pts - dts).
    pub cts_offset: i32,
    pub is_keyframe: bool,
}

impl SampleEntry {
    /// Presentation timestamp in media timescale, clamped at zero.
    pub fn pts(&self) -> u64 {
        (self.dts as i64 + self.cts_offset as i64).max(0) as u64
    }
}

/// Resolved samples of one track, in decode order.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    pub fn builder() -> SampleTableBuilder {
        SampleTableBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&SampleEntry> {
        self.samples.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleEntry> {
        self.samples.iter()
    }

    /// Whether any sample carries a composition offset.
    pub fn has_cts_offsets(&self) -> bool {
        self.samples.iter().any(|s| s.cts_offset != 0)
    }

    /// Whether every sample is a sync sample (stss can then be omitted).
    pub fn all_keyframes(&self) -> bool {
        self.samples.iter().all(|s| s.is_keyframe)
    }
}

/// Collects raw sample table entries and resolves them into a [`SampleTable`].
#[derive(Debug, Default)]
pub struct SampleTableBuilder {
    stts_entries: Vec<(u32, u32)>,      // (count, delta)
    sync_samples: Option<Vec<u32>>,     // 1-based; None when stss is absent
    stsc_entries: Vec<(u32, u32, u32)>, // (first_chunk, samples_per_chunk, description)
    uniform_size: u32,
    sample_count: u32,
    sample_sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    ctts_entries: Vec<(u32, i32)>, // (count, offset)
}

impl SampleTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stts(&mut self, entries: Vec<(u32, u32)>) {
        self.stts_entries = entries;
    }

    pub fn set_sync_samples(&mut self, samples: Vec<u32>) {
        self.sync_samples = Some(samples);
    }

    pub fn set_stsc(&mut self, entries: Vec<(u32, u32, u32)>) {
        self.stsc_entries = entries;
    }

    /// Set stsz data. `sizes` is empty when `uniform_size` is non-zero.
    pub fn set_stsz(&mut self, uniform_size: u32, sample_count: u32, sizes: Vec<u32>) {
        self.uniform_size = uniform_size;
        self.sample_count = sample_count;
        self.sample_sizes = sizes;
    }

    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    pub fn set_ctts(&mut self, entries: Vec<(u32, i32)>) {
        self.ctts_entries = entries;
    }

    /// Resolve every sample. Missing trailing entries are padded rather than
    /// rejected, matching how players treat slightly truncated tables.
    pub fn build(self) -> SampleTable {
        let sample_count = if self.uniform_size > 0 {
            self.sample_count
        } else {
            self.sample_sizes.len() as u32
        };
        if sample_count == 0 {
            return SampleTable::default();
        }

        let chunks = self.resolve_sample_chunks(sample_count);
        let offsets = self.resolve_offsets(&chunks);
        let timing = self.resolve_timestamps(sample_count);
        let cts_offsets = self.resolve_cts_offsets(sample_count);
        let sync: Option<HashSet<u32>> = self
            .sync_samples
            .as_ref()
            .map(|s| s.iter().copied().collect());

        let samples = (0..sample_count)
            .map(|i| {
                let idx = i as usize;
                let (dts, duration) = timing[idx];
                SampleEntry {
                    index: i,
                    offset: offsets[idx],
                    size: self.size_of(idx),
                    dts,
                    duration,
                    cts_offset: cts_offsets[idx],
                    is_keyframe: sync.as_ref().map_or(true, |s| s.contains(&(i + 1))),
                }
            })
            .collect();

        SampleTable { samples }
    }

    fn size_of(&self, idx: usize) -> u32 {
        if self.uniform_size > 0 {
            self.uniform_size
        } else {
            self.sample_sizes.get(idx).copied().unwrap_or(0)
        }
    }

    /// 0-based chunk index of every sample.
    fn resolve_sample_chunks(&self, sample_count: u32) -> Vec<u32> {
        let mut result = Vec::with_capacity(sample_count as usize);
        let num_chunks = self.chunk_offsets.len() as u32;

        for (i, &(first_chunk, per_chunk, _)) in self.stsc_entries.iter().enumerate() {
            let next_first = self
                .stsc_entries
                .get(i + 1)
                .map_or(num_chunks + 1, |e| e.0);
            for chunk in first_chunk.max(1)..next_first.min(num_chunks + 1) {
                for _ in 0..per_chunk {
                    if result.len() as u32 >= sample_count {
                        return result;
                    }
                    result.push(chunk - 1);
                }
            }
        }

        let last = result.last().copied().unwrap_or(0);
        result.resize(sample_count as usize, last);
        result
    }

    fn resolve_offsets(&self, sample_chunks: &[u32]) -> Vec<u64> {
        let mut within_chunk = vec![0u64; self.chunk_offsets.len()];
        sample_chunks
            .iter()
            .enumerate()
            .map(|(i, &chunk)| {
                let chunk = chunk as usize;
                let base = self.chunk_offsets.get(chunk).copied().unwrap_or(0);
                match within_chunk.get_mut(chunk) {
                    Some(acc) => {
                        let offset = base + *acc;
                        *acc += self.size_of(i) as u64;
                        offset
                    }
                    None => base,
                }
            })
            .collect()
    }

    /// (dts, duration) of every sample.
    fn resolve_timestamps(&self, sample_count: u32) -> Vec<(u64, u32)> {
        let mut timing = Vec::with_capacity(sample_count as usize);
        let mut dts = 0u64;

        'outer: for &(count, delta) in &self.stts_entries {
            for _ in 0..count {
                if timing.len() as u32 >= sample_count {
                    break 'outer;
                }
                timing.push((dts, delta));
                dts += delta as u64;
            }
        }

        let last_delta = timing.last().map_or(1, |&(_, d)| d);
        while (timing.len() as u32) < sample_count {
            timing.push((dts, last_delta));
            dts += last_delta as u64;
        }
        timing
    }

    fn resolve_cts_offsets(&self, sample_count: u32) -> Vec<i32> {
        let mut offsets: Vec<i32> = self
            .ctts_entries
            .iter()
            .flat_map(|&(count, offset)| std::iter::repeat(offset).take(count as usize))
            .take(sample_count as usize)
            .collect();
        offsets.resize(sample_count as usize, 0);
        offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_entry_pts() {
        let sample = SampleEntry {
            index: 0,
            offset: 100,
            size: 1000,
            dts: 1000,
            duration: 512,
            cts_offset: 500,
            is_keyframe: true,
        };
        assert_eq!(sample.pts(), 1500);

        let negative = SampleEntry {
            dts: 100,
            cts_offset: -200,
            ..sample
        };
        assert_eq!(negative.pts(), 0);
    }

    #[test]
    fn test_builder_single_chunk() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(3, 1000)]);
        builder.set_sync_samples(vec![1]);
        builder.set_stsc(vec![(1, 3, 1)]);
        builder.set_stsz(0, 3, vec![100, 200, 150]);
        builder.set_chunk_offsets(vec![1000]);

        let table = builder.build();
        assert_eq!(table.len(), 3);

        let offsets: Vec<u64> = table.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![1000, 1100, 1300]);
        let dts: Vec<u64> = table.iter().map(|s| s.dts).collect();
        assert_eq!(dts, vec![0, 1000, 2000]);
        assert!(table.samples[0].is_keyframe);
        assert!(!table.samples[1].is_keyframe);
        assert!(!table.all_keyframes());
    }

    #[test]
    fn test_builder_chunk_runs_and_uniform_size() {
        // Chunks 1-2 hold two samples each, chunk 3 holds one.
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(5, 1024)]);
        builder.set_stsc(vec![(1, 2, 1), (3, 1, 1)]);
        builder.set_stsz(10, 5, vec![]);
        builder.set_chunk_offsets(vec![0, 500, 900]);

        let table = builder.build();
        let offsets: Vec<u64> = table.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 10, 500, 510, 900]);
        // No stss: every sample is a sync sample.
        assert!(table.all_keyframes());
    }

    #[test]
    fn test_builder_pads_short_timing_tables() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(1, 3000)]);
        builder.set_ctts(vec![(1, 6000)]);
        builder.set_stsc(vec![(1, 3, 1)]);
        builder.set_stsz(0, 3, vec![1, 1, 1]);
        builder.set_chunk_offsets(vec![0]);

        let table = builder.build();
        let timing: Vec<(u64, u32, i32)> = table
            .iter()
            .map(|s| (s.dts, s.duration, s.cts_offset))
            .collect();
        assert_eq!(timing, vec![(0, 3000, 6000), (3000, 3000, 0), (6000, 3000, 0)]);
        assert!(table.has_cts_offsets());
    }

    #[test]
    fn test_builder_empty() {
        assert!(SampleTableBuilder::new().build().is_empty());
    }
}
