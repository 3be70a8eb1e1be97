//! Chunk placement over speech intervals.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::store::SpeechInterval;

/// Range of valid chunk start times inside one speech interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateWindow {
    /// Start of the underlying speech interval.
    pub start: f64,
    /// Latest start that keeps the chunk inside the interval.
    pub max_start: f64,
    /// Length of the underlying speech interval.
    pub span: f64,
}

/// A drawn chunk placement, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledChunk {
    pub start: f64,
    pub end: f64,
}

/// Windows for every interval at least `chunk_duration` long.
///
/// Shorter intervals are ignored; chunks never span two intervals.
/// `max_start` is clamped to `start` since `end - chunk_duration` can round
/// below it for an interval exactly one chunk long.
pub fn candidate_windows(intervals: &[SpeechInterval], chunk_duration: f64) -> Vec<CandidateWindow> {
    intervals
        .iter()
        .filter(|iv| iv.duration() >= chunk_duration)
        .map(|iv| CandidateWindow {
            start: iv.start(),
            max_start: (iv.end() - chunk_duration).max(iv.start()),
            span: iv.duration(),
        })
        .collect()
}

/// Number of chunks to draw for a file.
///
/// Each window contributes `floor(span / chunk_duration)` slots, at least one.
/// The total is capped at `max_chunks`.
pub fn chunk_quota(windows: &[CandidateWindow], chunk_duration: f64, max_chunks: usize) -> usize {
    let max_possible: usize = windows
        .iter()
        .map(|w| ((w.span / chunk_duration).floor() as usize).max(1))
        .sum();
    max_possible.min(max_chunks)
}

/// Draw `count` chunk placements.
///
/// Each draw picks a window uniformly (not weighted by length), then a start
/// uniformly inside that window.
pub fn draw_chunks<R: Rng + ?Sized>(
    windows: &[CandidateWindow],
    count: usize,
    chunk_duration: f64,
    rng: &mut R,
) -> Vec<SampledChunk> {
    let mut chunks = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(window) = windows.choose(rng) else {
            break;
        };
        let start = rng.gen_range(window.start..=window.max_start);
        chunks.push(SampledChunk {
            start,
            end: start + chunk_duration,
        });
    }
    chunks
}

/// Number of samples in one chunk.
pub fn chunk_len(chunk_duration: f64, sample_rate: u32) -> usize {
    (chunk_duration * sample_rate as f64) as usize
}

/// Zero-pad or truncate `samples` to exactly `len`.
pub fn fit_to_length(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}
