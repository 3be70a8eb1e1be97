//! Training-time chunk sampler.
//!
//! Given one audio file and its VAD record, draws a bounded number of
//! fixed-length chunks from speech regions and decodes only those ranges.

pub mod cache;
pub mod language;
pub mod locator;
pub mod window;

pub use cache::{CacheStats, ShardCache, DEFAULT_CACHE_CAPACITY};
pub use language::{LanguageIndex, LanguageLookup, NoLanguageIndex, UNKNOWN_LANGUAGE};
pub use locator::shard_key_from_locator;
pub use window::{candidate_windows, chunk_len, chunk_quota, draw_chunks, CandidateWindow, SampledChunk};

use std::collections::BTreeSet;
use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::audio::{AudioDecoder, AudioStream, DecodeSpec};
use crate::error::Result;
use crate::store::media_file_name;

/// Sampling options.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Only emit files whose language is in this set. `None` accepts all.
    pub desired_languages: Option<BTreeSet<String>>,
    pub target_sample_rate: u32,
    /// Length of every chunk in seconds.
    pub chunk_duration: f64,
    pub max_chunks_per_file: usize,
    pub shuffle_chunks: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            desired_languages: None,
            target_sample_rate: 16_000,
            chunk_duration: 10.0,
            max_chunks_per_file: 16,
            shuffle_chunks: false,
        }
    }
}

impl SamplerConfig {
    /// Samples per chunk.
    pub fn chunk_samples(&self) -> usize {
        chunk_len(self.chunk_duration, self.target_sample_rate)
    }

    fn accepts_language(&self, language: &str) -> bool {
        match &self.desired_languages {
            Some(desired) if !desired.is_empty() => desired.contains(language),
            _ => true,
        }
    }
}

/// One input event: encoded audio plus the identifiers locating its VAD data.
#[derive(Debug, Clone, Copy)]
pub struct SampleInput<'a> {
    pub audio: &'a [u8],
    /// Sample key inside the archive; its basename names the file.
    pub key: &'a str,
    /// Archive locator the shard number is parsed from.
    pub locator: &'a str,
}

/// Chunks drawn from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChunks {
    pub chunks: Vec<Vec<f32>>,
    /// All ones, same shape as `chunks`.
    pub attention_mask: Vec<Vec<u8>>,
    pub language: String,
}

impl FileChunks {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Why a file produced no chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnparseableLocator,
    LanguageFiltered(String),
    MissingRecord,
    NoSegments,
    NoQualifyingWindow,
    ZeroQuota,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnparseableLocator => write!(f, "no shard number in locator"),
            SkipReason::LanguageFiltered(lang) => write!(f, "language '{lang}' not requested"),
            SkipReason::MissingRecord => write!(f, "no VAD record"),
            SkipReason::NoSegments => write!(f, "no speech segments"),
            SkipReason::NoQualifyingWindow => write!(f, "no speech segment long enough"),
            SkipReason::ZeroQuota => write!(f, "chunk quota is zero"),
        }
    }
}

/// Result of sampling one file.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Chunks(FileChunks),
    Skipped(SkipReason),
}

impl SampleOutcome {
    pub fn into_chunks(self) -> Option<FileChunks> {
        match self {
            SampleOutcome::Chunks(chunks) => Some(chunks),
            SampleOutcome::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, SampleOutcome::Skipped(_))
    }
}

/// Per-sampler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub files_seen: usize,
    pub files_sampled: usize,
    pub files_skipped: usize,
    pub chunks_emitted: usize,
}

const PROGRESS_LOG_EVERY: usize = 100;

/// Draws speech chunks for one file at a time.
pub struct ChunkSampler<D, L> {
    config: SamplerConfig,
    cache: ShardCache,
    decoder: D,
    languages: L,
    stats: SamplerStats,
}

impl<D: AudioDecoder, L: LanguageLookup> ChunkSampler<D, L> {
    pub fn new(config: SamplerConfig, cache: ShardCache, decoder: D, languages: L) -> Self {
        Self {
            config,
            cache,
            decoder,
            languages,
            stats: SamplerStats::default(),
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn stats(&self) -> &SamplerStats {
        &self.stats
    }

    pub fn cache(&self) -> &ShardCache {
        &self.cache
    }

    /// Sample chunks from one file.
    ///
    /// Skips are reported as [`SampleOutcome::Skipped`]. Errors are reserved
    /// for an unreadable store and decode failures.
    pub fn sample<R: Rng + ?Sized>(&mut self, input: &SampleInput<'_>, rng: &mut R) -> Result<SampleOutcome> {
        self.stats.files_seen += 1;
        if self.stats.files_seen % PROGRESS_LOG_EVERY == 0 {
            info!(
                "Sampled {} files ({} skipped, {} chunks)",
                self.stats.files_seen, self.stats.files_skipped, self.stats.chunks_emitted
            );
        }

        let outcome = self.sample_file(input, rng)?;
        match &outcome {
            SampleOutcome::Chunks(chunks) => {
                self.stats.files_sampled += 1;
                self.stats.chunks_emitted += chunks.len();
            }
            SampleOutcome::Skipped(reason) => {
                self.stats.files_skipped += 1;
                debug!("Skipping {} ({}): {}", input.key, input.locator, reason);
            }
        }
        Ok(outcome)
    }

    fn sample_file<R: Rng + ?Sized>(&mut self, input: &SampleInput<'_>, rng: &mut R) -> Result<SampleOutcome> {
        let file_name = media_file_name(input.key);

        let Some(shard_key) = shard_key_from_locator(input.locator) else {
            return Ok(SampleOutcome::Skipped(SkipReason::UnparseableLocator));
        };

        let language = self.languages.language(&shard_key, &file_name).to_string();
        if !self.config.accepts_language(&language) {
            return Ok(SampleOutcome::Skipped(SkipReason::LanguageFiltered(language)));
        }

        let shard = self.cache.get(&shard_key)?;
        let Some(record) = shard.get(&file_name) else {
            return Ok(SampleOutcome::Skipped(SkipReason::MissingRecord));
        };
        if !record.has_speech() {
            return Ok(SampleOutcome::Skipped(SkipReason::NoSegments));
        }

        let chunk_duration = self.config.chunk_duration;
        let windows = candidate_windows(record.intervals(), chunk_duration);
        if windows.is_empty() {
            return Ok(SampleOutcome::Skipped(SkipReason::NoQualifyingWindow));
        }

        let quota = chunk_quota(&windows, chunk_duration, self.config.max_chunks_per_file);
        if quota == 0 {
            return Ok(SampleOutcome::Skipped(SkipReason::ZeroQuota));
        }

        let placements = draw_chunks(&windows, quota, chunk_duration, rng);
        let chunk_samples = self.config.chunk_samples();
        let mut stream = self
            .decoder
            .open(input.audio, DecodeSpec::mono(self.config.target_sample_rate))?;

        let mut chunks = Vec::with_capacity(placements.len());
        for placement in &placements {
            let samples = stream.samples_in_range(placement.start, placement.end)?;
            chunks.push(window::fit_to_length(samples, chunk_samples));
        }

        if self.config.shuffle_chunks {
            chunks.shuffle(rng);
        }

        let attention_mask = vec![vec![1u8; chunk_samples]; chunks.len()];
        Ok(SampleOutcome::Chunks(FileChunks {
            chunks,
            attention_mask,
            language,
        }))
    }
}
