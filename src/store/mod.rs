//! VAD lookup store: data model shared by the builder and the sampler.
//!
//! A store is a directory of shards. Each shard maps a media file name to the
//! speech intervals detected in that file.

pub mod builder;
pub mod shard;

pub use builder::{BuildStats, BuilderConfig, BuilderState, StoreBuilder};
pub use shard::ShardStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Width of the zero-padded shard key.
pub const SHARD_KEY_WIDTH: usize = 6;

/// Extension every stored file name carries.
pub const MEDIA_EXTENSION: &str = ".mp3";

/// Sample rate the VAD annotations count their timestamps in.
pub const VAD_SAMPLE_RATE: u32 = 16_000;

/// Zero-padded shard identifier, e.g. `000123`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardKey(String);

impl ShardKey {
    /// Build a key from a numeric shard identifier.
    pub fn from_number(number: u64) -> Self {
        Self(format!("{:0width$}", number, width = SHARD_KEY_WIDTH))
    }

    /// Build a key from a textual shard identifier, left-padding with zeros.
    ///
    /// Only ASCII alphanumeric identifiers are accepted since the key doubles
    /// as a file name inside the store.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(format!("{:0>width$}", raw, width = SHARD_KEY_WIDTH)))
    }

    /// Normalize a shard identifier as found in an annotation record.
    ///
    /// Numbers and strings map to the same key. Falsy values (`null`, `0`,
    /// `""`, `false`) and anything else yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(int) = n.as_u64() {
                    return (int != 0).then(|| Self::from_number(int));
                }
                match n.as_f64() {
                    Some(f) if f > 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
                        Some(Self::from_number(f as u64))
                    }
                    _ => None,
                }
            }
            serde_json::Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A span of detected speech, in seconds.
///
/// Serialized as a `[start, end]` pair. Deserialization rejects pairs that
/// break `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(f64, f64)", into = "(f64, f64)")]
pub struct SpeechInterval {
    start: f64,
    end: f64,
}

impl SpeechInterval {
    pub fn new(start: f64, end: f64) -> Option<Self> {
        (start.is_finite() && end.is_finite() && start < end).then_some(Self { start, end })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

impl TryFrom<(f64, f64)> for SpeechInterval {
    type Error = String;

    fn try_from((start, end): (f64, f64)) -> std::result::Result<Self, Self::Error> {
        Self::new(start, end).ok_or_else(|| format!("invalid speech interval [{start}, {end}]"))
    }
}

impl From<SpeechInterval> for (f64, f64) {
    fn from(interval: SpeechInterval) -> Self {
        (interval.start, interval.end)
    }
}

/// VAD result for a single media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVadRecord {
    /// Speech intervals; `None` when the annotation carried no usable pair.
    pub segments: Option<Vec<SpeechInterval>>,
    /// Annotated audio duration in seconds. Informational only.
    #[serde(default)]
    pub duration: f64,
}

impl FileVadRecord {
    pub fn new(segments: Vec<SpeechInterval>, duration: f64) -> Self {
        Self {
            segments: (!segments.is_empty()).then_some(segments),
            duration,
        }
    }

    pub fn intervals(&self) -> &[SpeechInterval] {
        self.segments.as_deref().unwrap_or(&[])
    }

    pub fn has_speech(&self) -> bool {
        !self.intervals().is_empty()
    }

    pub fn speech_duration(&self) -> f64 {
        self.intervals().iter().map(SpeechInterval::duration).sum()
    }
}

/// All file records of one shard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VadShard {
    records: BTreeMap<String, FileVadRecord>,
}

impl VadShard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_name: &str) -> Option<&FileVadRecord> {
        self.records.get(file_name)
    }

    /// Insert a record, replacing any previous record for the same file.
    pub fn insert(&mut self, file_name: String, record: FileVadRecord) -> Option<FileVadRecord> {
        self.records.insert(file_name, record)
    }

    /// Overlay `delta` onto this shard. Files in both take `delta`'s record;
    /// files only in `self` are kept.
    pub fn merge(&mut self, delta: &VadShard) {
        self.records
            .extend(delta.records.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FileVadRecord)> {
        self.records.iter()
    }

    pub fn files_with_speech(&self) -> usize {
        self.records.values().filter(|r| r.has_speech()).count()
    }
}

/// Derive the stored file name from an annotation path or sample key.
///
/// Takes the basename and appends [`MEDIA_EXTENSION`] when missing, so that
/// `a/000123/file1` and `a/000123/file1.mp3` resolve to the same record.
pub fn media_file_name(path: &str) -> String {
    let base = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());

    if base.ends_with(MEDIA_EXTENSION) {
        base
    } else {
        format!("{base}{MEDIA_EXTENSION}")
    }
}
