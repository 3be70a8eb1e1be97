use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, VadError};

use super::{media_file_name, FileVadRecord, ShardKey, ShardStore, SpeechInterval, VadShard, VAD_SAMPLE_RATE};

/// Configuration for the store build pass.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Flush pending shards after this many parsed lines.
    pub flush_every: usize,
    /// Sample rate the annotation timestamps are expressed in.
    pub reference_sample_rate: u32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            flush_every: 10_000,
            reference_sample_rate: VAD_SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    /// Collecting records in memory.
    Accumulating,
    /// Merging pending shards into the store.
    Flushing,
}

/// Counters reported by the build pass. Observational only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Lines read from the feed, including blank and malformed ones.
    pub lines_read: usize,
    /// Lines that parsed as an annotation object.
    pub lines_processed: usize,
    pub malformed_lines: usize,
    /// File entries inside a valid line that could not be parsed.
    pub malformed_records: usize,
    /// File entries dropped for lacking a usable shard identifier.
    pub missing_shard: usize,
    pub files_kept: usize,
    pub files_with_speech: usize,
    pub flushes: usize,
    /// Distinct shards committed during this pass.
    pub partitions_written: usize,
}

impl BuildStats {
    pub fn files_without_speech(&self) -> usize {
        self.files_kept - self.files_with_speech
    }
}

#[derive(Debug, Deserialize)]
struct AnnotationEntry {
    #[serde(default, alias = "shard")]
    tar_number: serde_json::Value,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    timestamps: Option<Vec<serde_json::Value>>,
}

/// Read one timestamp bound. Numbers and numeric strings are accepted.
fn timestamp_bound(pair: &serde_json::Value, field: &str) -> Option<f64> {
    match pair.get(field)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Convert raw sample-count pairs into speech intervals in seconds.
///
/// Each pair is checked on its own: non-objects, pairs missing a bound or
/// carrying a non-numeric one, and pairs with `end <= start` are dropped.
fn parse_speech_segments(timestamps: &[serde_json::Value], sample_rate: u32) -> Vec<SpeechInterval> {
    let rate = sample_rate as f64;
    timestamps
        .iter()
        .filter_map(|pair| {
            let start = timestamp_bound(pair, "start")?;
            let end = timestamp_bound(pair, "end")?;
            SpeechInterval::new(start / rate, end / rate)
        })
        .collect()
}

/// Parse one file entry of an annotation line.
///
/// Returns `Ok(None)` when the entry has no usable shard identifier.
fn parse_entry(path: &str, data: serde_json::Value, sample_rate: u32) -> Result<Option<(ShardKey, FileVadRecord)>> {
    let entry: AnnotationEntry = serde_json::from_value(data)
        .map_err(|e| VadError::MalformedRecord(format!("{path}: {e}")))?;

    let Some(key) = ShardKey::from_json(&entry.tar_number) else {
        return Ok(None);
    };

    let segments = entry
        .timestamps
        .as_deref()
        .map(|ts| parse_speech_segments(ts, sample_rate))
        .unwrap_or_default();
    Ok(Some((key, FileVadRecord::new(segments, entry.duration.unwrap_or(0.0)))))
}

/// Streams annotation lines into a [`ShardStore`].
///
/// Records accumulate per shard in memory and are merged into the store every
/// `flush_every` parsed lines and once more on [`StoreBuilder::finish`]. A
/// shard's accumulator is cleared as soon as its merge commits.
pub struct StoreBuilder {
    store: ShardStore,
    config: BuilderConfig,
    pending: BTreeMap<ShardKey, VadShard>,
    state: BuilderState,
    stats: BuildStats,
    written: BTreeSet<ShardKey>,
}

impl StoreBuilder {
    pub fn new(store: ShardStore, config: BuilderConfig) -> Self {
        Self {
            store,
            config,
            pending: BTreeMap::new(),
            state: BuilderState::Accumulating,
            stats: BuildStats::default(),
            written: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn store(&self) -> &ShardStore {
        &self.store
    }

    /// Number of file records waiting for the next flush.
    pub fn pending_files(&self) -> usize {
        self.pending.values().map(VadShard::len).sum()
    }

    /// Ingest one raw feed line. Invalid UTF-8 counts as a malformed line.
    pub fn ingest_bytes(&mut self, line: &[u8]) -> Result<()> {
        match std::str::from_utf8(line) {
            Ok(line) => self.ingest_line(line),
            Err(_) => {
                self.stats.lines_read += 1;
                self.stats.malformed_lines += 1;
                debug!("Skipping line {}: invalid UTF-8", self.stats.lines_read);
                Ok(())
            }
        }
    }

    /// Ingest one feed line. Only a failed flush returns an error.
    pub fn ingest_line(&mut self, line: &str) -> Result<()> {
        self.stats.lines_read += 1;

        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let entries: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(line)
        {
            Ok(entries) => entries,
            Err(e) => {
                self.stats.malformed_lines += 1;
                debug!("Skipping line {}: {e}", self.stats.lines_read);
                return Ok(());
            }
        };

        self.stats.lines_processed += 1;

        for (path, data) in entries {
            self.ingest_entry(&path, data);
        }

        if self.config.flush_every > 0 && self.stats.lines_processed % self.config.flush_every == 0 {
            self.flush()?;
        }

        Ok(())
    }

    /// Ingest the lines of `reader`.
    ///
    /// `keep_going` runs after every line and can stop the pass early.
    /// Returns `true` when the whole reader was consumed. Pending records are
    /// left for [`StoreBuilder::finish`] either way.
    pub fn ingest_reader<R, F>(&mut self, reader: R, mut keep_going: F) -> Result<bool>
    where
        R: BufRead,
        F: FnMut(&BuildStats) -> bool,
    {
        for line in reader.split(b'\n') {
            self.ingest_bytes(&line?)?;
            if !keep_going(&self.stats) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn ingest_entry(&mut self, path: &str, data: serde_json::Value) {
        let (key, record) = match parse_entry(path, data, self.config.reference_sample_rate) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                self.stats.missing_shard += 1;
                debug!("Skipping record {path}: no shard identifier");
                return;
            }
            Err(e) => {
                self.stats.malformed_records += 1;
                debug!("Skipping {e}");
                return;
            }
        };

        self.stats.files_kept += 1;
        if record.has_speech() {
            self.stats.files_with_speech += 1;
        }

        self.pending
            .entry(key)
            .or_default()
            .insert(media_file_name(path), record);
    }

    /// Merge every pending shard into the store.
    ///
    /// On error the shards not yet committed remain pending and the builder
    /// stays in [`BuilderState::Flushing`].
    pub fn flush(&mut self) -> Result<()> {
        self.state = BuilderState::Flushing;

        let keys: Vec<ShardKey> = self.pending.keys().cloned().collect();
        let mut committed = 0;
        for key in keys {
            if let Some(delta) = self.pending.get(&key) {
                if !delta.is_empty() {
                    self.store.merge(&key, delta)?;
                    self.written.insert(key.clone());
                    committed += 1;
                }
            }
            self.pending.remove(&key);
        }

        self.stats.flushes += 1;
        self.stats.partitions_written = self.written.len();
        self.state = BuilderState::Accumulating;

        info!(
            "Flushed {} shards after {} lines",
            committed, self.stats.lines_processed
        );
        Ok(())
    }

    /// Final flush; returns the pass counters.
    pub fn finish(mut self) -> Result<BuildStats> {
        self.flush()?;
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn builder(dir: &TempDir, flush_every: usize) -> StoreBuilder {
        let store = ShardStore::create(dir.path()).unwrap();
        StoreBuilder::new(
            store,
            BuilderConfig {
                flush_every,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_parse_speech_segments() {
        let raw = vec![
            json!({"start": 16000, "end": 160000}),
            json!({"end": 200}),
            json!({"start": 800, "end": 800}),
            json!({"start": "32000", "end": " 48000 "}),
            json!({"start": "x", "end": 5}),
            json!([0, 16000]),
        ];
        let segments = parse_speech_segments(&raw, 16000);
        assert_eq!(
            segments,
            vec![
                SpeechInterval::new(1.0, 10.0).unwrap(),
                SpeechInterval::new(2.0, 3.0).unwrap(),
            ]
        );
    }

    #[test]
    fn test_parse_entry_errors() {
        let bad = parse_entry("a/bad", json!({"tar_number": 1, "duration": "long"}), 16000);
        assert!(matches!(bad, Err(VadError::MalformedRecord(msg)) if msg.starts_with("a/bad")));

        let orphan = parse_entry("a/orphan", json!({"tar_number": null, "duration": 1.0}), 16000);
        assert!(matches!(orphan, Ok(None)));
    }

    #[test]
    fn test_bad_pair_keeps_rest_of_record() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir, 100);

        builder
            .ingest_line(r#"{"a/mixed": {"tar_number": 5, "duration": 12.0, "timestamps": [{"start": 16000, "end": 160000}, {"start": "x", "end": 5}, 7]}}"#)
            .unwrap();
        builder
            .ingest_line(r#"{"a/allbad": {"tar_number": 5, "duration": 3.0, "timestamps": [{"start": "x", "end": 5}]}}"#)
            .unwrap();

        let stats = builder.finish().unwrap();
        assert_eq!(stats.malformed_records, 0);
        assert_eq!(stats.files_kept, 2);
        assert_eq!(stats.files_with_speech, 1);
        assert_eq!(stats.partitions_written, 1);

        let shard = ShardStore::open(dir.path())
            .unwrap()
            .load(&ShardKey::from_number(5))
            .unwrap();
        assert_eq!(
            shard.get("mixed.mp3").unwrap().intervals(),
            &[SpeechInterval::new(1.0, 10.0).unwrap()]
        );
        assert!(shard.get("allbad.mp3").unwrap().segments.is_none());
    }

    #[test]
    fn test_ingest_example_line() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir, 100);

        builder
            .ingest_line(r#"{"a/000123/file1.mp3": {"tar_number": 123, "duration": 12.0, "timestamps": [{"start": 16000, "end": 160000}]}}"#)
            .unwrap();
        assert_eq!(builder.pending_files(), 1);

        let stats = builder.finish().unwrap();
        assert_eq!(stats.files_kept, 1);
        assert_eq!(stats.files_with_speech, 1);
        assert_eq!(stats.partitions_written, 1);

        let store = ShardStore::open(dir.path()).unwrap();
        let shard = store.load(&ShardKey::from_number(123)).unwrap();
        let record = shard.get("file1.mp3").unwrap();
        assert_eq!(record.intervals(), &[SpeechInterval::new(1.0, 10.0).unwrap()]);
        assert_eq!(record.duration, 12.0);
    }

    #[test]
    fn test_files_without_speech_are_kept() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir, 100);

        builder
            .ingest_line(r#"{"x/quiet": {"tar_number": "7", "duration": 4.0, "timestamps": []}}"#)
            .unwrap();
        builder
            .ingest_line(r#"{"x/absent": {"tar_number": "7", "duration": 2.0}}"#)
            .unwrap();

        let stats = builder.finish().unwrap();
        assert_eq!(stats.files_kept, 2);
        assert_eq!(stats.files_without_speech(), 2);

        let store = ShardStore::open(dir.path()).unwrap();
        let shard = store.load(&ShardKey::from_number(7)).unwrap();
        assert!(shard.get("quiet.mp3").unwrap().segments.is_none());
        assert!(shard.get("absent.mp3").unwrap().segments.is_none());
    }

    #[test]
    fn test_malformed_lines_and_records_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir, 100);

        builder.ingest_line("{not json").unwrap();
        builder.ingest_line("[1, 2, 3]").unwrap();
        builder.ingest_line("").unwrap();
        builder.ingest_bytes(&[0xff, 0xfe, b'{']).unwrap();
        builder
            .ingest_line(r#"{"a/bad": {"tar_number": 1, "duration": "long"}, "a/good": {"tar_number": 1, "duration": 1.0}}"#)
            .unwrap();
        builder
            .ingest_line(r#"{"a/orphan": {"tar_number": 0, "duration": 1.0}}"#)
            .unwrap();

        let stats = builder.finish().unwrap();
        assert_eq!(stats.lines_read, 6);
        assert_eq!(stats.malformed_lines, 3);
        assert_eq!(stats.lines_processed, 2);
        assert_eq!(stats.malformed_records, 1);
        assert_eq!(stats.missing_shard, 1);
        assert_eq!(stats.files_kept, 1);
    }

    #[test]
    fn test_periodic_flush_clears_pending() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir, 2);

        builder
            .ingest_line(r#"{"a/f1": {"tar_number": 1, "duration": 1.0}}"#)
            .unwrap();
        assert_eq!(builder.pending_files(), 1);
        assert!(!builder.store().contains(&ShardKey::from_number(1)));

        builder
            .ingest_line(r#"{"a/f2": {"tar_number": 2, "duration": 1.0}}"#)
            .unwrap();
        assert_eq!(builder.pending_files(), 0);
        assert_eq!(builder.state(), BuilderState::Accumulating);
        assert_eq!(builder.stats().flushes, 1);
        assert!(builder.store().contains(&ShardKey::from_number(1)));
        assert!(builder.store().contains(&ShardKey::from_number(2)));
    }

    #[test]
    fn test_resume_preserves_flushed_records() {
        let dir = TempDir::new().unwrap();

        let mut first = builder(&dir, 100);
        first
            .ingest_line(r#"{"a/f1": {"tar_number": 3, "duration": 1.0, "timestamps": [{"start": 0, "end": 16000}]}}"#)
            .unwrap();
        first.finish().unwrap();

        let mut second = builder(&dir, 100);
        second
            .ingest_line(r#"{"a/f2": {"tar_number": "000003", "duration": 2.0}}"#)
            .unwrap();
        second.finish().unwrap();

        let shard = ShardStore::open(dir.path())
            .unwrap()
            .load(&ShardKey::from_number(3))
            .unwrap();
        assert_eq!(shard.len(), 2);
        assert!(shard.get("f1.mp3").unwrap().has_speech());
    }

    #[test]
    fn test_ingest_reader() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir, 100);
        let feed = "{\"a/f1\": {\"tar_number\": 9, \"duration\": 1.0}}\nbroken\n{\"a/f2\": {\"tar_number\": 9, \"duration\": 1.0}}\n";

        let completed = builder.ingest_reader(feed.as_bytes(), |_| true).unwrap();
        let stats = builder.finish().unwrap();

        assert!(completed);
        assert_eq!(stats.files_kept, 2);
        assert_eq!(stats.malformed_lines, 1);
    }

    #[test]
    fn test_stopped_reader_commits_lines_read() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir, 100);
        let feed = "{\"a/f1\": {\"tar_number\": 1, \"duration\": 1.0}}\n{\"a/f2\": {\"tar_number\": 2, \"duration\": 1.0}}\n{\"a/f3\": {\"tar_number\": 3, \"duration\": 1.0}}\n";

        let completed = builder
            .ingest_reader(feed.as_bytes(), |stats| stats.lines_read < 2)
            .unwrap();
        assert!(!completed);
        assert_eq!(builder.pending_files(), 2);

        let stats = builder.finish().unwrap();
        assert_eq!(stats.lines_read, 2);
        let store = ShardStore::open(dir.path()).unwrap();
        assert!(store.contains(&ShardKey::from_number(1)));
        assert!(store.contains(&ShardKey::from_number(2)));
        assert!(!store.contains(&ShardKey::from_number(3)));
    }
}
