use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, VadError};
use crate::store::ShardKey;

/// Label returned when a file has no language entry.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Maps a (shard, file) pair to a language label.
pub trait LanguageLookup {
    /// Language of `file_name` in `shard`, or [`UNKNOWN_LANGUAGE`].
    fn language(&self, shard: &ShardKey, file_name: &str) -> &str;
}

/// Lookup used when no language index is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLanguageIndex;

impl LanguageLookup for NoLanguageIndex {
    fn language(&self, _shard: &ShardKey, _file_name: &str) -> &str {
        UNKNOWN_LANGUAGE
    }
}

#[derive(Debug, Deserialize)]
struct IndexLine {
    shard: serde_json::Value,
    file: String,
    language: String,
}

/// In-memory language index.
#[derive(Debug, Default, Clone)]
pub struct LanguageIndex {
    entries: HashMap<(ShardKey, String), String>,
}

impl LanguageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, shard: ShardKey, file_name: impl Into<String>, language: impl Into<String>) {
        self.entries.insert((shard, file_name.into()), language.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a JSON-lines index of `{"shard": .., "file": .., "language": ..}`.
    ///
    /// Shard identifiers are normalized like the store builder does. Lines
    /// that fail to parse are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(VadError::MissingInput(format!(
                "language index {}",
                path.display()
            )));
        }

        let reader = BufReader::new(fs::File::open(path)?);
        let mut index = Self::new();
        let mut skipped = 0usize;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<IndexLine>(&line)
                .ok()
                .and_then(|entry| ShardKey::from_json(&entry.shard).map(|key| (key, entry)));
            match parsed {
                Some((key, entry)) => index.insert(key, entry.file, entry.language),
                None => {
                    skipped += 1;
                    debug!("Skipping language index line: {line}");
                }
            }
        }

        info!(
            "Loaded language index with {} entries ({} lines skipped)",
            index.len(),
            skipped
        );
        Ok(index)
    }
}

impl LanguageLookup for LanguageIndex {
    fn language(&self, shard: &ShardKey, file_name: &str) -> &str {
        self.entries
            .get(&(shard.clone(), file_name.to_string()))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LANGUAGE)
    }
}
