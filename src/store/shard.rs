use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, VadError};

use super::{ShardKey, VadShard};

const SHARD_EXTENSION: &str = "json";

/// Directory-backed shard store. One JSON file per shard.
#[derive(Debug, Clone)]
pub struct ShardStore {
    root: PathBuf,
}

impl ShardStore {
    /// Open a store for writing, creating the directory if needed.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Open an existing store for reading.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(VadError::StoreNotFound(root.display().to_string()));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shard_path(&self, key: &ShardKey) -> PathBuf {
        self.root.join(format!("{key}.{SHARD_EXTENSION}"))
    }

    pub fn contains(&self, key: &ShardKey) -> bool {
        self.shard_path(key).is_file()
    }

    /// Load a whole shard. A missing shard file is an error.
    pub fn load(&self, key: &ShardKey) -> Result<VadShard> {
        let path = self.shard_path(key);
        if !path.is_file() {
            return Err(VadError::ShardNotFound(path.display().to_string()));
        }
        let reader = BufReader::new(fs::File::open(&path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Merge `delta` into the persisted shard and commit atomically.
    ///
    /// Files present in `delta` overwrite the stored record; other stored
    /// files are kept. The previous version stays intact until the new one is
    /// fully written. Returns the number of files in the committed shard.
    pub fn merge(&self, key: &ShardKey, delta: &VadShard) -> Result<usize> {
        let mut shard = if self.contains(key) {
            self.load(key)?
        } else {
            VadShard::new()
        };
        shard.merge(delta);

        let path = self.shard_path(key);
        let tmp = NamedTempFile::new_in(&self.root)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, &shard)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| VadError::Io(e.error))?;

        debug!(
            "Committed shard {} ({} new, {} total files)",
            key,
            delta.len(),
            shard.len()
        );
        Ok(shard.len())
    }

    /// List committed shards, sorted by key.
    pub fn list_shards(&self) -> Result<Vec<ShardKey>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXTENSION) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(ShardKey::parse)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
