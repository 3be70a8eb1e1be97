//! Aggregation of per-file sampler output into training batches.

use crate::sampler::FileChunks;

/// Chunks from several files, concatenated in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkBatch {
    pub chunks: Vec<Vec<f32>>,
    pub attention_mask: Vec<Vec<u8>>,
    /// One label per chunk.
    pub languages: Vec<String>,
    /// Chunk count contributed by each file, in order.
    pub file_chunk_counts: Vec<usize>,
}

impl ChunkBatch {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn push(&mut self, file: FileChunks) {
        let count = file.chunks.len();
        self.chunks.extend(file.chunks);
        self.attention_mask.extend(file.attention_mask);
        self.languages
            .extend(std::iter::repeat(file.language).take(count));
        self.file_chunk_counts.push(count);
    }
}

/// Collate per-file results, dropping skipped files.
///
/// Returns `None` when no file produced chunks.
pub fn collate<I>(results: I) -> Option<ChunkBatch>
where
    I: IntoIterator<Item = Option<FileChunks>>,
{
    let mut batch = ChunkBatch::default();
    for file in results.into_iter().flatten() {
        batch.push(file);
    }
    (!batch.file_chunk_counts.is_empty()).then_some(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(count: usize, len: usize, language: &str) -> FileChunks {
        FileChunks {
            chunks: vec![vec![0.5; len]; count],
            attention_mask: vec![vec![1; len]; count],
            language: language.to_string(),
        }
    }

    #[test]
    fn test_collate_drops_absent() {
        let batch = collate(vec![None, Some(file(3, 4, "es"))]).unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.languages, vec!["es"; 3]);
        assert_eq!(batch.attention_mask.len(), 3);
        assert_eq!(batch.file_chunk_counts, vec![3]);
    }

    #[test]
    fn test_collate_keeps_file_order() {
        let batch = collate(vec![
            Some(file(2, 4, "fr")),
            None,
            Some(file(1, 4, "ar")),
            Some(file(2, 4, "es")),
        ])
        .unwrap();

        assert_eq!(batch.languages, vec!["fr", "fr", "ar", "es", "es"]);
        assert_eq!(batch.file_chunk_counts, vec![2, 1, 2]);
        assert_eq!(batch.len(), batch.languages.len());
    }

    #[test]
    fn test_collate_all_absent() {
        assert!(collate(vec![None, None]).is_none());
        assert!(collate(Vec::<Option<FileChunks>>::new()).is_none());
    }
}
