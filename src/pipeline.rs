use crate::audio::{write_wav, AudioDecoder};
use crate::error::{Result, VadError};
use crate::sampler::{ChunkSampler, LanguageLookup, SampleInput, SampleOutcome, SamplerStats};
use crate::store::{BuildStats, BuilderConfig, ShardStore, StoreBuilder};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of a store build pass.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub stats: BuildStats,
    /// Committed shards in the store after the pass, including older ones.
    pub shards_on_disk: usize,
    pub elapsed: Duration,
    /// The pass stopped early on Ctrl+C. Everything read was still flushed.
    pub interrupted: bool,
}

fn count_lines(path: &Path) -> Result<u64> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut count = 0;
    for line in reader.split(b'\n') {
        line?;
        count += 1;
    }
    Ok(count)
}

/// Build or extend a shard store from a JSON-lines annotation feed.
///
/// Fails before touching the store if the feed is missing. `cancelled` is
/// checked after every line; once set, reading stops and the records read so
/// far are still flushed.
pub fn build_store(
    input: &Path,
    output: &Path,
    config: BuilderConfig,
    show_progress: bool,
    cancelled: Arc<AtomicBool>,
) -> Result<BuildReport> {
    let start_time = Instant::now();

    if !input.is_file() {
        return Err(VadError::MissingInput(format!(
            "{} not found. Download the VAD results feed first; it can be deleted once the build completes.",
            input.display()
        )));
    }

    info!("Reading from: {}", input.display());
    info!("Writing shards to: {}", output.display());

    let store = ShardStore::create(output)?;
    let mut builder = StoreBuilder::new(store, config);

    let progress_bar = if show_progress {
        info!("Counting lines...");
        let total = count_lines(input)?;
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} lines ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let reader = BufReader::new(fs::File::open(input)?);
    let completed = builder.ingest_reader(reader, |_| {
        if let Some(pb) = &progress_bar {
            pb.inc(1);
        }
        !cancelled.load(Ordering::Relaxed)
    })?;
    let interrupted = !completed;
    if interrupted {
        warn!("Build interrupted, flushing what was read so far");
    }

    if let Some(pb) = &progress_bar {
        pb.finish_and_clear();
    }

    let shards = builder.store().clone();
    let stats = builder.finish()?;
    let shards_on_disk = shards.list_shards()?.len();

    if stats.malformed_lines > 0 || stats.malformed_records > 0 {
        warn!(
            "Skipped {} malformed lines and {} malformed records",
            stats.malformed_lines, stats.malformed_records
        );
    }

    Ok(BuildReport {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        stats,
        shards_on_disk,
        elapsed: start_time.elapsed(),
        interrupted,
    })
}

/// Print a summary of a build pass.
pub fn print_build_summary(report: &BuildReport) {
    let stats = &report.stats;
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    if report.interrupted {
        println!("                  VAD Store Build Interrupted                  ");
    } else {
        println!("                    VAD Store Build Complete                   ");
    }
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Input:          {}", report.input.display());
    println!("  Store:          {}", report.output.display());
    println!();
    println!("  Processed:      {} lines", stats.lines_processed);
    println!("  Malformed:      {} lines", stats.malformed_lines);
    println!("  Kept total:     {} files", stats.files_kept);
    println!("  With speech:    {} files", stats.files_with_speech);
    println!("  Without speech: {} files", stats.files_without_speech());
    println!("  No shard id:    {} files", stats.missing_shard);
    println!("  Written:        {} shards", stats.partitions_written);
    println!("  On disk:        {} shards", report.shards_on_disk);
    println!("  Time:           {:.2}s", report.elapsed.as_secs_f64());
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}

/// Result of sampling one local file.
#[derive(Debug)]
pub struct SampleReport {
    pub outcome: SampleOutcome,
    pub written: Vec<PathBuf>,
    pub stats: SamplerStats,
}

/// Sample chunks from a local audio file, optionally writing each chunk as WAV.
pub fn sample_local_file<D, L>(
    sampler: &mut ChunkSampler<D, L>,
    audio_path: &Path,
    key: &str,
    locator: &str,
    seed: Option<u64>,
    out_dir: Option<&Path>,
) -> Result<SampleReport>
where
    D: AudioDecoder,
    L: LanguageLookup,
{
    if !audio_path.is_file() {
        return Err(VadError::MissingInput(audio_path.display().to_string()));
    }
    let audio = fs::read(audio_path)?;

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let input = SampleInput {
        audio: &audio,
        key,
        locator,
    };
    let outcome = sampler.sample(&input, &mut rng)?;

    let mut written = Vec::new();
    if let (SampleOutcome::Chunks(chunks), Some(dir)) = (&outcome, out_dir) {
        fs::create_dir_all(dir)?;
        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chunk".to_string());
        let sample_rate = sampler.config().target_sample_rate;

        for (index, chunk) in chunks.chunks.iter().enumerate() {
            let path = dir.join(format!("{stem}_chunk_{index:02}.wav"));
            write_wav(&path, chunk, sample_rate)?;
            written.push(path);
        }
        info!("Wrote {} chunks to {}", written.len(), dir.display());
    }

    Ok(SampleReport {
        outcome,
        written,
        stats: sampler.stats().clone(),
    })
}

/// Print a summary of a sampling run.
pub fn print_sample_summary(report: &SampleReport, chunk_seconds: f64) {
    println!();
    match &report.outcome {
        SampleOutcome::Chunks(chunks) => {
            println!(
                "  Sampled {} chunks of {:.1}s (language: {})",
                chunks.len(),
                chunk_seconds,
                chunks.language
            );
            for path in &report.written {
                println!("    {}", path.display());
            }
        }
        SampleOutcome::Skipped(reason) => {
            println!("  Skipped: {reason}");
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_missing_input_fails_fast() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("shards");

        let result = build_store(
            Path::new("/nonexistent/vad_results.jsonl"),
            &output,
            BuilderConfig::default(),
            false,
            Arc::new(AtomicBool::new(false)),
        );

        assert!(matches!(result, Err(VadError::MissingInput(_))));
        assert!(!output.exists());
    }

    #[test]
    fn test_cancelled_build_still_flushes() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("feed.jsonl");
        fs::write(
            &input,
            "{\"a/f1\": {\"tar_number\": 1, \"duration\": 1.0}}\n\
             {\"a/f2\": {\"tar_number\": 2, \"duration\": 1.0}}\n\
             {\"a/f3\": {\"tar_number\": 3, \"duration\": 1.0}}\n",
        )
        .unwrap();
        let output = dir.path().join("shards");

        // Already set: the pass stops right after the first line.
        let report = build_store(
            &input,
            &output,
            BuilderConfig::default(),
            false,
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.stats.lines_read, 1);
        assert_eq!(report.stats.files_kept, 1);
        assert_eq!(report.shards_on_disk, 1);

        let store = ShardStore::open(&output).unwrap();
        let shard = store.load(&crate::store::ShardKey::from_number(1)).unwrap();
        assert!(shard.get("f1.mp3").is_some());
        assert!(!store.contains(&crate::store::ShardKey::from_number(2)));
    }

    #[test]
    fn test_uncancelled_build_reads_everything() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("feed.jsonl");
        fs::write(
            &input,
            "{\"a/f1\": {\"tar_number\": 1, \"duration\": 1.0}}\n{\"a/f2\": {\"tar_number\": 2, \"duration\": 1.0}}\n",
        )
        .unwrap();

        let report = build_store(
            &input,
            &dir.path().join("shards"),
            BuilderConfig::default(),
            false,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert!(!report.interrupted);
        assert_eq!(report.stats.files_kept, 2);
        assert_eq!(report.shards_on_disk, 2);
    }

    #[test]
    fn test_count_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feed.jsonl");
        fs::write(&path, "a\nb\n\nc").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 4);
    }
}
