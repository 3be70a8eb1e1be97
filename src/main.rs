use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use vadshard::audio::{AudioDecoder, FfmpegDecoder, WavDecoder};
use vadshard::config::{parse_language_list, Config};
use vadshard::sampler::{LanguageIndex, ShardCache};
use vadshard::store::{media_file_name, ShardKey, ShardStore};
use vadshard::{build_store, print_build_summary, print_sample_summary, sample_local_file, ChunkSampler};

#[derive(Parser)]
#[command(name = "vadshard")]
#[command(version, about = "Build VAD shard stores and sample speech chunks for training")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Build or extend the shard store from a VAD results JSONL feed
    Build {
        /// VAD results feed, one JSON object per line
        #[arg(short, long)]
        input: PathBuf,

        /// Store directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Flush pending shards every N lines
        #[arg(long)]
        flush_every: Option<usize>,

        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Show the contents of one shard
    Inspect {
        /// Shard number, e.g. 123 or 000123
        shard: String,

        /// Store directory
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// Print the record of a single file as JSON
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Sample speech chunks from one local audio file
    Sample {
        /// Audio file to sample from
        audio: PathBuf,

        /// Archive locator the shard number is parsed from, e.g. .../audio/000123.tar
        #[arg(short, long)]
        url: String,

        /// Sample key inside the archive (defaults to the audio file name)
        #[arg(short, long)]
        key: Option<String>,

        /// Store directory
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// Language index (JSON lines of shard, file, language)
        #[arg(long)]
        languages: Option<PathBuf>,

        /// Only sample these languages (comma-separated)
        #[arg(long)]
        desired: Option<String>,

        /// Seed for reproducible draws
        #[arg(long)]
        seed: Option<u64>,

        /// Maximum chunks per file
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Chunk length in seconds
        #[arg(long)]
        chunk_seconds: Option<f64>,

        /// Shuffle chunk order
        #[arg(long)]
        shuffle: bool,

        /// Write chunks as WAV files into this directory
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    Ok(config)
}

fn run_build(
    config: &mut Config,
    input: PathBuf,
    output: Option<PathBuf>,
    flush_every: Option<usize>,
    no_progress: bool,
) -> Result<()> {
    if let Some(output) = output {
        config.store_dir = output;
    }
    if let Some(n) = flush_every {
        config.flush_every = n;
    }
    config.validate().context("Configuration validation failed")?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let handler_flag = cancelled.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed)) {
        warn!("Could not install Ctrl+C handler: {e}");
    }

    let report = build_store(
        &input,
        &config.store_dir,
        config.builder_config(),
        !no_progress,
        cancelled,
    )
    .context("VAD store build failed")?;

    print_build_summary(&report);
    Ok(())
}

fn run_inspect(config: &Config, shard: &str, store: Option<PathBuf>, file: Option<String>) -> Result<()> {
    let key = ShardKey::parse(shard).with_context(|| format!("Invalid shard number: {shard}"))?;
    let store = ShardStore::open(store.unwrap_or_else(|| config.store_dir.clone()))?;
    let shard = store.load(&key)?;

    if let Some(file) = file {
        let name = media_file_name(&file);
        let record = shard
            .get(&name)
            .with_context(|| format!("No record for {name} in shard {key}"))?;
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    let speech_seconds: f64 = shard.iter().map(|(_, r)| r.speech_duration()).sum();
    let total_seconds: f64 = shard.iter().map(|(_, r)| r.duration).sum();

    println!();
    println!("  Shard:          {}", key);
    println!("  Path:           {}", store.shard_path(&key).display());
    println!("  Files:          {}", shard.len());
    println!("  With speech:    {}", shard.files_with_speech());
    println!("  Without speech: {}", shard.len() - shard.files_with_speech());
    println!("  Speech:         {:.1}s of {:.1}s", speech_seconds, total_seconds);
    println!();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_sample<D: AudioDecoder>(
    config: &Config,
    decoder: D,
    audio: &Path,
    url: &str,
    key: &str,
    languages: Option<PathBuf>,
    seed: Option<u64>,
    out_dir: Option<PathBuf>,
) -> Result<()> {
    let store = ShardStore::open(&config.store_dir).context("VAD store is not readable")?;
    let cache = ShardCache::new(store, config.cache_capacity);
    let index = match languages {
        Some(path) => LanguageIndex::load(&path)?,
        None => LanguageIndex::new(),
    };

    info!("Decoder: {}", decoder.name());
    let mut sampler = ChunkSampler::new(config.sampler_config(), cache, decoder, index);
    let report = sample_local_file(&mut sampler, audio, key, url, seed, out_dir.as_deref())
        .with_context(|| format!("Sampling {} failed", audio.display()))?;

    print_sample_summary(&report, config.chunk_seconds);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Build {
            input,
            output,
            flush_every,
            no_progress,
        } => run_build(&mut config, input, output, flush_every, no_progress),
        Command::Inspect { shard, store, file } => run_inspect(&config, &shard, store, file),
        Command::Sample {
            audio,
            url,
            key,
            store,
            languages,
            desired,
            seed,
            max_chunks,
            chunk_seconds,
            shuffle,
            out_dir,
        } => {
            if let Some(store) = store {
                config.store_dir = store;
            }
            if let Some(desired) = desired {
                config.desired_languages = parse_language_list(&desired);
            }
            if let Some(n) = max_chunks {
                config.max_chunks_per_file = n;
            }
            if let Some(s) = chunk_seconds {
                config.chunk_seconds = s;
            }
            config.shuffle_chunks |= shuffle;
            config.validate().context("Configuration validation failed")?;

            let key = key.unwrap_or_else(|| {
                audio
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let is_wav = audio
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));

            if is_wav {
                run_sample(&config, WavDecoder, &audio, &url, &key, languages, seed, out_dir)
            } else {
                let decoder = FfmpegDecoder::new().context(
                    "FFmpeg not found. Install it with: brew install ffmpeg (macOS) or apt install ffmpeg (Linux)",
                )?;
                run_sample(&config, decoder, &audio, &url, &key, languages, seed, out_dir)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_build() {
        let cli = Cli::try_parse_from(["vadshard", "build", "--input", "feed.jsonl", "--flush-every", "50"]).unwrap();
        match cli.command {
            Command::Build { input, flush_every, .. } => {
                assert_eq!(input, PathBuf::from("feed.jsonl"));
                assert_eq!(flush_every, Some(50));
            }
            _ => panic!("expected build command"),
        }
    }

    #[test]
    fn test_cli_parses_sample() {
        let cli = Cli::try_parse_from([
            "vadshard",
            "sample",
            "clip.wav",
            "--url",
            "https://h/audio/000123.tar",
            "--seed",
            "7",
            "--shuffle",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Sample { url, seed, shuffle, .. } => {
                assert!(url.ends_with("000123.tar"));
                assert_eq!(seed, Some(7));
                assert!(shuffle);
            }
            _ => panic!("expected sample command"),
        }
    }
}
