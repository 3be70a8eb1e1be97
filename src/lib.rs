pub mod audio;
pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sampler;
pub mod store;

pub use batch::{collate, ChunkBatch};
pub use config::Config;
pub use error::{Result, VadError};
pub use pipeline::{
    build_store, print_build_summary, print_sample_summary, sample_local_file, BuildReport,
    SampleReport,
};
pub use sampler::{ChunkSampler, FileChunks, SampleInput, SampleOutcome, SamplerConfig, SkipReason};
pub use store::{ShardKey, ShardStore, StoreBuilder};
