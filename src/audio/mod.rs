pub mod extract;
pub mod wav;

pub use extract::{check_ffmpeg, FfmpegDecoder, FfmpegStream};
pub use wav::{write_wav, WavDecoder, WavStream};

use crate::error::Result;

/// Output layout requested from a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodeSpec {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

/// Turns encoded audio bytes into a seekable stream of samples.
pub trait AudioDecoder {
    type Stream: AudioStream;

    /// Prepare `source` for range reads in the requested layout.
    fn open(&self, source: &[u8], spec: DecodeSpec) -> Result<Self::Stream>;

    fn name(&self) -> &'static str;
}

/// An opened audio source.
pub trait AudioStream {
    /// Interleaved samples played between `start` and `end` seconds.
    ///
    /// May return fewer samples than requested near the end of the track.
    fn samples_in_range(&mut self, start: f64, end: f64) -> Result<Vec<f32>>;
}
