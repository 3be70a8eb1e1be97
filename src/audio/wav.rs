use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use crate::error::{Result, VadError};

use super::{AudioDecoder, AudioStream, DecodeSpec};

/// In-process decoder for WAV sources.
///
/// Downmixes to mono when asked, but does not resample: the source rate must
/// match the requested rate.
#[derive(Debug, Default, Clone)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    type Stream = WavStream;

    fn open(&self, source: &[u8], spec: DecodeSpec) -> Result<WavStream> {
        let reader = WavReader::new(Cursor::new(source))
            .map_err(|e| VadError::Decode(format!("Failed to open WAV source: {e}")))?;
        let wav_spec = reader.spec();

        if wav_spec.sample_rate != spec.sample_rate {
            return Err(VadError::Decode(format!(
                "WAV source is {} Hz, {} Hz requested (resampling is not supported)",
                wav_spec.sample_rate, spec.sample_rate
            )));
        }
        if spec.channels != 1 && spec.channels != wav_spec.channels {
            return Err(VadError::Decode(format!(
                "Cannot map {} source channels to {}",
                wav_spec.channels, spec.channels
            )));
        }

        let interleaved = read_samples(reader)?;
        let samples = if spec.channels == 1 && wav_spec.channels > 1 {
            downmix(&interleaved, wav_spec.channels as usize)
        } else {
            interleaved
        };

        debug!(
            "Opened WAV source: {} Hz, {} channels, {} samples",
            wav_spec.sample_rate,
            wav_spec.channels,
            samples.len()
        );

        Ok(WavStream { samples, spec })
    }

    fn name(&self) -> &'static str {
        "wav"
    }
}

fn read_samples(reader: WavReader<Cursor<&[u8]>>) -> Result<Vec<f32>> {
    let spec = reader.spec();
    let samples = match spec.sample_format {
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
        }
        SampleFormat::Float => reader.into_samples::<f32>().collect(),
    };
    samples.map_err(|e| VadError::Decode(format!("Corrupt WAV data: {e}")))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Fully decoded WAV samples.
pub struct WavStream {
    samples: Vec<f32>,
    spec: DecodeSpec,
}

impl AudioStream for WavStream {
    fn samples_in_range(&mut self, start: f64, end: f64) -> Result<Vec<f32>> {
        let channels = self.spec.channels as usize;
        let frames = self.samples.len() / channels;
        let rate = self.spec.sample_rate as f64;

        let first = ((start.max(0.0) * rate) as usize).min(frames);
        let last = ((end.max(0.0) * rate) as usize).clamp(first, frames);

        Ok(self.samples[first * channels..last * channels].to_vec())
    }
}

/// Write mono samples as a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
