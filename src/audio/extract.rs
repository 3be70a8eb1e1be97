use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, VadError};

use super::{AudioDecoder, AudioStream, DecodeSpec};

/// Check if FFmpeg is installed and accessible.
pub fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map_err(|e| {
            VadError::Decode(format!(
                "FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(VadError::Decode("FFmpeg check failed".to_string()));
    }

    debug!("FFmpeg is available");
    Ok(())
}

/// Decoder that shells out to FFmpeg, seeking straight to each range so
/// regions outside the requested chunks are never decoded.
#[derive(Debug, Default, Clone)]
pub struct FfmpegDecoder;

impl FfmpegDecoder {
    pub fn new() -> Result<Self> {
        check_ffmpeg()?;
        Ok(Self)
    }
}

impl AudioDecoder for FfmpegDecoder {
    type Stream = FfmpegStream;

    fn open(&self, source: &[u8], spec: DecodeSpec) -> Result<FfmpegStream> {
        let mut file = NamedTempFile::new()?;
        file.write_all(source)?;
        file.flush()?;
        Ok(FfmpegStream { file, spec })
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

/// Encoded bytes staged in a scratch file for FFmpeg to seek into.
pub struct FfmpegStream {
    file: NamedTempFile,
    spec: DecodeSpec,
}

impl AudioStream for FfmpegStream {
    fn samples_in_range(&mut self, start: f64, end: f64) -> Result<Vec<f32>> {
        let duration = end - start;
        if duration <= 0.0 {
            return Err(VadError::Decode(format!(
                "Empty decode range: {start:.3}s to {end:.3}s"
            )));
        }

        let start_secs = format!("{:.3}", start.max(0.0));
        let duration_secs = format!("{:.3}", duration);

        debug!(
            "Decoding segment: start={}, duration={}",
            start_secs, duration_secs
        );

        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-ss"])
            .arg(&start_secs)
            .args(["-t"])
            .arg(&duration_secs)
            .args(["-i"])
            .arg(self.file.path())
            .args(["-vn", "-f", "f32le", "-acodec", "pcm_f32le", "-ar"])
            .arg(self.spec.sample_rate.to_string())
            .arg("-ac")
            .arg(self.spec.channels.to_string())
            .arg("pipe:1")
            .output()
            .map_err(|e| VadError::Decode(format!("Failed to run FFmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VadError::Decode(format!(
                "FFmpeg segment decode failed: {stderr}"
            )));
        }

        Ok(samples_from_f32le(&output.stdout))
    }
}

/// Parse raw little-endian f32 PCM. A trailing partial sample is ignored.
fn samples_from_f32le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
