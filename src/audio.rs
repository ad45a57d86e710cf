//! PCM audio extraction through an external decode tool (ffmpeg).
//!
//! The tool resamples to the requested rate and streams signed 16-bit
//! little-endian PCM on stdout. A run either yields the complete buffer or
//! fails; partial output is discarded.

use std::ffi::OsString;
use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::config::AudioConfig;
use crate::error::{IngestError, Result};
use crate::media::{AudioBuffer, MediaHandle};
use crate::process::CommandRunner;

/// Time window of the source, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start_secs: f64,
    pub duration_secs: f64,
}

/// Decodes the audio track of a file to PCM.
#[derive(Clone)]
pub struct AudioExtractor {
    runner: Arc<dyn CommandRunner>,
    config: AudioConfig,
}

impl AudioExtractor {
    pub fn new(runner: Arc<dyn CommandRunner>, config: AudioConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Decode the whole audio track at `sample_rate`.
    pub fn extract_audio(&self, handle: &MediaHandle, sample_rate: u32) -> Result<AudioBuffer> {
        self.run(handle, sample_rate, None)
    }

    /// Decode only `[start, start + duration)` seconds at `sample_rate`.
    pub fn extract_audio_window(
        &self,
        handle: &MediaHandle,
        sample_rate: u32,
        start_secs: f64,
        duration_secs: f64,
    ) -> Result<AudioBuffer> {
        if !(start_secs >= 0.0 && duration_secs > 0.0) {
            return Err(IngestError::InvalidArgument(format!(
                "invalid audio window start={} duration={}",
                start_secs, duration_secs
            )));
        }
        self.run(
            handle,
            sample_rate,
            Some(TimeWindow {
                start_secs,
                duration_secs,
            }),
        )
    }

    fn run(&self, handle: &MediaHandle, sample_rate: u32, window: Option<TimeWindow>) -> Result<AudioBuffer> {
        if sample_rate == 0 {
            return Err(IngestError::InvalidArgument("sample rate must be > 0".into()));
        }

        let args = decode_args(handle, sample_rate, self.config.channels, window);
        let output = self
            .runner
            .run(&self.config.ffmpeg_path, &args)
            .map_err(|e| IngestError::AudioExtraction {
                reason: format!("failed to run {}: {}", self.config.ffmpeg_path, e),
                diagnostics: String::new(),
            })?;

        if !output.success() {
            return Err(IngestError::AudioExtraction {
                reason: format!(
                    "{} exited with {:?}",
                    self.config.ffmpeg_path, output.exit_code
                ),
                diagnostics: output.stderr_text(),
            });
        }

        let diagnostics = output.stderr_text();
        let samples = decode_pcm_s16le(output.stdout).map_err(|len| IngestError::AudioExtraction {
            reason: format!("odd PCM byte count {} from {}", len, self.config.ffmpeg_path),
            diagnostics,
        })?;

        tracing::debug!(
            path = %handle.path().display(),
            samples = samples.len(),
            sample_rate,
            window = ?window,
            "extracted audio"
        );

        Ok(AudioBuffer {
            samples,
            sample_rate,
            channels: self.config.channels,
        })
    }
}

/// ffmpeg arguments for a PCM decode to stdout.
fn decode_args(handle: &MediaHandle, sample_rate: u32, channels: u16, window: Option<TimeWindow>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-v".into(), "error".into(), "-nostdin".into()];
    if let Some(w) = window {
        // Input-side seek; ffmpeg trims accurately to the sample when decoding.
        args.push("-ss".into());
        args.push(format!("{:.6}", w.start_secs).into());
        args.push("-t".into());
        args.push(format!("{:.6}", w.duration_secs).into());
    }
    args.push("-i".into());
    args.push(handle.path().as_os_str().to_owned());
    for arg in [
        "-vn".to_string(),
        "-ac".to_string(),
        channels.to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "pipe:1".to_string(),
    ] {
        args.push(arg.into());
    }
    args
}

/// Reinterpret raw bytes as little-endian i16 samples. An odd byte count is
/// returned as `Err(len)`.
pub fn decode_pcm_s16le(raw: Vec<u8>) -> std::result::Result<Vec<i16>, usize> {
    if raw.len() % 2 != 0 {
        return Err(raw.len());
    }
    let mut buf = Bytes::from(raw);
    let mut samples = Vec::with_capacity(buf.len() / 2);
    while buf.has_remaining() {
        samples.push(buf.get_i16_le());
    }
    Ok(samples)
}
