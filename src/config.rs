//! Ingestion configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// Prober configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Metadata inspection tool
    pub ffprobe_path: String,

    /// Allow-listed container extensions (e.g. ".mp4")
    pub supported_formats: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: "ffprobe".to_string(),
            supported_formats: [".mp4", ".mov", ".mkv", ".avi", ".webm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Audio extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Decode tool
    pub ffmpeg_path: String,

    /// Default PCM sample rate for the audio component
    pub sample_rate: u32,

    /// Output channel count (1 = downmix to mono)
    pub channels: u16,

    /// Sample rate the transcript stage consumes
    pub transcript_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            sample_rate: 44100,
            channels: 1,
            transcript_sample_rate: 16000,
        }
    }
}

/// Frame sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Time between sampled frames in seconds
    pub interval_secs: f64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self { interval_secs: 1.0 }
    }
}

/// Memory budget and chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Fraction of host memory above which caches are released before a chunk
    pub max_memory_usage: f64,

    /// Length of one chunk in seconds
    pub chunk_duration_secs: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memory_usage: 0.8,
            chunk_duration_secs: 60.0,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Prober configuration
    pub probe: ProbeConfig,

    /// Audio configuration
    pub audio: AudioConfig,

    /// Frame sampling configuration
    pub frames: FrameConfig,

    /// Memory configuration
    pub memory: MemoryConfig,

    /// Number of extraction tasks allowed to run at once
    pub workers: usize,

    /// Kill external tools that run longer than this
    pub process_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            audio: AudioConfig::default(),
            frames: FrameConfig::default(),
            memory: MemoryConfig::default(),
            workers: 3,
            process_timeout_secs: None,
            log_level: "info".to_string(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: IngestConfig =
            toml::from_str(&content).map_err(|e| IngestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| IngestError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 || self.audio.transcript_sample_rate == 0 {
            return Err(IngestError::Config("sample rate must be > 0".into()));
        }
        if self.audio.channels == 0 {
            return Err(IngestError::Config("channels must be > 0".into()));
        }
        if self.workers == 0 {
            return Err(IngestError::Config("workers must be > 0".into()));
        }
        if !(self.frames.interval_secs > 0.0) {
            return Err(IngestError::Config("frame interval must be > 0".into()));
        }
        if !(self.memory.chunk_duration_secs > 0.0) {
            return Err(IngestError::Config("chunk duration must be > 0".into()));
        }
        if !(self.memory.max_memory_usage > 0.0 && self.memory.max_memory_usage <= 1.0) {
            return Err(IngestError::Config(
                "max_memory_usage must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Process kill deadline, if configured
    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_secs.map(Duration::from_secs)
    }
}
