//! Configuration file support
//!
//! The on-disk layout groups tool paths, limits and logging separately from
//! the runtime `IngestConfig`; every section and field is optional.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{AudioConfig, FrameConfig, IngestConfig, MemoryConfig, ProbeConfig};
use crate::error::{IngestError, Result};

/// Configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// External tool settings
    pub tools: Option<ToolSettings>,
    /// Container allow-list
    pub formats: Option<FormatSettings>,
    /// Audio settings
    pub audio: Option<AudioSettings>,
    /// Frame sampling settings
    pub frames: Option<FrameSettings>,
    /// Memory settings
    pub memory: Option<MemorySettings>,
    /// Limits settings
    pub limits: Option<LimitsSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    pub ffprobe: Option<String>,
    pub ffmpeg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatSettings {
    /// Extensions such as "mp4" or ".mp4"
    pub supported: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub transcript_sample_rate: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSettings {
    pub interval_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Fraction of host memory, 0.0 - 1.0
    pub max_usage: Option<f64>,
    pub chunk_duration_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSettings {
    pub workers: Option<usize>,
    pub process_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| IngestError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| IngestError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Fully populated default configuration file
    pub fn default_config() -> Self {
        let defaults = IngestConfig::default();
        Self {
            tools: Some(ToolSettings {
                ffprobe: Some(defaults.probe.ffprobe_path),
                ffmpeg: Some(defaults.audio.ffmpeg_path),
            }),
            formats: Some(FormatSettings {
                supported: defaults.probe.supported_formats,
            }),
            audio: Some(AudioSettings {
                sample_rate: Some(defaults.audio.sample_rate),
                channels: Some(defaults.audio.channels),
                transcript_sample_rate: Some(defaults.audio.transcript_sample_rate),
            }),
            frames: Some(FrameSettings {
                interval_secs: Some(defaults.frames.interval_secs),
            }),
            memory: Some(MemorySettings {
                max_usage: Some(defaults.memory.max_memory_usage),
                chunk_duration_secs: Some(defaults.memory.chunk_duration_secs),
            }),
            limits: Some(LimitsSettings {
                workers: Some(defaults.workers),
                process_timeout_secs: None,
            }),
            logging: Some(LoggingSettings {
                level: defaults.log_level,
                format: Some("pretty".to_string()),
            }),
        }
    }

    /// Whether the logging section asks for JSON output
    pub fn json_logs(&self) -> bool {
        self.logging
            .as_ref()
            .and_then(|l| l.format.as_deref())
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }

    /// Convert to a validated IngestConfig
    pub fn into_ingest_config(self) -> Result<IngestConfig> {
        let d = IngestConfig::default();
        let tools = self.tools;
        let audio = self.audio;
        let memory = self.memory;
        let limits = self.limits;

        let config = IngestConfig {
            probe: ProbeConfig {
                ffprobe_path: tools
                    .as_ref()
                    .and_then(|t| t.ffprobe.clone())
                    .unwrap_or(d.probe.ffprobe_path),
                supported_formats: self
                    .formats
                    .map(|f| f.supported)
                    .unwrap_or(d.probe.supported_formats),
            },
            audio: AudioConfig {
                ffmpeg_path: tools
                    .and_then(|t| t.ffmpeg)
                    .unwrap_or(d.audio.ffmpeg_path),
                sample_rate: audio
                    .as_ref()
                    .and_then(|a| a.sample_rate)
                    .unwrap_or(d.audio.sample_rate),
                channels: audio
                    .as_ref()
                    .and_then(|a| a.channels)
                    .unwrap_or(d.audio.channels),
                transcript_sample_rate: audio
                    .and_then(|a| a.transcript_sample_rate)
                    .unwrap_or(d.audio.transcript_sample_rate),
            },
            frames: FrameConfig {
                interval_secs: self
                    .frames
                    .and_then(|f| f.interval_secs)
                    .unwrap_or(d.frames.interval_secs),
            },
            memory: MemoryConfig {
                max_memory_usage: memory
                    .as_ref()
                    .and_then(|m| m.max_usage)
                    .unwrap_or(d.memory.max_memory_usage),
                chunk_duration_secs: memory
                    .and_then(|m| m.chunk_duration_secs)
                    .unwrap_or(d.memory.chunk_duration_secs),
            },
            workers: limits
                .as_ref()
                .and_then(|l| l.workers)
                .unwrap_or(d.workers),
            process_timeout_secs: limits.and_then(|l| l.process_timeout_secs),
            log_level: self.logging.map(|l| l.level).unwrap_or(d.log_level),
        };
        config.validate()?;
        Ok(config)
    }
}

const HEADER: &str = "\
# media-ingest configuration
#
# Every section and key is optional; missing values fall back to the
# built-in defaults shown here.
";

/// Comment lines written above each table of the generated file
const SECTION_COMMENTS: &[(&str, &str)] = &[
    ("tools", "# Paths or names of the external ffprobe and ffmpeg binaries."),
    ("formats", "# Container extensions accepted by the prober, with or without a dot."),
    ("audio", "# Mono/stereo PCM output. transcript_sample_rate is used for the transcript input."),
    ("frames", "# Seconds between sampled frames."),
    (
        "memory",
        "# max_usage is the fraction of host memory (0.0 - 1.0) the chunked pass\n\
         # tries to stay under. chunk_duration_secs is the default chunk length.",
    ),
    (
        "limits",
        "# workers bounds concurrent extraction tasks.\n\
         # Set process_timeout_secs to kill external tools that run too long.",
    ),
    ("logging", "# level: trace, debug, info, warn, error. format: pretty or json."),
];

/// Render `config` as TOML with a header and a comment above every section.
pub fn commented_toml(config: &ConfigFile) -> Result<String> {
    let body = toml::to_string_pretty(config).map_err(|e| IngestError::Config(e.to_string()))?;
    let mut out = String::from(HEADER);
    for line in body.lines() {
        let table = line
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'));
        if let Some(comment) = table.and_then(|t| {
            SECTION_COMMENTS
                .iter()
                .find(|(name, _)| *name == t)
                .map(|(_, c)| c)
        }) {
            out.push('\n');
            out.push_str(comment);
            out.push('\n');
        }
        out.push_str(line);
        out.push('\n');
    }
    Ok(out)
}

/// Generate a commented default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let content = commented_toml(&ConfigFile::default_config())?;
    std::fs::write(path.as_ref(), content)?;
    Ok(())
}
