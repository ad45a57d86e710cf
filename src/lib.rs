//! Video ingestion core.
//!
//! Probes container metadata, samples RGB frames at a fixed interval,
//! extracts PCM audio, walks long files in memory-bounded chunks and runs the
//! per-file extraction tasks concurrently.

pub mod audio;
pub mod chunk;
pub mod config;
pub mod config_file;
pub mod error;
pub(crate) mod ffmpeg_utils;
pub mod frames;
pub mod media;
pub mod memory;
pub mod orchestrator;
pub mod probe;
pub mod process;

#[cfg(test)]
pub(crate) mod tests;

pub use audio::AudioExtractor;
pub use chunk::{ChunkIter, ChunkedStreamProcessor};
pub use config::IngestConfig;
pub use error::{FfmpegError, IngestError, Result};
pub use ffmpeg_utils::init;
pub use ffmpeg_utils::version_info as ffmpeg_version_info;
pub use frames::{FrameSampler, FrameSource, FrameSourceOpener};
pub use media::{AudioBuffer, Chunk, Frame, MediaHandle, MediaMetadata};
pub use memory::{MemoryMonitor, MemoryUsage, SystemMemoryMonitor};
pub use orchestrator::{Component, ExtractOptions, ExtractionResult, Orchestrator, TaskFailure, TaskKind, TranscriptInput};
pub use probe::Prober;
pub use process::{CommandRunner, ProcessOutput, SystemRunner};
