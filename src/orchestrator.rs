//! Concurrent extraction of audio, frames and transcript input.
//!
//! The file is probed once up front, then the three units of work run on the
//! blocking pool, at most `workers` at a time. Each outcome is kept on its
//! own: a failed unit becomes a [`Component::Failed`] marker and only the
//! failure of all three fails the call.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::AudioExtractor;
use crate::chunk::ChunkedStreamProcessor;
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::frames::sampler::check_interval;
use crate::frames::{FfmpegFrameOpener, FrameSampler};
use crate::media::{AudioBuffer, Frame, MediaHandle, MediaMetadata};
use crate::memory::MemoryMonitor;
use crate::probe::Prober;
use crate::process::SystemRunner;

/// The independent units of work of one extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Audio,
    Frames,
    Transcript,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Audio => "audio",
            TaskKind::Frames => "frames",
            TaskKind::Transcript => "transcript",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one unit of work produced nothing
#[derive(Debug)]
pub struct TaskFailure {
    pub task: TaskKind,
    pub error: IngestError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.task, self.error.kind(), self.error)
    }
}

/// Outcome of one unit of work. A failed unit is always present as
/// `Failed`, never simply missing.
#[derive(Debug)]
pub enum Component<T> {
    Ready(T),
    Failed(TaskFailure),
}

impl<T> Component<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Component::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Component::Failed(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Component::Ready(value) => Some(value),
            Component::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            Component::Ready(_) => None,
            Component::Failed(failure) => Some(failure),
        }
    }

    pub fn into_result(self) -> std::result::Result<T, TaskFailure> {
        match self {
            Component::Ready(value) => Ok(value),
            Component::Failed(failure) => Err(failure),
        }
    }
}

/// Audio prepared for the transcript stage at its own sample rate
#[derive(Debug, Clone)]
pub struct TranscriptInput {
    pub source: PathBuf,
    pub audio: AudioBuffer,
}

/// Everything extracted from one file
#[derive(Debug)]
pub struct ExtractionResult {
    /// Id of the handle the result was extracted from
    pub handle_id: Uuid,
    pub metadata: MediaMetadata,
    pub audio: Component<AudioBuffer>,
    pub frames: Component<Vec<Frame>>,
    pub transcript: Component<TranscriptInput>,
}

impl ExtractionResult {
    pub fn failures(&self) -> Vec<&TaskFailure> {
        [
            self.audio.failure(),
            self.frames.failure(),
            self.transcript.failure(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// True when no unit of work failed
    pub fn is_complete(&self) -> bool {
        self.failures().is_empty()
    }
}

/// Per-call overrides of the configured defaults
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    pub frame_interval_secs: Option<f64>,
    pub audio_sample_rate: Option<u32>,
    pub transcript_sample_rate: Option<u32>,
}

/// Runs the extraction units of one file concurrently.
pub struct Orchestrator {
    sampler: FrameSampler,
    extractor: AudioExtractor,
    frame_interval_secs: f64,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    /// `workers` bounds how many units run at once (at least 1).
    pub fn new(sampler: FrameSampler, extractor: AudioExtractor, workers: usize) -> Self {
        Self {
            sampler,
            extractor,
            frame_interval_secs: 1.0,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn with_frame_interval(mut self, secs: f64) -> Self {
        self.frame_interval_secs = secs;
        self
    }

    /// Wire the production collaborators: system processes for the probe and
    /// audio tools, FFmpeg for frame decoding.
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        config.validate()?;
        let runner = Arc::new(SystemRunner::with_timeout(config.process_timeout()));
        let prober = Prober::new(runner.clone(), config.probe.clone());
        let sampler = FrameSampler::new(prober, Arc::new(FfmpegFrameOpener));
        let extractor = AudioExtractor::new(runner, config.audio.clone());
        Ok(Self::new(sampler, extractor, config.workers).with_frame_interval(config.frames.interval_secs))
    }

    pub fn sampler(&self) -> &FrameSampler {
        &self.sampler
    }

    pub fn extractor(&self) -> &AudioExtractor {
        &self.extractor
    }

    /// Chunk processor sharing this orchestrator's collaborators.
    pub fn chunk_processor(
        &self,
        monitor: Arc<dyn MemoryMonitor>,
        config: &IngestConfig,
    ) -> ChunkedStreamProcessor {
        ChunkedStreamProcessor::new(
            self.sampler.clone(),
            self.extractor.clone(),
            monitor,
            config.memory.clone(),
        )
        .with_frame_interval(self.frame_interval_secs)
    }

    /// Extract with the configured defaults.
    pub async fn extract_all(&self, handle: Arc<MediaHandle>) -> Result<ExtractionResult> {
        self.extract_all_with(handle, ExtractOptions::default()).await
    }

    /// Extract audio, frames and transcript input concurrently.
    ///
    /// Fails early when the file cannot be probed, and otherwise only when
    /// every unit of work failed.
    pub async fn extract_all_with(&self, handle: Arc<MediaHandle>, options: ExtractOptions) -> Result<ExtractionResult> {
        let interval = options.frame_interval_secs.unwrap_or(self.frame_interval_secs);
        let audio_rate = options
            .audio_sample_rate
            .unwrap_or(self.extractor.config().sample_rate);
        let transcript_rate = options
            .transcript_sample_rate
            .unwrap_or(self.extractor.config().transcript_sample_rate);
        check_interval(interval)?;
        if audio_rate == 0 || transcript_rate == 0 {
            return Err(IngestError::InvalidArgument("sample rate must be > 0".into()));
        }

        let metadata = {
            let handle = handle.clone();
            let prober = self.sampler.prober().clone();
            tokio::task::spawn_blocking(move || handle.resolve(&prober).cloned())
                .await
                .map_err(|e| IngestError::TaskPanicked(e.to_string()))??
        };

        tracing::info!(
            id = %handle.id(),
            path = %handle.path().display(),
            duration_secs = metadata.duration_secs,
            fps = metadata.fps,
            "starting extraction"
        );

        let audio_task = {
            let handle = handle.clone();
            let extractor = self.extractor.clone();
            self.spawn_task(move || extractor.extract_audio(&handle, audio_rate))
        };
        let frames_task = {
            let handle = handle.clone();
            let sampler = self.sampler.clone();
            self.spawn_task(move || sampler.sample_frames(&handle, interval))
        };
        let transcript_task = {
            let handle = handle.clone();
            let extractor = self.extractor.clone();
            self.spawn_task(move || {
                let audio = extractor.extract_audio(&handle, transcript_rate)?;
                Ok(TranscriptInput {
                    source: handle.path().to_path_buf(),
                    audio,
                })
            })
        };

        let audio = settle(&handle, TaskKind::Audio, audio_task.await);
        let frames = settle(&handle, TaskKind::Frames, frames_task.await);
        let transcript = settle(&handle, TaskKind::Transcript, transcript_task.await);

        let result = ExtractionResult {
            handle_id: handle.id(),
            metadata,
            audio,
            frames,
            transcript,
        };

        let failures = result.failures();
        if failures.len() == 3 {
            let summary = failures
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(IngestError::AllTasksFailed(summary));
        }

        tracing::info!(
            id = %handle.id(),
            failed = failures.len(),
            "extraction finished"
        );
        Ok(result)
    }

    /// Run `work` on the blocking pool once a worker permit is free.
    fn spawn_task<T, F>(&self, work: F) -> JoinHandle<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| IngestError::TaskPanicked(e.to_string()))?;
            tokio::task::spawn_blocking(work)
                .await
                .map_err(|e| IngestError::TaskPanicked(e.to_string()))?
        })
    }
}

fn settle<T>(
    handle: &MediaHandle,
    task: TaskKind,
    joined: std::result::Result<Result<T>, tokio::task::JoinError>,
) -> Component<T> {
    let outcome = joined.unwrap_or_else(|e| Err(IngestError::TaskPanicked(e.to_string())));
    match outcome {
        Ok(value) => Component::Ready(value),
        Err(error) => {
            tracing::warn!(
                id = %handle.id(),
                task = %task,
                kind = error.kind(),
                error = %error,
                "extraction task failed"
            );
            Component::Failed(TaskFailure { task, error })
        }
    }
}
