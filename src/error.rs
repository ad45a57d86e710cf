use std::path::PathBuf;

use thiserror::Error;

/// Main error type for media ingestion
#[derive(Error, Debug)]
pub enum IngestError {
    /// The file extension is not in the configured allow-list
    #[error("Unsupported media format: {extension:?} (supported: {})", supported.join(", "))]
    UnsupportedFormat {
        extension: String,
        supported: Vec<String>,
    },

    /// The media file does not exist or cannot be read
    #[error("Media file not found or unreadable: {0}")]
    NotFound(PathBuf),

    /// The metadata tool exited non-zero or its output could not be parsed
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    /// The container has no video stream
    #[error("No video stream found in source file")]
    NoVideoStream,

    /// The frame decode handle could not be opened
    #[error("Failed to open video stream: {0}")]
    VideoOpen(#[source] FfmpegError),

    /// The audio decode tool failed; `diagnostics` holds its stderr
    #[error("Audio extraction failed: {reason}")]
    AudioExtraction { reason: String, diagnostics: String },

    /// FFmpeg library setup failed
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller-supplied argument is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A worker task panicked or was aborted
    #[error("Task failed: {0}")]
    TaskPanicked(String),

    /// Every concurrent extraction task failed
    #[error("All extraction tasks failed: {0}")]
    AllTasksFailed(String),
}

impl IngestError {
    /// Short stable name of the error kind, used in logs and failure markers.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::UnsupportedFormat { .. } => "unsupported_format",
            IngestError::NotFound(_) => "not_found",
            IngestError::ProbeFailed(_) => "probe_failed",
            IngestError::NoVideoStream => "no_video_stream",
            IngestError::VideoOpen(_) => "video_open",
            IngestError::AudioExtraction { .. } => "audio_extraction",
            IngestError::Ffmpeg(_) => "ffmpeg",
            IngestError::Io(_) => "io",
            IngestError::Config(_) => "config",
            IngestError::InvalidArgument(_) => "invalid_argument",
            IngestError::TaskPanicked(_) => "task_panicked",
            IngestError::AllTasksFailed(_) => "all_tasks_failed",
        }
    }
}

/// Errors from the in-process FFmpeg frame decoder
#[derive(Error, Debug)]
pub enum FfmpegError {
    /// Failure during global FFmpeg initialization
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    /// Failure opening an input media file
    #[error("Failed to open input file: {0}")]
    OpenInput(String),

    /// The input has no decodable video stream
    #[error("No video stream in input: {0}")]
    NoVideoStream(String),

    /// Failure instantiating a decoder
    #[error("Failed to create decoder: {0}")]
    DecoderCreate(String),

    /// Failure creating the pixel format converter
    #[error("Failed to create scaler: {0}")]
    ScalerCreate(String),

    /// Failure seeking the input context
    #[error("Seek failed: {0}")]
    Seek(String),

    /// Failure reading or decoding a single frame
    #[error("Failed to read frame: {0}")]
    ReadFrame(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, IngestError>;
