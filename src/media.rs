//! Media data model.
//!
//! A [`MediaHandle`] names one source file and caches its probed
//! [`MediaMetadata`]. The extraction stages produce [`Frame`]s,
//! [`AudioBuffer`]s and, on the chunked path, [`Chunk`]s.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::probe::Prober;

/// Normalized container and primary-stream metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaMetadata {
    /// Duration in seconds
    pub duration_secs: f64,
    /// Frames per second of the primary video stream (0.0 if unknown)
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Codec of the first video stream
    pub video_codec: String,
    /// Codec of the first audio stream, if any
    pub audio_codec: Option<String>,
    pub audio_channels: Option<u16>,
    pub audio_sample_rate: Option<u32>,
    /// Container format name as reported by the probe tool
    pub container: Option<String>,
    /// Container bit rate in bits per second
    pub bit_rate_bps: u64,
    /// File size in bytes
    pub file_size: u64,
    /// `floor(fps * duration)`. Derived, decoders may yield a different count.
    pub frame_count: u64,
}

impl MediaMetadata {
    /// Container data rate in bytes per second
    pub fn byte_rate(&self) -> u64 {
        self.bit_rate_bps / 8
    }

    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }

    /// Highest frame index the sampler will ask for: `fps * duration`.
    pub fn frame_limit(&self) -> f64 {
        self.fps * self.duration_secs
    }
}

/// `floor(fps * duration)`, or 0 when either is unknown.
pub fn derive_frame_count(fps: f64, duration_secs: f64) -> u64 {
    if fps > 0.0 && duration_secs > 0.0 {
        (fps * duration_secs).floor() as u64
    } else {
        0
    }
}

/// One source file plus its lazily resolved metadata.
///
/// Shared read-only between extraction tasks; the metadata cache is written
/// at most once.
#[derive(Debug)]
pub struct MediaHandle {
    id: Uuid,
    path: PathBuf,
    metadata: OnceLock<MediaMetadata>,
}

impl MediaHandle {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.as_ref().to_path_buf(),
            metadata: OnceLock::new(),
        }
    }

    /// Correlation id used in log events
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached metadata, if it has been resolved
    pub fn metadata(&self) -> Option<&MediaMetadata> {
        self.metadata.get()
    }

    /// Return the cached metadata, probing the file on first use.
    pub fn resolve(&self, prober: &Prober) -> Result<&MediaMetadata> {
        if let Some(meta) = self.metadata.get() {
            return Ok(meta);
        }
        let meta = prober.probe(&self.path)?;
        Ok(self.metadata.get_or_init(|| meta))
    }
}

/// A decoded image in packed RGB24 order
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Source frame index
    pub index: u64,
    /// Source timestamp in seconds
    pub timestamp_secs: f64,
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes, row-major, no padding
    pub data: Vec<u8>,
}

impl Frame {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Signed 16-bit PCM samples, interleaved when `channels > 1`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// One bounded time window of the source
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position of this chunk in the sequence, from 0
    pub index: usize,
    pub start_secs: f64,
    /// Window length; the last chunk may be shorter
    pub duration_secs: f64,
    pub frames: Vec<Frame>,
    pub audio: AudioBuffer,
}

impl Chunk {
    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_frame_count() {
        assert_eq!(derive_frame_count(30.0, 10.0), 300);
        assert_eq!(derive_frame_count(30000.0 / 1001.0, 10.0), 299);
        assert_eq!(derive_frame_count(0.0, 10.0), 0);
        assert_eq!(derive_frame_count(25.0, 0.0), 0);
    }

    #[test]
    fn test_audio_duration() {
        let buf = AudioBuffer {
            samples: vec![0; 32000],
            sample_rate: 16000,
            channels: 2,
        };
        assert_eq!(buf.duration_secs(), 1.0);
        assert_eq!(buf.len(), 32000);
    }

    #[test]
    fn test_handle_starts_unresolved() {
        let handle = MediaHandle::new("/tmp/clip.mp4");
        assert!(handle.metadata().is_none());
        assert_eq!(handle.path(), Path::new("/tmp/clip.mp4"));
    }
}
