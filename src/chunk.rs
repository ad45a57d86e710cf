//! Chunked stream processing under a memory budget.
//!
//! A long file is walked as consecutive time windows. Each [`Chunk`] carries
//! the sampled frames and the PCM audio of its window only, and chunks are
//! produced one at a time as the caller pulls them.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::AudioExtractor;
use crate::config::MemoryConfig;
use crate::error::{IngestError, Result};
use crate::frames::sampler::check_interval;
use crate::frames::{FrameSampler, FrameSource, SampleGrid};
use crate::media::{Chunk, MediaHandle, MediaMetadata};
use crate::memory::{MemoryMonitor, MemoryUsage};

/// Internal state that may be dropped at any time to give memory back.
#[derive(Default)]
struct Scratch {
    /// Decode handle reused across chunks of one pass
    source: Option<Box<dyn FrameSource>>,
    releases: u64,
}

/// Produces [`Chunk`]s lazily while keeping an eye on host memory.
pub struct ChunkedStreamProcessor {
    sampler: FrameSampler,
    extractor: AudioExtractor,
    monitor: Arc<dyn MemoryMonitor>,
    config: MemoryConfig,
    frame_interval_secs: f64,
    sample_rate: u32,
    scratch: Mutex<Scratch>,
}

impl ChunkedStreamProcessor {
    pub fn new(
        sampler: FrameSampler,
        extractor: AudioExtractor,
        monitor: Arc<dyn MemoryMonitor>,
        config: MemoryConfig,
    ) -> Self {
        let sample_rate = extractor.config().sample_rate;
        Self {
            sampler,
            extractor,
            monitor,
            config,
            frame_interval_secs: 1.0,
            sample_rate,
            scratch: Mutex::new(Scratch::default()),
        }
    }

    /// Frame interval used inside each chunk (default 1s)
    pub fn with_frame_interval(mut self, secs: f64) -> Self {
        self.frame_interval_secs = secs;
        self
    }

    /// PCM sample rate used for chunk audio (default: extractor's rate)
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Fresh snapshot of host memory.
    pub fn memory_usage(&self) -> MemoryUsage {
        self.monitor.snapshot()
    }

    /// Drop internal scratch state. Chunks, frames and buffers already handed
    /// to the caller are not affected.
    pub fn release_caches(&self) {
        let mut scratch = self.scratch.lock();
        let had_source = scratch.source.take().is_some();
        scratch.releases += 1;
        tracing::debug!(released_decoder = had_source, "released chunk caches");
    }

    /// How many times `release_caches` has run
    pub fn cache_releases(&self) -> u64 {
        self.scratch.lock().releases
    }

    /// Walk `handle` in windows of `chunk_duration_secs`.
    ///
    /// Yields `ceil(duration / chunk_duration)` chunks, the last possibly
    /// shorter. After an `Err` item the sequence ends.
    pub fn iterate_chunks<'a>(&'a self, handle: &'a MediaHandle, chunk_duration_secs: f64) -> Result<ChunkIter<'a>> {
        if !(chunk_duration_secs.is_finite() && chunk_duration_secs > 0.0) {
            return Err(IngestError::InvalidArgument(format!(
                "chunk duration must be > 0 seconds, got {}",
                chunk_duration_secs
            )));
        }
        check_interval(self.frame_interval_secs)?;

        let meta = handle.resolve(self.sampler.prober())?.clone();
        let total = chunk_count(meta.duration_secs, chunk_duration_secs);

        tracing::info!(
            path = %handle.path().display(),
            chunks = total,
            chunk_duration_secs,
            "starting chunked pass"
        );

        Ok(ChunkIter {
            processor: self,
            handle,
            meta,
            chunk_duration_secs,
            next_index: 0,
            total,
            done: false,
        })
    }

    /// Release caches when over budget. Staying over budget afterwards is
    /// reported but does not stop the pass.
    fn enforce_budget(&self) {
        let budget = self.config.max_memory_usage;
        let usage = self.memory_usage();
        if usage.used_fraction() <= budget {
            return;
        }

        tracing::debug!(used_percent = usage.used_percent, budget, "memory over budget, releasing caches");
        self.release_caches();

        let usage = self.memory_usage();
        if usage.used_fraction() > budget {
            tracing::warn!(
                used_percent = usage.used_percent,
                available_bytes = usage.available_bytes,
                budget,
                "memory still over budget after releasing caches, continuing"
            );
        }
    }

    fn build_chunk(&self, handle: &MediaHandle, meta: &MediaMetadata, window: ChunkWindow) -> Result<Chunk> {
        let grid = SampleGrid::window(
            meta,
            self.frame_interval_secs,
            window.start_secs,
            window.start_secs + window.duration_secs,
            window.last,
        );

        let frames = {
            let mut scratch = self.scratch.lock();
            let mut source = match scratch.source.take() {
                Some(source) => source,
                None => self.sampler.open_source(handle)?,
            };
            let frames = self.sampler.sample_grid(source.as_mut(), grid, meta.fps);
            scratch.source = Some(source);
            frames
        };

        let audio = self.extractor.extract_audio_window(
            handle,
            self.sample_rate,
            window.start_secs,
            window.duration_secs,
        )?;

        tracing::debug!(
            chunk = window.index,
            start_secs = window.start_secs,
            frames = frames.len(),
            samples = audio.len(),
            "built chunk"
        );

        Ok(Chunk {
            index: window.index,
            start_secs: window.start_secs,
            duration_secs: window.duration_secs,
            frames,
            audio,
        })
    }

    fn release_source(&self) {
        self.scratch.lock().source = None;
    }
}

/// Relative slack when the duration is a whole multiple of the chunk size
/// up to float rounding (2.1 / 0.3 = 7.000000000000001).
const CHUNK_COUNT_EPSILON: f64 = 1e-9;

/// Number of chunks covering `duration`: `ceil(duration / chunk)`.
pub fn chunk_count(duration_secs: f64, chunk_duration_secs: f64) -> usize {
    if !(duration_secs > 0.0) || !(chunk_duration_secs > 0.0) {
        return 0;
    }
    let ratio = duration_secs / chunk_duration_secs;
    ((ratio - ratio * CHUNK_COUNT_EPSILON).ceil() as usize).max(1)
}

#[derive(Debug, Clone, Copy)]
struct ChunkWindow {
    index: usize,
    start_secs: f64,
    duration_secs: f64,
    last: bool,
}

/// Single-pass chunk sequence. Dropping it early is allowed and releases the
/// decode handle.
pub struct ChunkIter<'a> {
    processor: &'a ChunkedStreamProcessor,
    handle: &'a MediaHandle,
    meta: MediaMetadata,
    chunk_duration_secs: f64,
    next_index: usize,
    total: usize,
    done: bool,
}

impl ChunkIter<'_> {
    /// Total number of chunks in this pass
    pub fn total(&self) -> usize {
        self.total
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.processor.release_source();
        }
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Result<Chunk>> {
        if self.done || self.next_index >= self.total {
            self.finish();
            return None;
        }

        self.processor.enforce_budget();

        let index = self.next_index;
        self.next_index += 1;
        let start_secs = index as f64 * self.chunk_duration_secs;
        let last = self.next_index == self.total;
        let duration_secs = if last {
            self.meta.duration_secs - start_secs
        } else {
            self.chunk_duration_secs
        };

        let window = ChunkWindow {
            index,
            start_secs,
            duration_secs,
            last,
        };
        let result = self.processor.build_chunk(self.handle, &self.meta, window);
        if result.is_err() {
            self.finish();
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let left = self.total - self.next_index;
        (0, Some(left))
    }
}

impl Drop for ChunkIter<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(10.0, 3.0), 4);
        assert_eq!(chunk_count(9.0, 3.0), 3);
        assert_eq!(chunk_count(0.7, 0.1), 7);
        assert_eq!(chunk_count(2.0, 60.0), 1);
        assert_eq!(chunk_count(0.0, 60.0), 0);
    }

    #[test]
    fn test_chunk_count_exact_multiples() {
        assert_eq!(chunk_count(2.1, 0.3), 7);
        assert_eq!(chunk_count(12.3, 4.1), 3);
        assert_eq!(chunk_count(0.3, 0.1), 3);
        assert_eq!(chunk_count(2.1000001, 0.3), 8);
        assert_eq!(chunk_count(1e-12, 60.0), 1);
    }
}
