//! Fixed-interval frame sampling.
//!
//! The interval is turned into a frame-index stride once, and each sampled
//! frame is reached by seeking directly to its index. A failed seek, a read
//! error or end of stream ends the sequence early; whatever was collected up
//! to that point is the result.

use std::sync::Arc;

use crate::error::{IngestError, Result};
use crate::frames::{normalize_rgb, FrameSource, FrameSourceOpener};
use crate::media::{Frame, MediaHandle, MediaMetadata};
use crate::probe::Prober;

/// `round(fps * interval)`, never less than 1.
pub fn stride_for(fps: f64, interval_secs: f64) -> u64 {
    let stride = (fps * interval_secs).round();
    if stride.is_finite() && stride >= 1.0 {
        stride as u64
    } else {
        1
    }
}

/// Frame indices `next, next + stride, ...` below `end`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleGrid {
    pub stride: u64,
    pub next: u64,
    /// Exclusive upper bound
    pub end: u64,
}

impl SampleGrid {
    /// Grid over the whole file. Indices run up to and including
    /// `fps * duration`, so the grid is finite whatever the decoder does.
    pub fn whole(meta: &MediaMetadata, interval_secs: f64) -> Self {
        Self {
            stride: stride_for(meta.fps, interval_secs),
            next: 0,
            end: last_index(meta) + 1,
        }
    }

    /// The part of the whole-file grid that falls in `[start, end)` seconds.
    /// With `last` set the window extends to the end of the file.
    pub fn window(meta: &MediaMetadata, interval_secs: f64, start_secs: f64, end_secs: f64, last: bool) -> Self {
        let stride = stride_for(meta.fps, interval_secs);
        let lo = secs_to_index(meta.fps, start_secs);
        let hi = if last {
            last_index(meta) + 1
        } else {
            secs_to_index(meta.fps, end_secs)
        };
        Self {
            stride,
            next: lo.div_ceil(stride) * stride,
            end: hi,
        }
    }

    /// Number of indices left
    pub fn remaining(&self) -> u64 {
        if self.next >= self.end {
            0
        } else {
            (self.end - self.next).div_ceil(self.stride)
        }
    }
}

impl Iterator for SampleGrid {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.next >= self.end {
            return None;
        }
        let index = self.next;
        self.next = self.next.saturating_add(self.stride);
        Some(index)
    }
}

fn last_index(meta: &MediaMetadata) -> u64 {
    let limit = meta.frame_limit();
    if limit.is_finite() && limit > 0.0 {
        limit.floor() as u64
    } else {
        0
    }
}

fn secs_to_index(fps: f64, secs: f64) -> u64 {
    let idx = (secs * fps).ceil();
    if idx.is_finite() && idx > 0.0 {
        idx as u64
    } else {
        0
    }
}

/// Seek to `index` and decode one frame. `None` ends the sequence.
pub(crate) fn read_at(source: &mut dyn FrameSource, index: u64, fps: f64) -> Option<Frame> {
    if let Err(e) = source.seek(index) {
        tracing::warn!(index, error = %e, "seek failed, ending frame sequence");
        return None;
    }
    match source.read() {
        Ok(Some(decoded)) => {
            let timestamp_secs = decoded
                .pts_secs
                .unwrap_or(if fps > 0.0 { index as f64 / fps } else { 0.0 });
            let (width, height) = (decoded.width, decoded.height);
            Some(Frame {
                index,
                timestamp_secs,
                width,
                height,
                data: normalize_rgb(decoded),
            })
        }
        Ok(None) => {
            tracing::debug!(index, "end of stream");
            None
        }
        Err(e) => {
            tracing::warn!(index, error = %e, "frame read failed, ending frame sequence");
            None
        }
    }
}

/// Single-pass lazy frame sequence. The decode handle is released as soon
/// as the sequence ends or the iterator is dropped.
pub struct FrameIter {
    source: Option<Box<dyn FrameSource>>,
    grid: SampleGrid,
    fps: f64,
    yielded: usize,
}

impl FrameIter {
    pub(crate) fn new(source: Box<dyn FrameSource>, grid: SampleGrid, fps: f64) -> Self {
        Self {
            source: Some(source),
            grid,
            fps,
            yielded: 0,
        }
    }

    /// Frame stride of this sequence
    pub fn stride(&self) -> u64 {
        self.grid.stride
    }
}

impl Iterator for FrameIter {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let source = self.source.as_mut()?;
        let frame = self
            .grid
            .next()
            .and_then(|index| read_at(source.as_mut(), index, self.fps));

        match frame {
            Some(frame) => {
                self.yielded += 1;
                Some(frame)
            }
            None => {
                tracing::debug!(frames = self.yielded, "frame sequence finished");
                self.source = None;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.source.is_none() {
            return (0, Some(0));
        }
        (0, usize::try_from(self.grid.remaining()).ok())
    }
}

/// Samples frames at a fixed time interval.
#[derive(Clone)]
pub struct FrameSampler {
    prober: Prober,
    opener: Arc<dyn FrameSourceOpener>,
}

impl FrameSampler {
    pub fn new(prober: Prober, opener: Arc<dyn FrameSourceOpener>) -> Self {
        Self { prober, opener }
    }

    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    /// Collect every sampled frame.
    pub fn sample_frames(&self, handle: &MediaHandle, interval_secs: f64) -> Result<Vec<Frame>> {
        let iter = self.sample_frames_lazy(handle, interval_secs)?;
        let stride = iter.stride();
        let frames: Vec<Frame> = iter.collect();
        tracing::info!(
            path = %handle.path().display(),
            frames = frames.len(),
            interval_secs,
            stride,
            "extracted frames"
        );
        Ok(frames)
    }

    /// Lazily sample frames. Fails only if the interval is not positive, the
    /// file cannot be probed, or the decode handle cannot be opened.
    pub fn sample_frames_lazy(&self, handle: &MediaHandle, interval_secs: f64) -> Result<FrameIter> {
        check_interval(interval_secs)?;
        let meta = handle.resolve(&self.prober)?;
        let source = self.open_source(handle)?;
        let grid = SampleGrid::whole(meta, interval_secs);
        tracing::debug!(stride = grid.stride, end = grid.end, "sampling frames");
        Ok(FrameIter::new(source, grid, meta.fps))
    }

    pub(crate) fn open_source(&self, handle: &MediaHandle) -> Result<Box<dyn FrameSource>> {
        let meta = handle.resolve(&self.prober)?;
        self.opener
            .open(handle.path(), meta)
            .map_err(IngestError::VideoOpen)
    }

    /// Sample the indices of `grid` from an already open source.
    pub(crate) fn sample_grid(&self, source: &mut dyn FrameSource, grid: SampleGrid, fps: f64) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(usize::try_from(grid.remaining()).unwrap_or(0));
        for index in grid {
            match read_at(source, index, fps) {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        frames
    }
}

pub(crate) fn check_interval(interval_secs: f64) -> Result<()> {
    if interval_secs.is_finite() && interval_secs > 0.0 {
        Ok(())
    } else {
        Err(IngestError::InvalidArgument(format!(
            "interval must be > 0 seconds, got {}",
            interval_secs
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(fps: f64, duration_secs: f64) -> MediaMetadata {
        MediaMetadata {
            duration_secs,
            fps,
            width: 4,
            height: 2,
            video_codec: "h264".into(),
            audio_codec: None,
            audio_channels: None,
            audio_sample_rate: None,
            container: None,
            bit_rate_bps: 0,
            file_size: 0,
            frame_count: crate::media::derive_frame_count(fps, duration_secs),
        }
    }

    #[test]
    fn test_stride() {
        assert_eq!(stride_for(30.0, 1.0), 30);
        assert_eq!(stride_for(29.97, 0.5), 15);
        assert_eq!(stride_for(30.0, 0.001), 1);
        assert_eq!(stride_for(0.0, 1.0), 1);
    }

    #[test]
    fn test_whole_grid() {
        let grid = SampleGrid::whole(&meta(30.0, 10.5), 1.0);
        assert_eq!(grid.remaining(), 11);
        let indices: Vec<u64> = grid.collect();
        assert_eq!(indices.first(), Some(&0));
        assert_eq!(indices.last(), Some(&300));
        assert!(indices.windows(2).all(|w| w[1] - w[0] == 30));
    }

    #[test]
    fn test_tiny_interval_grid_is_bounded() {
        let m = meta(25.0, 2.0);
        let grid = SampleGrid::whole(&m, 0.0001);
        assert_eq!(grid.stride, 1);
        assert_eq!(grid.count() as u64, m.frame_count + 1);
    }

    #[test]
    fn test_windows_partition_whole_grid() {
        let m = meta(30.0, 10.0);
        let whole: Vec<u64> = SampleGrid::whole(&m, 0.7).collect();

        let mut pieced = Vec::new();
        let mut start = 0.0;
        while start < m.duration_secs {
            let end = (start + 3.0f64).min(m.duration_secs);
            let last = end >= m.duration_secs;
            pieced.extend(SampleGrid::window(&m, 0.7, start, end, last));
            start += 3.0;
        }
        assert_eq!(pieced, whole);
    }

    #[test]
    fn test_check_interval() {
        assert!(check_interval(0.5).is_ok());
        assert!(matches!(check_interval(0.0), Err(IngestError::InvalidArgument(_))));
        assert!(check_interval(-1.0).is_err());
        assert!(check_interval(f64::NAN).is_err());
    }
}
