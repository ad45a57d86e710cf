//! In-process video decoding with `ffmpeg-next`.
//!
//! Seeking goes backwards to the keyframe at or before the target and the
//! decoded pre-roll frames are discarded by timestamp, so `read` after
//! `seek(n)` returns frame `n` rather than the keyframe.
//!
//! Frame indices and returned timestamps count from the start of the video
//! stream. Containers whose timeline starts later (MPEG-TS, edit lists) are
//! shifted by the stream's `start_time`.

use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::context::{Context as Scaler, Definition};
use ffmpeg::software::scaling::flag::Flags;
use ffmpeg::util::frame::video::Video as VideoFrame;

use crate::error::FfmpegError;
use crate::ffmpeg_utils;
use crate::frames::{DecodedFrame, FrameSource, FrameSourceOpener, PixelOrder};
use crate::media::MediaMetadata;

/// Opens [`FfmpegFrameSource`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegFrameOpener;

impl FrameSourceOpener for FfmpegFrameOpener {
    fn open(&self, path: &Path, meta: &MediaMetadata) -> Result<Box<dyn FrameSource>, FfmpegError> {
        ffmpeg_utils::init()?;
        Ok(Box::new(FfmpegFrameSource::open(path, meta.fps)?))
    }
}

/// Mapping between frame indices, stream timestamps and seek positions
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Timeline {
    /// Seconds per stream timestamp tick
    pub time_base: f64,
    /// Stream `start_time` in seconds
    pub start_secs: f64,
    pub fps: f64,
}

impl Timeline {
    /// `start_time` is in stream ticks; `AV_NOPTS_VALUE` means 0.
    pub fn new(time_base: f64, start_time: i64, fps: f64) -> Self {
        let start_secs = if start_time == ffmpeg::ffi::AV_NOPTS_VALUE {
            0.0
        } else {
            start_time as f64 * time_base
        };
        Self {
            time_base,
            start_secs,
            fps,
        }
    }

    /// Seconds from the start of the stream for frame `index`
    pub fn index_secs(&self, index: u64) -> f64 {
        if self.fps > 0.0 {
            index as f64 / self.fps
        } else {
            0.0
        }
    }

    /// Stream timestamp in seconds relative to the stream start
    pub fn pts_secs(&self, ts: Option<i64>) -> Option<f64> {
        ts.map(|ts| ts as f64 * self.time_base - self.start_secs)
    }

    /// Container seek position (AV_TIME_BASE units) for `target_secs`
    pub fn seek_ts(&self, target_secs: f64) -> i64 {
        ((target_secs + self.start_secs) * ffmpeg::ffi::AV_TIME_BASE as f64) as i64
    }

    /// A frame earlier than half a frame period before the target is pre-roll.
    pub fn is_preroll(&self, target_secs: Option<f64>, pts_secs: Option<f64>) -> bool {
        match (target_secs, pts_secs) {
            (Some(target), Some(pts)) if self.fps > 0.0 => pts + 0.5 / self.fps < target,
            _ => false,
        }
    }
}

/// swscale context, reused while the input format and size stay the same
struct RgbScaler(Scaler);

/// Whether a scaler built for `input` can convert a frame of this shape
fn accepts(input: &Definition, format: Pixel, width: u32, height: u32) -> bool {
    input.format == format && input.width == width && input.height == height
}

// SAFETY: the SwsContext is owned exclusively by one FfmpegFrameSource and is
// only touched through `&mut self`, so moving it to another thread is sound.
unsafe impl Send for RgbScaler {}

/// Decode handle over the first video stream of a file
pub struct FfmpegFrameSource {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    timeline: Timeline,
    scaler: Option<RgbScaler>,
    /// Frames earlier than this are seek pre-roll
    target_secs: Option<f64>,
    /// Nothing has been read or sought yet
    fresh: bool,
    eof: bool,
}

impl FfmpegFrameSource {
    /// Open `path`. `fps` is the probed frame rate; when it is 0 the
    /// stream's average frame rate is used instead.
    pub fn open(path: &Path, fps: f64) -> Result<Self, FfmpegError> {
        let input = ffmpeg::format::input(&path)
            .map_err(|e| FfmpegError::OpenInput(format!("{}: {}", path.display(), e)))?;

        let (stream_index, timeline, parameters) = {
            let stream = input
                .streams()
                .find(|s| s.parameters().medium() == Type::Video)
                .ok_or_else(|| FfmpegError::NoVideoStream(path.display().to_string()))?;
            let rate = stream.avg_frame_rate();
            let stream_fps = if rate.denominator() != 0 {
                f64::from(rate)
            } else {
                0.0
            };
            let fps = if fps > 0.0 { fps } else { stream_fps };
            (
                stream.index(),
                Timeline::new(f64::from(stream.time_base()), stream.start_time(), fps),
                stream.parameters(),
            )
        };

        let context = ffmpeg::codec::context::Context::from_parameters(parameters).map_err(|e| {
            FfmpegError::DecoderCreate(format!("stream {}: {}", stream_index, e))
        })?;
        let decoder = context.decoder().video().map_err(|e| {
            FfmpegError::DecoderCreate(format!("video decoder for stream {}: {}", stream_index, e))
        })?;

        tracing::debug!(
            path = %path.display(),
            stream_index,
            start_secs = timeline.start_secs,
            "opened video decode handle"
        );

        Ok(Self {
            input,
            decoder,
            stream_index,
            timeline,
            scaler: None,
            target_secs: None,
            fresh: true,
            eof: false,
        })
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        for (stream, packet) in self.input.packets() {
            if stream.index() == self.stream_index {
                return Some(packet);
            }
        }
        None
    }

    fn scaler_for(&mut self, frame: &VideoFrame) -> Result<&mut Scaler, FfmpegError> {
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        let reusable = self
            .scaler
            .as_ref()
            .is_some_and(|s| accepts(s.0.input(), format, width, height));
        if !reusable {
            let scaler = Scaler::get(format, width, height, Pixel::RGB24, width, height, Flags::BILINEAR)
                .map_err(|e| FfmpegError::ScalerCreate(e.to_string()))?;
            self.scaler = Some(RgbScaler(scaler));
        }
        match self.scaler.as_mut() {
            Some(scaler) => Ok(&mut scaler.0),
            None => Err(FfmpegError::ScalerCreate("no scaler".into())),
        }
    }

    fn convert(&mut self, frame: &VideoFrame, pts_secs: Option<f64>) -> Result<DecodedFrame, FfmpegError> {
        let (width, height) = (frame.width(), frame.height());

        let mut rgb = VideoFrame::empty();
        self.scaler_for(frame)?
            .run(frame, &mut rgb)
            .map_err(|e| FfmpegError::ReadFrame(format!("pixel conversion: {}", e)))?;

        // Copy visible pixels only, not the stride padding.
        let stride = rgb.stride(0);
        let raw = rgb.data(0);
        let row_bytes = width as usize * 3;
        let data: Vec<u8> = (0..height as usize)
            .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
            .copied()
            .collect();

        Ok(DecodedFrame {
            width,
            height,
            order: PixelOrder::Rgb,
            data,
            pts_secs,
        })
    }
}

impl FrameSource for FfmpegFrameSource {
    fn seek(&mut self, index: u64) -> Result<(), FfmpegError> {
        let target_secs = self.timeline.index_secs(index);
        self.target_secs = Some(target_secs);

        // A freshly opened demuxer already sits at the start.
        if self.fresh && index == 0 {
            self.fresh = false;
            return Ok(());
        }
        self.fresh = false;

        let ts = self.timeline.seek_ts(target_secs);
        self.input
            .seek(ts, ..ts)
            .map_err(|e| FfmpegError::Seek(format!("frame {} ({:.3}s): {}", index, target_secs, e)))?;
        self.decoder.flush();
        self.eof = false;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<DecodedFrame>, FfmpegError> {
        self.fresh = false;
        let mut decoded = VideoFrame::empty();
        loop {
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts_secs = self.timeline.pts_secs(decoded.timestamp().or(decoded.pts()));
                if self.timeline.is_preroll(self.target_secs, pts_secs) {
                    continue;
                }
                self.target_secs = None;
                return self.convert(&decoded, pts_secs).map(Some);
            }

            if self.eof {
                return Ok(None);
            }

            match self.next_packet() {
                Some(packet) => {
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        tracing::debug!(stream_index = self.stream_index, error = %e, "skipping undecodable packet");
                    }
                }
                None => {
                    self.eof = true;
                    // Drain frames still buffered in the decoder.
                    let _ = self.decoder.send_eof();
                }
            }
        }
    }
}
