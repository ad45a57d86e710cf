//! Frame decoding and interval sampling.
//!
//! - [`FrameSource`] is a seekable single-frame decode handle over one file
//! - [`decoder::FfmpegFrameSource`] implements it with `ffmpeg-next`
//! - [`sampler::FrameSampler`] walks a source at a fixed time stride

pub mod decoder;
pub mod sampler;

use std::path::Path;

use crate::error::FfmpegError;
use crate::media::MediaMetadata;

pub use decoder::FfmpegFrameOpener;
pub use sampler::{FrameIter, FrameSampler, SampleGrid};

/// Channel order of a decoder's native output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrder {
    Rgb,
    Bgr,
    Rgba,
    Bgra,
}

impl PixelOrder {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelOrder::Rgb | PixelOrder::Bgr => 3,
            PixelOrder::Rgba | PixelOrder::Bgra => 4,
        }
    }
}

/// A frame as produced by a decode backend, before normalization
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub order: PixelOrder,
    /// Packed pixels, no row padding
    pub data: Vec<u8>,
    /// Presentation time in seconds, when the backend knows it
    pub pts_secs: Option<f64>,
}

/// Seekable decode handle. End of stream is `Ok(None)`, not an error.
pub trait FrameSource: Send {
    /// Position the handle so the next `read` returns frame `index`.
    fn seek(&mut self, index: u64) -> Result<(), FfmpegError>;

    /// Decode the next frame.
    fn read(&mut self) -> Result<Option<DecodedFrame>, FfmpegError>;
}

/// Opens [`FrameSource`]s. Failing here is the only fatal frame error.
pub trait FrameSourceOpener: Send + Sync {
    fn open(&self, path: &Path, meta: &MediaMetadata) -> Result<Box<dyn FrameSource>, FfmpegError>;
}

/// Convert any supported channel order to packed RGB24.
pub fn normalize_rgb(frame: DecodedFrame) -> Vec<u8> {
    let bpp = frame.order.bytes_per_pixel();
    match frame.order {
        PixelOrder::Rgb => frame.data,
        PixelOrder::Rgba => frame
            .data
            .chunks_exact(bpp)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        PixelOrder::Bgr | PixelOrder::Bgra => frame
            .data
            .chunks_exact(bpp)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(order: PixelOrder, data: Vec<u8>) -> DecodedFrame {
        DecodedFrame {
            width: 2,
            height: 1,
            order,
            data,
            pts_secs: None,
        }
    }

    #[test]
    fn test_normalize_rgb() {
        let rgb = decoded(PixelOrder::Rgb, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(normalize_rgb(rgb), vec![1, 2, 3, 4, 5, 6]);

        let bgr = decoded(PixelOrder::Bgr, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(normalize_rgb(bgr), vec![3, 2, 1, 6, 5, 4]);

        let rgba = decoded(PixelOrder::Rgba, vec![1, 2, 3, 255, 4, 5, 6, 255]);
        assert_eq!(normalize_rgb(rgba), vec![1, 2, 3, 4, 5, 6]);

        let bgra = decoded(PixelOrder::Bgra, vec![1, 2, 3, 255, 4, 5, 6, 255]);
        assert_eq!(normalize_rgb(bgra), vec![3, 2, 1, 6, 5, 4]);
    }
}
