//! FFmpeg library initialization

use std::sync::OnceLock;

use ffmpeg_next as ffmpeg;

use crate::error::FfmpegError;

static INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize the FFmpeg library.
///
/// Safe to call repeatedly; only the first call does any work. Also lowers
/// FFmpeg's own log level to errors so decode warnings on damaged files do
/// not flood stderr.
pub fn init() -> Result<(), FfmpegError> {
    INIT.get_or_init(|| {
        ffmpeg::init().map_err(|e| format!("ffmpeg::init() failed: {}", e))?;
        // SAFETY: sets a global integer inside libavutil. Guarded by the
        // OnceLock so it runs exactly once, before any decode handle exists.
        unsafe {
            ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_ERROR as i32);
        }
        tracing::info!("FFmpeg initialized");
        Ok(())
    })
    .clone()
    .map_err(FfmpegError::InitFailed)
}

/// Get the version information of the linked FFmpeg libraries.
pub fn version_info() -> String {
    // SAFETY: returns a compile-time constant of the linked libavutil.
    let v = unsafe { ffmpeg::ffi::avutil_version() };
    format!("libavutil {}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}
