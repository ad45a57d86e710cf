//! Container probing via an external metadata tool (ffprobe).

pub mod ffprobe;

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use crate::config::ProbeConfig;
use crate::error::{IngestError, Result};
use crate::media::MediaMetadata;
use crate::process::CommandRunner;

pub use ffprobe::parse_frame_rate;

/// Resolves [`MediaMetadata`] for a file.
#[derive(Clone)]
pub struct Prober {
    runner: Arc<dyn CommandRunner>,
    config: ProbeConfig,
}

impl Prober {
    pub fn new(runner: Arc<dyn CommandRunner>, config: ProbeConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe `path`.
    ///
    /// The extension is checked against the allow-list and the file is
    /// checked for readability before the external tool is started.
    pub fn probe(&self, path: &Path) -> Result<MediaMetadata> {
        check_extension(path, &self.config.supported_formats)?;
        let fs_size = readable_size(path)?;

        let args: Vec<OsString> = [
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]
        .iter()
        .map(OsString::from)
        .chain(std::iter::once(path.as_os_str().to_owned()))
        .collect();

        let output = self
            .runner
            .run(&self.config.ffprobe_path, &args)
            .map_err(|e| {
                IngestError::ProbeFailed(format!("failed to run {}: {}", self.config.ffprobe_path, e))
            })?;

        if !output.success() {
            return Err(IngestError::ProbeFailed(format!(
                "{} exited with {:?}: {}",
                self.config.ffprobe_path,
                output.exit_code,
                output.stderr_text()
            )));
        }

        let meta = ffprobe::ProbeOutput::parse(&output.stdout)?.into_metadata(fs_size)?;

        tracing::debug!(
            path = %path.display(),
            duration = meta.duration_secs,
            fps = meta.fps,
            width = meta.width,
            height = meta.height,
            codec = %meta.video_codec,
            "probed media"
        );

        Ok(meta)
    }
}

/// Reject paths whose extension is not allow-listed. Entries may be given
/// with or without the leading dot and match case-insensitively.
pub fn check_extension(path: &Path, supported: &[String]) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let allowed = !ext.is_empty()
        && supported
            .iter()
            .any(|s| s.trim_start_matches('.').eq_ignore_ascii_case(&ext));

    if allowed {
        Ok(())
    } else {
        Err(IngestError::UnsupportedFormat {
            extension: if ext.is_empty() { ext } else { format!(".{}", ext) },
            supported: supported.to_vec(),
        })
    }
}

fn readable_size(path: &Path) -> Result<u64> {
    let not_found = |_| IngestError::NotFound(path.to_path_buf());
    let meta = std::fs::metadata(path).map_err(not_found)?;
    if !meta.is_file() {
        return Err(IngestError::NotFound(path.to_path_buf()));
    }
    std::fs::File::open(path).map_err(not_found)?;
    Ok(meta.len())
}
