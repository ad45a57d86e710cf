//! Test fixtures
//!
//! Stand-ins for the external probe and decode tools, the frame decoder and
//! the memory monitor, so scenarios run without ffmpeg binaries or media
//! assets.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::audio::AudioExtractor;
use crate::config::{AudioConfig, ProbeConfig};
use crate::error::FfmpegError;
use crate::frames::{DecodedFrame, FrameSampler, FrameSource, FrameSourceOpener, PixelOrder};
use crate::media::{derive_frame_count, MediaMetadata};
use crate::memory::{MemoryMonitor, MemoryUsage};
use crate::probe::Prober;
use crate::process::{CommandRunner, ProcessOutput};

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 2;

/// Metadata of a small h264 clip
pub fn metadata(fps: f64, duration_secs: f64) -> MediaMetadata {
    MediaMetadata {
        duration_secs,
        fps,
        width: WIDTH,
        height: HEIGHT,
        video_codec: "h264".to_string(),
        audio_codec: Some("aac".to_string()),
        audio_channels: Some(2),
        audio_sample_rate: Some(48000),
        container: Some("mov,mp4,m4a,3gp,3g2,mj2".to_string()),
        bit_rate_bps: 800_000,
        file_size: 1_000_000,
        frame_count: derive_frame_count(fps, duration_secs),
    }
}

/// ffprobe JSON for a file with one video stream and, optionally, one audio
/// stream followed by a second ignored audio track.
pub fn probe_json(frame_rate: &str, duration_secs: f64, with_audio: bool) -> String {
    let mut streams = vec![serde_json::json!({
        "index": 0,
        "codec_type": "video",
        "codec_name": "h264",
        "width": WIDTH,
        "height": HEIGHT,
        "r_frame_rate": frame_rate,
        "avg_frame_rate": frame_rate,
        "duration": format!("{:.6}", duration_secs),
    })];
    if with_audio {
        streams.push(serde_json::json!({
            "index": 1,
            "codec_type": "audio",
            "codec_name": "aac",
            "sample_rate": "48000",
            "channels": 2,
        }));
        streams.push(serde_json::json!({
            "index": 2,
            "codec_type": "audio",
            "codec_name": "ac3",
            "sample_rate": "44100",
            "channels": 6,
        }));
    }
    serde_json::json!({
        "streams": streams,
        "format": {
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": format!("{:.6}", duration_secs),
            "size": "1000000",
            "bit_rate": "800000",
        }
    })
    .to_string()
}

/// An existing, readable placeholder file with the given extension
pub fn media_file(extension: &str) -> NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(extension)
        .tempfile()
        .unwrap();
    std::fs::write(file.path(), b"placeholder").unwrap();
    file
}

/// How the fake audio tool behaves
#[derive(Debug, Clone)]
pub enum AudioScript {
    /// Emit deterministic PCM for the requested window
    Pcm,
    /// Exit non-zero with the given stderr
    Fail { code: i32, stderr: &'static str },
    /// Emit PCM with a dangling odd byte
    OddBytes,
}

/// Fake `ffprobe`/`ffmpeg` that records every invocation.
pub struct ScriptedRunner {
    probe_stdout: Vec<u8>,
    probe_exit: i32,
    audio: AudioScript,
    duration_secs: f64,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedRunner {
    pub fn new(probe_stdout: String, duration_secs: f64) -> Self {
        Self {
            probe_stdout: probe_stdout.into_bytes(),
            probe_exit: 0,
            audio: AudioScript::Pcm,
            duration_secs,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A clip of `duration_secs` at `frame_rate` with an audio track
    pub fn clip(frame_rate: &str, duration_secs: f64) -> Self {
        Self::new(probe_json(frame_rate, duration_secs, true), duration_secs)
    }

    pub fn with_audio(mut self, audio: AudioScript) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_probe_exit(mut self, code: i32) -> Self {
        self.probe_exit = code;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter(|(p, _)| p == program)
            .map(|(_, args)| args.clone())
            .collect()
    }

    fn pcm(&self, args: &[String]) -> Vec<u8> {
        let rate = arg_value(args, "-ar").unwrap_or(44100.0);
        let channels = arg_value(args, "-ac").unwrap_or(1.0) as usize;
        let start = arg_value(args, "-ss").unwrap_or(0.0);
        let end = arg_value(args, "-t")
            .map(|t| start + t)
            .unwrap_or(self.duration_secs)
            .min(self.duration_secs);

        let first = (start * rate).round() as usize;
        let last = (end * rate).round() as usize;
        let mut out = Vec::with_capacity(last.saturating_sub(first) * channels * 2);
        for i in first..last {
            let sample = (i % 2000) as i16 - 1000;
            for _ in 0..channels {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
        out
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<ProcessOutput> {
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        self.calls.lock().push((program.to_string(), args.clone()));

        match program {
            "ffprobe" => Ok(ProcessOutput {
                exit_code: Some(self.probe_exit),
                stdout: if self.probe_exit == 0 {
                    self.probe_stdout.clone()
                } else {
                    Vec::new()
                },
                stderr: if self.probe_exit == 0 {
                    Vec::new()
                } else {
                    b"Invalid data found when processing input".to_vec()
                },
            }),
            "ffmpeg" => match &self.audio {
                AudioScript::Pcm => Ok(ProcessOutput {
                    exit_code: Some(0),
                    stdout: self.pcm(&args),
                    stderr: Vec::new(),
                }),
                AudioScript::Fail { code, stderr } => Ok(ProcessOutput {
                    exit_code: Some(*code),
                    stdout: Vec::new(),
                    stderr: stderr.as_bytes().to_vec(),
                }),
                AudioScript::OddBytes => {
                    let mut stdout = self.pcm(&args);
                    stdout.push(0x7f);
                    Ok(ProcessOutput {
                        exit_code: Some(0),
                        stdout,
                        stderr: Vec::new(),
                    })
                }
            },
            other => Err(io::Error::new(io::ErrorKind::NotFound, format!("no such tool {}", other))),
        }
    }
}

fn arg_value(args: &[String], flag: &str) -> Option<f64> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

/// Pixel bytes the fake decoder produces for frame `index`, in BGR order
pub fn bgr_pixel(index: u64) -> [u8; 3] {
    [(index % 251) as u8, 0x10, 0xf0]
}

/// Decoder over `available` frames that emits BGR pixels
pub struct FakeFrameSource {
    fps: f64,
    available: u64,
    fail_seek_at: Option<u64>,
    position: u64,
}

impl FrameSource for FakeFrameSource {
    fn seek(&mut self, index: u64) -> Result<(), FfmpegError> {
        if self.fail_seek_at.is_some_and(|at| index >= at) {
            return Err(FfmpegError::Seek(format!("frame {}", index)));
        }
        self.position = index;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<DecodedFrame>, FfmpegError> {
        if self.position >= self.available {
            return Ok(None);
        }
        let index = self.position;
        self.position += 1;
        let data = bgr_pixel(index).repeat((WIDTH * HEIGHT) as usize);
        Ok(Some(DecodedFrame {
            width: WIDTH,
            height: HEIGHT,
            order: PixelOrder::Bgr,
            data,
            pts_secs: Some(index as f64 / self.fps),
        }))
    }
}

/// Opens [`FakeFrameSource`]s and counts how often it was asked to
#[derive(Default)]
pub struct FakeFrameOpener {
    pub available: u64,
    pub fail_seek_at: Option<u64>,
    pub fail_open: bool,
    pub opened: AtomicUsize,
}

impl FakeFrameOpener {
    pub fn with_frames(available: u64) -> Self {
        Self {
            available,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl FrameSourceOpener for FakeFrameOpener {
    fn open(&self, path: &Path, meta: &MediaMetadata) -> Result<Box<dyn FrameSource>, FfmpegError> {
        if self.fail_open {
            return Err(FfmpegError::OpenInput(path.display().to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeFrameSource {
            fps: meta.fps,
            available: self.available,
            fail_seek_at: self.fail_seek_at,
            position: 0,
        }))
    }
}

/// Memory monitor replaying scripted `used_percent` readings, then
/// repeating `steady`.
pub struct FakeMemoryMonitor {
    readings: Mutex<VecDeque<f64>>,
    steady: f64,
    pub snapshots: AtomicUsize,
}

impl FakeMemoryMonitor {
    pub fn steady(used_percent: f64) -> Self {
        Self::scripted(Vec::new(), used_percent)
    }

    pub fn scripted(readings: Vec<f64>, steady: f64) -> Self {
        Self {
            readings: Mutex::new(readings.into()),
            steady,
            snapshots: AtomicUsize::new(0),
        }
    }
}

impl MemoryMonitor for FakeMemoryMonitor {
    fn snapshot(&self) -> MemoryUsage {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        let used_percent = self.readings.lock().pop_front().unwrap_or(self.steady);
        let total: u64 = 16 << 30;
        let available = (total as f64 * (1.0 - used_percent / 100.0)) as u64;
        MemoryUsage {
            used_percent,
            available_bytes: available,
            used_bytes: total - available,
            total_bytes: total,
        }
    }
}

/// Prober, sampler and extractor wired to the fakes
pub fn wire(runner: &Arc<ScriptedRunner>, opener: &Arc<FakeFrameOpener>) -> (FrameSampler, AudioExtractor) {
    let prober = Prober::new(runner.clone(), ProbeConfig::default());
    let sampler = FrameSampler::new(prober, opener.clone());
    let extractor = AudioExtractor::new(runner.clone(), AudioConfig::default());
    (sampler, extractor)
}
