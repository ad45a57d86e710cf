//! ffprobe JSON output model and normalization into [`MediaMetadata`].
//!
//! Only the first video and the first audio stream (in stream order) are
//! considered primary. Additional tracks of either type are ignored; there is
//! no language- or quality-based track selection.

use serde::Deserialize;

use crate::error::{IngestError, Result};
use crate::media::{derive_frame_count, MediaMetadata};

/// Top level of `ffprobe -print_format json -show_format -show_streams`
#[derive(Debug, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    pub format: Option<ProbeFormat>,
}

/// One entry of the `streams` array. ffprobe prints most numbers as strings.
#[derive(Debug, Deserialize)]
pub struct ProbeStream {
    pub index: Option<u32>,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
    pub sample_rate: Option<String>,
    pub channels: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
}

impl ProbeOutput {
    pub fn parse(stdout: &[u8]) -> Result<Self> {
        serde_json::from_slice(stdout)
            .map_err(|e| IngestError::ProbeFailed(format!("unparsable probe output: {}", e)))
    }

    fn first_stream(&self, codec_type: &str) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(codec_type))
    }

    /// Build normalized metadata. `fs_size` is used when the container
    /// does not report its own size.
    pub fn into_metadata(self, fs_size: u64) -> Result<MediaMetadata> {
        let video = self.first_stream("video").ok_or(IngestError::NoVideoStream)?;
        let audio = self.first_stream("audio");
        let format = self.format.as_ref();

        let fps = match video
            .r_frame_rate
            .as_deref()
            .filter(|r| !is_unknown_rate(r))
            .or(video.avg_frame_rate.as_deref())
        {
            Some(rate) => parse_frame_rate(rate)?,
            None => 0.0,
        };

        // Container duration first, then the video stream's own.
        let duration_secs = format
            .and_then(|f| parse_num::<f64>(f.duration.as_deref()))
            .filter(|d| *d > 0.0)
            .or_else(|| parse_num::<f64>(video.duration.as_deref()))
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(0.0);

        let file_size = format
            .and_then(|f| parse_num::<u64>(f.size.as_deref()))
            .unwrap_or(fs_size);

        let bit_rate_bps = format
            .and_then(|f| parse_num::<u64>(f.bit_rate.as_deref()))
            .unwrap_or(0);

        Ok(MediaMetadata {
            duration_secs,
            fps,
            width: video.width.unwrap_or(0),
            height: video.height.unwrap_or(0),
            video_codec: video
                .codec_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            audio_codec: audio.and_then(|a| a.codec_name.clone()),
            audio_channels: audio.and_then(|a| a.channels),
            audio_sample_rate: audio.and_then(|a| parse_num::<u32>(a.sample_rate.as_deref())),
            container: format.and_then(|f| f.format_name.clone()),
            bit_rate_bps,
            file_size,
            frame_count: derive_frame_count(fps, duration_secs),
        })
    }
}

fn is_unknown_rate(rate: &str) -> bool {
    rate.trim() == "0/0"
}

fn parse_num<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Parse "30", "29.97" or "30000/1001". A zero denominator yields 0.0.
pub fn parse_frame_rate(rate: &str) -> Result<f64> {
    let bad = || IngestError::ProbeFailed(format!("invalid frame rate {:?}", rate));
    let rate = rate.trim();

    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().map_err(|_| bad())?;
            let den: f64 = den.trim().parse().map_err(|_| bad())?;
            if den == 0.0 {
                0.0
            } else {
                num / den
            }
        }
        None => rate.parse().map_err(|_| bad())?,
    };

    if fps.is_finite() && fps >= 0.0 {
        Ok(fps)
    } else {
        Err(bad())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30").unwrap(), 30.0);
        assert_eq!(parse_frame_rate("25/1").unwrap(), 25.0);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 1e-3);
        assert!((parse_frame_rate("23.976").unwrap() - 23.976).abs() < 1e-9);
        assert_eq!(parse_frame_rate("0/0").unwrap(), 0.0);
        assert_eq!(parse_frame_rate("24/0").unwrap(), 0.0);
        assert!(parse_frame_rate("abc").is_err());
        assert!(parse_frame_rate("1/x").is_err());
    }

    #[test]
    fn test_first_stream_of_each_type_wins() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac", "channels": 2, "sample_rate": "48000"},
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080, "r_frame_rate": "25/1"},
                {"codec_type": "video", "codec_name": "mjpeg", "width": 320, "height": 240, "r_frame_rate": "90000/1"},
                {"codec_type": "audio", "codec_name": "ac3", "channels": 6, "sample_rate": "44100"}
            ],
            "format": {"format_name": "mov,mp4", "duration": "12.000000", "size": "1000", "bit_rate": "8000"}
        }"#;
        let meta = ProbeOutput::parse(json).unwrap().into_metadata(0).unwrap();
        assert_eq!(meta.video_codec, "h264");
        assert_eq!((meta.width, meta.height), (1920, 1080));
        assert_eq!(meta.audio_codec.as_deref(), Some("aac"));
        assert_eq!(meta.audio_channels, Some(2));
        assert_eq!(meta.audio_sample_rate, Some(48000));
        assert_eq!(meta.frame_count, 300);
        assert_eq!(meta.bit_rate_bps, 8000);
        assert_eq!(meta.byte_rate(), 1000);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["bit_rate_bps"], 8000);
    }

    #[test]
    fn test_duration_falls_back_to_video_stream() {
        let json = br#"{
            "streams": [{"codec_type": "video", "codec_name": "vp9", "r_frame_rate": "0/0",
                         "avg_frame_rate": "30/1", "duration": "4.5"}],
            "format": {"duration": "0.000000"}
        }"#;
        let meta = ProbeOutput::parse(json).unwrap().into_metadata(777).unwrap();
        assert_eq!(meta.duration_secs, 4.5);
        assert_eq!(meta.fps, 30.0);
        assert_eq!(meta.frame_count, 135);
        assert_eq!(meta.file_size, 777);
        assert!(!meta.has_audio());
    }

    #[test]
    fn test_no_video_stream() {
        let json = br#"{"streams": [{"codec_type": "audio", "codec_name": "mp3"}], "format": {}}"#;
        let err = ProbeOutput::parse(json).unwrap().into_metadata(0).unwrap_err();
        assert!(matches!(err, IngestError::NoVideoStream));
    }

    #[test]
    fn test_garbage_output() {
        assert!(matches!(
            ProbeOutput::parse(b"not json"),
            Err(IngestError::ProbeFailed(_))
        ));
    }
}
