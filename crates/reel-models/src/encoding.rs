//! Output encoding configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default output frame rate
pub const DEFAULT_FPS: u32 = 30;
/// Default pixel format (broad playback compatibility)
pub const DEFAULT_PIX_FMT: &str = "yuv420p";
/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 20;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Poster frame settings
pub const POSTER_SCALE_WIDTH: u32 = 480;
pub const POSTER_TIMESTAMP_MS: u64 = 1000;

/// Video encoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Output frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Output pixel format
    #[serde(default = "default_pix_fmt")]
    pub pix_fmt: String,

    /// Video codec (e.g., "libx264", "h264_nvenc")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset (e.g., "fast", "medium", "slow")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Target video bitrate (e.g. "4M"); when set it caps the CRF output
    #[serde(default)]
    pub video_bitrate: Option<String>,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Audio bitrate
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}
fn default_pix_fmt() -> String {
    DEFAULT_PIX_FMT.to_string()
}
fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            pix_fmt: DEFAULT_PIX_FMT.to_string(),
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
            video_bitrate: None,
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }
}

impl EncodingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fps: std::env::var("ENCODE_FPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.fps),
            pix_fmt: std::env::var("ENCODE_PIX_FMT").unwrap_or(defaults.pix_fmt),
            codec: std::env::var("ENCODE_VIDEO_CODEC").unwrap_or(defaults.codec),
            preset: std::env::var("ENCODE_PRESET").unwrap_or(defaults.preset),
            crf: std::env::var("ENCODE_CRF")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.crf),
            video_bitrate: std::env::var("ENCODE_VIDEO_BITRATE")
                .ok()
                .filter(|s| !s.is_empty()),
            audio_codec: std::env::var("ENCODE_AUDIO_CODEC").unwrap_or(defaults.audio_codec),
            audio_bitrate: std::env::var("ENCODE_AUDIO_BITRATE").unwrap_or(defaults.audio_bitrate),
        }
    }

    /// Returns a new config with updated CRF.
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    /// Returns a new config with a target video bitrate.
    pub fn with_video_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.video_bitrate = Some(bitrate.into());
        self
    }

    /// Convert to FFmpeg output arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec![
            "-r".to_string(),
            self.fps.to_string(),
            "-pix_fmt".to_string(),
            self.pix_fmt.clone(),
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
        ];

        // Constrained quality: CRF bounded by a max rate
        if let Some(ref bitrate) = self.video_bitrate {
            args.extend_from_slice(&[
                "-maxrate".to_string(),
                bitrate.clone(),
                "-bufsize".to_string(),
                bitrate.clone(),
            ]);
        }

        args.extend_from_slice(&[
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ]);

        args
    }
}
