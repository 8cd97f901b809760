//! Poster frame extraction.

use std::path::Path;
use std::time::Duration;

use reel_models::encoding::{POSTER_SCALE_WIDTH, POSTER_TIMESTAMP_MS};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Poster extraction decodes a single frame; anything longer is stuck.
pub const POSTER_TIMEOUT: Duration = Duration::from_secs(60);

/// Where to grab the poster: 1s in, or mid-reel for reels shorter than 2s.
pub fn poster_timestamp_ms(duration_ms: u64) -> u64 {
    POSTER_TIMESTAMP_MS.min(duration_ms / 2)
}

/// Command that writes one scaled JPEG frame of `video_path` to `output_path`.
pub fn poster_command(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    duration_ms: u64,
) -> FfmpegCommand {
    let seek = poster_timestamp_ms(duration_ms) as f64 / 1000.0;

    FfmpegCommand::new(output_path)
        .seeked_input(video_path, seek, None)
        .single_frame()
        .video_filter(format!("scale={}:-2", POSTER_SCALE_WIDTH))
        .output_args(["-q:v", "3"])
        .log_level("error")
}

/// Extract a poster frame with `ffmpeg` from PATH.
pub async fn extract_poster(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    duration_ms: u64,
) -> MediaResult<()> {
    let cmd = poster_command(video_path, output_path, duration_ms);
    FfmpegRunner::new().with_timeout(POSTER_TIMEOUT).run(&cmd).await
}
