//! FFmpeg CLI wrapper for reel rendering.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Progress parsing from `-progress pipe:2`
//! - Wall-clock timeouts with process kill
//! - Filter graph generation from a composition spec
//! - The `Transcoder` seam used by the render worker, with an FFmpeg implementation
//! - Poster frame extraction

pub mod command;
pub mod error;
pub mod filter_graph;
pub mod poster;
pub mod progress;
pub mod template;
pub mod transcode;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use filter_graph::{
    build_filter_graph, validate_graph, FilterGraph, FilterGraphBuilder, AUDIO_INPUT_MAP,
    DEFAULT_MAX_SLOTS, VIDEO_OUT_LABEL,
};
pub use poster::{extract_poster, poster_command, poster_timestamp_ms, POSTER_TIMEOUT};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use template::render_template;
pub use transcode::{
    transcode_timeout, ClipInput, FfmpegTranscoder, TranscodeOutput, TranscodeRequest, Transcoder,
};
