//! Transcoder seam and its FFmpeg implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reel_models::EncodingConfig;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filter_graph::{FilterGraph, AUDIO_INPUT_MAP};
use crate::poster::{poster_command, POSTER_TIMEOUT};

/// A staged clip plus its optional source trim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipInput {
    pub path: PathBuf,
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

impl ClipInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            start_ms: None,
            end_ms: None,
        }
    }

    pub fn with_trim(mut self, start_ms: Option<u64>, end_ms: Option<u64>) -> Self {
        self.start_ms = start_ms;
        self.end_ms = end_ms;
        self
    }
}

/// Everything one transcode needs.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    /// Audio track, input 0
    pub track: PathBuf,
    /// Clips, inputs `1..=N`
    pub clips: Vec<ClipInput>,
    pub graph: FilterGraph,
    /// Final output path; written via `<output>.part`
    pub output: PathBuf,
    pub duration_ms: u64,
    /// Hard wall-clock limit for the process
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutput {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// External transcoding process.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Render the reel. The output exists and is non-empty on success.
    async fn transcode(&self, request: &TranscodeRequest) -> MediaResult<TranscodeOutput>;

    /// Write a JPEG poster frame of `video` to `output`.
    async fn extract_poster(&self, video: &Path, output: &Path, duration_ms: u64) -> MediaResult<()>;
}

/// `max(multiplier x duration, floor)`.
pub fn transcode_timeout(duration_ms: u64, multiplier: u32, floor: Duration) -> Duration {
    let scaled = Duration::from_millis(duration_ms.saturating_mul(u64::from(multiplier)));
    scaled.max(floor)
}

/// Transcoder that shells out to FFmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    encoding: EncodingConfig,
    program: String,
}

impl FfmpegTranscoder {
    pub fn new(encoding: EncodingConfig) -> Self {
        Self {
            encoding,
            program: "ffmpeg".to_string(),
        }
    }

    /// Use a different FFmpeg binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn encoding(&self) -> &EncodingConfig {
        &self.encoding
    }

    /// Assemble the FFmpeg invocation for `request`, writing to `output`.
    pub fn build_command(&self, request: &TranscodeRequest, output: &Path) -> MediaResult<FfmpegCommand> {
        if request.graph.clip_count != request.clips.len() {
            return Err(MediaError::SpecMismatch {
                expected: request.graph.clip_count,
                actual: request.clips.len(),
            });
        }

        let mut cmd = FfmpegCommand::new(output).input(&request.track);

        for clip in &request.clips {
            cmd = match (clip.start_ms, clip.end_ms) {
                (None, None) => cmd.input(&clip.path),
                (start, end) => {
                    let start = start.unwrap_or(0);
                    let duration = end.map(|end| end.saturating_sub(start) as f64 / 1000.0);
                    cmd.seeked_input(&clip.path, start as f64 / 1000.0, duration)
                }
            };
        }

        Ok(cmd
            .filter_complex(request.graph.text.clone())
            .map(request.graph.video_map())
            .map(AUDIO_INPUT_MAP)
            .output_args(self.encoding.to_ffmpeg_args())
            .output_duration(request.duration_ms as f64 / 1000.0)
            .output_args(["-movflags", "+faststart", "-f", "mp4"]))
    }

    fn runner(&self, timeout: Duration) -> FfmpegRunner {
        FfmpegRunner::new()
            .with_program(self.program.clone())
            .with_timeout(timeout)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> MediaResult<TranscodeOutput> {
        for path in std::iter::once(&request.track).chain(request.clips.iter().map(|c| &c.path)) {
            if !path.exists() {
                return Err(MediaError::FileNotFound(path.clone()));
            }
        }

        let part = part_path(&request.output);
        let cmd = self.build_command(request, &part)?;

        info!(
            inputs = cmd.input_count(),
            duration_ms = request.duration_ms,
            timeout_secs = request.timeout.as_secs(),
            "Starting transcode"
        );

        let duration_ms = request.duration_ms;
        let result = self
            .runner(request.timeout)
            .run_with_progress(&cmd, move |progress| {
                debug!(
                    percent = progress.percentage(duration_ms),
                    speed = progress.speed,
                    "Transcode progress"
                );
            })
            .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        let size_bytes = match tokio::fs::metadata(&part).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if size_bytes == 0 {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(MediaError::EmptyOutput(request.output.clone()));
        }

        tokio::fs::rename(&part, &request.output).await?;

        info!(size_bytes, "Transcode complete");

        Ok(TranscodeOutput {
            path: request.output.clone(),
            size_bytes,
        })
    }

    async fn extract_poster(&self, video: &Path, output: &Path, duration_ms: u64) -> MediaResult<()> {
        let cmd = poster_command(video, output, duration_ms);
        self.runner(POSTER_TIMEOUT).run(&cmd).await?;

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(MediaError::EmptyOutput(output.to_path_buf())),
        }
    }
}

/// `out.mp4` -> `out.mp4.part`
fn part_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter_graph::build_filter_graph;
    use reel_models::{ClipSlot, CompositionSpec};
    use std::collections::BTreeMap;

    fn graph(clips: usize) -> FilterGraph {
        let spec = CompositionSpec {
            width: 1080,
            height: 1920,
            background: "black".to_string(),
            slots: (0..clips as u64)
                .map(|i| ClipSlot {
                    start_ms: i * 4000,
                    end_ms: (i + 1) * 4000,
                    x: 0,
                    y: 0,
                    w: 1080,
                    h: 1920,
                })
                .collect(),
            texts: vec![],
        };
        build_filter_graph(&spec, clips, &BTreeMap::new()).unwrap()
    }

    fn request(dir: &Path, clips: usize) -> TranscodeRequest {
        TranscodeRequest {
            track: dir.join("track.m4a"),
            clips: (0..clips)
                .map(|i| ClipInput::new(dir.join(format!("clip{}.mp4", i))))
                .collect(),
            graph: graph(clips),
            output: dir.join("out.mp4"),
            duration_ms: 8000,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_transcode_timeout() {
        let floor = Duration::from_secs(60);
        assert_eq!(transcode_timeout(8000, 5, floor), floor);
        assert_eq!(transcode_timeout(30_000, 5, floor), Duration::from_secs(150));
    }

    #[test]
    fn test_build_command_input_order() {
        let dir = Path::new("/work");
        let mut req = request(dir, 2);
        req.clips[1] = req.clips[1].clone().with_trim(Some(500), Some(4500));

        let cmd = FfmpegTranscoder::new(EncodingConfig::default())
            .build_command(&req, &part_path(&req.output))
            .unwrap();
        let args = cmd.build_args();

        let inputs: Vec<&String> = args
            .windows(2)
            .filter(|w| w[0] == "-i")
            .map(|w| &w[1])
            .collect();
        assert_eq!(inputs, ["/work/track.m4a", "/work/clip0.mp4", "/work/clip1.mp4"]);

        assert!(args.windows(2).any(|w| w == ["-map", "[txt]"]));
        assert!(args.windows(2).any(|w| w == ["-map", "0:a:0"]));
        assert!(args.windows(2).any(|w| w == ["-ss", "0.500"]));
        assert!(args.windows(2).any(|w| w == ["-movflags", "+faststart"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert_eq!(args.last().map(String::as_str), Some("/work/out.mp4.part"));
    }

    #[test]
    fn test_build_command_rejects_mismatch() {
        let mut req = request(Path::new("/work"), 2);
        req.clips.pop();
        let err = FfmpegTranscoder::new(EncodingConfig::default())
            .build_command(&req, Path::new("/work/out.mp4.part"))
            .unwrap_err();
        assert!(matches!(err, MediaError::SpecMismatch { .. }));
    }

    #[cfg(unix)]
    mod fake_binary {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn write_script(dir: &Path, body: &str) -> String {
            let path = dir.join("fake-ffmpeg");
            std::fs::write(&path, format!("#!/bin/sh\nfor last; do :; done\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().to_string()
        }

        fn touch_inputs(req: &TranscodeRequest) {
            std::fs::write(&req.track, b"audio").unwrap();
            for clip in &req.clips {
                std::fs::write(&clip.path, b"video").unwrap();
            }
        }

        #[tokio::test]
        async fn test_success_renames_part_file() {
            let dir = tempfile::tempdir().unwrap();
            let req = request(dir.path(), 2);
            touch_inputs(&req);

            let program = write_script(dir.path(), "echo rendered > \"$last\"");
            let out = FfmpegTranscoder::new(EncodingConfig::default())
                .with_program(program)
                .transcode(&req)
                .await
                .unwrap();

            assert_eq!(out.path, req.output);
            assert!(out.size_bytes > 0);
            assert!(req.output.exists());
            assert!(!part_path(&req.output).exists());
        }

        #[tokio::test]
        async fn test_failure_removes_part_file() {
            let dir = tempfile::tempdir().unwrap();
            let req = request(dir.path(), 1);
            touch_inputs(&req);

            let program = write_script(dir.path(), "echo partial > \"$last\"\necho 'Invalid argument' >&2\nexit 1");
            let err = FfmpegTranscoder::new(EncodingConfig::default())
                .with_program(program)
                .transcode(&req)
                .await
                .unwrap_err();

            assert!(matches!(err, MediaError::FfmpegFailed { .. }));
            assert!(!err.is_resource_exhaustion());
            assert!(!req.output.exists());
            assert!(!part_path(&req.output).exists());
        }

        #[tokio::test]
        async fn test_empty_output_is_an_error() {
            let dir = tempfile::tempdir().unwrap();
            let req = request(dir.path(), 1);
            touch_inputs(&req);

            let program = write_script(dir.path(), ": > \"$last\"");
            let err = FfmpegTranscoder::new(EncodingConfig::default())
                .with_program(program)
                .transcode(&req)
                .await
                .unwrap_err();

            assert!(matches!(err, MediaError::EmptyOutput(_)));
            assert!(!req.output.exists());
        }

        #[tokio::test]
        async fn test_timeout_kills_transcode() {
            let dir = tempfile::tempdir().unwrap();
            let mut req = request(dir.path(), 1);
            req.timeout = Duration::from_secs(1);
            touch_inputs(&req);

            let program = write_script(dir.path(), "sleep 10");
            let err = FfmpegTranscoder::new(EncodingConfig::default())
                .with_program(program)
                .transcode(&req)
                .await
                .unwrap_err();

            assert!(err.is_timeout());
            assert!(!part_path(&req.output).exists());
        }

        #[tokio::test]
        async fn test_missing_input_is_reported() {
            let dir = tempfile::tempdir().unwrap();
            let req = request(dir.path(), 1);

            let err = FfmpegTranscoder::new(EncodingConfig::default())
                .transcode(&req)
                .await
                .unwrap_err();
            assert!(matches!(err, MediaError::FileNotFound(_)));
        }
    }
}
