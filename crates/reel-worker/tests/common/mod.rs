//! In-memory stand-ins for the worker's external collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reel_media::{MediaError, MediaResult, TranscodeOutput, TranscodeRequest, Transcoder};
use reel_models::{CallbackPayload, ReelId, RenderContext};
use reel_origin::{OriginApi, OriginError, OriginResult};
use reel_storage::{ObjectStore, StorageError, StorageResult};
use reel_worker::{PipelineServices, RenderPipeline, WorkerConfig};
use tempfile::TempDir;

pub const BUCKET: &str = "renders";
pub const PUBLIC_BASE_URL: &str = "https://cdn.example.com";
pub const RENDERED_BYTES: &[u8] = b"rendered-mp4";

#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<HashMap<(String, String), (Vec<u8>, String)>>,
    gets: Mutex<Vec<String>>,
    puts: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn insert(&self, bucket: &str, key: &str, body: &[u8]) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            (body.to_vec(), "application/octet-stream".to_string()),
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// How many times `key` was read.
    pub fn get_count(&self, key: &str) -> usize {
        self.gets.lock().unwrap().iter().filter(|k| *k == key).count()
    }

    /// Keys written, in order.
    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.gets.lock().unwrap().push(key.to_string());
        self.object(bucket, key)
            .map(|(body, _)| body)
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.puts.lock().unwrap().push(key.to_string());
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            (body, content_type.to_string()),
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeOrigin {
    contexts: Mutex<HashMap<String, RenderContext>>,
    callback_failures: AtomicU32,
    callbacks: Mutex<Vec<(String, CallbackPayload)>>,
}

impl FakeOrigin {
    pub fn insert(&self, reel_id: &str, ctx: RenderContext) {
        self.contexts.lock().unwrap().insert(reel_id.to_string(), ctx);
    }

    /// Make the next `n` callbacks answer 503.
    pub fn fail_callbacks(&self, n: u32) {
        self.callback_failures.store(n, Ordering::SeqCst);
    }

    /// Callbacks the API accepted.
    pub fn callbacks(&self) -> Vec<(String, CallbackPayload)> {
        self.callbacks.lock().unwrap().clone()
    }
}

#[async_trait]
impl OriginApi for FakeOrigin {
    async fn fetch_context(&self, reel_id: &ReelId) -> OriginResult<RenderContext> {
        self.contexts
            .lock()
            .unwrap()
            .get(reel_id.as_str())
            .cloned()
            .ok_or_else(|| OriginError::from_http_status(404, "no such reel"))
    }

    async fn post_callback(&self, reel_id: &ReelId, payload: &CallbackPayload) -> OriginResult<()> {
        let remaining = self.callback_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.callback_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(OriginError::from_http_status(503, "unavailable"));
        }
        self.callbacks
            .lock()
            .unwrap()
            .push((reel_id.to_string(), payload.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeBehavior {
    Succeed,
    Timeout,
    BadCodec,
}

pub struct FakeTranscoder {
    behavior: Mutex<TranscodeBehavior>,
    fail_posters: AtomicBool,
    requests: Mutex<Vec<TranscodeRequest>>,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Default for FakeTranscoder {
    fn default() -> Self {
        Self {
            behavior: Mutex::new(TranscodeBehavior::Succeed),
            fail_posters: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }
}

impl FakeTranscoder {
    pub fn set_behavior(&self, behavior: TranscodeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn fail_posters(&self) {
        self.fail_posters.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Make every transcode take `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Most transcodes that were running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn render(&self, request: &TranscodeRequest) -> MediaResult<TranscodeOutput> {
        for path in std::iter::once(&request.track).chain(request.clips.iter().map(|c| &c.path)) {
            if !path.exists() {
                return Err(MediaError::FileNotFound(path.clone()));
            }
        }

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            TranscodeBehavior::Succeed => {
                tokio::fs::write(&request.output, RENDERED_BYTES).await?;
                Ok(TranscodeOutput {
                    path: request.output.clone(),
                    size_bytes: RENDERED_BYTES.len() as u64,
                })
            }
            TranscodeBehavior::Timeout => Err(MediaError::Timeout(request.timeout.as_secs())),
            TranscodeBehavior::BadCodec => Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with status 1",
                Some("Unknown encoder 'libx265'".to_string()),
                Some(1),
            )),
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> MediaResult<TranscodeOutput> {
        self.requests.lock().unwrap().push(request.clone());

        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(running, Ordering::SeqCst);
        let result = self.render(request).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn extract_poster(&self, _video: &Path, output: &Path, _duration_ms: u64) -> MediaResult<()> {
        if self.fail_posters.load(Ordering::SeqCst) {
            return Err(MediaError::ffmpeg_failed("poster failed", None, Some(1)));
        }
        tokio::fs::write(output, b"jpeg").await?;
        Ok(())
    }
}

/// Two 4s slots, one text overlay referencing `{{name}}`.
pub fn buddy_context(vars: &[(&str, &str)]) -> RenderContext {
    let mut ctx: RenderContext = serde_json::from_value(serde_json::json!({
        "spec": {
            "width": 1080,
            "height": 1920,
            "slots": [
                {"startMs": 0, "endMs": 4000, "x": 0, "y": 0, "w": 1080, "h": 1920},
                {"startMs": 4000, "endMs": 8000, "x": 0, "y": 0, "w": 1080, "h": 1920}
            ],
            "texts": [
                {"template": "Meet {{name}}", "x": 80, "y": 1600, "fontSize": 64, "color": "white"}
            ]
        },
        "clips": [{"url": "s3://media/a.mp4"}, {"url": "s3://media/b.mp4"}],
        "track": {"url": "s3://media/t.m4a"},
        "durationMs": 8000
    }))
    .unwrap();
    ctx.vars = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ctx
}

pub fn test_config(work_dir: &Path) -> WorkerConfig {
    WorkerConfig {
        max_concurrent_jobs: 2,
        download_backoff: Duration::from_millis(1),
        work_dir: work_dir.to_path_buf(),
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        shutdown_timeout: Duration::from_secs(5),
        claim_interval: Duration::from_secs(3600),
        retry_promote_interval: Duration::from_millis(10),
        public_base_url: PUBLIC_BASE_URL.to_string(),
        ..WorkerConfig::default()
    }
}

/// Fakes wired together with the Buddy assets already uploaded.
pub struct Harness {
    pub store: Arc<FakeStore>,
    pub origin: Arc<FakeOrigin>,
    pub transcoder: Arc<FakeTranscoder>,
    pub work_dir: TempDir,
    pub config: WorkerConfig,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(FakeStore::default());
        store.insert("media", "a.mp4", b"clip-a");
        store.insert("media", "b.mp4", b"clip-b");
        store.insert("media", "t.m4a", b"track");

        let work_dir = tempfile::tempdir().unwrap();
        let config = test_config(work_dir.path());

        Self {
            store,
            origin: Arc::new(FakeOrigin::default()),
            transcoder: Arc::new(FakeTranscoder::default()),
            work_dir,
            config,
        }
    }

    pub fn pipeline(&self) -> RenderPipeline {
        let services = PipelineServices {
            origin: self.origin.clone(),
            store: self.store.clone(),
            transcoder: self.transcoder.clone(),
            http: reqwest::Client::new(),
            bucket: BUCKET.to_string(),
        };
        RenderPipeline::new(&self.config, 30, services)
    }

    /// Entries left under the scratch root.
    pub fn scratch_entries(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.work_dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}
