//! Per-job render pipeline.
//!
//! Drives one job attempt through its stages in order:
//! fetch context, stage assets, build the filter graph, transcode, publish.
//! Each stage reports a typed `StageError`; retry decisions belong to the
//! executor.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reel_media::{transcode_timeout, FilterGraphBuilder, TranscodeRequest, Transcoder};
use reel_models::{ArtifactRecord, JobState, PipelineStage, RenderContext, RenderJob};
use reel_origin::OriginApi;
use reel_storage::ObjectStore;
use tracing::Instrument;

use crate::config::WorkerConfig;
use crate::error::StageError;
use crate::logging::JobLogger;
use crate::metrics;
use crate::publisher::ArtifactPublisher;
use crate::stager::AssetStager;
use crate::workspace::ScratchWorkspace;

/// External collaborators a pipeline needs, constructed by the caller.
#[derive(Clone)]
pub struct PipelineServices {
    pub origin: Arc<dyn OriginApi>,
    pub store: Arc<dyn ObjectStore>,
    pub transcoder: Arc<dyn Transcoder>,
    pub http: reqwest::Client,
    /// Bucket artifacts are uploaded to
    pub bucket: String,
}

/// Renders one reel end to end.
pub struct RenderPipeline {
    origin: Arc<dyn OriginApi>,
    stager: AssetStager,
    graph_builder: FilterGraphBuilder,
    transcoder: Arc<dyn Transcoder>,
    publisher: ArtifactPublisher,
    work_dir: PathBuf,
    timeout_multiplier: u32,
    timeout_floor: Duration,
}

impl RenderPipeline {
    pub fn new(config: &WorkerConfig, fps: u32, services: PipelineServices) -> Self {
        let stager = AssetStager::new(services.store.clone(), services.http)
            .with_fanout(config.download_fanout)
            .with_retry(config.download_retry())
            .with_request_timeout(config.download_timeout);

        let mut graph_builder = FilterGraphBuilder::new()
            .with_fps(fps)
            .with_max_slots(config.max_slots);
        if let Some(font) = &config.font_file {
            graph_builder = graph_builder.with_font_file(font.clone());
        }

        let publisher = ArtifactPublisher::new(
            services.store,
            services.origin.clone(),
            services.transcoder.clone(),
            services.bucket,
            config.public_base_url.clone(),
        );

        Self {
            origin: services.origin,
            stager,
            graph_builder,
            transcoder: services.transcoder,
            publisher,
            work_dir: config.work_dir.clone(),
            timeout_multiplier: config.transcode_timeout_multiplier,
            timeout_floor: config.transcode_timeout_floor,
        }
    }

    /// Run attempt `attempt` of `job` in a fresh scratch workspace.
    ///
    /// The workspace is removed whatever the outcome.
    pub async fn run(&self, job: &RenderJob, attempt: u32) -> Result<ArtifactRecord, StageError> {
        let logger = JobLogger::new(&job.reel_id, attempt);
        let span = logger.create_span();

        async {
            logger.log_start();

            let result = match ScratchWorkspace::create(&self.work_dir, &job.reel_id) {
                Ok(workspace) => {
                    let result = self.drive(job, &workspace, &logger).await;
                    if let Err(e) = workspace.cleanup() {
                        logger.log_warning(&format!("Failed to remove scratch workspace: {}", e));
                    }
                    result
                }
                Err(e) => Err(StageError::workspace(format!("create scratch dir: {}", e))),
            };

            match &result {
                Ok(record) => logger.log_completion(&record.mp4_url),
                Err(err) => {
                    logger.log_state(&err.to_state());
                    logger.log_failure(err);
                    metrics::record_stage_failure(err.stage().as_str(), err.kind());
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        job: &RenderJob,
        workspace: &ScratchWorkspace,
        logger: &JobLogger,
    ) -> Result<ArtifactRecord, StageError> {
        let reel_id = &job.reel_id;
        logger.log_state(&JobState::Queued);

        let ctx = timed(logger, PipelineStage::FetchContext, self.fetch_context(job)).await?;
        logger.log_state(&JobState::ContextFetched);

        // Cheap to detect before any download.
        if ctx.spec.slot_count() != ctx.clips.len() {
            return Err(StageError::SpecMismatch {
                expected: ctx.spec.slot_count(),
                actual: ctx.clips.len(),
            });
        }

        let staged = timed(
            logger,
            PipelineStage::StageAssets,
            self.stager.stage(&ctx, workspace),
        )
        .await?;
        logger.log_state(&JobState::Staged);

        let graph = timed(logger, PipelineStage::BuildGraph, async {
            self.graph_builder
                .build_for_duration(&ctx.spec, ctx.clips.len(), &ctx.vars, ctx.duration_ms)
                .map_err(StageError::from)
        })
        .await?;
        if !graph.unresolved.is_empty() {
            logger.log_warning(&format!(
                "Rendering with empty values for {}",
                graph.unresolved.join(", ")
            ));
        }
        logger.log_state(&JobState::GraphBuilt);

        let request = TranscodeRequest {
            track: staged.track,
            clips: staged.clips,
            graph,
            output: workspace.output_path(),
            duration_ms: ctx.duration_ms,
            timeout: transcode_timeout(ctx.duration_ms, self.timeout_multiplier, self.timeout_floor),
        };
        let output = timed(logger, PipelineStage::Transcode, async {
            self.transcoder
                .transcode(&request)
                .await
                .map_err(StageError::from)
        })
        .await?;
        logger.log_state(&JobState::Transcoded);

        let record = timed(
            logger,
            PipelineStage::Publish,
            self.publisher.publish(
                reel_id,
                &output.path,
                &workspace.poster_path(),
                ctx.duration_ms,
            ),
        )
        .await?;
        logger.log_state(&JobState::Published);
        logger.log_state(&JobState::Done);

        Ok(record)
    }

    async fn fetch_context(&self, job: &RenderJob) -> Result<RenderContext, StageError> {
        self.origin
            .fetch_context(&job.reel_id)
            .await
            .map_err(StageError::from_context_error)
    }
}

/// Await a stage, recording its duration.
async fn timed<T, F>(logger: &JobLogger, stage: PipelineStage, fut: F) -> Result<T, StageError>
where
    F: Future<Output = Result<T, StageError>>,
{
    let started = Instant::now();
    let result = fut.await;
    let elapsed = started.elapsed();

    metrics::record_stage_duration(stage.as_str(), elapsed.as_secs_f64());
    if result.is_ok() {
        logger.log_stage(stage, elapsed.as_millis());
    }
    result
}
