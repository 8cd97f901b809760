//! Artifact publisher: upload the render, then tell the origin API.

use std::path::Path;
use std::sync::Arc;

use reel_media::Transcoder;
use reel_models::{ArtifactRecord, CallbackPayload, ReelId};
use reel_origin::OriginApi;
use reel_storage::{
    output_key, poster_key, public_url, ObjectStore, MP4_CONTENT_TYPE, POSTER_CONTENT_TYPE,
};
use tracing::{info, warn};

use crate::error::StageError;

/// Uploads artifacts under deterministic keys and posts the completion
/// callback. Every step overwrites or repeats safely, so a replayed job
/// publishes the same record again.
pub struct ArtifactPublisher {
    store: Arc<dyn ObjectStore>,
    origin: Arc<dyn OriginApi>,
    transcoder: Arc<dyn Transcoder>,
    bucket: String,
    public_base_url: String,
}

impl ArtifactPublisher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        origin: Arc<dyn OriginApi>,
        transcoder: Arc<dyn Transcoder>,
        bucket: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            origin,
            transcoder,
            bucket: bucket.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Upload `video`, try a poster, then call back.
    pub async fn publish(
        &self,
        reel_id: &ReelId,
        video: &Path,
        poster: &Path,
        duration_ms: u64,
    ) -> Result<ArtifactRecord, StageError> {
        let object_key = output_key(reel_id);
        self.store
            .put_file(&self.bucket, &object_key, video, MP4_CONTENT_TYPE)
            .await
            .map_err(StageError::upload)?;
        info!(reel_id = %reel_id, key = %object_key, "Uploaded render");

        let poster_url = self.publish_poster(reel_id, video, poster, duration_ms).await;

        let record = ArtifactRecord {
            mp4_url: public_url(&self.public_base_url, &object_key),
            object_key,
            poster_url,
            duration_ms,
        };

        self.origin
            .post_callback(reel_id, &CallbackPayload::from(&record))
            .await
            .map_err(StageError::callback)?;

        Ok(record)
    }

    /// Best effort: a missing poster never fails the job.
    async fn publish_poster(
        &self,
        reel_id: &ReelId,
        video: &Path,
        poster: &Path,
        duration_ms: u64,
    ) -> Option<String> {
        if let Err(e) = self.transcoder.extract_poster(video, poster, duration_ms).await {
            warn!(reel_id = %reel_id, "Poster extraction failed: {}", e);
            return None;
        }

        let key = poster_key(reel_id);
        match self
            .store
            .put_file(&self.bucket, &key, poster, POSTER_CONTENT_TYPE)
            .await
        {
            Ok(()) => Some(public_url(&self.public_base_url, &key)),
            Err(e) => {
                warn!(reel_id = %reel_id, "Poster upload failed: {}", e);
                None
            }
        }
    }
}
