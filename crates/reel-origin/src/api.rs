//! Origin API seam.

use async_trait::async_trait;
use reel_models::{CallbackPayload, ReelId, RenderContext};

use crate::error::OriginResult;

#[async_trait]
pub trait OriginApi: Send + Sync {
    /// `GET render-context/{reelId}`, validated.
    async fn fetch_context(&self, reel_id: &ReelId) -> OriginResult<RenderContext>;

    /// `POST render-callback/{reelId}`. Safe to repeat.
    async fn post_callback(&self, reel_id: &ReelId, payload: &CallbackPayload) -> OriginResult<()>;
}
