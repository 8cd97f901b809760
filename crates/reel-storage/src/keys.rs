//! Artifact key scheme.
//!
//! Keys depend only on the reel id, so a re-run overwrites the same objects.

use reel_models::ReelId;

pub const MP4_CONTENT_TYPE: &str = "video/mp4";
pub const POSTER_CONTENT_TYPE: &str = "image/jpeg";

/// `reels/<reelId>/out.mp4`
pub fn output_key(reel_id: &ReelId) -> String {
    format!("reels/{}/out.mp4", reel_id)
}

/// `reels/<reelId>/poster.jpg`
pub fn poster_key(reel_id: &ReelId) -> String {
    format!("reels/{}/poster.jpg", reel_id)
}

/// Public URL of `key` under `base_url`.
pub fn public_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key.trim_start_matches('/'))
}
