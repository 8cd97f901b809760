//! End-to-end runs of the render pipeline against in-memory collaborators.

mod common;

use common::{buddy_context, Harness, TranscodeBehavior, BUCKET, RENDERED_BYTES};
use reel_models::{RenderJob, ReelId};

fn job(id: &str) -> RenderJob {
    RenderJob::new(ReelId::parse(id).unwrap())
}

#[tokio::test]
async fn test_buddy_scenario() {
    let harness = Harness::new();
    harness.origin.insert("r1", buddy_context(&[("name", "Buddy")]));

    let record = harness.pipeline().run(&job("r1"), 1).await.unwrap();

    assert_eq!(record.object_key, "reels/r1/out.mp4");
    assert_eq!(record.mp4_url, "https://cdn.example.com/reels/r1/out.mp4");
    assert_eq!(
        record.poster_url.as_deref(),
        Some("https://cdn.example.com/reels/r1/poster.jpg")
    );
    assert_eq!(record.duration_ms, 8000);

    let requests = harness.transcoder.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.graph.input_count(), 3);
    assert_eq!(request.clips.len(), 2);
    assert!(request.track.ends_with("track.m4a"));
    assert!(request.clips[0].path.ends_with("clip0.mp4"));
    assert!(request.clips[1].path.ends_with("clip1.mp4"));
    assert!(request.output.ends_with("out.mp4"));
    assert_eq!(request.duration_ms, 8000);

    let graph = &request.graph.text;
    assert_eq!(graph.matches("trim=duration=").count(), 2);
    assert!(graph.contains("[1:v]"));
    assert!(graph.contains("[2:v]"));
    assert_eq!(graph.matches("drawtext=").count(), 1);
    assert!(graph.contains("Meet Buddy"));

    let (body, content_type) = harness.store.object(BUCKET, "reels/r1/out.mp4").unwrap();
    assert_eq!(body, RENDERED_BYTES);
    assert_eq!(content_type, "video/mp4");
    let (_, poster_type) = harness.store.object(BUCKET, "reels/r1/poster.jpg").unwrap();
    assert_eq!(poster_type, "image/jpeg");

    let callbacks = harness.origin.callbacks();
    assert_eq!(callbacks.len(), 1);
    assert_eq!(callbacks[0].0, "r1");
    assert_eq!(callbacks[0].1.mp4_url, "https://cdn.example.com/reels/r1/out.mp4");
    assert_eq!(callbacks[0].1.duration_ms, 8000);

    assert!(harness.scratch_entries().is_empty());
}

#[tokio::test]
async fn test_same_context_twice_overwrites_same_key() {
    let harness = Harness::new();
    harness.origin.insert("r1", buddy_context(&[("name", "Buddy")]));
    let pipeline = harness.pipeline();

    let first = pipeline.run(&job("r1"), 1).await.unwrap();
    let second = pipeline.run(&job("r1"), 1).await.unwrap();

    assert_eq!(first, second);
    let video_puts: Vec<String> = harness
        .store
        .puts()
        .into_iter()
        .filter(|k| k.ends_with("out.mp4"))
        .collect();
    assert_eq!(video_puts, vec!["reels/r1/out.mp4", "reels/r1/out.mp4"]);

    let requests = harness.transcoder.requests();
    assert_eq!(requests[0].graph, requests[1].graph);
    assert_eq!(harness.origin.callbacks().len(), 2);
}

#[tokio::test]
async fn test_missing_var_renders_empty_and_completes() {
    let harness = Harness::new();
    harness.origin.insert("r1", buddy_context(&[]));

    let record = harness.pipeline().run(&job("r1"), 1).await.unwrap();
    assert_eq!(record.object_key, "reels/r1/out.mp4");

    let request = &harness.transcoder.requests()[0];
    assert_eq!(request.graph.unresolved, vec!["name".to_string()]);
    assert!(!request.graph.text.contains("{{"));
    assert!(!request.graph.text.contains("Buddy"));
    assert_eq!(harness.origin.callbacks().len(), 1);
}

#[tokio::test]
async fn test_slot_mismatch_fails_before_any_download() {
    let harness = Harness::new();
    let mut ctx = buddy_context(&[("name", "Buddy")]);
    ctx.clips.pop();
    harness.origin.insert("r1", ctx);

    let err = harness.pipeline().run(&job("r1"), 1).await.unwrap_err();

    assert_eq!(err.kind(), "spec_mismatch");
    assert!(!err.is_retriable());
    assert_eq!(harness.store.get_count("a.mp4"), 0);
    assert_eq!(harness.store.get_count("t.m4a"), 0);
    assert!(harness.transcoder.requests().is_empty());
    assert!(harness.scratch_entries().is_empty());
}

#[tokio::test]
async fn test_missing_asset_is_permanent_after_one_request() {
    let harness = Harness::new();
    let mut ctx = buddy_context(&[("name", "Buddy")]);
    ctx.clips[1].url = "s3://media/gone.mp4".to_string();
    harness.origin.insert("r1", ctx);

    let err = harness.pipeline().run(&job("r1"), 1).await.unwrap_err();

    assert_eq!(err.kind(), "asset_unavailable");
    assert!(!err.is_retriable());
    assert_eq!(harness.store.get_count("gone.mp4"), 1);
    assert!(harness.transcoder.requests().is_empty());
    assert!(harness.origin.callbacks().is_empty());
    assert!(harness.scratch_entries().is_empty());
}

#[tokio::test]
async fn test_unknown_reel_is_permanent() {
    let harness = Harness::new();

    let err = harness.pipeline().run(&job("nope"), 1).await.unwrap_err();
    assert_eq!(err.kind(), "context_invalid");
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn test_transcode_timeout_is_retriable() {
    let harness = Harness::new();
    harness.origin.insert("r1", buddy_context(&[("name", "Buddy")]));
    harness.transcoder.set_behavior(TranscodeBehavior::Timeout);

    let err = harness.pipeline().run(&job("r1"), 1).await.unwrap_err();

    assert_eq!(err.kind(), "transcode_timeout");
    assert!(err.is_retriable());
    assert!(harness.store.puts().is_empty());
    assert!(harness.scratch_entries().is_empty());
}

#[tokio::test]
async fn test_codec_error_is_permanent() {
    let harness = Harness::new();
    harness.origin.insert("r1", buddy_context(&[("name", "Buddy")]));
    harness.transcoder.set_behavior(TranscodeBehavior::BadCodec);

    let err = harness.pipeline().run(&job("r1"), 1).await.unwrap_err();
    assert_eq!(err.kind(), "transcode");
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn test_transcode_timeout_scales_with_duration() {
    let harness = Harness::new();
    let mut ctx = buddy_context(&[("name", "Buddy")]);
    ctx.duration_ms = 30_000;
    harness.origin.insert("r1", ctx);

    harness.pipeline().run(&job("r1"), 1).await.unwrap();

    let request = &harness.transcoder.requests()[0];
    assert_eq!(request.timeout.as_secs(), 150);
}

#[tokio::test]
async fn test_canvas_spans_full_reel_duration() {
    let harness = Harness::new();
    let mut ctx = buddy_context(&[("name", "Buddy")]);
    ctx.duration_ms = 12_000;
    harness.origin.insert("r1", ctx);

    let record = harness.pipeline().run(&job("r1"), 1).await.unwrap();
    assert_eq!(record.duration_ms, 12_000);

    let request = &harness.transcoder.requests()[0];
    assert!(request.graph.text.contains(":d=12.000[base]"));
    assert_eq!(request.duration_ms, 12_000);
}

#[tokio::test]
async fn test_replay_after_failed_callback() {
    let harness = Harness::new();
    harness.origin.insert("r1", buddy_context(&[("name", "Buddy")]));
    harness.origin.fail_callbacks(1);
    let pipeline = harness.pipeline();

    let err = pipeline.run(&job("r1"), 1).await.unwrap_err();
    assert_eq!(err.kind(), "callback");
    assert!(err.is_retriable());
    assert!(harness.store.object(BUCKET, "reels/r1/out.mp4").is_some());

    let record = pipeline.run(&job("r1"), 2).await.unwrap();
    assert_eq!(record.object_key, "reels/r1/out.mp4");

    let callbacks = harness.origin.callbacks();
    assert_eq!(callbacks.len(), 1);
    assert_eq!(callbacks[0].1.mp4_url, record.mp4_url);
}

#[tokio::test]
async fn test_poster_failure_does_not_fail_job() {
    let harness = Harness::new();
    harness.origin.insert("r1", buddy_context(&[("name", "Buddy")]));
    harness.transcoder.fail_posters();

    let record = harness.pipeline().run(&job("r1"), 1).await.unwrap();

    assert_eq!(record.poster_url, None);
    assert!(harness.store.object(BUCKET, "reels/r1/poster.jpg").is_none());
    assert_eq!(harness.origin.callbacks()[0].1.poster_url, None);
}
