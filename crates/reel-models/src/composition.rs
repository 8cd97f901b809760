//! Composition spec: how clips and text overlays are laid out in time and space.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default canvas width (portrait 9:16)
pub const DEFAULT_CANVAS_WIDTH: u32 = 1080;
/// Default canvas height (portrait 9:16)
pub const DEFAULT_CANVAS_HEIGHT: u32 = 1920;
/// Default canvas background color
pub const DEFAULT_BACKGROUND: &str = "black";
/// Default overlay font size in pixels
pub const DEFAULT_FONT_SIZE: u32 = 48;
/// Default overlay font color
pub const DEFAULT_FONT_COLOR: &str = "white";

/// Declarative description of a reel layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSpec {
    /// Canvas width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Canvas height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Canvas color shown where no clip is visible
    #[serde(default = "default_background")]
    pub background: String,

    /// One slot per clip, in clip order
    pub slots: Vec<ClipSlot>,

    /// Text overlays drawn on top of all clips
    #[serde(default)]
    pub texts: Vec<TextOverlay>,
}

fn default_width() -> u32 {
    DEFAULT_CANVAS_WIDTH
}
fn default_height() -> u32 {
    DEFAULT_CANVAS_HEIGHT
}
fn default_background() -> String {
    DEFAULT_BACKGROUND.to_string()
}
fn default_font_size() -> u32 {
    DEFAULT_FONT_SIZE
}
fn default_font_color() -> String {
    DEFAULT_FONT_COLOR.to_string()
}

impl CompositionSpec {
    /// Number of clip slots the layout expects.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

/// Placement of one clip on the reel timeline and canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClipSlot {
    /// Start on the reel timeline (ms)
    pub start_ms: u64,
    /// End on the reel timeline (ms, exclusive)
    pub end_ms: u64,
    /// Left edge on the canvas
    #[serde(default)]
    pub x: i32,
    /// Top edge on the canvas
    #[serde(default)]
    pub y: i32,
    /// Width of the slot
    pub w: u32,
    /// Height of the slot
    pub h: u32,
}

impl ClipSlot {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Text drawn over the composited clips.
///
/// `template` may reference render variables as `{{key}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextOverlay {
    pub template: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_font_color")]
    pub color: String,
    /// Visible from (ms); absent means from the start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    /// Visible until (ms); absent means until the end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
    /// Draw a translucent box behind the text
    #[serde(default, rename = "box")]
    pub boxed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec: CompositionSpec = serde_json::from_str(
            r#"{"slots":[{"startMs":0,"endMs":4000,"w":1080,"h":1920}]}"#,
        )
        .unwrap();

        assert_eq!(spec.width, 1080);
        assert_eq!(spec.height, 1920);
        assert_eq!(spec.background, "black");
        assert_eq!(spec.slot_count(), 1);
        assert!(spec.texts.is_empty());
        assert_eq!(spec.slots[0].duration_ms(), 4000);
    }

    #[test]
    fn test_text_overlay_fields() {
        let text: TextOverlay = serde_json::from_str(
            r#"{"template":"Meet {{name}}","x":80,"y":1600,"box":true,"endMs":3000}"#,
        )
        .unwrap();

        assert_eq!(text.font_size, DEFAULT_FONT_SIZE);
        assert_eq!(text.color, "white");
        assert!(text.boxed);
        assert_eq!(text.start_ms, None);
        assert_eq!(text.end_ms, Some(3000));
    }
}
