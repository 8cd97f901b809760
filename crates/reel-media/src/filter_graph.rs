//! Filter graph generation from a composition spec.
//!
//! Input layout of the generated graph:
//! - input `0` is the audio track, mapped straight through as `0:a:0`
//! - inputs `1..=N` are the clips, in slot order
//!
//! The video side is a `color` canvas, one normalized segment per clip
//! overlaid during its slot window, then one `drawtext` per text overlay.
//! The final video label is always `[txt]`.

use std::collections::{BTreeMap, HashSet};

use reel_models::{ClipSlot, CompositionSpec, TextOverlay};
use tracing::warn;

use crate::error::{MediaError, MediaResult};
use crate::template::render_template;

/// Label of the final video stream.
pub const VIDEO_OUT_LABEL: &str = "txt";
/// Stream specifier of the audio track.
pub const AUDIO_INPUT_MAP: &str = "0:a:0";
/// Default cap on the number of slots one composition may use.
pub const DEFAULT_MAX_SLOTS: usize = 32;

const DEFAULT_FPS: u32 = 30;
const OUTPUT_PIX_FMT: &str = "yuv420p";
const TEXT_BOX_STYLE: &str = "box=1:boxcolor=black@0.5:boxborderw=12";

/// A generated filter graph plus what the transcoder needs to wire it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGraph {
    /// `-filter_complex` argument
    pub text: String,
    /// Number of clip inputs the graph reads (`1..=clip_count`)
    pub clip_count: usize,
    /// Template keys that had no value, in first-seen order
    pub unresolved: Vec<String>,
}

impl FilterGraph {
    /// Total inputs the graph expects, audio track included.
    pub fn input_count(&self) -> usize {
        self.clip_count + 1
    }

    /// `-map` argument for the video output.
    pub fn video_map(&self) -> String {
        format!("[{}]", VIDEO_OUT_LABEL)
    }
}

/// Builds filter graphs. Pure: no I/O, no clock, no randomness.
#[derive(Debug, Clone)]
pub struct FilterGraphBuilder {
    fps: u32,
    max_slots: usize,
    font_file: Option<String>,
}

impl Default for FilterGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterGraphBuilder {
    pub fn new() -> Self {
        Self {
            fps: DEFAULT_FPS,
            max_slots: DEFAULT_MAX_SLOTS,
            font_file: None,
        }
    }

    /// Frame rate every clip segment is normalized to.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn with_max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }

    /// Font used by `drawtext`; fontconfig's default when unset.
    pub fn with_font_file(mut self, font_file: impl Into<String>) -> Self {
        self.font_file = Some(font_file.into());
        self
    }

    /// Build the graph for `spec` rendered from `clip_count` clips.
    ///
    /// The canvas lasts until the last slot or timed text ends.
    pub fn build(
        &self,
        spec: &CompositionSpec,
        clip_count: usize,
        vars: &BTreeMap<String, String>,
    ) -> MediaResult<FilterGraph> {
        self.build_for_duration(spec, clip_count, vars, 0)
    }

    /// Like `build`, with a canvas at least `duration_ms` long so the video
    /// stream covers the whole reel even past the last slot.
    pub fn build_for_duration(
        &self,
        spec: &CompositionSpec,
        clip_count: usize,
        vars: &BTreeMap<String, String>,
        duration_ms: u64,
    ) -> MediaResult<FilterGraph> {
        if spec.slot_count() != clip_count {
            return Err(MediaError::SpecMismatch {
                expected: spec.slot_count(),
                actual: clip_count,
            });
        }

        self.check_structure(spec)?;

        let canvas_ms = timeline_ms(spec).max(duration_ms);
        let mut segments: Vec<String> = Vec::with_capacity(1 + 2 * clip_count + spec.texts.len());

        segments.push(format!(
            "color=c={}:s={}x{}:r={}:d={}[base]",
            spec.background,
            spec.width,
            spec.height,
            self.fps,
            fmt_secs(canvas_ms)
        ));

        for (i, slot) in spec.slots.iter().enumerate() {
            segments.push(self.clip_segment(i, slot));
        }

        let mut current = "base".to_string();
        for (i, slot) in spec.slots.iter().enumerate() {
            let next = format!("v{}", i);
            segments.push(format!(
                "[{}][c{}]overlay=x={}:y={}:eof_action=pass:enable='between(t,{},{})'[{}]",
                current,
                i,
                slot.x,
                slot.y,
                fmt_secs(slot.start_ms),
                fmt_secs(slot.end_ms),
                next
            ));
            current = next;
        }

        let mut unresolved: Vec<String> = Vec::new();
        if spec.texts.is_empty() {
            segments.push(format!("[{}]null[{}]", current, VIDEO_OUT_LABEL));
        } else {
            let last = spec.texts.len() - 1;
            for (i, overlay) in spec.texts.iter().enumerate() {
                let (text, missing) = render_template(&overlay.template, vars);
                for key in missing {
                    if !unresolved.contains(&key) {
                        warn!(key = %key, "text overlay references a variable with no value");
                        unresolved.push(key);
                    }
                }

                let next = if i == last {
                    VIDEO_OUT_LABEL.to_string()
                } else {
                    format!("t{}", i)
                };
                segments.push(format!(
                    "[{}]{}[{}]",
                    current,
                    self.drawtext(overlay, &text, canvas_ms),
                    next
                ));
                current = next;
            }
        }

        let text = segments.join(";");
        validate_graph(&text, clip_count + 1, VIDEO_OUT_LABEL)?;

        Ok(FilterGraph {
            text,
            clip_count,
            unresolved,
        })
    }

    fn check_structure(&self, spec: &CompositionSpec) -> MediaResult<()> {
        if spec.slots.is_empty() {
            return Err(MediaError::invalid_spec("composition has no slots"));
        }
        if spec.slots.len() > self.max_slots {
            return Err(MediaError::invalid_spec(format!(
                "composition has {} slots, at most {} are supported",
                spec.slots.len(),
                self.max_slots
            )));
        }
        if spec.width == 0 || spec.height == 0 || spec.width % 2 != 0 || spec.height % 2 != 0 {
            return Err(MediaError::invalid_spec(format!(
                "canvas {}x{} must have positive even dimensions",
                spec.width, spec.height
            )));
        }
        if !is_safe_color(&spec.background) {
            return Err(MediaError::invalid_spec(format!(
                "invalid background color {:?}",
                spec.background
            )));
        }

        for (i, slot) in spec.slots.iter().enumerate() {
            if slot.w == 0 || slot.h == 0 {
                return Err(MediaError::invalid_spec(format!(
                    "slot {} has empty size {}x{}",
                    i, slot.w, slot.h
                )));
            }
            if slot.end_ms <= slot.start_ms {
                return Err(MediaError::invalid_spec(format!(
                    "slot {} ends at {}ms, not after its start {}ms",
                    i, slot.end_ms, slot.start_ms
                )));
            }
        }

        for (i, text) in spec.texts.iter().enumerate() {
            if text.font_size == 0 {
                return Err(MediaError::invalid_spec(format!("text {} has font size 0", i)));
            }
            if !is_safe_color(&text.color) {
                return Err(MediaError::invalid_spec(format!(
                    "text {} has invalid color {:?}",
                    i, text.color
                )));
            }
            if let (Some(start), Some(end)) = (text.start_ms, text.end_ms) {
                if end <= start {
                    return Err(MediaError::invalid_spec(format!(
                        "text {} ends at {}ms, not after its start {}ms",
                        i, end, start
                    )));
                }
            }
        }

        Ok(())
    }

    fn clip_segment(&self, index: usize, slot: &ClipSlot) -> String {
        format!(
            "[{input}:v]trim=duration={dur},setpts=PTS-STARTPTS+{start}/TB,\
             scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},\
             fps={fps},format={pix}[c{index}]",
            input = index + 1,
            dur = fmt_secs(slot.duration_ms()),
            start = fmt_secs(slot.start_ms),
            w = slot.w,
            h = slot.h,
            fps = self.fps,
            pix = OUTPUT_PIX_FMT,
            index = index
        )
    }

    fn drawtext(&self, overlay: &TextOverlay, text: &str, canvas_ms: u64) -> String {
        let mut filter = String::from("drawtext=expansion=none");

        if let Some(ref font_file) = self.font_file {
            filter.push_str(":fontfile=");
            filter.push_str(&escape_graph(&escape_option(font_file)));
        }

        filter.push_str(&format!(
            ":text={}:x={}:y={}:fontsize={}:fontcolor={}",
            escape_graph(&escape_option(text)),
            overlay.x,
            overlay.y,
            overlay.font_size,
            overlay.color
        ));

        if overlay.boxed {
            filter.push(':');
            filter.push_str(TEXT_BOX_STYLE);
        }

        if overlay.start_ms.is_some() || overlay.end_ms.is_some() {
            let start = overlay.start_ms.unwrap_or(0);
            let end = overlay.end_ms.unwrap_or(canvas_ms);
            filter.push_str(&format!(
                ":enable='between(t,{},{})'",
                fmt_secs(start),
                fmt_secs(end)
            ));
        }

        filter
    }
}

/// Build a graph with default settings.
pub fn build_filter_graph(
    spec: &CompositionSpec,
    clip_count: usize,
    vars: &BTreeMap<String, String>,
) -> MediaResult<FilterGraph> {
    FilterGraphBuilder::new().build(spec, clip_count, vars)
}

/// End of the last slot or timed text, whichever is later.
fn timeline_ms(spec: &CompositionSpec) -> u64 {
    let slots_end = spec.slots.iter().map(|s| s.end_ms).max().unwrap_or(0);
    let texts_end = spec.texts.iter().filter_map(|t| t.end_ms).max().unwrap_or(0);
    slots_end.max(texts_end)
}

/// Milliseconds as seconds with exactly three decimals.
fn fmt_secs(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

fn is_safe_color(color: &str) -> bool {
    !color.is_empty()
        && color
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '@' | '.' | '_'))
}

/// First level: a single filter option value.
fn escape_option(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '\'' | ':' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Second level: the filter description inside the graph.
fn escape_graph(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Check a graph's syntax and label wiring.
///
/// - quotes and brackets are balanced outside escapes
/// - stream specifiers (`N:v`) refer to one of `input_count` inputs
/// - every consumed label was produced by an earlier chain and is consumed once
/// - every produced label is consumed, except `terminal`
pub fn validate_graph(text: &str, input_count: usize, terminal: &str) -> MediaResult<()> {
    let chains = split_chains(text)?;

    let mut produced: HashSet<String> = HashSet::new();
    let mut consumed: HashSet<String> = HashSet::new();

    for (index, chain) in chains.iter().enumerate() {
        if !chain.has_filter {
            return Err(MediaError::invalid_graph(format!("chain {} has no filter", index)));
        }

        for label in &chain.inputs {
            if label.starts_with(|c: char| c.is_ascii_digit()) {
                let input: usize = label
                    .split(':')
                    .next()
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| MediaError::invalid_graph(format!("bad stream specifier [{}]", label)))?;
                if input >= input_count {
                    return Err(MediaError::invalid_graph(format!(
                        "[{}] refers to input {} but only {} inputs exist",
                        label, input, input_count
                    )));
                }
                continue;
            }
            if !produced.contains(label) {
                return Err(MediaError::invalid_graph(format!(
                    "[{}] consumed before it is produced",
                    label
                )));
            }
            if !consumed.insert(label.clone()) {
                return Err(MediaError::invalid_graph(format!("[{}] consumed twice", label)));
            }
        }

        for label in &chain.outputs {
            if !produced.insert(label.clone()) {
                return Err(MediaError::invalid_graph(format!("[{}] produced twice", label)));
            }
        }
    }

    if !produced.contains(terminal) || consumed.contains(terminal) {
        return Err(MediaError::invalid_graph(format!(
            "terminal label [{}] is not a graph output",
            terminal
        )));
    }

    let mut dangling: Vec<&String> = produced
        .iter()
        .filter(|label| label.as_str() != terminal && !consumed.contains(*label))
        .collect();
    if !dangling.is_empty() {
        dangling.sort();
        return Err(MediaError::invalid_graph(format!(
            "dangling labels: {}",
            dangling
                .iter()
                .map(|l| format!("[{}]", l))
                .collect::<Vec<_>>()
                .join(" ")
        )));
    }

    Ok(())
}

#[derive(Debug, Default)]
struct Chain {
    inputs: Vec<String>,
    outputs: Vec<String>,
    has_filter: bool,
}

/// Split graph text into `;`-separated chains, collecting leading and trailing labels.
fn split_chains(text: &str) -> MediaResult<Vec<Chain>> {
    let mut chains = Vec::new();
    let mut chain = Chain::default();
    let mut chars = text.chars();
    let mut in_quote = false;

    while let Some(c) = chars.next() {
        if in_quote {
            if c == '\'' {
                in_quote = false;
            }
            continue;
        }

        match c {
            '\\' => {
                if chars.next().is_none() {
                    return Err(MediaError::invalid_graph("trailing escape"));
                }
                mark_filter(&mut chain)?;
            }
            '\'' => {
                in_quote = true;
                mark_filter(&mut chain)?;
            }
            '[' => {
                let mut label = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some('[') | Some(';') | None => {
                            return Err(MediaError::invalid_graph("unbalanced '['"));
                        }
                        Some(ch) => label.push(ch),
                    }
                }
                if label.is_empty() {
                    return Err(MediaError::invalid_graph("empty label"));
                }
                if chain.has_filter {
                    chain.outputs.push(label);
                } else {
                    chain.inputs.push(label);
                }
            }
            ']' => return Err(MediaError::invalid_graph("unbalanced ']'")),
            ';' => {
                chains.push(std::mem::take(&mut chain));
            }
            c if c.is_whitespace() => {}
            _ => mark_filter(&mut chain)?,
        }
    }

    if in_quote {
        return Err(MediaError::invalid_graph("unterminated quote"));
    }
    chains.push(chain);

    Ok(chains)
}

fn mark_filter(chain: &mut Chain) -> MediaResult<()> {
    if !chain.outputs.is_empty() {
        return Err(MediaError::invalid_graph(format!(
            "filter text after output label [{}]",
            chain.outputs[chain.outputs.len() - 1]
        )));
    }
    chain.has_filter = true;
    Ok(())
}
