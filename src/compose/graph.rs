//! Structured ffmpeg filter graph for the slideshow.
//!
//! The graph is built as plain data (one node per segment, one per
//! crossfade) and serialized to `-filter_complex` syntax separately, so
//! its shape can be checked without parsing ffmpeg strings.

use std::fmt::Write as _;

use crate::timing::TimingPlan;

/// Label of the final video stream, mapped with `-map [vout]`.
pub const OUTPUT_LABEL: &str = "vout";

/// Output frame geometry and rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 30,
        }
    }
}

/// Scale/pad a still onto the canvas, zoom slowly, trim to duration.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentNode {
    /// ffmpeg input index of the still image
    pub input: usize,
    /// Seconds this segment contributes before crossfade overlap
    pub duration: f64,
    /// Fractional zoom reached by the end of the segment
    pub zoom: f64,
    pub label: String,
}

impl SegmentNode {
    /// Frames rendered for this segment (at least one).
    #[must_use]
    pub fn frames(&self, fps: u32) -> u64 {
        ((self.duration * f64::from(fps)).ceil() as u64).max(1)
    }
}

/// Crossfade joining the running chain with the next segment.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionNode {
    pub left: String,
    pub right: String,
    pub duration: f64,
    /// Start time of the fade in output time
    pub offset: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub canvas: Canvas,
    pub segments: Vec<SegmentNode>,
    pub transitions: Vec<TransitionNode>,
}

impl FilterGraph {
    /// Build the graph for `plan`, with image inputs at indices `0..plan.len()`.
    #[must_use]
    pub fn build(plan: &TimingPlan, canvas: Canvas, crossfade: f64, zoom: f64) -> Self {
        let segments: Vec<SegmentNode> = plan
            .as_slice()
            .iter()
            .enumerate()
            .map(|(input, duration)| SegmentNode {
                input,
                duration: *duration,
                zoom,
                label: format!("v{input}"),
            })
            .collect();

        let mut transitions = Vec::with_capacity(plan.transition_count());
        let mut chain = segments.first().map(|s| s.label.clone()).unwrap_or_default();
        for (i, offset) in plan.transition_offsets(crossfade).into_iter().enumerate() {
            let label = format!("x{}", i + 1);
            transitions.push(TransitionNode {
                left: chain,
                right: segments[i + 1].label.clone(),
                duration: crossfade,
                offset,
                label: label.clone(),
            });
            chain = label;
        }

        Self {
            canvas,
            segments,
            transitions,
        }
    }

    /// Label carrying the fully joined slideshow.
    #[must_use]
    pub fn final_label(&self) -> &str {
        self.transitions
            .last()
            .map(|t| t.label.as_str())
            .or_else(|| self.segments.last().map(|s| s.label.as_str()))
            .unwrap_or_default()
    }

    /// Serialize to ffmpeg `-filter_complex` syntax.
    #[must_use]
    pub fn to_filter_complex(&self) -> String {
        let Canvas { width, height, fps } = self.canvas;
        let mut chains = Vec::with_capacity(self.segments.len() + self.transitions.len() + 1);

        for seg in &self.segments {
            let frames = seg.frames(fps);
            let peak = 1.0 + seg.zoom;
            let mut chain = String::new();
            // write! into a String cannot fail
            let _ = write!(
                chain,
                "[{input}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
                 pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,\
                 zoompan=z='min(1+{zoom}*on/{frames},{peak})':d=1:\
                 x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':s={width}x{height}:fps={fps},\
                 trim=duration={duration:.3},setpts=PTS-STARTPTS[{label}]",
                input = seg.input,
                zoom = seg.zoom,
                duration = seg.duration,
                label = seg.label,
            );
            chains.push(chain);
        }

        for t in &self.transitions {
            chains.push(format!(
                "[{}][{}]xfade=transition=fade:duration={:.3}:offset={:.3}[{}]",
                t.left, t.right, t.duration, t.offset, t.label
            ));
        }

        chains.push(format!("[{}]format=yuv420p[{OUTPUT_LABEL}]", self.final_label()));
        chains.join(";")
    }
}
