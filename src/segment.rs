//! Request model: ordered (visual, voiceover) segments and their validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on segments per video.
pub const MAX_SEGMENTS: usize = 6;

/// Voice used when a request does not name one.
pub const DEFAULT_VOICE: &str = "alloy";

/// One on-screen beat: an image prompt and the narration spoken over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Prompt handed to image synthesis
    pub visual: String,
    /// Line spoken while this segment is on screen
    pub voiceover: String,
}

impl Segment {
    pub fn new(visual: impl Into<String>, voiceover: impl Into<String>) -> Self {
        Self {
            visual: visual.into(),
            voiceover: voiceover.into(),
        }
    }
}

/// A submission: ordered segments plus an optional voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    pub segments: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

/// Why a request was rejected before any run started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("request must contain at least one segment")]
    NoSegments,

    #[error("request has {count} segments, at most {MAX_SEGMENTS} are allowed")]
    TooManySegments { count: usize },

    #[error("segment {index} has an empty {field}")]
    EmptyField { index: usize, field: &'static str },

    #[error("voice id must not be blank")]
    BlankVoice,
}

impl VideoRequest {
    #[must_use]
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            voice_id: None,
        }
    }

    #[must_use]
    pub fn with_voice(mut self, voice_id: &str) -> Self {
        self.voice_id = Some(voice_id.to_string());
        self
    }

    /// Check bounds and non-empty text fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.segments.is_empty() {
            return Err(ValidationError::NoSegments);
        }
        if self.segments.len() > MAX_SEGMENTS {
            return Err(ValidationError::TooManySegments {
                count: self.segments.len(),
            });
        }

        for (index, segment) in self.segments.iter().enumerate() {
            if segment.visual.trim().is_empty() {
                return Err(ValidationError::EmptyField {
                    index,
                    field: "visual",
                });
            }
            if segment.voiceover.trim().is_empty() {
                return Err(ValidationError::EmptyField {
                    index,
                    field: "voiceover",
                });
            }
        }

        if matches!(&self.voice_id, Some(v) if v.trim().is_empty()) {
            return Err(ValidationError::BlankVoice);
        }

        Ok(())
    }

    /// Voice to synthesize with, falling back to `default`.
    #[must_use]
    pub fn voice_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.voice_id.as_deref().unwrap_or(default)
    }

    /// All voiceovers joined into one narration script, whitespace collapsed.
    #[must_use]
    pub fn narration_text(&self) -> String {
        self.segments
            .iter()
            .flat_map(|s| s.voiceover.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
