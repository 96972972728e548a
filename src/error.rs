//! Pipeline failure taxonomy and the codes reported to observers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compose::ComposeError;
use crate::provider::{ProviderError, Service};
use crate::segment::ValidationError;

/// Categorized error code carried by `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    TtsServiceError,
    ImageServiceError,
    VideoProcessingError,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::TtsServiceError => "TTS_SERVICE_ERROR",
            Self::ImageServiceError => "IMAGE_SERVICE_ERROR",
            Self::VideoProcessingError => "VIDEO_PROCESSING_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that ends a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("narration synthesis failed: {0}")]
    Narration(#[source] ProviderError),

    #[error("image synthesis failed for segment {index}: {source}")]
    Image {
        index: usize,
        #[source]
        source: ProviderError,
    },

    #[error("video processing failed: {0}")]
    Video(#[from] ComposeError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Wrap a provider failure, attributing it to the service that raised it.
    #[must_use]
    pub fn from_provider(error: ProviderError, segment: Option<usize>) -> Self {
        match error.service() {
            Service::Image => Self::Image {
                index: segment.unwrap_or_default(),
                source: error,
            },
            Service::Narration => Self::Narration(error),
        }
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            // Writing the artifact locally is not the upstream's fault
            Self::Narration(e) if !e.is_upstream() => ErrorCode::InternalError,
            Self::Image { source, .. } if !source.is_upstream() => ErrorCode::InternalError,
            Self::Narration(_) => ErrorCode::TtsServiceError,
            Self::Image { .. } => ErrorCode::ImageServiceError,
            Self::Video(_) => ErrorCode::VideoProcessingError,
            Self::Internal(_) | Self::Io(_) => ErrorCode::InternalError,
        }
    }

    /// Message followed by every underlying cause.
    #[must_use]
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !out.contains(&text) {
                out.push_str(": ");
                out.push_str(&text);
            }
            source = cause.source();
        }
        out
    }
}
