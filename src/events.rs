//! Progress events streamed to observers of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::SessionId;
use crate::error::ErrorCode;
use crate::timing::TimingPlan;

/// Pipeline state, in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    Initializing,
    CalculatingTimings,
    GeneratingAudio,
    GeneratingImages,
    CreatingVideo,
    Finalizing,
    Completed,
    Error,
}

impl PipelineStep {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::CalculatingTimings => "calculating-timings",
            Self::GeneratingAudio => "generating-audio",
            Self::GeneratingImages => "generating-images",
            Self::CreatingVideo => "creating-video",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Progress,
    Completed,
    Error,
}

/// Payload of a `completed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPayload {
    /// Public path of the finished video
    pub video_url: String,
    /// Duration probed from the encoded file
    pub duration_seconds: f64,
    /// Plan the video was encoded with
    pub timings: TimingPlan,
}

/// Payload of an `error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    /// Full error chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Step that was running when the failure happened
    pub failed_step: PipelineStep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Completed(CompletedPayload),
    Error(ErrorPayload),
}

/// One message on the progress channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub session_id: SessionId,
    pub step: PipelineStep,
    /// 0-100
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<EventPayload>,
}

impl ProgressEvent {
    /// Non-terminal progress update.
    pub fn progress(
        session_id: SessionId,
        step: PipelineStep,
        progress: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Progress,
            session_id,
            step,
            progress: progress.min(100),
            message: message.into(),
            timestamp: Utc::now(),
            payload: None,
        }
    }

    pub fn completed(session_id: SessionId, payload: CompletedPayload) -> Self {
        Self {
            kind: MessageKind::Completed,
            session_id,
            step: PipelineStep::Completed,
            progress: 100,
            message: format!("Video ready ({:.1}s)", payload.duration_seconds),
            timestamp: Utc::now(),
            payload: Some(EventPayload::Completed(payload)),
        }
    }

    /// Terminal failure, keeping the progress reached by the failing step.
    pub fn failed(session_id: SessionId, progress: u8, payload: ErrorPayload) -> Self {
        Self {
            kind: MessageKind::Error,
            session_id,
            step: PipelineStep::Error,
            progress: progress.min(100),
            message: payload.message.clone(),
            timestamp: Utc::now(),
            payload: Some(EventPayload::Error(payload)),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, MessageKind::Completed | MessageKind::Error)
    }

    #[must_use]
    pub fn completed_payload(&self) -> Option<&CompletedPayload> {
        match &self.payload {
            Some(EventPayload::Completed(p)) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn error_payload(&self) -> Option<&ErrorPayload> {
        match &self.payload {
            Some(EventPayload::Error(p)) => Some(p),
            _ => None,
        }
    }

    /// Serialize to the wire JSON shape.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
