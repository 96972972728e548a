//! Submission endpoint: `POST <submit_path>` with a JSON `VideoRequest`.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use super::http::{discard_body, read_body, write_json, HttpError, RequestHead};
use crate::broadcast::SessionId;
use crate::error::ErrorCode;
use crate::pipeline::PipelineCoordinator;
use crate::segment::{ValidationError, VideoRequest};

/// Structured error returned synchronously to submitters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    #[must_use]
    pub fn validation(error: &ValidationError) -> Self {
        Self {
            code: ErrorCode::ValidationError,
            message: error.to_string(),
            details: None,
        }
    }

    fn malformed(details: String) -> Self {
        Self {
            code: ErrorCode::ValidationError,
            message: "request body is not a valid video request".to_string(),
            details: Some(details),
        }
    }
}

/// Outcome of a submission, before it is written to the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResponse {
    Accepted(SessionId),
    Rejected(ErrorBody),
    TooLarge { limit: usize },
}

impl SubmitResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Accepted(_) => StatusCode::ACCEPTED,
            Self::Rejected(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    #[must_use]
    pub fn body(&self) -> serde_json::Value {
        match self {
            Self::Accepted(session_id) => json!({ "sessionId": session_id }),
            Self::Rejected(error) => json!({ "error": error }),
            Self::TooLarge { limit } => json!({
                "error": {
                    "code": ErrorCode::ValidationError,
                    "message": format!("request body exceeds {limit} bytes"),
                }
            }),
        }
    }
}

/// Validate `body` and start a run for it.
pub fn submit_bytes(body: &[u8], coordinator: &PipelineCoordinator) -> SubmitResponse {
    let request: VideoRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return SubmitResponse::Rejected(ErrorBody::malformed(e.to_string())),
    };

    match coordinator.submit(request, None) {
        Ok(submission) => {
            info!("Accepted session {}", submission.session_id);
            SubmitResponse::Accepted(submission.session_id)
        }
        Err(e) => SubmitResponse::Rejected(ErrorBody::validation(&e)),
    }
}

/// Handle `POST <submit_path>` on a connection whose head was already read.
pub async fn handle_submit<S>(
    stream: &mut S,
    head: RequestHead,
    max_body: usize,
    coordinator: &PipelineCoordinator,
) -> Result<(), HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let announced = head.content_length().unwrap_or_default();
    let response = match read_body(stream, head, max_body).await {
        Ok(body) => submit_bytes(&body, coordinator),
        Err(HttpError::BodyTooLarge { limit }) => SubmitResponse::TooLarge { limit },
        Err(e) => return Err(e),
    };
    write_json(stream, response.status(), &response.body()).await?;
    if matches!(response, SubmitResponse::TooLarge { .. }) {
        discard_body(stream, announced).await;
    }
    Ok(())
}
