//! Narration and image synthesis collaborators.
//!
//! The pipeline only sees the [`AssetProvider`] trait. Implementations
//! write the produced artifact to a destination path chosen by the caller
//! (so the caller owns cleanup) and must neither retry nor wait longer
//! than their configured timeout.

pub mod http;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use http::{HttpAssetProvider, ProviderConfig};

/// Which upstream capability failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Narration,
    Image,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Narration => f.write_str("narration"),
            Self::Image => f.write_str("image"),
        }
    }
}

/// Provider failures, split between upstream problems and local ones.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{service} service returned HTTP {status}: {body}")]
    Status {
        service: Service,
        status: u16,
        body: String,
    },

    #[error("{service} service rate limited the request")]
    RateLimited { service: Service },

    #[error("{service} service is out of credits or quota")]
    QuotaExhausted { service: Service },

    #[error("{service} service did not answer within {after:?}")]
    Timeout { service: Service, after: Duration },

    #[error("{service} service unreachable: {message}")]
    Transport { service: Service, message: String },

    #[error("{service} service sent an unusable response: {message}")]
    InvalidResponse { service: Service, message: String },

    #[error("failed to store {service} artifact: {source}")]
    Io {
        service: Service,
        #[source]
        source: std::io::Error,
    },
}

impl ProviderError {
    /// `true` when the failure originated upstream rather than locally.
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        !matches!(self, Self::Io { .. })
    }

    #[must_use]
    pub fn service(&self) -> Service {
        match self {
            Self::Status { service, .. }
            | Self::RateLimited { service }
            | Self::QuotaExhausted { service }
            | Self::Timeout { service, .. }
            | Self::Transport { service, .. }
            | Self::InvalidResponse { service, .. }
            | Self::Io { service, .. } => *service,
        }
    }
}

/// Synthesized narration on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Synthesized image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub path: PathBuf,
    pub bytes: u64,
}

/// External narration + image synthesis.
#[async_trait]
pub trait AssetProvider: Send + Sync {
    /// Speak `text` with `voice_id`, writing audio to `dest`.
    async fn synthesize_narration(
        &self,
        text: &str,
        voice_id: &str,
        dest: &Path,
    ) -> Result<AudioArtifact, ProviderError>;

    /// Render `prompt` to an image written to `dest`.
    async fn synthesize_image(&self, prompt: &str, dest: &Path)
        -> Result<ImageArtifact, ProviderError>;
}
