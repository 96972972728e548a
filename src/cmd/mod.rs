pub mod check;
pub mod plan;
pub mod render;
pub mod serve;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use reelcast::{
    Compositor, Config, HttpAssetProvider, PipelineCoordinator, ProgressBroadcaster, VideoRequest,
};

/// Composition root: one broadcaster injected into one coordinator.
pub fn build_coordinator(
    config: &Config,
    broadcaster: Arc<ProgressBroadcaster>,
) -> Result<PipelineCoordinator> {
    if config.provider.narration_api_key.is_none() || config.provider.image_api_key.is_none() {
        warn!("Provider API keys not configured; upstream calls will likely be rejected");
    }

    let provider = HttpAssetProvider::new(config.provider.clone())
        .context("failed to build provider HTTP client")?;
    let compositor = Compositor::new(config.compositor.clone());

    Ok(PipelineCoordinator::new(
        config.pipeline.clone(),
        Arc::new(provider),
        Arc::new(compositor),
        broadcaster,
    )
    .with_media_prefix(&config.server.media_prefix))
}

/// Read a `VideoRequest` from a JSON file.
pub fn read_request(path: &Path) -> Result<VideoRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid request JSON in {}", path.display()))
}
