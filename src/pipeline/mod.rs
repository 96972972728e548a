//! One run per request: timings -> narration -> images -> video -> publish
//!
//! The coordinator walks a forward-only state machine, publishing a
//! progress event on entry to every step. Any failure ends the run with an
//! `error` event. Temporary artifacts are removed on every exit path before
//! the terminal event goes out.

pub mod workspace;

pub use workspace::RunWorkspace;

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::{ProgressBroadcaster, SessionId, Subscriber};
use crate::compose::{ComposeProgress, Compositor};
use crate::error::PipelineError;
use crate::events::{CompletedPayload, ErrorPayload, PipelineStep, ProgressEvent};
use crate::provider::{AssetProvider, ImageArtifact};
use crate::segment::{ValidationError, VideoRequest, DEFAULT_VOICE};
use crate::timing;

/// Progress reached on entry to each step.
const TIMINGS_PERCENT: u8 = 5;
const AUDIO_PERCENT: u8 = 10;
const IMAGES_START_PERCENT: u8 = 20;
const IMAGES_END_PERCENT: u8 = 30;
const FINALIZING_PERCENT: u8 = 99;

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Shared directory for run-owned temporary files
    pub temp_dir: PathBuf,
    /// Durable directory for finished videos
    pub output_dir: PathBuf,
    /// Voice used when a request names none
    pub default_voice: String,
    /// Image synthesis calls in flight per run (1 = strictly sequential)
    pub image_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("reelcast"),
            output_dir: PathBuf::from("media/videos"),
            default_voice: DEFAULT_VOICE.to_string(),
            image_concurrency: 1,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn with_temp_dir(mut self, dir: &Path) -> Self {
        self.temp_dir = dir.to_path_buf();
        self
    }

    #[must_use]
    pub fn with_output_dir(mut self, dir: &Path) -> Self {
        self.output_dir = dir.to_path_buf();
        self
    }

    #[must_use]
    pub fn with_image_concurrency(mut self, n: usize) -> Self {
        self.image_concurrency = n.max(1);
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub session_id: SessionId,
    /// Durable location of the video
    pub video_path: PathBuf,
    pub payload: CompletedPayload,
}

/// Handle to a run started by [`PipelineCoordinator::submit`].
#[derive(Debug)]
pub struct Submission {
    pub session_id: SessionId,
    pub handle: JoinHandle<Result<RunOutcome, PipelineError>>,
}

/// Publishes progress for one run and remembers where it got to.
struct Reporter<'a> {
    session: SessionId,
    broadcaster: &'a ProgressBroadcaster,
    position: Mutex<(PipelineStep, u8)>,
}

impl<'a> Reporter<'a> {
    fn new(session: SessionId, broadcaster: &'a ProgressBroadcaster) -> Self {
        Self {
            session,
            broadcaster,
            position: Mutex::new((PipelineStep::Initializing, 0)),
        }
    }

    fn emit(&self, step: PipelineStep, progress: u8, message: impl Into<String>) {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = (step, progress);
        let event = ProgressEvent::progress(self.session, step, progress, message);
        debug!("Session {}: {} {}% {}", self.session, step, progress, event.message);
        self.broadcaster.publish(&event);
    }

    fn position(&self) -> (PipelineStep, u8) {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs the pipeline for submitted requests.
#[derive(Clone)]
pub struct PipelineCoordinator {
    config: PipelineConfig,
    provider: Arc<dyn AssetProvider>,
    compositor: Arc<Compositor>,
    broadcaster: Arc<ProgressBroadcaster>,
    media_prefix: String,
}

impl PipelineCoordinator {
    pub fn new(
        config: PipelineConfig,
        provider: Arc<dyn AssetProvider>,
        compositor: Arc<Compositor>,
        broadcaster: Arc<ProgressBroadcaster>,
    ) -> Self {
        Self {
            config,
            provider,
            compositor,
            broadcaster,
            media_prefix: "/media/videos".to_string(),
        }
    }

    /// Public URL prefix finished videos are served under
    #[must_use]
    pub fn with_media_prefix(mut self, prefix: &str) -> Self {
        self.media_prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    /// Validate `request` and start a run in the background.
    ///
    /// `observer` is subscribed before the run starts, so it sees every
    /// event including `initializing`. Invalid requests never create a
    /// session.
    pub fn submit(
        &self,
        request: VideoRequest,
        observer: Option<&Subscriber>,
    ) -> Result<Submission, ValidationError> {
        request.validate()?;

        let session_id = SessionId::new();
        if let Some(subscriber) = observer {
            if let Err(e) = self.broadcaster.subscribe(session_id, subscriber) {
                warn!("Could not subscribe observer to {}: {}", session_id, e);
            }
        }

        let coordinator = self.clone();
        let handle = tokio::spawn(async move { coordinator.run(session_id, request).await });

        Ok(Submission { session_id, handle })
    }

    /// Drive one run to its terminal event.
    ///
    /// Always publishes exactly one `completed` or `error` event for
    /// `session`, after temporary files have been removed.
    pub async fn run(
        &self,
        session: SessionId,
        request: VideoRequest,
    ) -> Result<RunOutcome, PipelineError> {
        info!(
            "Session {}: starting run with {} segments",
            session,
            request.segments.len()
        );

        let reporter = Reporter::new(session, &self.broadcaster);
        let mut workspace = RunWorkspace::new(&self.config.temp_dir, session, request.segments.len());

        let result = AssertUnwindSafe(self.execute(&request, &workspace, &reporter))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(PipelineError::Internal(panic_message(&*panic))));

        workspace.cleanup().await;

        match result {
            Ok((video_path, payload)) => {
                info!(
                    "Session {}: completed {} ({:.2}s)",
                    session, payload.video_url, payload.duration_seconds
                );
                self.broadcaster
                    .publish(&ProgressEvent::completed(session, payload.clone()));
                Ok(RunOutcome {
                    session_id: session,
                    video_path,
                    payload,
                })
            }
            Err(e) => {
                let (failed_step, progress) = reporter.position();
                warn!("Session {}: failed during {}: {}", session, failed_step, e.chain());
                self.broadcaster.publish(&ProgressEvent::failed(
                    session,
                    progress,
                    ErrorPayload {
                        code: e.code(),
                        message: e.to_string(),
                        details: Some(e.chain()),
                        failed_step,
                    },
                ));
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        request: &VideoRequest,
        workspace: &RunWorkspace,
        reporter: &Reporter<'_>,
    ) -> Result<(PathBuf, CompletedPayload), PipelineError> {
        reporter.emit(PipelineStep::Initializing, 0, "Starting video generation");
        workspace.prepare().await?;

        // Timings
        reporter.emit(
            PipelineStep::CalculatingTimings,
            TIMINGS_PERCENT,
            "Calculating segment timings",
        );
        let plan = timing::allocate(&request.segments);
        debug!("Timing plan: {:?}", plan.as_slice());

        // Narration
        reporter.emit(
            PipelineStep::GeneratingAudio,
            AUDIO_PERCENT,
            "Generating narration",
        );
        let voice = request.voice_or(&self.config.default_voice);
        let audio = self
            .provider
            .synthesize_narration(&request.narration_text(), voice, &workspace.narration_path())
            .await
            .map_err(|e| PipelineError::from_provider(e, None))?;

        // Images
        let total = request.segments.len();
        reporter.emit(
            PipelineStep::GeneratingImages,
            IMAGES_START_PERCENT,
            format!("Generating {total} images"),
        );
        let images = self.generate_images(request, workspace, reporter).await?;

        // Video
        reporter.emit(
            PipelineStep::CreatingVideo,
            IMAGES_END_PERCENT,
            "Creating video",
        );
        let on_progress = |p: ComposeProgress| {
            reporter.emit(PipelineStep::CreatingVideo, p.percent, p.message);
        };
        let composition = self
            .compositor
            .compose(&images, &audio, &plan, &workspace.render_path(), &on_progress)
            .await?;

        // Publish
        reporter.emit(
            PipelineStep::Finalizing,
            FINALIZING_PERCENT,
            "Publishing video",
        );
        let (video_path, video_url) = self.publish_artifact(&composition.video_path).await?;

        Ok((
            video_path,
            CompletedPayload {
                video_url,
                duration_seconds: composition.measured_duration_secs,
                timings: composition.final_timings,
            },
        ))
    }

    /// Synthesize one image per segment, at most `image_concurrency` at a
    /// time, keeping segment order in the result.
    async fn generate_images(
        &self,
        request: &VideoRequest,
        workspace: &RunWorkspace,
        reporter: &Reporter<'_>,
    ) -> Result<Vec<ImageArtifact>, PipelineError> {
        let total = request.segments.len();
        let provider = &self.provider;

        let jobs: Vec<_> = request
            .segments
            .iter()
            .enumerate()
            .map(|(index, segment)| {
                let dest = workspace.image_path(index);
                async move {
                    provider
                        .synthesize_image(&segment.visual, &dest)
                        .await
                        .map_err(|e| PipelineError::from_provider(e, Some(index)))
                }
            })
            .collect();

        // Futures are lazy: `buffered` starts at most `image_concurrency` at once
        let mut results =
            futures::stream::iter(jobs).buffered(self.config.image_concurrency.max(1));

        let mut images = Vec::with_capacity(total);
        while let Some(image) = results.next().await {
            images.push(image?);
            let done = images.len();
            reporter.emit(
                PipelineStep::GeneratingImages,
                images_percent(done, total),
                format!("Generated image {done}/{total}"),
            );
        }

        Ok(images)
    }

    /// Move the encoded video into the output directory under a fresh
    /// unique name. Returns its path and public URL.
    async fn publish_artifact(&self, render: &Path) -> Result<(PathBuf, String), PipelineError> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        let name = format!("{}.mp4", Uuid::new_v4());
        let dest = self.config.output_dir.join(&name);

        if let Err(e) = tokio::fs::rename(render, &dest).await {
            // Temp and output dirs may live on different filesystems
            debug!("rename failed ({}), copying instead", e);
            copy_published(render, &dest).await?;
        }

        Ok((dest, format!("{}/{name}", self.media_prefix)))
    }
}

/// Copy `render` to `dest`, removing a partial `dest` on failure.
///
/// The render stays in place: it belongs to the run workspace, whose
/// cleanup removes it.
async fn copy_published(render: &Path, dest: &Path) -> std::io::Result<()> {
    if let Err(e) = tokio::fs::copy(render, dest).await {
        if let Err(cleanup) = tokio::fs::remove_file(dest).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial copy {:?}: {}", dest, cleanup);
            }
        }
        return Err(e);
    }
    Ok(())
}

fn images_percent(done: usize, total: usize) -> u8 {
    let span = usize::from(IMAGES_END_PERCENT - IMAGES_START_PERCENT);
    let step = span * done / total.max(1);
    IMAGES_START_PERCENT + step as u8
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("run panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("run panicked: {s}")
    } else {
        "run panicked".to_string()
    }
}
