//! `reelcast` - narrated vertical slideshows from short scripts
//!
//! # Features
//!
//! - **Timing allocation**: per-segment durations derived from narration text
//! - **Asset synthesis**: narration + one image per segment via pluggable providers
//! - **Compositing**: ffmpeg slideshow with crossfades, synced to the narration
//! - **Live progress**: session-scoped events over WebSocket
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use reelcast::{
//!     Compositor, CompositorConfig, HttpAssetProvider, PipelineConfig, PipelineCoordinator,
//!     ProgressBroadcaster, ProviderConfig, Segment, VideoRequest,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broadcaster = Arc::new(ProgressBroadcaster::new());
//!     let coordinator = PipelineCoordinator::new(
//!         PipelineConfig::default(),
//!         Arc::new(HttpAssetProvider::new(ProviderConfig::default().with_api_key("sk-..."))?),
//!         Arc::new(Compositor::new(CompositorConfig::default())),
//!         broadcaster.clone(),
//!     );
//!
//!     let (subscriber, mut events) = broadcaster.connect();
//!     let request = VideoRequest::new(vec![Segment::new("A sunrise over hills", "Every day starts here.")]);
//!     let submission = coordinator.submit(request, Some(&subscriber))?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{}% {}", event.progress, event.message);
//!         if event.is_terminal() {
//!             break;
//!         }
//!     }
//!     let outcome = submission.handle.await??;
//!     println!("Video at {}", outcome.video_path.display());
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod compose;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod probe;
pub mod provider;
pub mod segment;
pub mod server;
pub mod timing;

pub use broadcast::{ProgressBroadcaster, SessionId, SubscribeError, Subscriber};
pub use compose::{ComposeError, Composition, Compositor, CompositorConfig};
pub use config::Config;
pub use error::{ErrorCode, PipelineError};
pub use events::{CompletedPayload, ErrorPayload, PipelineStep, ProgressEvent};
pub use pipeline::{PipelineConfig, PipelineCoordinator, RunOutcome, Submission};
pub use probe::{Ffprobe, MediaProbe, ProbeError};
pub use provider::{
    AssetProvider, AudioArtifact, HttpAssetProvider, ImageArtifact, ProviderConfig, ProviderError,
};
pub use segment::{Segment, ValidationError, VideoRequest};
pub use server::{Server, ServerConfig};
pub use timing::{allocate, TimingPlan};

/// Version of reelcast
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
