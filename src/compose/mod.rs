//! Video composition: filter graph, narration sync, supervised encode.

pub mod compositor;
pub mod graph;
pub mod reconcile;

pub use compositor::{ComposeProgress, Composition, Compositor, CompositorConfig};
pub use graph::{Canvas, FilterGraph, SegmentNode, TransitionNode};
pub use reconcile::{reconcile, Reconciliation, SYNC_TOLERANCE_SECS};

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::probe::ProbeError;

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("no images to compose")]
    Empty,

    #[error("{images} images but {timings} timings")]
    Mismatch { images: usize, timings: usize },

    #[error("failed to probe {what}: {source}")]
    Probe {
        what: &'static str,
        #[source]
        source: ProbeError,
    },

    #[error("failed to start ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffmpeg did not finish within {0:?}")]
    Timeout(Duration),

    #[error("ffmpeg exited with {status}: {stderr}")]
    EncoderFailed { status: String, stderr: String },

    #[error("ffmpeg reported success but produced no file at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
