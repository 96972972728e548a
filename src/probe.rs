//! Media duration probing via ffprobe.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("ffprobe timed out after {0:?}")]
    Timeout(Duration),

    #[error("ffprobe failed on {path}: {stderr}")]
    Failed { path: String, stderr: String },

    #[error("ffprobe output unreadable: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no usable duration reported for {0}")]
    MissingDuration(String),
}

/// Measures the real duration of an encoded media file.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn duration(&self, path: &Path) -> Result<f64, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// [`MediaProbe`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    ffprobe_path: String,
    timeout: Duration,
}

impl Ffprobe {
    /// Locate ffprobe in PATH.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ffprobe_path: which::which("ffprobe").map_or_else(
                |_| "ffprobe".to_string(),
                |p| p.to_string_lossy().to_string(),
            ),
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: &str) -> Self {
        self.ffprobe_path = path.to_string();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if ffprobe is available
    pub async fn check_available(&self) -> bool {
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Default for Ffprobe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProbe for Ffprobe {
    async fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
        let shown = path.to_string_lossy().to_string();
        let run = Command::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: shown,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let duration = parse_duration(&output.stdout)?
            .ok_or_else(|| ProbeError::MissingDuration(shown.clone()))?;
        debug!("Probed {}: {:.3}s", shown, duration);
        Ok(duration)
    }
}

/// Pull `format.duration` out of ffprobe JSON. `None` if absent or not positive.
fn parse_duration(json: &[u8]) -> Result<Option<f64>, ProbeError> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;
    Ok(probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0))
}
