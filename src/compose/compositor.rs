//! ffmpeg-based slideshow compositor
//!
//! Turns ordered stills + one narration track into a vertical H.264/AAC
//! video with crossfades:
//! - probes the narration and reconciles the timing plan against it
//! - builds the filter graph and encoder arguments
//! - supervises ffmpeg under a wall-clock timeout, reporting progress
//! - probes the encoded file for its authoritative duration

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, info, warn};

use super::graph::{Canvas, FilterGraph, OUTPUT_LABEL};
use super::reconcile::reconcile;
use super::ComposeError;
use crate::probe::{Ffprobe, MediaProbe};
use crate::provider::{AudioArtifact, ImageArtifact};
use crate::timing::{TimingPlan, CROSSFADE_SECS};

/// Progress range covered while ffmpeg is encoding.
const ENCODE_START_PERCENT: f64 = 30.0;
const ENCODE_END_PERCENT: f64 = 95.0;
/// Reported once the output has been probed.
const MEASURED_PERCENT: u8 = 99;
/// Encoder stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Configuration for the compositor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Overlap between consecutive segments (seconds)
    pub crossfade_secs: f64,
    /// Zoom reached by the end of each segment (0.05 = 5%)
    pub zoom: f64,
    /// Hard wall-clock bound on one encode
    pub encode_timeout_secs: u64,
    /// Bound on each ffprobe call
    pub probe_timeout_secs: u64,
    pub video_codec: String,
    /// x264/x265 preset
    pub preset: String,
    /// x264/x265 constant rate factor
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: which::which("ffmpeg").map_or_else(
                |_| "ffmpeg".to_string(),
                |p| p.to_string_lossy().to_string(),
            ),
            ffprobe_path: which::which("ffprobe").map_or_else(
                |_| "ffprobe".to_string(),
                |p| p.to_string_lossy().to_string(),
            ),
            width: 1080,
            height: 1920,
            fps: 30,
            crossfade_secs: CROSSFADE_SECS,
            zoom: 0.05,
            encode_timeout_secs: 120,
            probe_timeout_secs: 30,
            video_codec: "libx264".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
        }
    }
}

impl CompositorConfig {
    #[must_use]
    pub fn with_ffmpeg_path(mut self, path: &str) -> Self {
        self.ffmpeg_path = path.to_string();
        self
    }

    #[must_use]
    pub fn with_encode_timeout(mut self, timeout: Duration) -> Self {
        self.encode_timeout_secs = timeout.as_secs().max(1);
        self
    }

    #[must_use]
    pub fn canvas(&self) -> Canvas {
        Canvas {
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }

    #[must_use]
    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_secs)
    }

    fn uses_software_x26x(&self) -> bool {
        self.video_codec.starts_with("libx26")
    }
}

/// Progress report from a running composition.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeProgress {
    /// Overall pipeline percentage (30-99)
    pub percent: u8,
    pub message: String,
}

/// Finished video.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub video_path: PathBuf,
    /// Duration probed from the encoded file
    pub measured_duration_secs: f64,
    /// Duration probed from the narration
    pub audio_duration_secs: f64,
    /// Plan actually encoded (possibly rescaled)
    pub final_timings: TimingPlan,
    pub transitions: usize,
}

/// ffmpeg-based slideshow compositor
pub struct Compositor {
    config: CompositorConfig,
    probe: Arc<dyn MediaProbe>,
}

impl Compositor {
    /// Compositor probing with ffprobe from `config`
    #[must_use]
    pub fn new(config: CompositorConfig) -> Self {
        let probe = Ffprobe::new()
            .with_path(&config.ffprobe_path)
            .with_timeout(Duration::from_secs(config.probe_timeout_secs));
        Self {
            config,
            probe: Arc::new(probe),
        }
    }

    /// Compositor with a custom probe
    #[must_use]
    pub fn with_probe(config: CompositorConfig, probe: Arc<dyn MediaProbe>) -> Self {
        Self { config, probe }
    }

    #[must_use]
    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Check if ffmpeg is available
    pub async fn check_available(&self) -> bool {
        Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Build ffmpeg arguments
    fn build_args(
        &self,
        images: &[ImageArtifact],
        audio: &AudioArtifact,
        plan: &TimingPlan,
        graph: &FilterGraph,
        output: &Path,
    ) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "warning",
            "-nostats",
            "-progress",
            "pipe:1",
        ]
        .iter()
        .map(std::string::ToString::to_string)
        .collect();

        // One looped still per segment
        for (image, duration) in images.iter().zip(plan.as_slice()) {
            args.extend([
                "-loop".to_string(),
                "1".to_string(),
                "-framerate".to_string(),
                self.config.fps.to_string(),
                "-t".to_string(),
                format!("{duration:.3}"),
                "-i".to_string(),
                image.path.to_string_lossy().to_string(),
            ]);
        }

        args.push("-i".to_string());
        args.push(audio.path.to_string_lossy().to_string());

        args.push("-filter_complex".to_string());
        args.push(graph.to_filter_complex());

        args.extend([
            "-map".to_string(),
            format!("[{OUTPUT_LABEL}]"),
            "-map".to_string(),
            format!("{}:a", images.len()),
        ]);

        args.push("-c:v".to_string());
        args.push(self.config.video_codec.clone());
        if self.config.uses_software_x26x() {
            args.push("-preset".to_string());
            args.push(self.config.preset.clone());
            args.push("-crf".to_string());
            args.push(self.config.crf.to_string());
        }
        args.extend([
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-r".to_string(),
            self.config.fps.to_string(),
            "-c:a".to_string(),
            self.config.audio_codec.clone(),
            "-b:a".to_string(),
            self.config.audio_bitrate.clone(),
            // Output length follows the shorter of picture and narration
            "-shortest".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-y".to_string(),
        ]);
        args.push(output.to_string_lossy().to_string());

        args
    }

    /// Compose `images` over `audio` into `output`.
    ///
    /// `on_progress` receives overall pipeline percentages: 30-95 while
    /// encoding, 99 once the result has been measured.
    pub async fn compose(
        &self,
        images: &[ImageArtifact],
        audio: &AudioArtifact,
        timings: &TimingPlan,
        output: &Path,
        on_progress: &(dyn Fn(ComposeProgress) + Send + Sync),
    ) -> Result<Composition, ComposeError> {
        if images.is_empty() {
            return Err(ComposeError::Empty);
        }
        if images.len() != timings.len() {
            return Err(ComposeError::Mismatch {
                images: images.len(),
                timings: timings.len(),
            });
        }

        let crossfade = self.config.crossfade_secs;
        let audio_duration = self
            .probe
            .duration(&audio.path)
            .await
            .map_err(|source| ComposeError::Probe {
                what: "narration",
                source,
            })?;

        let reconciled = reconcile(timings, audio_duration, crossfade);
        if reconciled.rescaled {
            info!(
                "Rescaled timings to {:.2}s to match {:.2}s narration",
                reconciled.target_duration, audio_duration
            );
        }

        let plan = reconciled.plan;
        let graph = FilterGraph::build(&plan, self.config.canvas(), crossfade, self.config.zoom);
        let args = self.build_args(images, audio, &plan, &graph, output);
        debug!("ffmpeg args: {:?}", args);

        // -shortest stops at whichever track ends first
        let expected = plan.displayed_duration(crossfade).min(audio_duration);
        self.encode(&args, output, expected, on_progress).await?;

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(ComposeError::MissingOutput(output.to_path_buf()));
        }

        on_progress(ComposeProgress {
            percent: ENCODE_END_PERCENT as u8,
            message: "Measuring encoded video".to_string(),
        });
        let measured = match self.probe.duration(output).await {
            Ok(d) => d,
            Err(source) => {
                remove_partial(output).await;
                return Err(ComposeError::Probe {
                    what: "encoded video",
                    source,
                });
            }
        };
        on_progress(ComposeProgress {
            percent: MEASURED_PERCENT,
            message: format!("Video encoded ({measured:.1}s)"),
        });

        info!(
            "Composited {} segments into {:?} ({:.2}s)",
            images.len(),
            output,
            measured
        );

        Ok(Composition {
            video_path: output.to_path_buf(),
            measured_duration_secs: measured,
            audio_duration_secs: audio_duration,
            transitions: graph.transitions.len(),
            final_timings: plan,
        })
    }

    /// Run ffmpeg under the encode timeout, killing it and removing partial
    /// output on timeout or failure.
    async fn encode(
        &self,
        args: &[String],
        output: &Path,
        expected_secs: f64,
        on_progress: &(dyn Fn(ComposeProgress) + Send + Sync),
    ) -> Result<(), ComposeError> {
        let timeout = self.config.encode_timeout();

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ComposeError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ComposeError::Spawn(std::io::Error::other("failed to capture ffmpeg stdout"))
        })?;
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(collect_stderr(s)));

        let supervised = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut last_percent = None;

            while let Some(line) = lines.next_line().await? {
                let Some(encoded) = parse_progress_time(&line) else {
                    continue;
                };
                let percent = encode_percent(encoded, expected_secs);
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    on_progress(ComposeProgress {
                        percent,
                        message: format!("Encoding video ({encoded:.1}s / {expected_secs:.1}s)"),
                    });
                }
            }

            child.wait().await
        };

        let outcome = tokio::time::timeout(timeout, supervised).await;

        let status = match outcome {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                remove_partial(output).await;
                return Err(ComposeError::Io(e));
            }
            Err(_) => {
                warn!("ffmpeg exceeded {:?}, killing encoder", timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill ffmpeg: {}", e);
                }
                if let Some(task) = stderr_task {
                    task.abort();
                }
                remove_partial(output).await;
                return Err(ComposeError::Timeout(timeout));
            }
        };

        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            remove_partial(output).await;
            return Err(ComposeError::EncoderFailed {
                status: status.to_string(),
                stderr: stderr_tail,
            });
        }

        Ok(())
    }
}

/// Log ffmpeg stderr and keep its last lines.
async fn collect_stderr(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        if line.contains("Error") || line.contains("Warning") {
            warn!("ffmpeg: {}", line);
        } else {
            debug!("ffmpeg: {}", line);
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

/// Best-effort removal of an encoder output that must not survive.
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {:?}: {}", path, e),
    }
}

/// Parse encoded time from an ffmpeg progress or stats line.
///
/// Accepts `-progress` output (`out_time=00:00:12.345678`) as well as
/// classic stats lines (`... time=00:01:23.45 bitrate=...`).
fn parse_progress_time(line: &str) -> Option<f64> {
    if !line.contains("time=") {
        return None;
    }

    let time = line.split("time=").nth(1)?.split_whitespace().next()?;

    // Parse time (HH:MM:SS.ms)
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    let total = hours * 3600.0 + minutes * 60.0 + seconds;

    // ffmpeg reports a large negative out_time before the first frame
    (total >= 0.0).then_some(total)
}

/// Map encoded seconds onto the 30-95% encode range.
fn encode_percent(encoded_secs: f64, expected_secs: f64) -> u8 {
    let fraction = if expected_secs > 0.0 {
        (encoded_secs / expected_secs).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (ENCODE_START_PERCENT + fraction * (ENCODE_END_PERCENT - ENCODE_START_PERCENT)).round() as u8
}
