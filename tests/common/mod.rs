//! Shared fixtures: scripted provider, fixed-duration probe, fake encoders.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use reelcast::compose::{Compositor, CompositorConfig};
use reelcast::probe::{MediaProbe, ProbeError};
use reelcast::provider::{AssetProvider, AudioArtifact, ImageArtifact, ProviderError, Service};
use reelcast::{PipelineConfig, PipelineCoordinator, ProgressBroadcaster, ProgressEvent, Segment, VideoRequest};

/// Duration the fake probe reports for narration files.
pub const AUDIO_SECS: f64 = 30.0;
/// Duration the fake probe reports for encoded videos.
pub const VIDEO_SECS: f64 = 29.7;

/// Provider that writes placeholder files and records every call.
#[derive(Default)]
pub struct MockProvider {
    pub narration_status: Option<u16>,
    pub fail_image_at: Option<usize>,
    /// Image `i` takes `(n - i) * image_delay`, so later images finish first
    pub image_delay: Duration,
    pub calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockProvider {
    /// Narration requests fail with `status`.
    pub fn failing_narration(status: u16) -> Self {
        Self {
            narration_status: Some(status),
            ..Self::default()
        }
    }

    /// The image request for segment `index` fails with exhausted quota.
    pub fn failing_image_at(index: usize) -> Self {
        Self {
            fail_image_at: Some(index),
            ..Self::default()
        }
    }

    pub fn with_image_delay(delay: Duration) -> Self {
        Self {
            image_delay: delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn image_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("image:")).count()
    }
}

#[async_trait]
impl AssetProvider for MockProvider {
    async fn synthesize_narration(
        &self,
        text: &str,
        voice_id: &str,
        dest: &Path,
    ) -> Result<AudioArtifact, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("narration:{voice_id}:{text}"));

        if let Some(status) = self.narration_status {
            return Err(ProviderError::Status {
                service: Service::Narration,
                status,
                body: "upstream exploded".to_string(),
            });
        }

        tokio::fs::write(dest, b"ID3-fake-audio")
            .await
            .map_err(|source| ProviderError::Io {
                service: Service::Narration,
                source,
            })?;
        Ok(AudioArtifact {
            path: dest.to_path_buf(),
            bytes: 14,
        })
    }

    async fn synthesize_image(
        &self,
        prompt: &str,
        dest: &Path,
    ) -> Result<ImageArtifact, ProviderError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(format!("image:{prompt}"));
            calls.iter().filter(|c| c.starts_with("image:")).count() - 1
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.image_delay.is_zero() {
            let factor = 6u32.saturating_sub(index as u32);
            tokio::time::sleep(self.image_delay * factor).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_image_at == Some(index) {
            return Err(ProviderError::QuotaExhausted {
                service: Service::Image,
            });
        }

        tokio::fs::write(dest, b"PNG-fake-image")
            .await
            .map_err(|source| ProviderError::Io {
                service: Service::Image,
                source,
            })?;
        Ok(ImageArtifact {
            path: dest.to_path_buf(),
            bytes: 14,
        })
    }
}

/// Reports fixed durations by extension and counts calls.
#[derive(Default)]
pub struct FakeProbe {
    pub probed: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
        self.probed.lock().unwrap().push(path.to_path_buf());
        match path.extension().and_then(|e| e.to_str()) {
            Some("mp3") => Ok(AUDIO_SECS),
            Some("mp4") if path.exists() => Ok(VIDEO_SECS),
            _ => Err(ProbeError::MissingDuration(path.display().to_string())),
        }
    }
}

/// Which fake encoder to install.
#[derive(Debug, Clone, Copy)]
pub enum Encoder {
    /// Reports progress, writes the output, exits 0
    Succeeds,
    /// Writes partial output then hangs
    Hangs,
    /// Complains on stderr and exits 1
    Fails,
}

/// Write an executable shell script standing in for ffmpeg. The script
/// records its arguments in `<dir>/ffmpeg-args.txt`.
pub fn fake_ffmpeg(dir: &Path, encoder: Encoder) -> PathBuf {
    let args_file = dir.join("ffmpeg-args.txt");
    let body = match encoder {
        Encoder::Succeeds => {
            "printf 'out_time=00:00:10.000000\\nprogress=continue\\n'\n\
             printf 'out_time=00:00:29.000000\\nprogress=end\\n'\n\
             printf 'fakevideo' > \"$last\"\n"
        }
        Encoder::Hangs => "printf 'partial' > \"$last\"\nexec sleep 30\n",
        Encoder::Fails => "echo 'Error: invalid filtergraph' >&2\nexit 1\n",
    };
    let script = format!(
        "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\nfor last; do :; done\n{body}",
        args_file.display()
    );

    let path = dir.join(format!("ffmpeg-{encoder:?}.sh").to_lowercase());
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Arguments the fake encoder was last called with.
pub fn recorded_args(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("ffmpeg-args.txt"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Coordinator wired to mocks inside a temp directory.
pub struct Harness {
    pub root: TempDir,
    pub provider: Arc<MockProvider>,
    pub probe: Arc<FakeProbe>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub coordinator: PipelineCoordinator,
}

impl Harness {
    pub fn new(provider: MockProvider, encoder: Encoder) -> Self {
        Self::with_options(provider, encoder, 1, Duration::from_secs(20))
    }

    pub fn with_options(
        provider: MockProvider,
        encoder: Encoder,
        image_concurrency: usize,
        encode_timeout: Duration,
    ) -> Self {
        let root = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(root.path(), encoder);

        let provider = Arc::new(provider);
        let probe = Arc::new(FakeProbe::default());
        let broadcaster = Arc::new(ProgressBroadcaster::new());

        let compositor_config = CompositorConfig::default()
            .with_ffmpeg_path(&ffmpeg.to_string_lossy())
            .with_encode_timeout(encode_timeout);
        let compositor = Compositor::with_probe(compositor_config, probe.clone());

        let pipeline_config = PipelineConfig::default()
            .with_temp_dir(&root.path().join("tmp"))
            .with_output_dir(&root.path().join("videos"))
            .with_image_concurrency(image_concurrency);

        let coordinator = PipelineCoordinator::new(
            pipeline_config,
            provider.clone(),
            Arc::new(compositor),
            broadcaster.clone(),
        );

        Self {
            root,
            provider,
            probe,
            broadcaster,
            coordinator,
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.path().join("tmp")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.path().join("videos")
    }

    /// Files left in the run temp directory.
    pub fn leftover_temp_files(&self) -> Vec<PathBuf> {
        list_files(&self.temp_dir())
    }

    pub fn published_videos(&self) -> Vec<PathBuf> {
        list_files(&self.output_dir())
    }
}

pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
        .unwrap_or_default()
}

pub fn request(n: usize) -> VideoRequest {
    VideoRequest::new(
        (0..n)
            .map(|i| {
                Segment::new(
                    format!("scene {i}: a quiet harbour at dawn"),
                    format!("Segment {i} tells a short part of the story with a few words."),
                )
            })
            .collect(),
    )
}

/// Collect events until the terminal one, failing after `limit`.
pub async fn collect_until_terminal(
    rx: &mut UnboundedReceiver<ProgressEvent>,
    limit: Duration,
) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(limit, async {
        while let Some(event) = rx.recv().await {
            let done = event.is_terminal();
            events.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("run did not reach a terminal event in time");
    events
}
