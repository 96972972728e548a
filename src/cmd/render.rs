use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use reelcast::{Config, ProgressBroadcaster, SessionId};

use super::{build_coordinator, read_request};

pub async fn cmd_render(
    config: Option<&Path>,
    request: &Path,
    voice: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let config = Config::load(config)?;
    let mut request = read_request(request)?;
    if let Some(voice) = voice {
        request = request.with_voice(voice);
    }
    request.validate()?;

    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let coordinator = build_coordinator(&config, broadcaster.clone())?;

    let session = SessionId::new();
    let (subscriber, mut events) = broadcaster.connect();
    broadcaster.subscribe(session, &subscriber)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            eprintln!("[{:>3}%] {:<19} {}", event.progress, event.step, event.message);
            if event.is_terminal() {
                break;
            }
        }
    });

    let result = coordinator.run(session, request).await;
    drop(subscriber);
    let _ = printer.await;

    let outcome = result.map_err(|e| anyhow::anyhow!("{} ({})", e.chain(), e.code()))?;

    println!("🎞️  {}", outcome.video_path.display());
    println!(
        "⏱️  {:.1}s, timings {:?}",
        outcome.payload.duration_seconds,
        outcome.payload.timings.as_slice()
    );

    if let Some(dest) = output {
        tokio::fs::copy(&outcome.video_path, dest)
            .await
            .with_context(|| format!("failed to copy video to {}", dest.display()))?;
        println!("💾 Saved to {}", dest.display());
    }

    Ok(())
}
