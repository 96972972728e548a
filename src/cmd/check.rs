use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use reelcast::{Compositor, Config, Ffprobe};

pub async fn cmd_check(config: Option<&Path>) -> Result<()> {
    let config = Config::load(config)?;

    let compositor = Compositor::new(config.compositor.clone());
    let probe = Ffprobe::new()
        .with_path(&config.compositor.ffprobe_path)
        .with_timeout(Duration::from_secs(config.compositor.probe_timeout_secs));

    let ffmpeg_ok = compositor.check_available().await;
    let ffprobe_ok = probe.check_available().await;

    println!("{} ffmpeg  ({})", mark(ffmpeg_ok), config.compositor.ffmpeg_path);
    println!("{} ffprobe ({})", mark(ffprobe_ok), config.compositor.ffprobe_path);

    if !(ffmpeg_ok && ffprobe_ok) {
        anyhow::bail!("ffmpeg and ffprobe are required to render videos");
    }
    Ok(())
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "✅"
    } else {
        "❌"
    }
}
