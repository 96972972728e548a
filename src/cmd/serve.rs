use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use reelcast::{Config, ProgressBroadcaster, Server};

use super::build_coordinator;

pub async fn cmd_serve(config: Option<&Path>, bind: Option<&str>) -> Result<()> {
    let config = Config::load(config)?;
    let server_config = match bind {
        Some(addr) => config.server.clone().with_bind(addr),
        None => config.server.clone(),
    };

    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let coordinator = build_coordinator(&config, broadcaster)?;
    let server = Server::bind(server_config, coordinator).await?;

    info!(
        "reelcast {} serving on {} (videos in {})",
        reelcast::VERSION,
        server.local_addr()?,
        config.pipeline.output_dir.display()
    );

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
