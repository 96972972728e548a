//! `reelcast` CLI - serve the pipeline or run it locally

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "reelcast")]
#[command(about = "Narrated vertical slideshows with live progress")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/reelcast/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WebSocket server
    Serve {
        /// Listen address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Render one request locally, printing progress
    Render {
        /// JSON file with `segments` and optional `voiceId`
        request: PathBuf,

        /// Voice to narrate with
        #[arg(long)]
        voice: Option<String>,

        /// Copy the finished video here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the timing plan for a request
    Plan {
        /// JSON file with `segments`
        request: PathBuf,
    },

    /// Check that ffmpeg and ffprobe can be run
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = cli.config.as_deref();

    match cli.command {
        Commands::Serve { bind } => {
            cmd::serve::cmd_serve(config, bind.as_deref()).await?;
        }
        Commands::Render {
            request,
            voice,
            output,
        } => {
            cmd::render::cmd_render(config, &request, voice.as_deref(), output.as_deref()).await?;
        }
        Commands::Plan { request } => {
            cmd::plan::cmd_plan(&request)?;
        }
        Commands::Check => {
            cmd::check::cmd_check(config).await?;
        }
    }

    Ok(())
}
