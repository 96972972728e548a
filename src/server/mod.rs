//! Network transport: submission, progress channel and media serving on
//! one TCP listener.

pub mod api;
pub mod http;
pub mod media;
pub mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ::http::{Method, StatusCode};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::pipeline::PipelineCoordinator;

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// WebSocket progress channel path
    pub ws_path: String,
    /// Submission endpoint path
    pub submit_path: String,
    /// URL prefix finished videos are served under
    pub media_prefix: String,
    /// Largest accepted submission body
    pub max_request_bytes: usize,
    /// Time a client gets to send its request head
    pub head_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            ws_path: "/ws".to_string(),
            submit_path: "/api/videos".to_string(),
            media_prefix: "/media/videos".to_string(),
            max_request_bytes: 64 * 1024,
            head_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn with_bind(mut self, bind: &str) -> Self {
        self.bind = bind.to_string();
        self
    }

    #[must_use]
    pub fn with_head_timeout(mut self, timeout: Duration) -> Self {
        self.head_timeout_secs = timeout.as_secs().max(1);
        self
    }

    #[must_use]
    pub fn head_timeout(&self) -> Duration {
        Duration::from_secs(self.head_timeout_secs)
    }
}

/// Listener plus everything a connection needs.
pub struct Server {
    config: ServerConfig,
    coordinator: PipelineCoordinator,
    listener: TcpListener,
    media_dir: PathBuf,
}

impl Server {
    /// Bind the listener.
    pub async fn bind(config: ServerConfig, coordinator: PipelineCoordinator) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("failed to bind {}", config.bind))?;
        let media_dir = coordinator.config().output_dir.clone();
        Ok(Self {
            config,
            coordinator,
            listener,
            media_dir,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> Result<()> {
        info!("Listening on {}", self.local_addr()?);
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };
            let config = self.config.clone();
            let coordinator = self.coordinator.clone();
            let media_dir = self.media_dir.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &config, coordinator, &media_dir).await {
                    debug!("Connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

/// Route one connection by its request head.
async fn handle_connection(
    mut stream: TcpStream,
    config: &ServerConfig,
    coordinator: PipelineCoordinator,
    media_dir: &std::path::Path,
) -> Result<()> {
    let read = tokio::time::timeout(config.head_timeout(), http::read_head(&mut stream)).await;
    let Ok(head) = read else {
        debug!("No request head within {:?}, closing", config.head_timeout());
        http::write_response(&mut stream, StatusCode::REQUEST_TIMEOUT, "text/plain", b"request timeout")
            .await?;
        return Ok(());
    };
    let head = match head {
        Ok(head) => head,
        Err(http::HttpError::Closed) => return Ok(()),
        Err(e @ (http::HttpError::Malformed(_) | http::HttpError::HeadTooLarge)) => {
            let message = e.to_string();
            http::write_response(&mut stream, StatusCode::BAD_REQUEST, "text/plain", message.as_bytes())
                .await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let method = head.request.method().clone();
    let path = head.request.uri().path().to_string();
    debug!("{} {}", method, path);

    if path == config.ws_path && head.is_websocket_upgrade() {
        if let Some(ws) = ws::accept(stream, head).await? {
            ws::serve_connection(ws, coordinator).await;
        }
        return Ok(());
    }

    if path == config.submit_path {
        if method != Method::POST {
            http::write_response(&mut stream, StatusCode::METHOD_NOT_ALLOWED, "text/plain", b"use POST")
                .await?;
            return Ok(());
        }
        api::handle_submit(&mut stream, head, config.max_request_bytes, &coordinator).await?;
        return Ok(());
    }

    if method == Method::GET {
        let file = media::resolve(&path, &config.media_prefix, media_dir);
        media::serve_file(&mut stream, file).await?;
        return Ok(());
    }

    http::write_response(&mut stream, StatusCode::NOT_FOUND, "text/plain", b"not found").await?;
    Ok(())
}
