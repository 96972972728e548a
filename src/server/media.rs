//! Serving finished videos under the media prefix.

use std::path::{Path, PathBuf};

use http::StatusCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use super::http::{response_head, write_response};

/// Map a request path to a file in `output_dir`.
///
/// Only `<prefix>/<uuid>.mp4` resolves; anything else (other names,
/// extensions, nested paths) is `None`.
#[must_use]
pub fn resolve(path: &str, prefix: &str, output_dir: &Path) -> Option<PathBuf> {
    let name = path.strip_prefix(prefix)?.strip_prefix('/')?;
    let stem = name.strip_suffix(".mp4")?;
    let id = Uuid::parse_str(stem).ok()?;
    // Re-render canonically so only hyphenated lowercase names exist on disk
    Some(output_dir.join(format!("{}.mp4", id.hyphenated())))
}

/// Stream `file` as `video/mp4`, or 404 if it does not exist.
pub async fn serve_file<S: AsyncWrite + Unpin>(stream: &mut S, file: Option<PathBuf>) -> std::io::Result<()> {
    let opened = match file {
        Some(path) => tokio::fs::File::open(&path).await.ok().map(|f| (path, f)),
        None => None,
    };

    let Some((path, mut file)) = opened else {
        return write_response(stream, StatusCode::NOT_FOUND, "text/plain", b"not found").await;
    };

    let length = file.metadata().await?.len();
    debug!("Serving {:?} ({} bytes)", path, length);
    let head = response_head(StatusCode::OK, &[("Content-Type", "video/mp4")], length);
    stream.write_all(head.as_bytes()).await?;
    tokio::io::copy(&mut file, stream).await?;
    stream.flush().await
}
