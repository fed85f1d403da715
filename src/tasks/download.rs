//! File download task.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::{Downloader, Request};
use crate::core::context::TaskContext;
use crate::core::task::{Completion, Task, TaskError};

/// Value of a [`DownloadTask`]: the destination path or the failure.
pub type DownloadResult = Result<PathBuf, TaskError>;

/// Downloads a request to a temporary file and moves it to `destination`.
///
/// An existing file at the destination is replaced atomically. A failed move
/// after a successful transfer is reported as [`TaskError::Filesystem`].
pub struct DownloadTask {
    name: String,
    downloader: Arc<dyn Downloader>,
    request: Request,
    destination: PathBuf,
}

impl DownloadTask {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        request: Request,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: format!("download {}", request.url),
            downloader,
            request,
            destination: destination.into(),
        }
    }

    /// Download a plain `GET` of `url`.
    pub fn from_url(
        downloader: Arc<dyn Downloader>,
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self::new(downloader, Request::get(url), destination)
    }

    /// Builder: override the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

#[async_trait]
impl Task for DownloadTask {
    type Output = DownloadResult;

    fn name(&self) -> &str {
        &self.name
    }

    fn completion(&self) -> Completion {
        Completion::Deferred
    }

    async fn execute(&self, ctx: &TaskContext<DownloadResult>) {
        debug!(
            url = %self.request.url,
            destination = %self.destination.display(),
            "starting download"
        );

        let downloader = Arc::clone(&self.downloader);
        let request = self.request.clone();
        let destination = self.destination.clone();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let downloaded = tokio::select! {
                result = downloader.download(&request) => result,
                _ = ctx.cancelled() => Err(TaskError::Cancelled),
            };

            let result = match downloaded {
                Ok(temp) if ctx.is_cancelled() => {
                    let _ = tokio::fs::remove_file(&temp).await;
                    Err(TaskError::Cancelled)
                }
                Ok(temp) => move_into_place(&temp, &destination).await,
                Err(e) => Err(e),
            };

            match &result {
                Ok(path) => info!(url = %request.url, path = %path.display(), "download complete"),
                Err(TaskError::Cancelled) => debug!(url = %request.url, "download cancelled"),
                Err(e) => warn!(url = %request.url, error = %e, "download failed"),
            }

            ctx.set_value(result);
            ctx.finish();
        });
    }
}

/// Move `temp` to `destination`, replacing any existing file.
///
/// Falls back to copy-then-rename through a sibling staging file when the
/// two paths are on different filesystems.
pub(crate) async fn move_into_place(temp: &Path, destination: &Path) -> DownloadResult {
    match tokio::fs::rename(temp, destination).await {
        Ok(()) => Ok(destination.to_path_buf()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                from = %temp.display(),
                to = %destination.display(),
                "cross-device move, copying"
            );
            let staging = staging_path(destination);
            let copied = async {
                tokio::fs::copy(temp, &staging).await?;
                tokio::fs::rename(&staging, destination).await
            }
            .await;
            let _ = tokio::fs::remove_file(temp).await;
            match copied {
                Ok(()) => Ok(destination.to_path_buf()),
                Err(e) => {
                    let _ = tokio::fs::remove_file(&staging).await;
                    Err(TaskError::filesystem(destination, &e))
                }
            }
        }
        Err(e) => {
            warn!(
                from = %temp.display(),
                to = %destination.display(),
                error = %e,
                "could not move download into place"
            );
            Err(TaskError::filesystem(destination, &e))
        }
    }
}

fn staging_path(destination: &Path) -> PathBuf {
    let file_name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    destination.with_file_name(format!(".{file_name}.{}.part", Uuid::new_v4()))
}
