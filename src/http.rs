//! `reqwest` backed [`Transport`] and [`Downloader`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::core::task::TaskError;
use crate::tasks::{Downloader, Method, Request, Transport};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client shared by every task that is handed a clone of it.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    download_dir: PathBuf,
}

impl HttpTransport {
    /// Client with the default timeout, downloading into the system temp dir.
    pub fn new() -> Result<Self, TaskError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!("tessera/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TaskError::Transport(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            download_dir: std::env::temp_dir(),
        }
    }

    /// Builder: directory for in-progress downloads.
    ///
    /// Choosing one on the same filesystem as the final destinations keeps
    /// the final move a plain rename.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
        }
    }

    async fn response(&self, request: &Request) -> Result<reqwest::Response, TaskError> {
        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TaskError::Transport(e.to_string()))?;
        debug!(url = %request.url, status = %response.status(), "response headers received");

        response
            .error_for_status()
            .map_err(|e| TaskError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request) -> Result<Vec<u8>, TaskError> {
        let response = self.response(request).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| TaskError::Transport(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Downloader for HttpTransport {
    async fn download(&self, request: &Request) -> Result<PathBuf, TaskError> {
        let mut response = self.response(request).await?;

        let path = self.download_dir.join(format!("tessera-{}.download", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| TaskError::filesystem(&path, &e))?;

        let copied = async {
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| TaskError::Transport(e.to_string()))?
            {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| TaskError::filesystem(&path, &e))?;
            }
            file.flush()
                .await
                .map_err(|e| TaskError::filesystem(&path, &e))
        }
        .await;

        if let Err(e) = copied {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
        Ok(path)
    }
}
