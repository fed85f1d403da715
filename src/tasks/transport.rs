//! Capabilities the typed tasks call out to.
//!
//! Tasks hold these as `Arc<dyn ...>` handed in at construction; their
//! lifetime is owned by the caller.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::core::task::TaskError;

/// HTTP method of a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl Method {
    /// Upper-case method token.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A network request description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// Request with an explicit method.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Builder: add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builder: set the body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Body rendered for logs: UTF-8 text when possible, otherwise a length.
    pub fn body_preview(&self) -> String {
        match &self.body {
            None => "no body".to_string(),
            Some(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => format!("{} bytes", bytes.len()),
            },
        }
    }
}

/// Sends a request and returns the response body.
///
/// Implementations abort the request when the returned future is dropped.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Vec<u8>, TaskError>;
}

/// Downloads a request's response body into a temporary file.
///
/// The returned path is owned by the caller, who moves it into place.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, request: &Request) -> Result<PathBuf, TaskError>;
}

/// Turns raw bytes into a typed value.
pub trait Decode<T>: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<T, TaskError>;
}

/// [`Decode`] implementation backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl<T: DeserializeOwned> Decode<T> for JsonDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<T, TaskError> {
        serde_json::from_slice(bytes).map_err(|e| TaskError::Decode(e.to_string()))
    }
}
