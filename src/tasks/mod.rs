//! Typed work tasks.
//!
//! Each task adapts one external capability to the [`Task`](crate::core::task::Task)
//! contract and stores its outcome as a `Result` value:
//!
//! - [`FetchTask`]: sends a request through a [`Transport`]
//! - [`DecodeTask`]: decodes an upstream fetch body
//! - [`DownloadTask`]: downloads through a [`Downloader`] and moves the file into place
//! - [`WriteTask`]: appends content to a file in bounded chunks

mod decode;
mod download;
mod fetch;
mod transport;
mod write;

pub use decode::DecodeTask;
pub use download::{DownloadResult, DownloadTask};
pub use fetch::{FetchResult, FetchTask};
pub use transport::{Decode, Downloader, JsonDecoder, Method, Request, Transport};
pub use write::{DEFAULT_HIGH_WATER_MARK, WriteContent, WriteResult, WriteTask};
