//! Streaming file write task.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::core::context::TaskContext;
use crate::core::task::{Completion, Task, TaskError};

/// Default bound on bytes in flight per chunk.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1024 * 1024;

/// Value of a [`WriteTask`]: the destination path or the failure.
pub type WriteResult = Result<PathBuf, TaskError>;

/// What a [`WriteTask`] writes.
pub enum WriteContent {
    /// Bytes already in memory.
    Bytes(Vec<u8>),
    /// Contents of another file.
    File(PathBuf),
    /// Contents of several files, concatenated in order.
    Files(Vec<PathBuf>),
    /// Any async byte source.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

type Reader = Box<dyn AsyncRead + Send + Unpin>;

impl WriteContent {
    /// Open every source, labelled for error reporting.
    ///
    /// Files are all opened before anything is written, so an unreadable file
    /// leaves the destination untouched.
    async fn open(self) -> Result<Vec<(PathBuf, Reader)>, TaskError> {
        let paths = match self {
            WriteContent::Bytes(bytes) => {
                let reader: Reader = Box::new(io::Cursor::new(bytes));
                return Ok(vec![(PathBuf::from("<memory>"), reader)]);
            }
            WriteContent::Stream(stream) => return Ok(vec![(PathBuf::from("<stream>"), stream)]),
            WriteContent::File(path) => vec![path],
            WriteContent::Files(paths) => paths,
        };

        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            match File::open(&path).await {
                Ok(file) => readers.push((path, Box::new(file) as Reader)),
                Err(e) => return Err(unreadable(&path, &e)),
            }
        }
        Ok(readers)
    }
}

fn unreadable(path: &Path, e: &io::Error) -> TaskError {
    TaskError::SourceUnreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

impl fmt::Debug for WriteContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteContent::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            WriteContent::File(path) => f.debug_tuple("File").field(path).finish(),
            WriteContent::Files(paths) => f.debug_tuple("Files").field(paths).finish(),
            WriteContent::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Vec<u8>> for WriteContent {
    fn from(bytes: Vec<u8>) -> Self {
        WriteContent::Bytes(bytes)
    }
}

/// Appends content to a destination file in bounded chunks.
///
/// The destination is created if needed and always opened for appending.
/// Each chunk is at most `high_water_mark` bytes and is flushed before the
/// next one is read, so cancellation leaves at most a prefix of the content
/// behind.
pub struct WriteTask {
    name: String,
    content: Mutex<Option<WriteContent>>,
    destination: PathBuf,
    high_water_mark: usize,
}

impl WriteTask {
    pub fn new(content: WriteContent, destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        Self {
            name: format!("write {}", destination.display()),
            content: Mutex::new(Some(content)),
            destination,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }

    /// Builder: bound the chunk size. Values below one byte are raised to one.
    pub fn with_high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes.max(1);
        self
    }

    /// Builder: override the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }
}

#[async_trait]
impl Task for WriteTask {
    type Output = WriteResult;

    fn name(&self) -> &str {
        &self.name
    }

    fn completion(&self) -> Completion {
        Completion::Deferred
    }

    async fn execute(&self, ctx: &TaskContext<WriteResult>) {
        let content = self
            .content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(content) = content else {
            warn!(task = %self.name, "write content already consumed");
            ctx.finish();
            return;
        };

        let destination = self.destination.clone();
        let high_water_mark = self.high_water_mark;
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let result = stream_to_file(content, &destination, high_water_mark, &ctx).await;
            match &result {
                Ok(path) => info!(path = %path.display(), "done writing"),
                Err(TaskError::Cancelled) => {
                    info!(path = %destination.display(), "write cancelled")
                }
                Err(e) => warn!(path = %destination.display(), error = %e, "write failed"),
            }
            ctx.set_value(result);
            ctx.finish();
        });
    }
}

async fn open_destination(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).append(true).create(true);
    #[cfg(unix)]
    options.mode(0o644);
    options.open(path).await
}

async fn stream_to_file(
    content: WriteContent,
    destination: &Path,
    high_water_mark: usize,
    ctx: &TaskContext<WriteResult>,
) -> WriteResult {
    let sources = content.open().await?;

    if ctx.is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    let mut file = open_destination(destination)
        .await
        .map_err(|e| TaskError::write_failed(&e))?;

    let mut chunk = vec![0u8; high_water_mark];
    let mut written: u64 = 0;
    for (source, mut reader) in sources {
        loop {
            let read = tokio::select! {
                read = reader.read(&mut chunk) => read.map_err(|e| unreadable(&source, &e))?,
                _ = ctx.cancelled() => return Err(TaskError::Cancelled),
            };
            if read == 0 {
                break;
            }

            tokio::select! {
                result = async {
                    file.write_all(&chunk[..read]).await?;
                    file.flush().await
                } => result.map_err(|e| TaskError::write_failed(&e))?,
                _ = ctx.cancelled() => return Err(TaskError::Cancelled),
            }
            written += read as u64;
            debug!(
                path = %destination.display(),
                source = %source.display(),
                written,
                "chunk written"
            );

            if ctx.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
        }
    }

    file.sync_all().await.map_err(|e| TaskError::write_failed(&e))?;
    Ok(destination.to_path_buf())
}
