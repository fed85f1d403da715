//! Network fetch task.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::transport::{Request, Transport};
use crate::core::context::TaskContext;
use crate::core::task::{Completion, Task, TaskError};

/// Value of a [`FetchTask`]: the response body or the failure.
pub type FetchResult = Result<Vec<u8>, TaskError>;

type FetchCallback = Arc<dyn Fn(&FetchResult) + Send + Sync>;

/// Sends a request through a [`Transport`] and stores the response body.
///
/// Cancelling the task while the request is in flight drops the transport
/// future, aborting the request, and records [`TaskError::Cancelled`].
pub struct FetchTask {
    name: String,
    transport: Arc<dyn Transport>,
    request: Request,
    on_complete: Option<FetchCallback>,
}

impl FetchTask {
    pub fn new(transport: Arc<dyn Transport>, request: Request) -> Self {
        Self {
            name: format!("fetch {}", request.url),
            transport,
            request,
            on_complete: None,
        }
    }

    /// Builder: override the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: callback invoked with the result unless the task was
    /// cancelled. The result is stored as the task value either way.
    pub fn on_complete(mut self, callback: impl Fn(&FetchResult) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}

#[async_trait]
impl Task for FetchTask {
    type Output = FetchResult;

    fn name(&self) -> &str {
        &self.name
    }

    fn completion(&self) -> Completion {
        Completion::Deferred
    }

    async fn execute(&self, ctx: &TaskContext<FetchResult>) {
        info!(
            url = %self.request.url,
            method = %self.request.method,
            headers = ?self.request.headers,
            body = %self.request.body_preview(),
            "sending request"
        );

        let transport = Arc::clone(&self.transport);
        let request = self.request.clone();
        let on_complete = self.on_complete.clone();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                result = transport.send(&request) => result,
                _ = ctx.cancelled() => Err(TaskError::Cancelled),
            };

            match &result {
                Ok(body) => info!(url = %request.url, bytes = body.len(), "response received"),
                Err(TaskError::Cancelled) => debug!(url = %request.url, "request cancelled"),
                Err(e) => warn!(url = %request.url, error = %e, "request failed"),
            }

            if !ctx.is_cancelled() {
                if let Some(callback) = &on_complete {
                    callback(&result);
                }
            }
            ctx.set_value(result);
            ctx.finish();
        });
    }
}
