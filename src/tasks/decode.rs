//! Response decode task.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

use super::fetch::FetchResult;
use super::transport::{Decode, JsonDecoder};
use crate::core::context::{TaskContext, Upstream};
use crate::core::operation::Node;
use crate::core::task::{Task, TaskError};

type DecodeCallback<T> = Box<dyn Fn(&Result<T, TaskError>) + Send + Sync>;

/// Decodes the body produced by an upstream fetch.
///
/// The fetch is declared as a dependency automatically. A fetch that failed,
/// was cancelled or produced nothing yields [`TaskError::MissingPredecessor`];
/// undecodable bytes yield [`TaskError::Decode`].
pub struct DecodeTask<T> {
    name: String,
    upstream: Upstream<FetchResult>,
    decoder: Arc<dyn Decode<T>>,
    on_complete: Option<DecodeCallback<T>>,
}

impl<T: DeserializeOwned + 'static> DecodeTask<T> {
    /// Decode the upstream body as JSON.
    pub fn new(upstream: Upstream<FetchResult>) -> Self {
        Self::with_decoder(upstream, Arc::new(JsonDecoder))
    }
}

impl<T> DecodeTask<T> {
    /// Decode the upstream body with a custom decoder.
    pub fn with_decoder(upstream: Upstream<FetchResult>, decoder: Arc<dyn Decode<T>>) -> Self {
        Self {
            name: format!("decode {}", upstream.name()),
            upstream,
            decoder,
            on_complete: None,
        }
    }

    /// Builder: override the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: callback invoked with every stored result.
    pub fn on_complete(
        mut self,
        callback: impl Fn(&Result<T, TaskError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    fn body(&self) -> Result<Vec<u8>, TaskError> {
        match self.upstream.finished_value()? {
            Ok(body) => Ok(body),
            Err(e) => Err(TaskError::MissingPredecessor(format!(
                "'{}' failed: {e}",
                self.upstream.name()
            ))),
        }
    }
}

#[async_trait]
impl<T> Task for DecodeTask<T>
where
    T: Debug + Clone + Send + Sync + 'static,
{
    type Output = Result<T, TaskError>;

    fn name(&self) -> &str {
        &self.name
    }

    fn predecessors(&self) -> Vec<Arc<dyn Node>> {
        vec![self.upstream.node()]
    }

    async fn execute(&self, ctx: &TaskContext<Result<T, TaskError>>) {
        let result = self.body().and_then(|body| {
            if ctx.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            self.decoder.decode(&body)
        });

        match &result {
            Ok(value) => debug!(task = %self.name, ?value, "decoded"),
            Err(TaskError::Cancelled) => {
                debug!(task = %self.name, "cancelled before decoding");
                return;
            }
            Err(e) => warn!(task = %self.name, error = %e, "decode failed"),
        }

        if let Some(callback) = &self.on_complete {
            callback(&result);
        }
        ctx.set_value(result);
    }
}
