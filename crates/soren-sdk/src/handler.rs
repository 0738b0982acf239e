//! User-supplied message handlers.
//!
//! A handler receives the inbound [`Message`] and produces an optional
//! [`Reply`]. Synchronous closures and async closures are both accepted and
//! awaited the same way by the dispatcher.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::transport::Message;

/// Error a handler may fail with. Reported at the dispatch boundary, never retried.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `Ok(None)` means the handler produced nothing and no reply is sent.
pub type HandlerResult = Result<Option<Reply>, HandlerError>;

/// Handler output sent back to the requester.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Structured value, encoded as JSON.
    Json(Value),
    /// Plain text, sent as-is.
    Text(String),
}

impl Reply {
    pub fn json(value: impl Into<Value>) -> Self {
        Self::Json(value.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn into_bytes(self) -> Result<Bytes, serde_json::Error> {
        match self {
            Self::Json(value) => Ok(serde_json::to_vec(&value)?.into()),
            Self::Text(text) => Ok(text.into()),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> HandlerResult;
}

pub type SharedHandler = Arc<dyn MessageHandler>;

impl std::fmt::Debug for dyn MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageHandler")
    }
}

struct SyncFn<F>(F);

#[async_trait]
impl<F> MessageHandler for SyncFn<F>
where
    F: Fn(Message) -> HandlerResult + Send + Sync + 'static,
{
    async fn handle(&self, message: Message) -> HandlerResult {
        (self.0)(message)
    }
}

struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for AsyncFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, message: Message) -> HandlerResult {
        (self.0)(message).await
    }
}

/// Wrap a synchronous closure.
pub fn handler_fn<F>(f: F) -> SharedHandler
where
    F: Fn(Message) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(SyncFn(f))
}

/// Wrap a closure returning a future.
pub fn async_handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(AsyncFn(f))
}
