//! The publish/subscribe capability the SDK is built on.
//!
//! Everything above this module talks to a [`Transport`]; the NATS binding in
//! [`nats`] is the production implementation and
//! [`crate::testing::MemoryTransport`] the in-process one.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

pub mod nats;

pub use nats::NatsTransport;

/// Message headers, one value per name.
pub type Headers = BTreeMap<String, String>;

/// Stream of messages delivered to one subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// A message received from the transport, either by a subscription or as a
/// request reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
    pub headers: Headers,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
            headers: Headers::new(),
        }
    }

    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Decode the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Payload as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no responders on {0}")]
    NoResponders(String),
    #[error("request on {0} timed out")]
    TimedOut(String),
    #[error("not connected")]
    NotConnected,
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("flush failed: {0}")]
    Flush(String),
    #[error("close failed: {0}")]
    Close(String),
}

impl TransportError {
    pub fn is_no_responders(&self) -> bool {
        matches!(self, Self::NoResponders(_))
    }
}

/// Publish, subscribe and request-reply over subject strings.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError>;

    /// Send `payload` and wait up to `timeout` for the first reply.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
        headers: Option<Headers>,
    ) -> Result<Message, TransportError>;

    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Tear down the connection. Open subscription streams end.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Reply to `message` on its reply subject.
pub(crate) async fn respond(
    transport: &dyn Transport,
    message: &Message,
    payload: Bytes,
) -> Result<(), RespondError> {
    let Some(reply) = message.reply.as_deref() else {
        return Err(RespondError::MissingReply(message.subject.clone()));
    };
    transport.publish(reply, payload).await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum RespondError {
    #[error("message on {0} has no reply subject")]
    MissingReply(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn message_decodes_json_and_text() {
        let message = Message::new("a.b", r#"{"k":1}"#).with_reply("_INBOX.1");
        assert_eq!(message.json::<Value>().unwrap(), json!({"k": 1}));
        assert_eq!(message.text(), r#"{"k":1}"#);
        assert_eq!(message.reply.as_deref(), Some("_INBOX.1"));
    }

    #[test]
    fn no_responders_is_distinguishable() {
        assert!(TransportError::NoResponders("x".into()).is_no_responders());
        assert!(!TransportError::TimedOut("x".into()).is_no_responders());
    }
}
