use async_nats::client::RequestErrorKind;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;

use super::{Headers, Message, MessageStream, Transport, TransportError};

/// [`Transport`] over a live NATS client.
#[derive(Clone, Debug)]
pub struct NatsTransport {
    client: async_nats::Client,
}

impl NatsTransport {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    /// Connect to `uri`, giving the handshake `connect_timeout`.
    pub async fn connect(
        uri: &str,
        connect_timeout: Duration,
    ) -> Result<Self, async_nats::ConnectError> {
        let client = async_nats::ConnectOptions::new()
            .connection_timeout(connect_timeout)
            .connect(uri)
            .await?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        Ok(Box::pin(subscriber.map(Message::from)))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
        headers: Option<Headers>,
    ) -> Result<Message, TransportError> {
        let mut request = async_nats::Request::new()
            .payload(payload)
            .timeout(Some(timeout));
        if let Some(headers) = headers {
            request = request.headers(to_header_map(&headers));
        }

        self.client
            .send_request(subject.to_string(), request)
            .await
            .map(Message::from)
            .map_err(|e| match e.kind() {
                RequestErrorKind::NoResponders => TransportError::NoResponders(subject.to_string()),
                RequestErrorKind::TimedOut => TransportError::TimedOut(subject.to_string()),
                _ => TransportError::Request(e.to_string()),
            })
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::Flush(e.to_string()))
    }

    /// Drains every subscription and closes the connection, including for
    /// clones of the client still held elsewhere.
    async fn close(&self) -> Result<(), TransportError> {
        self.client
            .drain()
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}

fn to_header_map(headers: &Headers) -> async_nats::HeaderMap {
    let mut map = async_nats::HeaderMap::new();
    for (name, value) in headers {
        map.insert(name.as_str(), value.as_str());
    }
    map
}

impl From<async_nats::Message> for Message {
    fn from(msg: async_nats::Message) -> Self {
        let headers = msg
            .headers
            .as_ref()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|(name, values)| {
                        values
                            .last()
                            .map(|value| (name.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            subject: msg.subject.to_string(),
            reply: msg.reply.map(|reply| reply.to_string()),
            payload: msg.payload,
            headers,
        }
    }
}
