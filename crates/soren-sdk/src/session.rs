//! Connection lifecycle for one plugin process.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{Config, ConfigError};
use crate::transport::{Headers, Message, MessageStream, NatsTransport, Transport, TransportError};

/// Upper bound for the whole connect call.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout handed to the NATS handshake itself.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const RECOGNIZED_SCHEMES: [&str; 4] = ["nats://", "tls://", "ws://", "wss://"];

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connecting to {uri} timed out after {after:?}")]
    Timeout { uri: String, after: Duration },
    #[error("failed to connect to {uri}: {source}")]
    Failed {
        uri: String,
        #[source]
        source: async_nats::ConnectError,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closed,
            _ => Self::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Closed => 3,
        }
    }
}

/// Prefix `nats://` unless the URI already names a recognized scheme.
pub fn normalize_agent_uri(uri: &str) -> String {
    if RECOGNIZED_SCHEMES.iter().any(|scheme| uri.starts_with(scheme)) {
        uri.to_string()
    } else {
        format!("nats://{uri}")
    }
}

/// Owns the single transport connection of a plugin.
///
/// `Session` is itself a [`Transport`]: calls are forwarded to the live
/// connection and fail with [`TransportError::NotConnected`] otherwise.
pub struct Session {
    config: Config,
    connection: Mutex<Option<Arc<dyn Transport>>>,
    state: AtomicU8,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            state: AtomicU8::new(SessionState::Disconnected.as_u8()),
        }
    }

    /// Session configured entirely from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(Config::from_env()?))
    }

    /// Session that is already connected through `transport`.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            connection: Mutex::new(Some(transport)),
            state: AtomicU8::new(SessionState::Connected.as_u8()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn plugin_id(&self) -> &str {
        self.config.plugin_id()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Connect to the configured agent. No-op while already connected.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Ok(());
        }

        let previous = self.state();
        self.set_state(SessionState::Connecting);
        let uri = normalize_agent_uri(self.config.agent_uri());
        tracing::info!(%uri, "connecting to agent");

        let result = tokio::time::timeout(
            CONNECT_TIMEOUT,
            NatsTransport::connect(&uri, HANDSHAKE_TIMEOUT),
        )
        .await;

        let transport = match result {
            Ok(Ok(transport)) => transport,
            Ok(Err(source)) => {
                self.set_state(previous);
                tracing::error!(%uri, error = %source, "agent connection failed");
                return Err(ConnectionError::Failed { uri, source });
            }
            Err(_) => {
                self.set_state(previous);
                tracing::error!(%uri, "agent connection timed out");
                return Err(ConnectionError::Timeout {
                    uri,
                    after: CONNECT_TIMEOUT,
                });
            }
        };

        *connection = Some(Arc::new(transport));
        self.set_state(SessionState::Connected);
        tracing::info!(%uri, "connected to agent");
        Ok(())
    }

    /// Tear down the connection. Safe to call repeatedly.
    pub async fn close(&self) {
        let transport = self.connection.lock().await.take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                tracing::warn!(error = %e, "error while closing agent connection");
            }
            tracing::info!("agent connection closed");
        }
        self.set_state(SessionState::Closed);
    }

    /// The live connection, if any.
    pub async fn transport(&self) -> Result<Arc<dyn Transport>, TransportError> {
        self.connection
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl Transport for Session {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.transport().await?.publish(subject, payload).await
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError> {
        self.transport().await?.subscribe(subject).await
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
        headers: Option<Headers>,
    ) -> Result<Message, TransportError> {
        self.transport()
            .await?
            .request(subject, payload, timeout, headers)
            .await
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.transport().await?.flush().await
    }

    async fn close(&self) -> Result<(), TransportError> {
        Session::close(self).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;
    use futures::StreamExt;

    fn config() -> Config {
        Config::builder()
            .agent_uri("localhost:4222")
            .plugin_id("abc")
            .build_with_env(|_| None)
            .unwrap()
    }

    #[test]
    fn agent_uri_gets_default_scheme() {
        assert_eq!(normalize_agent_uri("localhost:4222"), "nats://localhost:4222");
        assert_eq!(normalize_agent_uri("nats://h:1"), "nats://h:1");
        assert_eq!(normalize_agent_uri("tls://h:1"), "tls://h:1");
        assert_eq!(normalize_agent_uri("ws://h:1"), "ws://h:1");
        assert_eq!(normalize_agent_uri("wss://h:1"), "wss://h:1");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = Arc::new(MemoryTransport::new());
        let session = Session::with_transport(config(), transport.clone());
        assert_eq!(session.state(), SessionState::Connected);

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn close_ends_open_subscriptions() {
        let transport = Arc::new(MemoryTransport::new());
        let session = Session::with_transport(config(), transport.clone());
        let mut messages = session.subscribe("soren.v2.abc.@intro").await.unwrap();

        session.close().await;

        assert!(messages.next().await.is_none());
        assert!(transport.subscribed_subjects().is_empty());
    }

    #[tokio::test]
    async fn close_on_never_connected_session() {
        let session = Session::new(config());
        assert_eq!(session.state(), SessionState::Disconnected);
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn connect_is_noop_when_connected() {
        let transport = Arc::new(MemoryTransport::new());
        let session = Session::with_transport(config(), transport);
        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn calls_fail_when_not_connected() {
        let session = Session::new(config());
        let err = session.publish("a.b", Bytes::new()).await.unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
    }

    #[tokio::test]
    async fn connect_to_unreachable_agent_fails() {
        let session = Session::new(
            Config::builder()
                .agent_uri("127.0.0.1:1")
                .plugin_id("abc")
                .build_with_env(|_| None)
                .unwrap(),
        );
        let err = session.connect().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Failed { .. } | ConnectionError::Timeout { .. }
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
