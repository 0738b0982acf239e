//! Best-effort event logging to the host.
//!
//! Events go to `<event_channel>.<plugin_id>.log` as a JSON array. Nothing
//! here ever returns an error: delivery problems are only logged locally.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::model::{EventType, LogLevel, PluginEvent};
use crate::session::Session;
use crate::subject;
use crate::transport::{Headers, Transport};

pub const EVENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Header carrying the configured auth key.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

#[derive(Deserialize)]
struct EventAck {
    result: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct EventLogger {
    session: Arc<Session>,
}

impl EventLogger {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Send a log record attributed to `<plugin_id> - <source>`.
    pub async fn log(
        &self,
        source: &str,
        level: LogLevel,
        message: impl Into<String>,
        details: Option<Value>,
    ) {
        let event = PluginEvent {
            event: EventType::Log,
            level,
            source: format!("{} - {source}", self.session.plugin_id()),
            message: message.into(),
            timestamp: unix_now(),
            details,
        };
        self.send_event(event).await;
    }

    pub async fn emit_event(&self, event_type: EventType, data: Option<Value>) {
        let event = PluginEvent {
            event: event_type,
            level: LogLevel::Info,
            source: self.session.plugin_id().to_string(),
            message: format!("Event: {}", event_type.as_str()),
            timestamp: unix_now(),
            details: data,
        };
        self.send_event(event).await;
    }

    pub async fn send_event(&self, event: PluginEvent) {
        self.send_multiple_events(std::slice::from_ref(&event)).await;
    }

    /// Send `events` in one request. No-op without an event channel.
    pub async fn send_multiple_events(&self, events: &[PluginEvent]) {
        let config = self.session.config();
        let Some(channel) = config.event_channel() else {
            return;
        };

        let body: Bytes = match serde_json::to_vec(events) {
            Ok(body) => body.into(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode plugin events");
                return;
            }
        };
        let subject = subject::event_log(channel, config.plugin_id());
        let headers = config.auth_key().map(|key| {
            let mut headers = Headers::new();
            headers.insert(AUTHORIZATION_HEADER.to_string(), key.to_string());
            headers
        });

        let reply = match self
            .session
            .request(&subject, body, EVENT_REQUEST_TIMEOUT, headers)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(%subject, count = events.len(), error = %e, "failed to send events");
                return;
            }
        };

        if reply.payload.is_empty() {
            return;
        }
        if let Ok(ack) = reply.json::<EventAck>() {
            match ack.result {
                Some(Value::String(result)) if result == "OK" => {}
                other => {
                    let result = other.map(|v| v.to_string()).unwrap_or_default();
                    tracing::warn!(%subject, %result, "event channel did not acknowledge events");
                }
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
