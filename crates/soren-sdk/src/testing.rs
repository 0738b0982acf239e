//! In-process transport for tests of plugins built on this crate.
//!
//! [`MemoryTransport`] routes requests to local subscribers through reply
//! inboxes, records every publish and request, and can be scripted with
//! canned request outcomes to simulate broker failures.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::transport::{Headers, Message, MessageStream, Transport, TransportError};

/// A request as seen by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub subject: String,
    pub payload: Bytes,
    pub timeout: Duration,
    pub headers: Option<Headers>,
}

#[derive(Default)]
struct Inner {
    subscribers: Vec<(String, mpsc::UnboundedSender<Message>)>,
    inboxes: HashMap<String, oneshot::Sender<Message>>,
    scripted: VecDeque<Result<Bytes, TransportError>>,
    published: Vec<Message>,
    requests: Vec<RecordedRequest>,
}

#[derive(Default)]
pub struct MemoryTransport {
    inner: Mutex<Inner>,
    inbox_seq: AtomicU64,
    closes: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue the outcome of the next request, bypassing subscribers.
    pub fn script_request(&self, outcome: Result<Bytes, TransportError>) {
        self.lock().scripted.push_back(outcome);
    }

    /// Every message published so far, request replies included.
    pub fn published(&self) -> Vec<Message> {
        self.lock().published.clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn subscribed_subjects(&self) -> Vec<String> {
        self.lock()
            .subscribers
            .iter()
            .map(|(subject, _)| subject.clone())
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn deliver(inner: &mut Inner, message: &Message) -> usize {
        inner.subscribers.retain(|(_, tx)| !tx.is_closed());
        inner
            .subscribers
            .iter()
            .filter(|(pattern, _)| subject_matches(pattern, &message.subject))
            .filter(|(_, tx)| tx.send(message.clone()).is_ok())
            .count()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        let message = Message::new(subject, payload);
        let mut inner = self.lock();
        inner.published.push(message.clone());
        if let Some(waiter) = inner.inboxes.remove(subject) {
            let _ = waiter.send(message);
            return Ok(());
        }
        Self::deliver(&mut inner, &message);
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push((subject.to_string(), tx));
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        })))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
        headers: Option<Headers>,
    ) -> Result<Message, TransportError> {
        let inbox = format!("_INBOX.mem.{}", self.inbox_seq.fetch_add(1, Ordering::SeqCst));
        let rx = {
            let mut inner = self.lock();
            inner.requests.push(RecordedRequest {
                subject: subject.to_string(),
                payload: payload.clone(),
                timeout,
                headers: headers.clone(),
            });

            if let Some(outcome) = inner.scripted.pop_front() {
                return outcome.map(|body| Message::new(inbox, body));
            }

            let (tx, rx) = oneshot::channel();
            inner.inboxes.insert(inbox.clone(), tx);
            let mut message = Message::new(subject, payload).with_reply(inbox.clone());
            message.headers = headers.unwrap_or_default();
            if Self::deliver(&mut inner, &message) == 0 {
                inner.inboxes.remove(&inbox);
                return Err(TransportError::NoResponders(subject.to_string()));
            }
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                self.lock().inboxes.remove(&inbox);
                Err(TransportError::TimedOut(subject.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        inner.subscribers.clear();
        inner.inboxes.clear();
        Ok(())
    }
}

/// NATS-style matching: `*` matches one token, a trailing `>` the rest.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn wildcard_matching() {
        assert!(subject_matches("soren.cpu.abc.j1.*", "soren.cpu.abc.j1.progress"));
        assert!(subject_matches("soren.>", "soren.v2.abc.@intro"));
        assert!(subject_matches("a.b", "a.b"));
        assert!(!subject_matches("a.b", "a.b.c"));
        assert!(!subject_matches("a.*", "a"));
    }

    #[tokio::test]
    async fn request_without_subscriber_has_no_responders() {
        let transport = MemoryTransport::new();
        let err = transport
            .request("nobody.home", Bytes::new(), Duration::from_millis(50), None)
            .await
            .unwrap_err();
        assert!(err.is_no_responders());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn request_is_answered_through_inbox() {
        let transport = std::sync::Arc::new(MemoryTransport::new());
        let mut stream = transport.subscribe("echo").await.unwrap();
        let responder = transport.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let reply = message.reply.clone().unwrap();
                responder.publish(&reply, message.payload).await.unwrap();
            }
        });

        let reply = transport
            .request("echo", Bytes::from_static(b"ping"), Duration::from_secs(1), None)
            .await
            .unwrap();
        assert_eq!(reply.payload, Bytes::from_static(b"ping"));
    }

    #[tokio::test]
    async fn scripted_outcomes_take_precedence() {
        let transport = MemoryTransport::new();
        transport.script_request(Err(TransportError::NoResponders("x".into())));
        transport.script_request(Ok(Bytes::from_static(b"ok")));

        let first = transport
            .request("x", Bytes::new(), Duration::from_secs(1), None)
            .await;
        assert!(first.unwrap_err().is_no_responders());
        let second = transport
            .request("x", Bytes::new(), Duration::from_secs(1), None)
            .await
            .unwrap();
        assert_eq!(second.payload, Bytes::from_static(b"ok"));
    }
}
