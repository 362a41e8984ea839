//! Pub/sub transport abstraction.
//!
//! The provisioning workflow and heartbeat publisher only ever see the
//! [`Connector`] and [`Session`] traits; the rumqttc-backed implementation
//! lives in `transport::mqtt`. A failed connect never yields a session.

pub mod mqtt;
pub mod tls;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub use mqtt::{MqttConnector, MqttSettings};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {endpoint} failed: {reason}")]
    ConnectFailed { endpoint: String, reason: String },
    #[error("connect to {endpoint} timed out")]
    ConnectTimeout { endpoint: String },
    #[error("broker rejected connection: {reason}")]
    ConnectRejected { reason: String },
    #[error("session closed")]
    SessionClosed,
    #[error("subscription already active for '{topic}'")]
    AlreadySubscribed { topic: String },
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("unsubscribe from '{topic}' failed: {reason}")]
    Unsubscribe { topic: String, reason: String },
}

/// Delivery guarantee for publishes and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QosLevel {
    /// At most once (fire and forget)
    Qos0,
    /// At least once (acknowledged delivery)
    #[default]
    Qos1,
    /// Exactly once (assured delivery)
    Qos2,
}

/// A message delivered on a subscribed topic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Receiving side of one topic subscription. Messages matching the filter are
/// queued here by the session's driver task; dropping the stream does not
/// release the broker-side subscription, [`Session::unsubscribe`] does.
pub struct Subscription {
    filter: String,
    rx: mpsc::Receiver<InboundMessage>,
}

impl Subscription {
    pub fn new(filter: String, rx: mpsc::Receiver<InboundMessage>) -> Self {
        Self { filter, rx }
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Wait for the next message on this subscription. Returns `None` once the
    /// subscription has been released or the session torn down.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }
}

/// Opens sessions against one broker endpoint with one credential pair.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    /// Single connect attempt, bounded by the configured connect timeout.
    /// Retry policy belongs to the caller.
    async fn connect(&self) -> Result<Self::Session, TransportError>;
}

/// An established transport connection. Publish is safe for concurrent use;
/// the session stays alive until [`Session::disconnect`] or drop.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    fn client_id(&self) -> &str;

    /// Link state as last observed by the driver task. Publishes issued while
    /// down are queued and flushed on reconnect, up to the configured depth.
    fn connected(&self) -> bool;

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
    ) -> Result<(), TransportError>;

    async fn subscribe(&self, filter: &str, qos: QosLevel)
        -> Result<Subscription, TransportError>;

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Tear the connection down, flushing publishes that were accepted before
    /// the call. Idempotent; subsequent publishes fail with
    /// [`TransportError::SessionClosed`].
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Check if an MQTT topic filter matches a topic.
/// - `+` matches a single level
/// - `#` matches zero or more levels (must be last)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    let mut fi = 0;
    let mut ti = 0;

    while fi < filter_parts.len() {
        let fp = filter_parts[fi];

        if fp == "#" {
            return true;
        }

        if ti >= topic_parts.len() {
            return false;
        }

        if fp == "+" {
            fi += 1;
            ti += 1;
            continue;
        }

        if fp != topic_parts[ti] {
            return false;
        }

        fi += 1;
        ti += 1;
    }

    fi == filter_parts.len() && ti == topic_parts.len()
}
