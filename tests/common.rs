//! Common test harness utilities for integration tests.
//!
//! This module provides an in-memory transport implementing the `Connector`
//! and `Session` traits:
//! - Scripted connect outcomes (fail the first N attempts)
//! - Captured publishes for assertions
//! - Auto-responders standing in for the provisioning backend
//!
//! All helpers use only existing dependencies.

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use async_trait::async_trait;
use beacon::transport::{
    topic_matches, Connector, InboundMessage, QosLevel, Session, Subscription, TransportError,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One captured publish, in arrival order.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl PublishRecord {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).expect("captured payload is JSON")
    }
}

/// Scripted reply: every publish landing on `trigger` emits `payload` on
/// `respond_on`.
struct Responder {
    trigger: String,
    respond_on: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct BrokerState {
    subscriptions: HashMap<String, mpsc::Sender<InboundMessage>>,
    publishes: Vec<PublishRecord>,
    responders: Vec<Responder>,
    fail_publishes: u32,
}

/// In-memory stand-in for the MQTT backend. All sessions opened through
/// [`MemoryConnector`] share one broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an auto-responder fired on every publish to `trigger`.
    pub fn respond(&self, trigger: &str, respond_on: &str, payload: &serde_json::Value) {
        self.respond_raw(trigger, respond_on, payload.to_string().into_bytes());
    }

    /// Responder variant for payloads that are deliberately not JSON.
    pub fn respond_raw(&self, trigger: &str, respond_on: &str, payload: Vec<u8>) {
        self.state.lock().responders.push(Responder {
            trigger: trigger.to_string(),
            respond_on: respond_on.to_string(),
            payload,
        });
    }

    /// Fail the next `count` publishes from any session.
    pub fn fail_next_publishes(&self, count: u32) {
        self.state.lock().fail_publishes = count;
    }

    pub fn publishes(&self) -> Vec<PublishRecord> {
        self.state.lock().publishes.clone()
    }

    pub fn publishes_on(&self, topic: &str) -> Vec<PublishRecord> {
        self.state
            .lock()
            .publishes
            .iter()
            .filter(|record| record.topic == topic)
            .cloned()
            .collect()
    }

    /// Topic filters with a live subscription, sorted for stable assertions.
    pub fn subscription_filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.state.lock().subscriptions.keys().cloned().collect();
        filters.sort();
        filters
    }

    /// Deliver a message to matching subscribers directly, bypassing the
    /// responder table. Messages with no subscriber are dropped.
    pub fn inject(&self, topic: &str, payload: &serde_json::Value) {
        self.deliver(topic, payload.to_string().into_bytes());
    }

    fn handle_publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let responses: Vec<(String, Vec<u8>)> = {
            let mut state = self.state.lock();
            if state.fail_publishes > 0 {
                state.fail_publishes -= 1;
                return Err(TransportError::Publish {
                    topic: topic.to_string(),
                    reason: "scripted failure".to_string(),
                });
            }
            state.publishes.push(PublishRecord {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });
            state
                .responders
                .iter()
                .filter(|responder| responder.trigger == topic)
                .map(|responder| (responder.respond_on.clone(), responder.payload.clone()))
                .collect()
        };
        for (respond_on, payload) in responses {
            self.deliver(&respond_on, payload);
        }
        Ok(())
    }

    fn deliver(&self, topic: &str, payload: Vec<u8>) {
        let senders: Vec<mpsc::Sender<InboundMessage>> = {
            let state = self.state.lock();
            state
                .subscriptions
                .iter()
                .filter(|(filter, _)| topic_matches(filter, topic))
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in senders {
            let _ = tx.try_send(InboundMessage {
                topic: topic.to_string(),
                payload: Bytes::from(payload.clone()),
            });
        }
    }
}

/// Scripted connector: the first `fail_first` attempts fail, later ones yield
/// live sessions on the shared broker.
pub struct MemoryConnector {
    broker: MemoryBroker,
    label: String,
    fail_first: u32,
    attempts: Arc<AtomicU32>,
}

impl MemoryConnector {
    pub fn new(broker: &MemoryBroker, label: &str) -> Self {
        Self::failing_first(broker, label, 0)
    }

    pub fn failing_first(broker: &MemoryBroker, label: &str, fail_first: u32) -> Self {
        Self {
            broker: broker.clone(),
            label: label.to_string(),
            fail_first,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Handle on the attempt counter, usable after the connector has been
    /// moved into a provisioner.
    pub fn attempt_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.attempts)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Session = MemorySession;

    async fn connect(&self) -> Result<MemorySession, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            return Err(TransportError::ConnectFailed {
                endpoint: "memory".to_string(),
                reason: format!("scripted failure {attempt}"),
            });
        }
        Ok(MemorySession {
            broker: self.broker.clone(),
            client_id: format!("{}-{attempt}", self.label),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

pub struct MemorySession {
    broker: MemoryBroker,
    client_id: String,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Session for MemorySession {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: QosLevel,
    ) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::SessionClosed);
        }
        self.broker.handle_publish(topic, &payload)
    }

    async fn subscribe(
        &self,
        filter: &str,
        _qos: QosLevel,
    ) -> Result<Subscription, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::SessionClosed);
        }
        let (tx, rx) = mpsc::channel(64);
        let mut state = self.broker.state.lock();
        if state.subscriptions.contains_key(filter) {
            return Err(TransportError::AlreadySubscribed {
                topic: filter.to_string(),
            });
        }
        state.subscriptions.insert(filter.to_string(), tx);
        Ok(Subscription::new(filter.to_string(), rx))
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.broker.state.lock().subscriptions.remove(filter);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
