//! Correlated request/response exchanges.
//!
//! Every handshake step is the same shape: publish a request on a base topic
//! and wait for the backend to answer on `<base>/accepted` or
//! `<base>/rejected` within a deadline. [`RequestEngine::issue`] owns that
//! exchange end to end, including the subscription lifecycle.

use crate::provisioning::TopicPair;
use crate::time::Clock;
use crate::transport::{QosLevel, Session, TransportError};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("no response on '{topic}' within {seconds}s")]
    Timeout { topic: String, seconds: u64 },
    #[error("request on '{topic}' rejected: {payload}")]
    Rejected { topic: String, payload: Value },
    #[error("malformed response on '{topic}': {reason}")]
    MalformedResponse { topic: String, reason: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Issues correlated requests over one session. Holds no per-request state, so
/// concurrent engines on distinct topic pairs never interact; two requests on
/// the same pair are serialized by the subscription itself.
pub struct RequestEngine<'a, S, C> {
    session: &'a S,
    clock: C,
}

impl<'a, S: Session, C: Clock> RequestEngine<'a, S, C> {
    pub fn new(session: &'a S, clock: C) -> Self {
        Self { session, clock }
    }

    /// Publish `payload` on the pair's request topic and wait for the
    /// correlated response. Subscribes to both response topics before
    /// publishing, and releases both before returning on every outcome;
    /// a late response after timeout lands on a dead subscription instead
    /// of leaking into the next exchange.
    ///
    /// Never retries; retry policy belongs to the caller.
    pub async fn issue(
        &self,
        pair: &TopicPair,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        let accepted_topic = pair.accepted();
        let rejected_topic = pair.rejected();

        let mut accepted = self
            .session
            .subscribe(&accepted_topic, QosLevel::Qos1)
            .await?;
        let mut rejected = match self.session.subscribe(&rejected_topic, QosLevel::Qos1).await {
            Ok(sub) => sub,
            Err(err) => {
                self.release(&accepted_topic, &rejected_topic).await;
                return Err(err.into());
            }
        };

        let started = self.clock.now();
        if let Err(err) = self
            .session
            .publish(pair.request(), payload.to_string().into_bytes(), QosLevel::Qos1)
            .await
        {
            self.release(&accepted_topic, &rejected_topic).await;
            return Err(err.into());
        }

        let deadline = self.clock.sleep(timeout);
        tokio::pin!(deadline);

        let result = tokio::select! {
            () = &mut deadline => Err(RequestError::Timeout {
                topic: pair.request().to_string(),
                seconds: timeout.as_secs(),
            }),
            msg = accepted.recv() => match msg {
                Some(msg) => match serde_json::from_slice::<Value>(&msg.payload) {
                    Ok(value) => Ok(value),
                    Err(err) => {
                        warn!(
                            "unparsable response on '{}': {err}; raw: {}",
                            accepted_topic,
                            String::from_utf8_lossy(&msg.payload)
                        );
                        Err(RequestError::MalformedResponse {
                            topic: accepted_topic.clone(),
                            reason: err.to_string(),
                        })
                    }
                },
                None => Err(RequestError::Transport(TransportError::SessionClosed)),
            },
            msg = rejected.recv() => match msg {
                Some(msg) => Err(RequestError::Rejected {
                    topic: pair.request().to_string(),
                    payload: rejection_payload(&msg.payload),
                }),
                None => Err(RequestError::Transport(TransportError::SessionClosed)),
            },
        };

        self.release(&accepted_topic, &rejected_topic).await;
        let elapsed = self.clock.now().saturating_duration_since(started);
        match &result {
            Ok(_) => debug!("request on '{}' accepted after {elapsed:?}", pair.request()),
            Err(err) => debug!("request on '{}' resolved after {elapsed:?}: {err}", pair.request()),
        }
        result
    }

    async fn release(&self, accepted: &str, rejected: &str) {
        if let Err(err) = self.session.unsubscribe(accepted).await {
            warn!("release of '{accepted}' failed: {err}");
        }
        if let Err(err) = self.session.unsubscribe(rejected).await {
            warn!("release of '{rejected}' failed: {err}");
        }
    }
}

/// Rejections are a protocol outcome, so a body that fails to parse is still
/// surfaced, as a lossy string instead of an object.
fn rejection_payload(raw: &[u8]) -> Value {
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
}
