//! The provisioning state machine.
//!
//! A device boots with shared claim credentials and ends up with an
//! operational session bound to its assigned thing name. The path is strictly
//! linear: connect with the claim identity, obtain a certificate ownership
//! token, register against the template, then reconnect for normal operation.
//! Any failure aborts the run; the caller decides whether to start another.

use crate::core::config::Config;
use crate::provisioning::correlate::{RequestEngine, RequestError};
use crate::provisioning::{wire, DeviceIdentity, TopicPair};
use crate::time::Clock;
use crate::transport::{Connector, Session};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Observable phase of a provisioning run. Published over a watch channel so
/// operators can follow progress without polling.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Idle,
    ClaimConnecting,
    RequestingToken,
    RequestingRegistration,
    Finalizing,
    Ready,
    Failed(WorkflowError),
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ClaimConnecting => write!(f, "claim-connecting"),
            Self::RequestingToken => write!(f, "requesting-token"),
            Self::RequestingRegistration => write!(f, "requesting-registration"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Terminal failures of a run. Cloned into the published [`WorkflowState`],
/// so upstream causes are carried as rendered strings.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowError {
    #[error("claim connect gave up after {attempts} attempts: {last}")]
    ConnectExhausted { attempts: u32, last: String },
    #[error("ownership token unavailable: {0}")]
    TokenUnavailable(String),
    #[error("registration rejected: {0}")]
    RegistrationRejected(Value),
    #[error("registration unanswered after {0}s")]
    RegistrationTimeout(u64),
    #[error("registration failed: {0}")]
    RegistrationFailed(String),
    #[error("operational connect failed: {0}")]
    OperationalConnectFailed(String),
}

/// Everything a run needs beyond the two connectors, resolved from config
/// up front so the workflow itself never touches files or env.
#[derive(Debug, Clone)]
pub struct ProvisioningPlan {
    pub device_id: String,
    pub requested_thing_name: String,
    pub token_topics: TopicPair,
    pub registration_topics: TopicPair,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    pub token_timeout: Duration,
    pub registration_timeout: Duration,
}

impl ProvisioningPlan {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device_id: config.device.device_id.clone(),
            requested_thing_name: config.device.requested_thing_name(),
            token_topics: TopicPair::new(config.provisioning.token_topic.clone()),
            registration_topics: TopicPair::new(config.provisioning.registration_topic()),
            connect_attempts: config.provisioning.connect_attempts,
            connect_retry_delay: config.provisioning.connect_retry_delay(),
            token_timeout: config.provisioning.token_timeout(),
            registration_timeout: config.provisioning.registration_timeout(),
        }
    }
}

/// Outcome of a successful run: a live operational session plus the identity
/// the backend assigned.
pub struct Provisioned<S> {
    pub session: Arc<S>,
    pub identity: DeviceIdentity,
}

impl<S> fmt::Debug for Provisioned<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioned")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

pub struct Provisioner<C: Connector, K: Clock> {
    claim: C,
    operational: C,
    plan: ProvisioningPlan,
    clock: K,
    state_tx: watch::Sender<WorkflowState>,
}

impl<C: Connector, K: Clock> Provisioner<C, K> {
    pub fn new(claim: C, operational: C, plan: ProvisioningPlan, clock: K) -> Self {
        let (state_tx, _) = watch::channel(WorkflowState::Idle);
        Self { claim, operational, plan, clock, state_tx }
    }

    /// Receiver over the run's state transitions. Subscribing after `run`
    /// started yields the current state first.
    pub fn watch_state(&self) -> watch::Receiver<WorkflowState> {
        self.state_tx.subscribe()
    }

    pub fn plan(&self) -> &ProvisioningPlan {
        &self.plan
    }

    /// Drive one full provisioning run. Ends in `Ready` or `Failed`; the
    /// claim session is closed before this returns on every path.
    pub async fn run(&self) -> Result<Provisioned<C::Session>, WorkflowError> {
        match self.run_inner().await {
            Ok(provisioned) => {
                self.transition(WorkflowState::Ready);
                Ok(provisioned)
            }
            Err(err) => {
                self.transition(WorkflowState::Failed(err.clone()));
                Err(err)
            }
        }
    }

    async fn run_inner(&self) -> Result<Provisioned<C::Session>, WorkflowError> {
        self.transition(WorkflowState::ClaimConnecting);
        let claim_session = self
            .connect_with_retries(&self.claim, "claim")
            .await
            .map_err(|last| WorkflowError::ConnectExhausted {
                attempts: self.plan.connect_attempts,
                last,
            })?;

        let outcome = self.handshake(&claim_session).await;
        if outcome.is_ok() {
            self.transition(WorkflowState::Finalizing);
        }
        if let Err(err) = claim_session.disconnect().await {
            warn!("claim link close failed: {err}");
        }
        let thing_name = outcome?;

        let session = self
            .connect_with_retries(&self.operational, "operational")
            .await
            .map_err(WorkflowError::OperationalConnectFailed)?;

        let identity = DeviceIdentity {
            device_id: self.plan.device_id.clone(),
            thing_name,
        };
        info!("provisioned as '{}'", identity.thing_name);
        Ok(Provisioned {
            session: Arc::new(session),
            identity,
        })
    }

    /// Both link establishments share one retry shape: fixed delay, bounded
    /// attempts, last error wins.
    async fn connect_with_retries(&self, connector: &C, role: &str) -> Result<C::Session, String> {
        let attempts = self.plan.connect_attempts;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match connector.connect().await {
                Ok(session) => {
                    info!("{role} link established on attempt {attempt}/{attempts}");
                    return Ok(session);
                }
                Err(err) => {
                    if attempt >= attempts {
                        return Err(err.to_string());
                    }
                    warn!("{role} connect attempt {attempt}/{attempts} failed: {err}");
                    self.clock.sleep(self.plan.connect_retry_delay).await;
                }
            }
        }
    }

    async fn handshake(&self, session: &C::Session) -> Result<String, WorkflowError> {
        let engine = RequestEngine::new(session, self.clock.clone());

        self.transition(WorkflowState::RequestingToken);
        let token = self.request_token(&engine).await?;

        self.transition(WorkflowState::RequestingRegistration);
        self.request_registration(&engine, &token).await
    }

    async fn request_token(
        &self,
        engine: &RequestEngine<'_, C::Session, K>,
    ) -> Result<String, WorkflowError> {
        let response = engine
            .issue(&self.plan.token_topics, json!({}), self.plan.token_timeout)
            .await
            .map_err(|err| WorkflowError::TokenUnavailable(err.to_string()))?;
        let grant: wire::TokenResponse = serde_json::from_value(response)
            .map_err(|err| WorkflowError::TokenUnavailable(format!("unparsable grant: {err}")))?;
        if grant.certificate_ownership_token.is_empty() {
            return Err(WorkflowError::TokenUnavailable(
                "grant carried an empty token".into(),
            ));
        }
        debug!(
            "ownership token received ({} bytes)",
            grant.certificate_ownership_token.len()
        );
        Ok(grant.certificate_ownership_token)
    }

    /// Returns the assigned thing name; the requested one when the acceptance
    /// does not carry an override.
    async fn request_registration(
        &self,
        engine: &RequestEngine<'_, C::Session, K>,
        token: &str,
    ) -> Result<String, WorkflowError> {
        let request = wire::RegistrationRequest {
            parameters: wire::RegistrationParameters {
                serial_number: self.plan.device_id.clone(),
                thing_name: self.plan.requested_thing_name.clone(),
            },
            certificate_ownership_token: token.to_string(),
        };
        let payload = serde_json::to_value(&request)
            .map_err(|err| WorkflowError::RegistrationFailed(err.to_string()))?;

        let response = engine
            .issue(
                &self.plan.registration_topics,
                payload,
                self.plan.registration_timeout,
            )
            .await
            .map_err(|err| match err {
                RequestError::Rejected { payload, .. } => {
                    WorkflowError::RegistrationRejected(payload)
                }
                RequestError::Timeout { .. } => {
                    WorkflowError::RegistrationTimeout(self.plan.registration_timeout.as_secs())
                }
                other => WorkflowError::RegistrationFailed(other.to_string()),
            })?;

        let accepted: wire::RegistrationResponse = serde_json::from_value(response)
            .map_err(|err| {
                WorkflowError::RegistrationFailed(format!("unparsable acceptance: {err}"))
            })?;
        Ok(accepted
            .thing_name
            .unwrap_or_else(|| self.plan.requested_thing_name.clone()))
    }

    fn transition(&self, state: WorkflowState) {
        debug!("workflow state: {state}");
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_render_for_operators() {
        assert_eq!(WorkflowState::ClaimConnecting.to_string(), "claim-connecting");
        assert_eq!(WorkflowState::Ready.to_string(), "ready");
        let failed = WorkflowState::Failed(WorkflowError::RegistrationTimeout(15));
        assert_eq!(failed.to_string(), "failed: registration unanswered after 15s");
    }

    #[test]
    fn rejection_error_carries_backend_payload() {
        let err = WorkflowError::RegistrationRejected(json!({"reason": "duplicate"}));
        assert!(err.to_string().contains("duplicate"));
        assert_eq!(
            err,
            WorkflowError::RegistrationRejected(json!({"reason": "duplicate"}))
        );
    }

    #[test]
    fn plan_resolves_topics_from_config() {
        let doc = r#"
[device]
device_id = "Dev1"

[broker]
host = "broker.local"

[credentials]
root_ca = "ca.pem"
claim_cert = "claim.crt"
claim_key = "claim.key"
"#;
        let config: Config = toml::from_str(doc).expect("minimal config parses");
        let plan = ProvisioningPlan::from_config(&config);
        assert_eq!(plan.token_topics.request(), "$aws/certificates/create/json");
        assert_eq!(
            plan.registration_topics.request(),
            "$aws/provisioning-templates/ClaimCertProvisioningTemplate/provision/json"
        );
        assert_eq!(plan.requested_thing_name, "Onsyte_Dev1");
        assert_eq!(plan.connect_attempts, 3);
        assert_eq!(plan.connect_retry_delay, Duration::from_secs(2));
    }
}
