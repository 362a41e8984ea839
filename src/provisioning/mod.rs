//! Device provisioning over pub/sub topic exchanges.
//!
//! - `correlate` - Correlated request/response engine
//! - `workflow` - Ordered claim-to-operational workflow
//! - `wire` - JSON payloads exchanged with the backend

pub mod correlate;
pub mod wire;
pub mod workflow;

pub use correlate::{RequestEngine, RequestError};
pub use workflow::{Provisioned, Provisioner, ProvisioningPlan, WorkflowError, WorkflowState};

/// The result of provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Operator-supplied stable identifier.
    pub device_id: String,
    /// Name assigned by the backend during registration; may differ from the
    /// requested name and is authoritative for all device topics.
    pub thing_name: String,
}

impl DeviceIdentity {
    /// Topic under this device's namespace.
    pub fn device_topic(&self, suffix: &str) -> String {
        format!("devices/{}/{}", self.thing_name, suffix)
    }

    pub fn heartbeat_topic(&self) -> String {
        self.device_topic("heartbeat")
    }
}

/// A request topic and the accepted/rejected response topics derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPair {
    base: String,
}

impl TopicPair {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn request(&self) -> &str {
        &self.base
    }

    pub fn accepted(&self) -> String {
        format!("{}/accepted", self.base)
    }

    pub fn rejected(&self) -> String {
        format!("{}/rejected", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_pair_derives_response_topics() {
        let pair = TopicPair::new("$aws/certificates/create/json");
        assert_eq!(pair.request(), "$aws/certificates/create/json");
        assert_eq!(pair.accepted(), "$aws/certificates/create/json/accepted");
        assert_eq!(pair.rejected(), "$aws/certificates/create/json/rejected");
    }

    #[test]
    fn device_topics_use_assigned_thing_name() {
        let identity = DeviceIdentity {
            device_id: "Dev1".into(),
            thing_name: "Onsyte_Dev1".into(),
        };
        assert_eq!(identity.heartbeat_topic(), "devices/Onsyte_Dev1/heartbeat");
        assert_eq!(identity.device_topic("status"), "devices/Onsyte_Dev1/status");
    }
}
