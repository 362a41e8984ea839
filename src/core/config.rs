use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the Beacon agent.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub broker: BrokerConfig,
    pub credentials: CredentialConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Operator-assigned stable device identifier (also the registration serial number).
    pub device_id: String,
    /// Prefix prepended to `device_id` to form the requested thing name.
    #[serde(default = "default_thing_name_prefix")]
    pub thing_name_prefix: String,
}

impl DeviceConfig {
    /// Thing name requested during registration; the backend may assign a different one.
    pub fn requested_thing_name(&self) -> String {
        format!("{}{}", self.thing_name_prefix, self.device_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker hostname or IP.
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: u64,
}

/// PEM files presented to the broker. The claim pair is shared fleet-wide and only
/// authorized for the provisioning exchange; a distinct operational pair may be
/// installed once the backend issues one.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    pub root_ca: PathBuf,
    pub claim_cert: PathBuf,
    pub claim_key: PathBuf,
    #[serde(default)]
    pub operational_cert: Option<PathBuf>,
    #[serde(default)]
    pub operational_key: Option<PathBuf>,
}

impl CredentialConfig {
    pub fn claim_pair(&self) -> (&Path, &Path) {
        (&self.claim_cert, &self.claim_key)
    }

    /// Credential pair for the post-provisioning session. Falls back to the claim
    /// pair when no distinct operational credential is configured.
    pub fn operational_pair(&self) -> (&Path, &Path) {
        match (&self.operational_cert, &self.operational_key) {
            (Some(cert), Some(key)) => (cert, key),
            _ => self.claim_pair(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
    /// Provisioning template name used to derive the registration topic.
    #[serde(default = "default_template")]
    pub template: String,
    /// Base topic for the ownership-token exchange.
    #[serde(default = "default_token_topic")]
    pub token_topic: String,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_retry_seconds")]
    pub connect_retry_seconds: u64,
    #[serde(default = "default_token_timeout_seconds")]
    pub token_timeout_seconds: u64,
    #[serde(default = "default_registration_timeout_seconds")]
    pub registration_timeout_seconds: u64,
}

impl ProvisioningConfig {
    /// Base topic for the registration exchange, derived from the template name.
    pub fn registration_topic(&self) -> String {
        format!("$aws/provisioning-templates/{}/provision/json", self.template)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_secs(self.connect_retry_seconds)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_seconds)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_seconds)
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            token_topic: default_token_topic(),
            connect_attempts: default_connect_attempts(),
            connect_retry_seconds: default_connect_retry_seconds(),
            token_timeout_seconds: default_token_timeout_seconds(),
            registration_timeout_seconds: default_registration_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_operation_timeout_seconds")]
    pub operation_timeout_seconds: u64,
    /// Reconnect backoff lower bound.
    #[serde(default = "default_reconnect_min_seconds")]
    pub reconnect_min_seconds: u64,
    /// Reconnect backoff upper bound.
    #[serde(default = "default_reconnect_max_seconds")]
    pub reconnect_max_seconds: u64,
    /// Uptime after which the backoff resets to the lower bound.
    #[serde(default = "default_reconnect_stable_seconds")]
    pub reconnect_stable_seconds: u64,
    /// Capacity of the outbound request queue while the link is down.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_seconds)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout_seconds(),
            operation_timeout_seconds: default_operation_timeout_seconds(),
            reconnect_min_seconds: default_reconnect_min_seconds(),
            reconnect_max_seconds: default_reconnect_max_seconds(),
            reconnect_stable_seconds: default_reconnect_stable_seconds(),
            queue_depth: default_queue_depth(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub interval_seconds: u64,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_heartbeat_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TelemetryConfig {
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from a path resolved via BEACON_CONFIG or defaults to `config/beacon.toml`.
    /// Applies BEACON_* environment overrides after parsing.
    pub fn load_from_env() -> Result<Self> {
        let path = env_config_path();
        let mut cfg = Self::load(&path)?;
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    /// Load configuration from a specific file (TOML or JSON based on extension).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let data = fs::read_to_string(path_ref)
            .with_context(|| format!("unable to read config {}", path_ref.display()))?;
        if is_json(path_ref) {
            Ok(serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON config {}", path_ref.display()))?)
        } else {
            Ok(toml::from_str(&data)
                .with_context(|| format!("invalid TOML config {}", path_ref.display()))?)
        }
    }

    /// Credential files must exist before any connect attempt; a missing file is a
    /// fatal precondition, not a retryable transport failure.
    pub fn validate_paths(&self) -> Result<()> {
        if !self.credentials.root_ca.exists() {
            bail!("root_ca {} missing", self.credentials.root_ca.display());
        }
        if !self.credentials.claim_cert.exists() {
            bail!("claim_cert {} missing", self.credentials.claim_cert.display());
        }
        if !self.credentials.claim_key.exists() {
            bail!("claim_key {} missing", self.credentials.claim_key.display());
        }
        if let (Some(cert), Some(key)) = (
            &self.credentials.operational_cert,
            &self.credentials.operational_key,
        ) {
            if !cert.exists() {
                bail!("operational_cert {} missing", cert.display());
            }
            if !key.exists() {
                bail!("operational_key {} missing", key.display());
            }
        }
        Ok(())
    }

    /// Validate schema-level invariants for ops usage.
    pub fn validate(&self) -> Result<()> {
        if self.device.device_id.is_empty() {
            bail!("device.device_id must be non-empty");
        }
        if self.broker.host.is_empty() {
            bail!("broker.host must be non-empty");
        }
        if self.credentials.operational_cert.is_some() != self.credentials.operational_key.is_some()
        {
            bail!("operational_cert and operational_key must be set together");
        }
        if self.provisioning.template.is_empty() {
            bail!("provisioning.template must be non-empty");
        }
        if self.provisioning.token_topic.is_empty() {
            bail!("provisioning.token_topic must be non-empty");
        }
        if self.provisioning.connect_attempts == 0 {
            bail!("provisioning.connect_attempts must be > 0");
        }
        if self.transport.reconnect_min_seconds > self.transport.reconnect_max_seconds {
            bail!("transport.reconnect_min_seconds must not exceed reconnect_max_seconds");
        }
        if self.transport.operation_timeout_seconds == 0 {
            bail!("transport.operation_timeout_seconds must be > 0");
        }
        if self.transport.queue_depth == 0 {
            bail!("transport.queue_depth must be > 0");
        }
        if self.heartbeat.interval_seconds == 0 {
            bail!("heartbeat.interval_seconds must be > 0");
        }
        self.validate_paths()?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("BEACON_BROKER_HOST") {
            self.broker.host = host;
        }
        if let Ok(port) = std::env::var("BEACON_BROKER_PORT") {
            self.broker.port = port
                .parse()
                .with_context(|| format!("invalid BEACON_BROKER_PORT {port}"))?;
        }
        if let Ok(device_id) = std::env::var("BEACON_DEVICE_ID") {
            self.device.device_id = device_id;
        }
        Ok(())
    }
}

fn env_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("BEACON_CONFIG") {
        PathBuf::from(path)
    } else {
        PathBuf::from("config/beacon.toml")
    }
}

fn is_json(path: &Path) -> bool {
    matches!(path.extension().and_then(|s| s.to_str()), Some("json"))
}

fn default_thing_name_prefix() -> String {
    "Onsyte_".into()
}

fn default_broker_port() -> u16 {
    8883
}

fn default_keep_alive_seconds() -> u64 {
    30
}

fn default_template() -> String {
    "ClaimCertProvisioningTemplate".into()
}

fn default_token_topic() -> String {
    "$aws/certificates/create/json".into()
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_connect_retry_seconds() -> u64 {
    2
}

fn default_token_timeout_seconds() -> u64 {
    10
}

fn default_registration_timeout_seconds() -> u64 {
    15
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_operation_timeout_seconds() -> u64 {
    5
}

fn default_reconnect_min_seconds() -> u64 {
    1
}

fn default_reconnect_max_seconds() -> u64 {
    32
}

fn default_reconnect_stable_seconds() -> u64 {
    20
}

fn default_queue_depth() -> usize {
    1024
}

fn default_heartbeat_interval_seconds() -> u64 {
    10
}
