//! rumqttc-backed transport sessions.
//!
//! [`MqttConnector::connect`] drives the event loop inline until the broker
//! acknowledges the connection, then hands the loop to a background driver
//! task that routes inbound publishes to subscription streams and reconnects
//! with bounded backoff. An orderly close queues the MQTT disconnect behind
//! any pending requests and waits for the driver to flush them before the
//! link drops.

use crate::config::Config;
use crate::transport::{
    tls, topic_matches, Connector, InboundMessage, QosLevel, Session, Subscription, TransportError,
};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS,
    TlsConfiguration, Transport,
};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-subscription queue depth between the driver task and a consumer.
const SUBSCRIPTION_QUEUE: usize = 64;

/// Connection settings for one broker endpoint and credential pair.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub client_id_prefix: String,
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub queue_depth: usize,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub reconnect_stable: Duration,
}

impl MqttSettings {
    /// Settings for the provisioning session using the shared claim credential.
    pub fn for_claim(config: &Config) -> Self {
        let (cert, key) = config.credentials.claim_pair();
        Self::build(config, "beacon-claim", cert.into(), key.into())
    }

    /// Settings for the post-provisioning session. Uses the distinct
    /// operational credential when configured, the claim pair otherwise.
    pub fn for_operational(config: &Config) -> Self {
        let (cert, key) = config.credentials.operational_pair();
        Self::build(config, "beacon", cert.into(), key.into())
    }

    fn build(config: &Config, prefix: &str, cert: PathBuf, key: PathBuf) -> Self {
        Self {
            host: config.broker.host.clone(),
            port: config.broker.port,
            keep_alive: Duration::from_secs(config.broker.keep_alive_seconds),
            client_id_prefix: prefix.to_string(),
            ca: config.credentials.root_ca.clone(),
            cert,
            key,
            connect_timeout: config.transport.connect_timeout(),
            operation_timeout: config.transport.operation_timeout(),
            queue_depth: config.transport.queue_depth,
            reconnect_min: Duration::from_secs(config.transport.reconnect_min_seconds),
            reconnect_max: Duration::from_secs(config.transport.reconnect_max_seconds),
            reconnect_stable: Duration::from_secs(config.transport.reconnect_stable_seconds),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opens [`MqttSession`]s for one endpoint/credential pair. TLS material is
/// loaded once at construction; a missing or unparsable file fails here,
/// before any network activity.
pub struct MqttConnector {
    settings: MqttSettings,
    tls: Arc<rustls::ClientConfig>,
}

impl MqttConnector {
    pub fn new(settings: MqttSettings) -> Result<Self> {
        let tls = tls::build_client_config(&settings.ca, &settings.cert, &settings.key)?;
        Ok(Self {
            settings,
            tls: Arc::new(tls),
        })
    }
}

#[async_trait]
impl Connector for MqttConnector {
    type Session = MqttSession;

    async fn connect(&self) -> Result<MqttSession, TransportError> {
        let client_id = format!(
            "{}-{}",
            self.settings.client_id_prefix,
            uuid::Uuid::new_v4()
                .to_string()
                .split('-')
                .next()
                .unwrap_or("xxxx")
        );

        let mut mqtt = MqttOptions::new(&client_id, &self.settings.host, self.settings.port);
        mqtt.set_keep_alive(self.settings.keep_alive);
        mqtt.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
            self.tls.clone(),
        )));

        let (client, mut eventloop) = AsyncClient::new(mqtt, self.settings.queue_depth);
        let endpoint = self.settings.endpoint();

        // Drive the event loop inline until the broker acknowledges; nothing
        // runs in the background until the connection is live.
        let deadline = tokio::time::sleep(self.settings.connect_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => {
                    return Err(TransportError::ConnectTimeout { endpoint });
                }
                res = eventloop.poll() => match res {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            debug!("connected to {} as {}", endpoint, client_id);
                            break;
                        }
                        return Err(TransportError::ConnectRejected {
                            reason: format!("{:?}", ack.code),
                        });
                    }
                    Ok(_) => {}
                    Err(err) => {
                        return Err(TransportError::ConnectFailed {
                            endpoint,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        Ok(MqttSession::start(client, eventloop, client_id, &self.settings))
    }
}

struct Route {
    tx: mpsc::Sender<InboundMessage>,
    qos: QosLevel,
}

type RouteTable = Arc<Mutex<HashMap<String, Route>>>;

/// Live broker connection. Cheap to share behind an `Arc`; publish and
/// subscribe are safe for concurrent use.
pub struct MqttSession {
    client: AsyncClient,
    client_id: String,
    routes: RouteTable,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    shutdown: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
    operation_timeout: Duration,
}

impl MqttSession {
    fn start(
        client: AsyncClient,
        eventloop: EventLoop,
        client_id: String,
        settings: &MqttSettings,
    ) -> Self {
        let routes: RouteTable = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let closing = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            settings.endpoint(),
            routes.clone(),
            connected.clone(),
            shutdown.clone(),
            closing.clone(),
            Backoff::new(settings.reconnect_min, settings.reconnect_max),
            settings.reconnect_stable,
        ));

        Self {
            client,
            client_id,
            routes,
            connected,
            closing,
            shutdown,
            driver: Mutex::new(Some(driver)),
            operation_timeout: settings.operation_timeout,
        }
    }

    /// Bound a client request with the operation timeout. The await resolves
    /// once the request is queued for the driver, so only a full queue with a
    /// stalled driver can run the clock down.
    async fn bounded_request<F>(&self, request: F) -> Result<(), String>
    where
        F: Future<Output = Result<(), rumqttc::ClientError>>,
    {
        match tokio::time::timeout(self.operation_timeout, request).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "request not queued within {}s",
                self.operation_timeout.as_secs()
            )),
        }
    }
}

#[async_trait]
impl Session for MqttSession {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn connected(&self) -> bool {
        !self.shutdown.is_cancelled()
            && !self.closing.load(Ordering::SeqCst)
            && self.connected.load(Ordering::SeqCst)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
    ) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() || self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::SessionClosed);
        }
        self.bounded_request(self.client.publish(topic, qos.to_rumqttc(), false, payload))
            .await
            .map_err(|reason| TransportError::Publish {
                topic: topic.to_string(),
                reason,
            })
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QosLevel,
    ) -> Result<Subscription, TransportError> {
        if self.shutdown.is_cancelled() || self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::SessionClosed);
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_QUEUE);
        {
            let mut routes = self.routes.lock();
            if routes.contains_key(filter) {
                return Err(TransportError::AlreadySubscribed {
                    topic: filter.to_string(),
                });
            }
            routes.insert(filter.to_string(), Route { tx, qos });
        }
        if let Err(reason) = self
            .bounded_request(self.client.subscribe(filter, qos.to_rumqttc()))
            .await
        {
            self.routes.lock().remove(filter);
            return Err(TransportError::Subscribe {
                topic: filter.to_string(),
                reason,
            });
        }
        Ok(Subscription::new(filter.to_string(), rx))
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        if self.routes.lock().remove(filter).is_none() {
            return Ok(());
        }
        if self.shutdown.is_cancelled() || self.closing.load(Ordering::SeqCst) {
            // Link already torn down; the local release is all that remains.
            return Ok(());
        }
        self.bounded_request(self.client.unsubscribe(filter))
            .await
            .map_err(|reason| TransportError::Unsubscribe {
                topic: filter.to_string(),
                reason,
            })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.closing.swap(true, Ordering::SeqCst) || self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.connected.store(false, Ordering::SeqCst);
        // Queue the MQTT disconnect behind any pending publishes, then let
        // the driver flush the queue until the broker closes the link. The
        // token is cancelled only after the drain so queued work is not lost.
        let driver = self.driver.lock().take();
        match self.bounded_request(self.client.disconnect()).await {
            Ok(()) => {
                if let Some(task) = driver {
                    match tokio::time::timeout(self.operation_timeout, task).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!("driver task failed during close: {err}"),
                        Err(_) => warn!(
                            "driver still busy after {}s; dropping the link",
                            self.operation_timeout.as_secs()
                        ),
                    }
                }
            }
            Err(reason) => debug!("disconnect request not delivered: {reason}"),
        }
        self.shutdown.cancel();
        Ok(())
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    endpoint: String,
    routes: RouteTable,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
    closing: Arc<AtomicBool>,
    mut backoff: Backoff,
    stable_after: Duration,
) {
    let mut connected_since = Some(Instant::now());
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                break;
            }
            res = eventloop.poll() => match res {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    // The initial ConnAck was consumed during connect, so any
                    // seen here marks a reconnect; broker-side subscriptions
                    // were lost with the old connection.
                    if ack.code == ConnectReturnCode::Success {
                        debug!("reconnected to {}", endpoint);
                        connected.store(true, Ordering::SeqCst);
                        connected_since = Some(Instant::now());
                        resubscribe(&client, &routes).await;
                    } else {
                        warn!("broker rejected reconnect: {:?}", ack.code);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    dispatch(&routes, &publish);
                }
                Ok(_) => {}
                Err(err) => {
                    connected.store(false, Ordering::SeqCst);
                    if closing.load(Ordering::SeqCst) || shutdown.is_cancelled() {
                        debug!("link to {} closed: {err}", endpoint);
                        break;
                    }
                    if let Some(since) = connected_since.take() {
                        if since.elapsed() >= stable_after {
                            backoff.reset();
                        }
                    }
                    let delay = backoff.next_delay();
                    warn!(
                        "connection to {} lost: {err}; reconnecting in {}ms",
                        endpoint,
                        delay.as_millis()
                    );
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

fn dispatch(routes: &Mutex<HashMap<String, Route>>, publish: &rumqttc::Publish) {
    let routes = routes.lock();
    let mut delivered = false;
    for (filter, route) in routes.iter() {
        if topic_matches(filter, &publish.topic) {
            delivered = true;
            let msg = InboundMessage {
                topic: publish.topic.clone(),
                payload: publish.payload.clone(),
            };
            if route.tx.try_send(msg).is_err() {
                warn!(
                    "subscriber for '{}' full or gone; dropping message on '{}'",
                    filter, publish.topic
                );
            }
        }
    }
    if !delivered {
        debug!("no subscriber for message on '{}'", publish.topic);
    }
}

async fn resubscribe(client: &AsyncClient, routes: &RouteTable) {
    let filters: Vec<(String, QosLevel)> = routes
        .lock()
        .iter()
        .map(|(filter, route)| (filter.clone(), route.qos))
        .collect();
    for (filter, qos) in filters {
        if let Err(err) = client.subscribe(filter.clone(), qos.to_rumqttc()).await {
            warn!("resubscribe to '{}' failed: {err}", filter);
        }
    }
}

// -----------------------------------------------------------------------------
// Reconnect backoff
// -----------------------------------------------------------------------------

/// Backoff configuration for reconnection attempts.
struct Backoff {
    current_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        let min_ms = min.as_millis() as u64;
        Self {
            current_ms: min_ms,
            min_ms,
            max_ms: max.as_millis() as u64,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current_ms;
        // Exponential backoff with cap
        self.current_ms = (self.current_ms * 2).min(self.max_ms);
        // Add jitter (±25%)
        let jitter = delay / 4;
        if jitter == 0 {
            return Duration::from_millis(delay);
        }
        let actual = delay + (rand_u64() % (jitter * 2)).saturating_sub(jitter);
        Duration::from_millis(actual)
    }

    fn reset(&mut self) {
        self.current_ms = self.min_ms;
    }
}

/// Simple pseudo-random number using time-based seed.
fn rand_u64() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1)
}

impl QosLevel {
    fn to_rumqttc(self) -> QoS {
        match self {
            QosLevel::Qos0 => QoS::AtMostOnce,
            QosLevel::Qos1 => QoS::AtLeastOnce,
            QosLevel::Qos2 => QoS::ExactlyOnce,
        }
    }
}
