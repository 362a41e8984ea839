//! Periodic liveness publishing over the operational session.
//!
//! One publisher owns the device's heartbeat sequence. The automatic loop runs
//! as a spawned task under a cancellation token; manual and custom one-shots
//! share the same session and topics but never touch the sequence.

use crate::provisioning::{wire, DeviceIdentity};
use crate::time::Clock;
use crate::transport::{QosLevel, Session};
use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Point-in-time view of the publisher, for shutdown logs and status output.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSnapshot {
    pub running: bool,
    pub sequence: u64,
    pub interval_seconds: u64,
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct HeartbeatPublisher<S: Session, C: Clock> {
    session: Arc<S>,
    identity: DeviceIdentity,
    interval: Duration,
    clock: C,
    /// Monotonic count of automatic beats. Survives stop/start; only a
    /// process restart resets it.
    sequence: Arc<AtomicU64>,
    loop_task: Mutex<Option<LoopHandle>>,
}

impl<S: Session, C: Clock> HeartbeatPublisher<S, C> {
    pub fn new(session: Arc<S>, identity: DeviceIdentity, interval: Duration, clock: C) -> Self {
        Self {
            session,
            identity,
            interval,
            clock,
            sequence: Arc::new(AtomicU64::new(0)),
            loop_task: Mutex::new(None),
        }
    }

    /// Start the automatic loop. A second call while running is a no-op.
    pub fn start(&self) {
        let mut slot = self.loop_task.lock();
        if slot.is_some() {
            debug!("heartbeat loop already running");
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.session),
            self.identity.clone(),
            self.interval,
            self.clock.clone(),
            Arc::clone(&self.sequence),
            cancel.clone(),
        ));
        *slot = Some(LoopHandle { cancel, task });
    }

    /// Cancel the loop and wait for it to drain. Safe to call when stopped.
    pub async fn stop(&self) {
        let handle = self.loop_task.lock().take();
        if let Some(LoopHandle { cancel, task }) = handle {
            cancel.cancel();
            if let Err(err) = task.await {
                warn!("heartbeat loop join failed: {err}");
            }
        }
    }

    pub fn running(&self) -> bool {
        self.loop_task.lock().is_some()
    }

    pub fn snapshot(&self) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            running: self.running(),
            sequence: self.sequence.load(Ordering::SeqCst),
            interval_seconds: self.interval.as_secs(),
        }
    }

    /// One manual beat, outside the automatic sequence (`count` = -1).
    pub async fn publish_now(&self) -> Result<()> {
        let beat = wire::Heartbeat::manual(&self.identity.device_id, self.clock.unix_now());
        let payload = serde_json::to_vec(&beat)?;
        self.session
            .publish(&self.identity.heartbeat_topic(), payload, QosLevel::Qos1)
            .await?;
        Ok(())
    }

    /// Publish an arbitrary JSON object on one of the device's topics,
    /// stamping `timestamp` when the caller left it unset. Returns the
    /// payload as sent.
    pub async fn publish_custom(&self, suffix: &str, mut payload: Value) -> Result<Value> {
        wire::stamp_timestamp(&mut payload, self.clock.unix_now());
        let bytes = serde_json::to_vec(&payload)?;
        self.session
            .publish(&self.identity.device_topic(suffix), bytes, QosLevel::Qos1)
            .await?;
        Ok(payload)
    }
}

/// The automatic loop. Consumes a sequence number per iteration whether or
/// not the publish lands; a failed beat shortens the wait to the error
/// backoff instead of the configured interval.
async fn run_loop<S: Session, C: Clock>(
    session: Arc<S>,
    identity: DeviceIdentity,
    interval: Duration,
    clock: C,
    sequence: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    info!(
        "heartbeat loop started for '{}' at {}s intervals",
        identity.thing_name,
        interval.as_secs()
    );
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let count = sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let beat = wire::Heartbeat::automatic(&identity.device_id, clock.unix_now(), count);
        let delay = match emit(session.as_ref(), &identity, &beat).await {
            Ok(()) => interval,
            Err(err) => {
                warn!(
                    "heartbeat {count} for '{}' failed: {err}",
                    identity.thing_name
                );
                ERROR_BACKOFF
            }
        };
        tokio::select! {
            () = cancel.cancelled() => break,
            () = clock.sleep(delay) => {}
        }
    }
    info!("heartbeat loop stopped for '{}'", identity.thing_name);
}

async fn emit<S: Session>(
    session: &S,
    identity: &DeviceIdentity,
    beat: &wire::Heartbeat,
) -> Result<()> {
    let payload = serde_json::to_vec(beat)?;
    session
        .publish(&identity.heartbeat_topic(), payload, QosLevel::Qos1)
        .await?;
    debug!("heartbeat {} published for '{}'", beat.count, identity.thing_name);
    Ok(())
}
