use std::time::{Duration, Instant, SystemTime};

/// Clock abstraction to enforce deterministic time sourcing in core paths.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    /// Wall-clock seconds since the Unix epoch, used to stamp outbound payloads.
    fn unix_now(&self) -> u64;
    fn sleep(&self, duration: Duration) -> tokio::time::Sleep;
}

/// System-backed clock; replaceable in tests or deterministic replay.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_now(&self) -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) -> tokio::time::Sleep {
        tokio::time::sleep(duration)
    }
}
