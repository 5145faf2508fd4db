//! Watchdog (spec §4.9): per-object, per-session liveness monitoring over
//! a sideband `FeedWatchdog` heartbeat. Only local-transport sessions are
//! monitored.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::warn;

use crate::ids::SessionId;
use crate::worker::WorkerHandle;

pub trait BarkListener: Fn(SessionId) + Send + Sync + 'static {}
impl<T: Fn(SessionId) + Send + Sync + 'static> BarkListener for T {}

struct WatchdogState {
    missed: AtomicU32,
    dropped: std::sync::atomic::AtomicBool,
}

/// Drives one session's heartbeat timer. `feed()` is called whenever a
/// `FeedWatchdog` sideband arrives from the peer; missing `max_missed`
/// consecutive beats fires `on_bark` once, and a subsequent `feed()`
/// resumes normal state (spec §4.9).
pub struct Watchdog {
    state: Arc<WatchdogState>,
}

impl Watchdog {
    /// Spawns the heartbeat timer on `worker`. Only call this for
    /// sessions whose channel reports `is_local() == true` (spec §4.9).
    pub fn spawn(
        session: SessionId,
        interval_ms: u64,
        max_missed: u32,
        worker: WorkerHandle,
        on_bark: impl BarkListener,
        mut send_feed: impl FnMut() + Send + 'static,
    ) -> Self {
        let state = Arc::new(WatchdogState {
            missed: AtomicU32::new(0),
            dropped: std::sync::atomic::AtomicBool::new(false),
        });
        let timer_state = state.clone();
        worker.post_async_normal(move || {
            tokio::spawn(async move {
                let mut ticker = interval(Duration::from_millis(interval_ms));
                loop {
                    ticker.tick().await;
                    send_feed();
                    let missed = timer_state.missed.fetch_add(1, Ordering::SeqCst) + 1;
                    if missed >= max_missed && !timer_state.dropped.swap(true, Ordering::SeqCst) {
                        warn!(session_id = session.as_u64(), missed, "watchdog bark");
                        on_bark(session);
                    }
                }
            });
        });
        Watchdog { state }
    }

    /// Call on receipt of a `FeedWatchdog` response from the peer.
    pub fn feed(&self) {
        self.state.missed.store(0, Ordering::SeqCst);
        self.state.dropped.store(false, Ordering::SeqCst);
    }

    pub fn is_dropped(&self) -> bool {
        self.state.dropped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Worker;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn missing_feeds_fires_bark_once() {
        let worker = Worker::spawn("test-watchdog");
        let handle = worker.handle();
        let barked = Arc::new(AtomicBool::new(false));
        let barked2 = barked.clone();
        let wd = Watchdog::spawn(
            SessionId::next(),
            10,
            2,
            handle,
            move |_sid| barked2.store(true, Ordering::SeqCst),
            || {},
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(wd.is_dropped());
        assert!(barked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn feed_resets_missed_count() {
        let worker = Worker::spawn("test-watchdog-feed");
        let handle = worker.handle();
        let wd = Watchdog::spawn(SessionId::next(), 10, 3, handle, |_sid| {}, || {});
        tokio::time::sleep(Duration::from_millis(15)).await;
        wd.feed();
        assert!(!wd.is_dropped());
    }
}
