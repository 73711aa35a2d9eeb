//! Periodic task plumbing
//!
//! Every sweep runs behind a [`SingleFlight`] so a slow tick, or a manual
//! trigger racing the timer, never overlaps with itself.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// At most one holder at a time; entering while held fails instead of waiting
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter, or `None` when a previous run is still in flight
    pub fn try_enter(&self) -> Option<SingleFlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SingleFlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the [`SingleFlight`] on drop
#[derive(Debug)]
pub struct SingleFlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for SingleFlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Spawn a loop that awaits `tick` every `period`.
///
/// The first run happens one full period after spawning. Missed ticks are
/// skipped rather than bunched up.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!("🔄 Starting {} loop (every {:?})", name, period);

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            debug!("⏱️ {} tick", name);
            tick().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_single_flight_rejects_reentry() {
        let flight = SingleFlight::new();
        let guard = flight.try_enter().unwrap();
        assert!(flight.is_busy());
        assert!(flight.try_enter().is_none());
        // clones share the flag
        assert!(flight.clone().try_enter().is_none());
        drop(guard);
        assert!(!flight.is_busy());
        assert!(flight.try_enter().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_runs_after_each_period() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handle = spawn_periodic("test", Duration::from_secs(5), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(5_100 * 3)).await;
        handle.abort();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
