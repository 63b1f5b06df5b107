//! Recurring whole-document scans with visibility-aware backoff.

use crate::intercept::isolated;
use crate::types::{Result, ScoutError};
use std::sync::Weak;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::trace;

/// Interval policy of the scan loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    base: Duration,
    max: Duration,
}

impl Scheduler {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay before the next tick: doubled (capped) while hidden, the base
    /// interval otherwise.
    pub fn next_delay(&self, current: Duration, hidden: bool) -> Duration {
        if hidden {
            current.saturating_mul(2).min(self.max)
        } else {
            self.base
        }
    }
}

/// Target of a scan loop.
pub trait Tick: Send + Sync + 'static {
    /// Whether the loop started at `epoch` should keep running.
    fn alive(&self, epoch: u64) -> bool;

    fn is_hidden(&self) -> bool;

    fn tick(&self, epoch: u64) -> Result<()>;

    /// Called with the error of a failed tick. The loop continues.
    fn tick_failed(&self, epoch: u64, error: ScoutError);
}

/// Run ticks against `target` until it is dropped or no longer alive.
pub fn spawn<T: Tick>(target: Weak<T>, epoch: u64, scheduler: Scheduler) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delay = scheduler.base();
        loop {
            time::sleep(delay).await;

            let Some(target) = target.upgrade() else {
                break;
            };
            if !target.alive(epoch) {
                break;
            }

            if let Err(e) = isolated(|| target.tick(epoch)).and_then(|result| result) {
                target.tick_failed(epoch, e);
            }

            let hidden = target.is_hidden();
            delay = scheduler.next_delay(delay, hidden);
            trace!("Next scan in {:?} (hidden: {})", delay, hidden);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Default)]
    struct Counter {
        ticks: AtomicUsize,
        failures: AtomicUsize,
        hidden: AtomicBool,
        fail: AtomicBool,
    }

    impl Tick for Counter {
        fn alive(&self, epoch: u64) -> bool {
            epoch == 1
        }

        fn is_hidden(&self) -> bool {
            self.hidden.load(Ordering::SeqCst)
        }

        fn tick(&self, _epoch: u64) -> Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                panic!("tick exploded");
            }
            Ok(())
        }

        fn tick_failed(&self, _epoch: u64, _error: ScoutError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_next_delay() {
        let scheduler = Scheduler::new(Duration::from_secs(1), Duration::from_secs(30));
        let mut delay = scheduler.base();
        let mut seen = Vec::new();
        for _ in 0..6 {
            delay = scheduler.next_delay(delay, true);
            seen.push(delay.as_secs());
        }
        assert_eq!(seen, vec![2, 4, 8, 16, 30, 30]);
        assert_eq!(scheduler.next_delay(delay, false), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_every_base_interval_when_visible() {
        let counter = Arc::new(Counter::default());
        let handle = spawn(Arc::downgrade(&counter), 1, Scheduler::new(Duration::from_secs(1), Duration::from_secs(30)));

        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 3);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backs_off_while_hidden() {
        let counter = Arc::new(Counter::default());
        counter.hidden.store(true, Ordering::SeqCst);
        let start = Instant::now();
        let handle = spawn(Arc::downgrade(&counter), 1, Scheduler::new(Duration::from_secs(1), Duration::from_secs(30)));

        // Ticks at 1s, 3s, 7s, 15s.
        time::sleep(Duration::from_secs(16)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_secs(16));
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_tick_keeps_loop_alive() {
        let counter = Arc::new(Counter::default());
        counter.fail.store(true, Ordering::SeqCst);
        let handle = spawn(Arc::downgrade(&counter), 1, Scheduler::new(Duration::from_secs(1), Duration::from_secs(30)));

        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 2);
        assert_eq!(counter.failures.load(Ordering::SeqCst), 2);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_target_dropped_or_stale() {
        let counter = Arc::new(Counter::default());
        let handle = spawn(Arc::downgrade(&counter), 2, Scheduler::new(Duration::from_secs(1), Duration::from_secs(30)));
        time::sleep(Duration::from_millis(1500)).await;
        assert!(handle.is_finished());
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 0);

        let dropped = Arc::new(Counter::default());
        let handle = spawn(Arc::downgrade(&dropped), 1, Scheduler::new(Duration::from_secs(1), Duration::from_secs(30)));
        drop(dropped);
        time::sleep(Duration::from_millis(1500)).await;
        assert!(handle.is_finished());
    }
}
