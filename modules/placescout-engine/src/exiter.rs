//! Exit monitor: counts seeds and places, cancels the run when every seed
//! and every discovered place has completed, or when nothing has completed
//! for the inactivity window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Default)]
pub struct ExitMonitor {
    seed_total: AtomicU64,
    seed_completed: AtomicU64,
    places_found: AtomicU64,
    places_completed: AtomicU64,
    last_activity: Mutex<Option<Instant>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExitStats {
    pub seed_total: u64,
    pub seed_completed: u64,
    pub places_found: u64,
    pub places_completed: u64,
}

impl ExitMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_seed_total(&self, n: u64) {
        self.seed_total.store(n, Ordering::SeqCst);
        self.touch();
    }

    /// Runtime-spawned listing jobs (subdivision children, browser
    /// fallbacks) count as seeds; callers bump the total before their own
    /// completion so the target condition never holds with work in flight.
    pub fn incr_seed_total(&self, n: u64) {
        self.seed_total.fetch_add(n, Ordering::SeqCst);
        self.touch();
    }

    pub fn incr_seed_completed(&self, n: u64) {
        self.seed_completed.fetch_add(n, Ordering::SeqCst);
        self.touch();
    }

    pub fn incr_places_found(&self, n: u64) {
        self.places_found.fetch_add(n, Ordering::SeqCst);
        self.touch();
    }

    pub fn incr_places_completed(&self, n: u64) {
        self.places_completed.fetch_add(n, Ordering::SeqCst);
        self.touch();
    }

    fn touch(&self) {
        *self.last_activity.lock().expect("activity lock poisoned") = Some(Instant::now());
    }

    pub fn snapshot(&self) -> ExitStats {
        ExitStats {
            seed_total: self.seed_total.load(Ordering::SeqCst),
            seed_completed: self.seed_completed.load(Ordering::SeqCst),
            places_found: self.places_found.load(Ordering::SeqCst),
            places_completed: self.places_completed.load(Ordering::SeqCst),
        }
    }

    /// Target condition: all seeds done and all found places completed.
    pub fn targets_met(&self) -> bool {
        let s = self.snapshot();
        s.seed_total > 0
            && s.seed_completed >= s.seed_total
            && s.places_completed >= s.places_found
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .expect("activity lock poisoned")
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Periodic watch loop: fires `cancel` when targets are met or the run
    /// has been inactive past the threshold. Exits when `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken, inactivity: Duration) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {
                    if self.targets_met() {
                        let s = self.snapshot();
                        info!(
                            seeds = s.seed_completed,
                            places = s.places_completed,
                            "Exit monitor: targets reached"
                        );
                        cancel.cancel();
                        return;
                    }
                    if inactivity > Duration::ZERO && self.idle_for() > inactivity {
                        info!(idle_secs = self.idle_for().as_secs(), "Exit monitor: inactivity");
                        cancel.cancel();
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_not_met_without_seeds() {
        let m = ExitMonitor::new();
        assert!(!m.targets_met());
    }

    #[test]
    fn spawned_seeds_defer_target() {
        let m = ExitMonitor::new();
        m.set_seed_total(1);
        // A subdividing tile registers its children before completing.
        m.incr_seed_total(4);
        m.incr_seed_completed(1);
        assert!(!m.targets_met());
        m.incr_seed_completed(4);
        assert!(m.targets_met());
    }

    #[test]
    fn targets_met_when_seeds_and_places_balance() {
        let m = ExitMonitor::new();
        m.set_seed_total(2);
        m.incr_seed_completed(2);
        assert!(m.targets_met(), "no places found means nothing outstanding");

        m.incr_places_found(3);
        assert!(!m.targets_met());
        m.incr_places_completed(3);
        assert!(m.targets_met());
    }

    #[tokio::test]
    async fn run_cancels_on_target() {
        let m = ExitMonitor::new();
        m.set_seed_total(1);
        m.incr_seed_completed(1);
        let cancel = CancellationToken::new();
        let deadline = tokio::time::timeout(
            Duration::from_secs(5),
            m.run(cancel.clone(), Duration::from_secs(60)),
        );
        deadline.await.expect("monitor should fire promptly");
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn run_exits_when_cancelled_externally() {
        let m = ExitMonitor::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        m.run(cancel, Duration::from_secs(60)).await;
    }
}
