//! Priority job queue: strict high > medium > low, FIFO within a level.
//!
//! Pops are pool-aware so compute-only jobs never occupy a browser slot.
//! The queue is unbounded — child enqueue from a worker can never deadlock.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::job::{ExecMode, Job};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Browser,
    Compute,
}

impl PoolKind {
    fn accepts(self, mode: ExecMode) -> bool {
        match self {
            PoolKind::Browser => {
                matches!(mode, ExecMode::BrowserRendered | ExecMode::StaticHttp)
            }
            PoolKind::Compute => matches!(mode, ExecMode::ComputeOnly | ExecMode::StaticHttp),
        }
    }
}

struct QueueState {
    levels: [VecDeque<Box<dyn Job>>; 3],
    closed: bool,
}

pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                levels: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, job: Box<dyn Job>) {
        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            if state.closed {
                return;
            }
            let level = job.priority().index();
            state.levels[level].push_back(job);
        }
        self.notify.notify_waiters();
    }

    /// Close the queue: pending pops and all future pops return None once
    /// no matching job remains.
    pub fn close(&self) {
        self.state.lock().expect("queue lock poisoned").closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("queue lock poisoned").closed
    }

    fn try_pop(&self, pool: PoolKind) -> PopResult {
        let mut state = self.state.lock().expect("queue lock poisoned");
        // High (2) down to low (0)
        for level in (0..3).rev() {
            if let Some(pos) = state.levels[level].iter().position(|j| pool.accepts(j.mode())) {
                if let Some(job) = state.levels[level].remove(pos) {
                    return PopResult::Job(job);
                }
            }
        }
        if state.closed {
            PopResult::Closed
        } else {
            PopResult::Empty
        }
    }

    /// Wait for the next job this pool may run. Returns None when the queue
    /// is closed and holds nothing for this pool.
    pub async fn pop(&self, pool: PoolKind) -> Option<Box<dyn Job>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a concurrent push between
            // the check and the await cannot be missed.
            notified.as_mut().enable();

            match self.try_pop(pool) {
                PopResult::Job(job) => return Some(job),
                PopResult::Closed => return None,
                PopResult::Empty => notified.await,
            }
        }
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().expect("queue lock poisoned");
        state.levels.iter().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum PopResult {
    Job(Box<dyn Job>),
    Empty,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FetchResponse, JobContext, Priority, ProcessOutcome};
    use async_trait::async_trait;

    struct TestJob {
        id: String,
        priority: Priority,
        mode: ExecMode,
    }

    impl TestJob {
        fn boxed(id: &str, priority: Priority, mode: ExecMode) -> Box<dyn Job> {
            Box::new(Self { id: id.to_string(), priority, mode })
        }
    }

    #[async_trait]
    impl Job for TestJob {
        fn id(&self) -> &str {
            &self.id
        }
        fn priority(&self) -> Priority {
            self.priority
        }
        fn mode(&self) -> ExecMode {
            self.mode
        }
        fn url(&self) -> String {
            String::new()
        }
        async fn process(
            &mut self,
            _ctx: &JobContext,
            _resp: FetchResponse,
        ) -> anyhow::Result<ProcessOutcome> {
            Ok(ProcessOutcome::empty())
        }
    }

    #[tokio::test]
    async fn pops_by_priority_then_fifo() {
        let queue = JobQueue::new();
        queue.push(TestJob::boxed("low-1", Priority::Low, ExecMode::StaticHttp));
        queue.push(TestJob::boxed("high-1", Priority::High, ExecMode::StaticHttp));
        queue.push(TestJob::boxed("med-1", Priority::Medium, ExecMode::StaticHttp));
        queue.push(TestJob::boxed("high-2", Priority::High, ExecMode::StaticHttp));

        let order: Vec<String> = [
            queue.pop(PoolKind::Compute).await.unwrap().id().to_string(),
            queue.pop(PoolKind::Compute).await.unwrap().id().to_string(),
            queue.pop(PoolKind::Compute).await.unwrap().id().to_string(),
            queue.pop(PoolKind::Compute).await.unwrap().id().to_string(),
        ]
        .to_vec();
        assert_eq!(order, ["high-1", "high-2", "med-1", "low-1"]);
    }

    #[tokio::test]
    async fn compute_pool_never_sees_browser_jobs() {
        let queue = JobQueue::new();
        queue.push(TestJob::boxed("b", Priority::High, ExecMode::BrowserRendered));
        queue.push(TestJob::boxed("c", Priority::Low, ExecMode::ComputeOnly));

        let popped = queue.pop(PoolKind::Compute).await.unwrap();
        assert_eq!(popped.id(), "c");

        let popped = queue.pop(PoolKind::Browser).await.unwrap();
        assert_eq!(popped.id(), "b");
    }

    #[tokio::test]
    async fn static_jobs_run_on_either_pool() {
        let queue = JobQueue::new();
        queue.push(TestJob::boxed("s", Priority::Medium, ExecMode::StaticHttp));
        assert!(queue.pop(PoolKind::Browser).await.is_some());

        queue.push(TestJob::boxed("s2", Priority::Medium, ExecMode::StaticHttp));
        assert!(queue.pop(PoolKind::Compute).await.is_some());
    }

    #[tokio::test]
    async fn close_releases_waiting_pop() {
        let queue = std::sync::Arc::new(JobQueue::new());
        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.pop(PoolKind::Compute).await.is_none() });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.close();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn push_wakes_waiting_pop() {
        let queue = std::sync::Arc::new(JobQueue::new());
        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.pop(PoolKind::Compute).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.push(TestJob::boxed("x", Priority::Low, ExecMode::ComputeOnly));
        assert_eq!(waiter.await.unwrap().unwrap().id(), "x");
    }
}
