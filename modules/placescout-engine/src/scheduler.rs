//! Priority-driven dispatch over the browser and compute worker pools.
//!
//! Each seed's subtree runs under its own cancellation scope with a hard
//! deadline and an exit-monitor watch. Workers pull from the shared queue,
//! fetch according to the job's execution mode, run `process`, enqueue any
//! children, and forward result entries to the sinks when the job's
//! result-inclusion flag is still set.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use headless_client::BrowserDriver;

use crate::exiter::ExitMonitor;
use crate::fetch::StaticFetcher;
use crate::job::{ExecMode, FetchResponse, Job, JobContext};
use crate::queue::{JobQueue, PoolKind};
use crate::sink::ResultSink;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub browser_workers: usize,
    pub compute_workers: usize,
    /// Cancel a seed when no job has completed for this long.
    pub inactivity_timeout: Duration,
    /// Hard per-seed deadline; clamped to a 180-second floor.
    pub seed_deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| (n.get() / 2).max(1))
            .unwrap_or(1);
        Self {
            browser_workers: workers,
            compute_workers: workers.max(2),
            inactivity_timeout: Duration::from_secs(180),
            seed_deadline: Duration::from_secs(180),
        }
    }
}

impl SchedulerConfig {
    /// Apply the per-seed deadline rule: `max(180, configured_max_time)`.
    pub fn with_max_time_secs(mut self, max_time_secs: u64) -> Self {
        self.seed_deadline = Duration::from_secs(max_time_secs.max(180));
        self
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub entries_emitted: u64,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "jobs_completed={} jobs_failed={} entries_emitted={}",
            self.jobs_completed, self.jobs_failed, self.entries_emitted
        )
    }
}

#[derive(Default)]
struct StatCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    emitted: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> RunStats {
        RunStats {
            jobs_completed: self.completed.load(Ordering::SeqCst),
            jobs_failed: self.failed.load(Ordering::SeqCst),
            entries_emitted: self.emitted.load(Ordering::SeqCst),
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    driver: Option<Arc<dyn BrowserDriver>>,
    fetcher: StaticFetcher,
    sinks: tokio::sync::Mutex<Vec<Box<dyn ResultSink>>>,
    exiter: Arc<ExitMonitor>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        driver: Option<Arc<dyn BrowserDriver>>,
        sinks: Vec<Box<dyn ResultSink>>,
        exiter: Arc<ExitMonitor>,
    ) -> Self {
        Self {
            config,
            driver,
            fetcher: StaticFetcher::new(),
            sinks: tokio::sync::Mutex::new(sinks),
            exiter,
        }
    }

    pub fn exit_monitor(&self) -> Arc<ExitMonitor> {
        self.exiter.clone()
    }

    /// Run every seed to completion (or deadline), sequentially. Entries
    /// already emitted survive a seed's cancellation.
    pub async fn run(&self, seeds: Vec<Box<dyn Job>>) -> Result<RunStats> {
        self.exiter.set_seed_total(seeds.len() as u64);
        let total_seeds = seeds.len();

        let mut totals = RunStats::default();
        for (i, seed) in seeds.into_iter().enumerate() {
            info!(
                seed = i + 1,
                total = total_seeds,
                deadline_secs = self.config.seed_deadline.as_secs(),
                "Running seed"
            );
            let stats = self.run_seed(seed).await;
            totals.jobs_completed += stats.jobs_completed;
            totals.jobs_failed += stats.jobs_failed;
            totals.entries_emitted += stats.entries_emitted;
        }

        let mut sinks = self.sinks.lock().await;
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.flush().await {
                warn!(error = %e, "sink flush failed");
            }
        }

        Ok(totals)
    }

    async fn run_seed(&self, seed: Box<dyn Job>) -> RunStats {
        let cancel = CancellationToken::new();
        let queue = JobQueue::new();
        let pending = AtomicUsize::new(1);
        let stats = StatCounters::default();
        let ctx = JobContext::new(self.fetcher.client(), cancel.clone());

        queue.push(seed);

        let mut workers = Vec::with_capacity(self.config.browser_workers + self.config.compute_workers);
        for _ in 0..self.config.browser_workers {
            workers.push(self.worker_loop(PoolKind::Browser, &queue, &pending, &ctx, &stats, &cancel));
        }
        for _ in 0..self.config.compute_workers {
            workers.push(self.worker_loop(PoolKind::Compute, &queue, &pending, &ctx, &stats, &cancel));
        }

        let work = async {
            join_all(workers).await;
            // Natural drain: release the watchdog and exit monitor.
            cancel.cancel();
        };

        let watchdog = async {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.seed_deadline) => {
                    info!("Seed deadline reached, cancelling subtree");
                    cancel.cancel();
                }
            }
        };

        let monitor = self.exiter.run(cancel.clone(), self.config.inactivity_timeout);

        tokio::join!(work, watchdog, monitor);

        stats.snapshot()
    }

    async fn worker_loop(
        &self,
        pool: PoolKind,
        queue: &JobQueue,
        pending: &AtomicUsize,
        ctx: &JobContext,
        stats: &StatCounters,
        cancel: &CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    queue.close();
                    return;
                }
                job = queue.pop(pool) => {
                    let Some(mut job) = job else { return };
                    self.execute_job(&mut job, queue, pending, ctx, stats, cancel).await;
                    // Last pending job closes the queue so idle workers exit.
                    if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                        queue.close();
                    }
                }
            }
        }
    }

    async fn execute_job(
        &self,
        job: &mut Box<dyn Job>,
        queue: &JobQueue,
        pending: &AtomicUsize,
        ctx: &JobContext,
        stats: &StatCounters,
        cancel: &CancellationToken,
    ) {
        // A cancelled job is discarded, never retried.
        if cancel.is_cancelled() {
            return;
        }

        let resp = match self.fetch_with_retries(job, cancel).await {
            Some(resp) => resp,
            None => {
                if !cancel.is_cancelled() {
                    stats.failed.fetch_add(1, Ordering::SeqCst);
                }
                return;
            }
        };

        if cancel.is_cancelled() {
            return;
        }

        match job.process(ctx, resp).await {
            Ok(outcome) => {
                for child in outcome.next {
                    pending.fetch_add(1, Ordering::SeqCst);
                    queue.push(child);
                }
                if job.use_in_results() && !outcome.entries.is_empty() {
                    let mut sinks = self.sinks.lock().await;
                    for sink in sinks.iter_mut() {
                        if let Err(e) = sink.write(job.id(), &outcome.entries).await {
                            warn!(job_id = job.id(), error = %e, "result sink write failed");
                        }
                    }
                    stats.emitted.fetch_add(outcome.entries.len() as u64, Ordering::SeqCst);
                }
                stats.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(job_id = job.id(), url = job.url(), error = %e, "job process failed");
                stats.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Fetch according to the job's mode, retrying fetch-level failures up
    /// to the job's budget. Returns None when the budget is exhausted.
    async fn fetch_with_retries(
        &self,
        job: &mut Box<dyn Job>,
        cancel: &CancellationToken,
    ) -> Option<FetchResponse> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let resp = tokio::select! {
                _ = cancel.cancelled() => return None,
                resp = self.fetch_once(job) => resp,
            };

            if resp.error.is_none() || job.process_on_fetch_error() {
                return Some(resp);
            }

            attempt += 1;
            if attempt > job.max_retries() {
                warn!(
                    job_id = job.id(),
                    url = job.url(),
                    error = resp.error.as_deref().unwrap_or(""),
                    attempts = attempt,
                    "fetch retries exhausted"
                );
                return None;
            }
        }
    }

    async fn fetch_once(&self, job: &mut Box<dyn Job>) -> FetchResponse {
        match job.mode() {
            ExecMode::ComputeOnly => FetchResponse::stub(&job.url()),
            ExecMode::StaticHttp => self.fetcher.fetch(&job.url()).await,
            ExecMode::BrowserRendered => match &self.driver {
                Some(driver) => match driver.open_page().await {
                    Ok(mut page) => job.browser_actions(page.as_mut()).await,
                    Err(e) => FetchResponse::failed(&job.url(), e.to_string()),
                },
                None => FetchResponse::failed(&job.url(), "no browser driver configured"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Priority, ProcessOutcome};
    use async_trait::async_trait;
    use placescout_common::Entry;
    use std::sync::Mutex as StdMutex;

    fn entry(title: &str) -> Entry {
        Entry { title: title.to_string(), category: "Cafe".to_string(), ..Default::default() }
    }

    /// Compute-only job that emits one entry, optionally spawning a child.
    struct EmitJob {
        id: String,
        spawn_child: bool,
        include: bool,
    }

    #[async_trait]
    impl Job for EmitJob {
        fn id(&self) -> &str {
            &self.id
        }
        fn priority(&self) -> Priority {
            Priority::Medium
        }
        fn mode(&self) -> ExecMode {
            ExecMode::ComputeOnly
        }
        fn url(&self) -> String {
            "about:blank".to_string()
        }
        fn use_in_results(&self) -> bool {
            self.include
        }
        async fn process(
            &mut self,
            _ctx: &JobContext,
            _resp: FetchResponse,
        ) -> anyhow::Result<ProcessOutcome> {
            let mut outcome = ProcessOutcome::entry(entry(&self.id));
            if self.spawn_child {
                // Child emits; parent flips itself out of results.
                self.include = false;
                outcome.next.push(Box::new(EmitJob {
                    id: format!("{}-child", self.id),
                    spawn_child: false,
                    include: true,
                }));
                outcome.entries.clear();
            }
            Ok(outcome)
        }
    }

    struct CollectSink {
        titles: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl ResultSink for CollectSink {
        async fn write(&mut self, _job_id: &str, entries: &[Entry]) -> anyhow::Result<()> {
            let mut titles = self.titles.lock().unwrap();
            for e in entries {
                titles.push(e.title.clone());
            }
            Ok(())
        }
    }

    fn test_scheduler(titles: Arc<StdMutex<Vec<String>>>) -> Scheduler {
        let config = SchedulerConfig {
            browser_workers: 1,
            compute_workers: 2,
            inactivity_timeout: Duration::from_secs(30),
            seed_deadline: Duration::from_secs(30),
        };
        Scheduler::new(
            config,
            None,
            vec![Box::new(CollectSink { titles })],
            Arc::new(ExitMonitor::new()),
        )
    }

    #[tokio::test]
    async fn seed_and_child_chain_completes() {
        let titles = Arc::new(StdMutex::new(Vec::new()));
        let scheduler = test_scheduler(titles.clone());

        let seed: Box<dyn Job> =
            Box::new(EmitJob { id: "seed".into(), spawn_child: true, include: true });
        let stats = scheduler.run(vec![seed]).await.unwrap();

        assert_eq!(stats.jobs_completed, 2);
        assert_eq!(stats.jobs_failed, 0);
        // Only the child emitted: the parent flipped its inclusion flag.
        assert_eq!(*titles.lock().unwrap(), vec!["seed-child".to_string()]);
    }

    #[tokio::test]
    async fn plain_job_emits_its_entry() {
        let titles = Arc::new(StdMutex::new(Vec::new()));
        let scheduler = test_scheduler(titles.clone());

        let seed: Box<dyn Job> =
            Box::new(EmitJob { id: "solo".into(), spawn_child: false, include: true });
        let stats = scheduler.run(vec![seed]).await.unwrap();

        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.entries_emitted, 1);
        assert_eq!(*titles.lock().unwrap(), vec!["solo".to_string()]);
    }

    #[tokio::test]
    async fn browser_job_without_driver_fails_without_hanging() {
        struct BrowserJob;
        #[async_trait]
        impl Job for BrowserJob {
            fn id(&self) -> &str {
                "b"
            }
            fn priority(&self) -> Priority {
                Priority::Low
            }
            fn max_retries(&self) -> u32 {
                1
            }
            fn mode(&self) -> ExecMode {
                ExecMode::BrowserRendered
            }
            fn url(&self) -> String {
                "https://example.com".into()
            }
            async fn process(
                &mut self,
                _ctx: &JobContext,
                _resp: FetchResponse,
            ) -> anyhow::Result<ProcessOutcome> {
                Ok(ProcessOutcome::empty())
            }
        }

        let titles = Arc::new(StdMutex::new(Vec::new()));
        let scheduler = test_scheduler(titles.clone());
        let stats = scheduler.run(vec![Box::new(BrowserJob) as Box<dyn Job>]).await.unwrap();
        assert_eq!(stats.jobs_failed, 1);
        assert!(titles.lock().unwrap().is_empty());
    }
}
