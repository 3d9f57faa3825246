//! The scheduler contract every job implements.
//!
//! A job tells the scheduler how to fetch it (`mode`, `browser_actions`),
//! what to do with the fetched response (`process`), whether a failed fetch
//! should still be processed (`process_on_fetch_error`), and whether its
//! `process` data belongs in the result stream (`use_in_results`, re-read
//! after `process` returns — jobs flip it when chaining).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use headless_client::BrowserPage;
use placescout_common::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub(crate) fn index(self) -> usize {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }
}

/// How the scheduler obtains this job's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Needs a rendered page; the scheduler opens one and calls
    /// `browser_actions`.
    BrowserRendered,
    /// Plain HTTP GET by the static fetcher. May run on either pool.
    StaticHttp,
    /// No fetch at all; a stub successful response is synthesized. Never
    /// holds a browser slot.
    ComputeOnly,
}

/// The response handed to `process`. Browser jobs populate `meta` from their
/// page-driving step; fetch failures are carried in `error` rather than as a
/// Result so that `process_on_fetch_error` jobs can still run.
#[derive(Debug, Default)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub error: Option<String>,
    pub meta: HashMap<String, Value>,
}

impl FetchResponse {
    /// A synthesized success for compute-only jobs.
    pub fn stub(url: &str) -> Self {
        Self { url: url.to_string(), status: 200, ..Default::default() }
    }

    pub fn failed(url: &str, error: impl Into<String>) -> Self {
        Self { url: url.to_string(), error: Some(error.into()), ..Default::default() }
    }
}

/// Shared per-run plumbing handed to every `process` call.
#[derive(Clone)]
pub struct JobContext {
    /// Shared HTTP client for ad-hoc fetches (e.g. candidate-page crawls).
    pub http: reqwest::Client,
    /// The job's cancellation scope; fires on parent cancel, inactivity, or
    /// exit-monitor target.
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn new(http: reqwest::Client, cancel: CancellationToken) -> Self {
        Self { http, cancel }
    }
}

/// What `process` produced: zero or more result entries plus child jobs to
/// enqueue. Children are observed only after `process` returns.
#[derive(Default)]
pub struct ProcessOutcome {
    pub entries: Vec<Entry>,
    pub next: Vec<Box<dyn Job>>,
}

impl ProcessOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(entries: Vec<Entry>) -> Self {
        Self { entries, next: Vec::new() }
    }

    pub fn entry(entry: Entry) -> Self {
        Self { entries: vec![entry], next: Vec::new() }
    }

    pub fn children(next: Vec<Box<dyn Job>>) -> Self {
        Self { entries: Vec::new(), next }
    }
}

#[async_trait]
pub trait Job: Send {
    fn id(&self) -> &str;

    fn parent_id(&self) -> &str {
        ""
    }

    fn priority(&self) -> Priority;

    /// Fetch-level retry budget. `process` errors are never retried.
    fn max_retries(&self) -> u32 {
        3
    }

    fn mode(&self) -> ExecMode;

    /// The full URL the fetcher targets (with query parameters applied).
    fn url(&self) -> String;

    /// Re-read by the scheduler after `process` returns.
    fn use_in_results(&self) -> bool {
        true
    }

    /// When true, `process` runs even if the fetch reported an error.
    fn process_on_fetch_error(&self) -> bool {
        false
    }

    /// Drive the rendered page and produce the response. Only called for
    /// `ExecMode::BrowserRendered` jobs.
    async fn browser_actions(&mut self, _page: &mut dyn BrowserPage) -> FetchResponse {
        FetchResponse::stub(&self.url())
    }

    async fn process(
        &mut self,
        ctx: &JobContext,
        resp: FetchResponse,
    ) -> anyhow::Result<ProcessOutcome>;
}
