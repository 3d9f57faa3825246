//! Website liveness preflight: a fast DNS + TCP (+ optional HEAD) probe with
//! a process-wide TTL cache, run before any email extraction is attempted.
//!
//! Compute-only — the probe sockets here are the job's own, never a browser
//! slot. Dead or skipped websites short-circuit: the entry is emitted as-is
//! with no emails and `verified` false.

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::info;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;
use uuid::Uuid;

use placescout_common::Entry;
use placescout_engine::{
    ExecMode, ExitMonitor, FetchResponse, Job, JobContext, Priority, ProcessOutcome,
};

use crate::email::EmailExtractJob;

/// Social domains that are never probed for email extraction.
const SOCIAL_DOMAINS: [&str; 6] = [
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "tiktok.com",
    "wa.me",
    "linktr.ee",
];

#[derive(Debug, Clone)]
pub struct PreflightConfig {
    pub enabled: bool,
    pub dns_timeout_ms: u64,
    pub tcp_timeout_ms: u64,
    pub head_timeout_ms: u64,
    pub enable_head: bool,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dns_timeout_ms: 300,
            tcp_timeout_ms: 500,
            head_timeout_ms: 800,
            enable_head: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Process-wide TTL cache
// ---------------------------------------------------------------------------

const CACHE_TTL: Duration = Duration::from_secs(15 * 60);

struct CacheEntry {
    alive: bool,
    expires: Instant,
}

static PREFLIGHT_CACHE: LazyLock<RwLock<HashMap<String, CacheEntry>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

pub fn cache_get(host: &str) -> Option<bool> {
    let cache = PREFLIGHT_CACHE.read().expect("preflight cache poisoned");
    let entry = cache.get(host)?;
    if Instant::now() > entry.expires {
        return None;
    }
    Some(entry.alive)
}

pub fn cache_set(host: &str, alive: bool) {
    cache_set_with_ttl(host, alive, CACHE_TTL);
}

fn cache_set_with_ttl(host: &str, alive: bool, ttl: Duration) {
    PREFLIGHT_CACHE
        .write()
        .expect("preflight cache poisoned")
        .insert(host.to_string(), CacheEntry { alive, expires: Instant::now() + ttl });
}

/// Teardown hook: drop all cached liveness state.
pub fn cache_clear() {
    PREFLIGHT_CACHE.write().expect("preflight cache poisoned").clear();
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// First stage of the per-host state machine, pure in the website string and
/// cache state.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PreflightDecision {
    /// Emit the entry untouched; reason tag for the log line.
    Skip(&'static str),
    /// Cache says alive: chain straight to extraction.
    CachedAlive,
    /// Cache says dead: emit untouched.
    CachedDead,
    /// Probe this host.
    Probe(String),
}

pub(crate) fn preflight_decision(website: &str) -> PreflightDecision {
    let website = website.trim();
    if website.is_empty() {
        return PreflightDecision::Skip("empty_url");
    }
    if !website.starts_with("http://") && !website.starts_with("https://") {
        return PreflightDecision::Skip("unsupported_scheme");
    }
    let host = match url::Url::parse(website) {
        Ok(u) => match u.host_str() {
            Some(h) => h.to_lowercase(),
            None => return PreflightDecision::Skip("parse_error"),
        },
        Err(_) => return PreflightDecision::Skip("parse_error"),
    };
    if SOCIAL_DOMAINS.iter().any(|d| host.contains(d)) {
        return PreflightDecision::Skip("social_domain");
    }
    match cache_get(&host) {
        Some(true) => PreflightDecision::CachedAlive,
        Some(false) => PreflightDecision::CachedDead,
        None => PreflightDecision::Probe(host),
    }
}

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

async fn dns_resolves(host: &str, timeout: Duration) -> bool {
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
    match tokio::time::timeout(timeout, resolver.lookup_ip(host)).await {
        Ok(Ok(lookup)) => lookup.iter().next().is_some(),
        _ => false,
    }
}

/// Reachability on 443, falling back to 80, each under the same timeout.
async fn tcp_reachable(host: &str, timeout: Duration) -> bool {
    for port in [443u16, 80] {
        if let Ok(Ok(_)) =
            tokio::time::timeout(timeout, TcpStream::connect((host, port))).await
        {
            return true;
        }
    }
    false
}

/// HEAD with certificate verification off and keep-alive disabled; any
/// status in [200, 400) counts as alive.
async fn head_alive(website: &str, timeout: Duration) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(true)
        .pool_max_idle_per_host(0)
        .build()
    {
        Ok(c) => c,
        Err(_) => return false,
    };
    match client.head(website).send().await {
        Ok(resp) => {
            let code = resp.status().as_u16();
            (200..400).contains(&code)
        }
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

pub struct EmailPreflightJob {
    id: String,
    parent_id: String,
    entry: Option<Entry>,
    pub config: PreflightConfig,
    pub exit_monitor: Option<Arc<ExitMonitor>>,

    use_in_results: bool,
}

impl EmailPreflightJob {
    pub fn new(parent_id: &str, entry: Entry, config: PreflightConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: parent_id.to_string(),
            entry: Some(entry),
            config,
            exit_monitor: None,
            use_in_results: true,
        }
    }

    fn emit(&mut self, entry: Entry) -> ProcessOutcome {
        if let Some(exiter) = &self.exit_monitor {
            exiter.incr_places_completed(1);
        }
        ProcessOutcome::entry(entry)
    }

    fn chain(&mut self, entry: Entry) -> ProcessOutcome {
        self.use_in_results = false;
        let website = entry.website.clone();
        let mut job = EmailExtractJob::new(&self.id, entry);
        job.exit_monitor = self.exit_monitor.clone();
        info!(url = website.as_str(), "preflight chained to email extraction");
        ProcessOutcome::children(vec![Box::new(job)])
    }
}

#[async_trait]
impl Job for EmailPreflightJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> &str {
        &self.parent_id
    }

    fn priority(&self) -> Priority {
        Priority::Medium
    }

    fn max_retries(&self) -> u32 {
        0
    }

    fn mode(&self) -> ExecMode {
        ExecMode::ComputeOnly
    }

    fn url(&self) -> String {
        "about:blank".to_string()
    }

    fn use_in_results(&self) -> bool {
        self.use_in_results
    }

    fn process_on_fetch_error(&self) -> bool {
        true
    }

    async fn process(
        &mut self,
        _ctx: &JobContext,
        _resp: FetchResponse,
    ) -> anyhow::Result<ProcessOutcome> {
        let entry = self
            .entry
            .take()
            .ok_or_else(|| anyhow::anyhow!("preflight job already consumed its entry"))?;

        let host = match preflight_decision(&entry.website) {
            PreflightDecision::Skip(reason) => {
                info!(reason, url = entry.website.as_str(), "preflight skip");
                return Ok(self.emit(entry));
            }
            PreflightDecision::CachedAlive => return Ok(self.chain(entry)),
            PreflightDecision::CachedDead => {
                info!(host = entry.website.as_str(), "preflight dead (cached)");
                return Ok(self.emit(entry));
            }
            PreflightDecision::Probe(host) => host,
        };

        if !dns_resolves(&host, Duration::from_millis(self.config.dns_timeout_ms)).await {
            cache_set(&host, false);
            info!(host = host.as_str(), "preflight dead (dns)");
            return Ok(self.emit(entry));
        }

        if !tcp_reachable(&host, Duration::from_millis(self.config.tcp_timeout_ms)).await {
            cache_set(&host, false);
            info!(host = host.as_str(), "preflight dead (tcp)");
            return Ok(self.emit(entry));
        }

        if self.config.enable_head
            && !head_alive(&entry.website, Duration::from_millis(self.config.head_timeout_ms))
                .await
        {
            cache_set(&host, false);
            info!(host = host.as_str(), "preflight dead (head)");
            return Ok(self.emit(entry));
        }

        cache_set(&host, true);
        info!(host = host.as_str(), "preflight alive");
        Ok(self.chain(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> JobContext {
        JobContext::new(reqwest::Client::new(), CancellationToken::new())
    }

    fn entry_with_website(website: &str) -> Entry {
        Entry {
            title: "Acme".to_string(),
            category: "Cafe".to_string(),
            website: website.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn decision_short_circuits() {
        assert_eq!(preflight_decision(""), PreflightDecision::Skip("empty_url"));
        assert_eq!(
            preflight_decision("ftp://acme.com"),
            PreflightDecision::Skip("unsupported_scheme")
        );
        assert_eq!(
            preflight_decision("https://"),
            PreflightDecision::Skip("parse_error")
        );
        assert_eq!(
            preflight_decision("https://www.facebook.com/acme"),
            PreflightDecision::Skip("social_domain")
        );
        assert_eq!(
            preflight_decision("https://linktr.ee/acme"),
            PreflightDecision::Skip("social_domain")
        );
    }

    #[test]
    fn decision_reads_cache() {
        cache_set("alive-host-decision.test", true);
        cache_set("dead-host-decision.test", false);
        assert_eq!(
            preflight_decision("https://alive-host-decision.test"),
            PreflightDecision::CachedAlive
        );
        assert_eq!(
            preflight_decision("https://dead-host-decision.test"),
            PreflightDecision::CachedDead
        );
        assert_eq!(
            preflight_decision("https://uncached-host-decision.test"),
            PreflightDecision::Probe("uncached-host-decision.test".to_string())
        );
    }

    #[test]
    fn cache_respects_ttl() {
        cache_set("ttl-host.test", true);
        assert_eq!(cache_get("ttl-host.test"), Some(true));
        cache_set_with_ttl("ttl-host-expired.test", true, Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache_get("ttl-host-expired.test"), None);
    }

    #[tokio::test]
    async fn empty_website_emits_unchanged() {
        let exiter = Arc::new(ExitMonitor::new());
        let mut job =
            EmailPreflightJob::new("p", entry_with_website(""), PreflightConfig::default());
        job.exit_monitor = Some(exiter.clone());
        let outcome = job.process(&ctx(), FetchResponse::stub("about:blank")).await.unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert!(outcome.entries[0].emails.is_empty());
        assert!(!outcome.entries[0].verified);
        assert!(job.use_in_results());
        assert_eq!(exiter.snapshot().places_completed, 1);
    }

    #[tokio::test]
    async fn cached_alive_chains_to_extract() {
        cache_set("chain-host.test", true);
        let mut job = EmailPreflightJob::new(
            "p",
            entry_with_website("https://chain-host.test"),
            PreflightConfig::default(),
        );
        let outcome = job.process(&ctx(), FetchResponse::stub("about:blank")).await.unwrap();
        assert!(outcome.entries.is_empty());
        assert_eq!(outcome.next.len(), 1);
        assert!(!job.use_in_results());
    }

    #[tokio::test]
    async fn cached_dead_emits_without_chaining() {
        cache_set("dead-chain-host.test", false);
        let mut job = EmailPreflightJob::new(
            "p",
            entry_with_website("https://dead-chain-host.test"),
            PreflightConfig::default(),
        );
        let outcome = job.process(&ctx(), FetchResponse::stub("about:blank")).await.unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert!(outcome.next.is_empty());
        assert!(job.use_in_results());
    }

    #[tokio::test]
    async fn unresolvable_host_goes_dead_and_caches() {
        let mut job = EmailPreflightJob::new(
            "p",
            entry_with_website("https://no-such-host.invalid"),
            PreflightConfig::default(),
        );
        let outcome = job.process(&ctx(), FetchResponse::stub("about:blank")).await.unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert!(!outcome.entries[0].verified);
        assert_eq!(cache_get("no-such-host.invalid"), Some(false));
    }

    #[tokio::test]
    async fn repeated_decisions_in_ttl_window_are_identical() {
        cache_set("stable-host.test", true);
        let first = preflight_decision("https://stable-host.test");
        let second = preflight_decision("https://stable-host.test");
        assert_eq!(first, second);
    }
}
