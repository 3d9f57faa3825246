//! Fast, best-effort deliverability check on the first extracted email.
//!
//! Compute-only and fail-fast: a 3-second budget covers the whole attempt,
//! and any failure or timeout leaves `verified` false. The entry is always
//! emitted.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use email_address::EmailAddress;
use tracing::info;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;
use uuid::Uuid;

use placescout_common::Entry;
use placescout_engine::{
    ExecMode, ExitMonitor, FetchResponse, Job, JobContext, Priority, ProcessOutcome,
};

const VERIFY_TIMEOUT: Duration = Duration::from_secs(3);

pub struct EmailVerifyJob {
    id: String,
    parent_id: String,
    entry: Option<Entry>,
    pub exit_monitor: Option<Arc<ExitMonitor>>,
}

impl EmailVerifyJob {
    pub fn new(parent_id: &str, entry: Entry) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: parent_id.to_string(),
            entry: Some(entry),
            exit_monitor: None,
        }
    }
}

/// MX records present for the email's domain ⇒ deliverable enough.
async fn mx_records_present(domain: &str) -> bool {
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
    match resolver.mx_lookup(domain).await {
        Ok(lookup) => lookup.iter().next().is_some(),
        Err(_) => false,
    }
}

#[async_trait]
impl Job for EmailVerifyJob {
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

    fn process_on_fetch_error(&self) -> bool {
        true
    }

    async fn process(
        &mut self,
        _ctx: &JobContext,
        _resp: FetchResponse,
    ) -> anyhow::Result<ProcessOutcome> {
        let mut entry = self
            .entry
            .take()
            .ok_or_else(|| anyhow::anyhow!("verify job already consumed its entry"))?;

        entry.verified = false;

        let outcome = 'verify: {
            let Some(first) = entry.emails.first() else { break 'verify false };
            let raw = first.trim();
            if raw.is_empty() {
                break 'verify false;
            }
            let Ok(parsed) = EmailAddress::from_str(raw) else { break 'verify false };
            let domain = parsed.domain().to_string();

            matches!(
                tokio::time::timeout(VERIFY_TIMEOUT, mx_records_present(&domain)).await,
                Ok(true)
            )
        };

        entry.verified = outcome;
        info!(
            verified = entry.verified,
            email = entry.emails.first().map(String::as_str).unwrap_or(""),
            "email verification complete"
        );

        if let Some(exiter) = &self.exit_monitor {
            exiter.incr_places_completed(1);
        }

        Ok(ProcessOutcome::entry(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> JobContext {
        JobContext::new(reqwest::Client::new(), CancellationToken::new())
    }

    fn entry_with_emails(emails: Vec<&str>) -> Entry {
        Entry {
            title: "Acme".into(),
            category: "Cafe".into(),
            emails: emails.into_iter().map(String::from).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn no_emails_emits_unverified_without_lookup() {
        let exiter = Arc::new(ExitMonitor::new());
        let mut job = EmailVerifyJob::new("p", entry_with_emails(vec![]));
        job.exit_monitor = Some(exiter.clone());
        let outcome = job.process(&ctx(), FetchResponse::stub("about:blank")).await.unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert!(!outcome.entries[0].verified);
        assert_eq!(exiter.snapshot().places_completed, 1);
    }

    #[tokio::test]
    async fn invalid_syntax_is_unverified() {
        let mut job = EmailVerifyJob::new("p", entry_with_emails(vec!["not an email"]));
        let outcome = job.process(&ctx(), FetchResponse::stub("about:blank")).await.unwrap();
        assert!(!outcome.entries[0].verified);
    }

    #[tokio::test]
    async fn unresolvable_domain_is_unverified() {
        let mut job =
            EmailVerifyJob::new("p", entry_with_emails(vec!["a@no-such-host.invalid"]));
        let outcome = job.process(&ctx(), FetchResponse::stub("about:blank")).await.unwrap();
        assert!(!outcome.entries[0].verified);
    }

    #[tokio::test]
    async fn only_first_email_considered() {
        // First email has invalid syntax: no lookup happens at all, even
        // though the second would parse.
        let mut job =
            EmailVerifyJob::new("p", entry_with_emails(vec!["broken", "ok@example.com"]));
        let outcome = job.process(&ctx(), FetchResponse::stub("about:blank")).await.unwrap();
        assert!(!outcome.entries[0].verified);
    }
}
