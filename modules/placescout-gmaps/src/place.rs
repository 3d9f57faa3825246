//! Place-detail job: drive the detail page, pull the embedded application
//! state, parse the record, and either emit it or hand it to the email
//! enrichment chain.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use headless_client::BrowserPage;
use placescout_engine::{
    ExecMode, ExitMonitor, FetchResponse, Job, JobContext, Priority, ProcessOutcome,
};

use crate::browser::click_reject_cookies_if_required;
use crate::email::EmailExtractJob;
use crate::parser::{add_extra_reviews, entry_from_app_state};
use crate::preflight::{EmailPreflightJob, PreflightConfig};

/// In-page extraction of the place record blob from the global application
/// state array.
const APP_STATE_SCRIPT: &str = r#"(() => {
    const appState = window.APP_INITIALIZATION_STATE[3];
    if (!appState) {
        return null;
    }
    const keys = Object.keys(appState);
    const key = keys[0];
    if (appState[key] && appState[key][6]) {
        return appState[key][6];
    }
    return null;
})()"#;

pub struct PlaceJob {
    id: String,
    parent_id: String,
    url: String,
    pub lang: String,
    pub extract_email: bool,
    pub extract_extra_reviews: bool,
    pub preflight: PreflightConfig,
    pub exit_monitor: Option<Arc<ExitMonitor>>,

    use_in_results: bool,
}

impl PlaceJob {
    pub fn new(
        parent_id: &str,
        lang: &str,
        url: &str,
        extract_email: bool,
        extract_extra_reviews: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: parent_id.to_string(),
            url: normalize_place_url(url),
            lang: lang.to_string(),
            extract_email,
            extract_extra_reviews,
            preflight: PreflightConfig::default(),
            exit_monitor: None,
            use_in_results: true,
        }
    }

    pub fn with_exit_monitor(mut self, exiter: Arc<ExitMonitor>) -> Self {
        self.exit_monitor = Some(exiter);
        self
    }
}

/// Listing pages occasionally hand out place URLs pointing at an IP host or
/// a non-Google host (an intermediary artifact); rewrite those to
/// `www.google.com`.
pub(crate) fn normalize_place_url(raw: &str) -> String {
    let Ok(mut u) = url::Url::parse(raw) else {
        return raw.to_string();
    };
    let needs_rewrite = match u.host() {
        Some(url::Host::Ipv4(_)) | Some(url::Host::Ipv6(_)) => true,
        Some(url::Host::Domain(d)) => !d.contains("google.com"),
        None => false,
    };
    if needs_rewrite && u.set_host(Some("www.google.com")).is_ok() {
        return u.to_string();
    }
    raw.to_string()
}

/// Language-agnostic claimed heuristic from the rendered page text.
pub(crate) fn claimed_from_content(content: &str) -> &'static str {
    let lc = content.to_lowercase();
    if lc.contains("claim this business") || lc.contains("own this business") {
        "NO"
    } else if lc.contains("verified") || lc.contains("claimed") {
        "YES"
    } else {
        ""
    }
}

#[async_trait]
impl Job for PlaceJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> &str {
        &self.parent_id
    }

    fn priority(&self) -> Priority {
        Priority::Medium
    }

    fn mode(&self) -> ExecMode {
        ExecMode::BrowserRendered
    }

    fn url(&self) -> String {
        if self.url.contains('?') {
            format!("{}&hl={}", self.url, self.lang)
        } else {
            format!("{}?hl={}", self.url, self.lang)
        }
    }

    fn use_in_results(&self) -> bool {
        self.use_in_results
    }

    async fn browser_actions(&mut self, page: &mut dyn BrowserPage) -> FetchResponse {
        let target = self.url();
        if let Err(e) = page.navigate(&target).await {
            return FetchResponse::failed(&target, e.to_string());
        }

        click_reject_cookies_if_required(page).await;

        let raw = match page.evaluate_script(APP_STATE_SCRIPT).await {
            Ok(Value::String(s)) => s,
            Ok(_) => return FetchResponse::failed(&target, "place state blob missing"),
            Err(e) => return FetchResponse::failed(&target, e.to_string()),
        };

        let mut resp = FetchResponse {
            url: target,
            status: 200,
            ..Default::default()
        };
        resp.meta.insert("place_json".to_string(), Value::String(raw));

        if let Ok(content) = page.content().await {
            let claimed = claimed_from_content(&content);
            if !claimed.is_empty() {
                resp.meta
                    .insert("claimed".to_string(), Value::String(claimed.to_string()));
            }
        }

        resp
    }

    async fn process(
        &mut self,
        _ctx: &JobContext,
        resp: FetchResponse,
    ) -> anyhow::Result<ProcessOutcome> {
        let raw = resp
            .meta
            .get("place_json")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("place response carries no state blob"))?;

        let mut entry = entry_from_app_state(raw, &self.lang)?;
        entry.input_id = self.parent_id.clone();
        if entry.link.is_empty() {
            entry.link = self.url();
            entry.google_maps_url = entry.link.clone();
        }

        if self.extract_extra_reviews {
            if let Some(pages) = resp.meta.get("reviews_raw").and_then(|v| v.as_array()) {
                let pages: Vec<String> = pages
                    .iter()
                    .filter_map(|p| p.as_str().map(String::from))
                    .collect();
                add_extra_reviews(&mut entry, &pages);
            }
        }

        if let Some(claimed) = resp.meta.get("claimed").and_then(|v| v.as_str()) {
            if !claimed.is_empty() {
                entry.claimed = claimed.to_string();
            }
        }

        if self.extract_email && entry.is_website_valid_for_email() {
            // The chained job emits the finalized record, not this one.
            self.use_in_results = false;
            let child: Box<dyn Job> = if self.preflight.enabled {
                let mut job = EmailPreflightJob::new(&self.id, entry, self.preflight.clone());
                job.exit_monitor = self.exit_monitor.clone();
                Box::new(job)
            } else {
                let mut job = EmailExtractJob::new(&self.id, entry);
                job.exit_monitor = self.exit_monitor.clone();
                Box::new(job)
            };
            info!(job_id = self.id.as_str(), "place chained to email enrichment");
            return Ok(ProcessOutcome::children(vec![child]));
        }

        if let Some(exiter) = &self.exit_monitor {
            exiter.incr_places_completed(1);
        }

        Ok(ProcessOutcome::entry(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> JobContext {
        JobContext::new(reqwest::Client::new(), CancellationToken::new())
    }

    fn app_state(title: &str, website: &str) -> String {
        let mut record = vec![Value::Null; 14];
        record[7] = json!([website]);
        record[11] = json!(title);
        record[13] = json!(["Restaurant"]);
        let mut root = vec![Value::Null; 7];
        root[6] = Value::Array(record);
        format!(")]}}'{}", Value::Array(root))
    }

    fn place_resp(title: &str, website: &str) -> FetchResponse {
        let mut resp = FetchResponse { status: 200, ..Default::default() };
        resp.meta
            .insert("place_json".to_string(), Value::String(app_state(title, website)));
        resp
    }

    #[test]
    fn url_normalization_rewrites_ip_and_foreign_hosts() {
        assert_eq!(
            normalize_place_url("https://1.2.3.4/maps/place/X?a=1"),
            "https://www.google.com/maps/place/X?a=1"
        );
        assert_eq!(
            normalize_place_url("https://proxy.example.net/maps/place/X"),
            "https://www.google.com/maps/place/X"
        );
        assert_eq!(
            normalize_place_url("https://www.google.com/maps/place/X"),
            "https://www.google.com/maps/place/X"
        );
        assert_eq!(normalize_place_url("not a url"), "not a url");
    }

    #[test]
    fn hl_param_appended_once() {
        let job = PlaceJob::new("p", "en", "https://www.google.com/maps/place/X", false, false);
        assert_eq!(job.url(), "https://www.google.com/maps/place/X?hl=en");
        let with_query =
            PlaceJob::new("p", "en", "https://www.google.com/maps/place/X?a=1", false, false);
        assert_eq!(with_query.url(), "https://www.google.com/maps/place/X?a=1&hl=en");
    }

    #[test]
    fn claimed_heuristic() {
        assert_eq!(claimed_from_content("Please Claim this business now"), "NO");
        assert_eq!(claimed_from_content("own this business?"), "NO");
        assert_eq!(claimed_from_content("This listing is Verified"), "YES");
        assert_eq!(claimed_from_content("nothing relevant"), "");
    }

    #[tokio::test]
    async fn emits_entry_when_email_disabled() {
        let mut job =
            PlaceJob::new("parent-1", "en", "https://www.google.com/maps/place/X", false, false);
        let outcome = job.process(&ctx(), place_resp("Acme", "https://acme.com")).await.unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert!(outcome.next.is_empty());
        assert!(job.use_in_results());
        assert_eq!(outcome.entries[0].input_id, "parent-1");
        assert_eq!(outcome.entries[0].link, "https://www.google.com/maps/place/X?hl=en");
    }

    #[tokio::test]
    async fn chains_to_preflight_and_flips_inclusion() {
        let mut job =
            PlaceJob::new("parent-1", "en", "https://www.google.com/maps/place/X", true, false);
        let outcome = job.process(&ctx(), place_resp("Acme", "https://acme.com")).await.unwrap();
        assert!(outcome.entries.is_empty());
        assert_eq!(outcome.next.len(), 1);
        assert!(!job.use_in_results(), "inclusion flag must flip when chaining");
    }

    #[tokio::test]
    async fn chains_directly_to_extract_when_preflight_disabled() {
        let mut job =
            PlaceJob::new("parent-1", "en", "https://www.google.com/maps/place/X", true, false);
        job.preflight.enabled = false;
        let outcome = job.process(&ctx(), place_resp("Acme", "https://acme.com")).await.unwrap();
        assert_eq!(outcome.next.len(), 1);
        assert!(!job.use_in_results());
    }

    #[tokio::test]
    async fn social_website_skips_enrichment() {
        let exiter = Arc::new(ExitMonitor::new());
        let mut job =
            PlaceJob::new("parent-1", "en", "https://www.google.com/maps/place/X", true, false)
                .with_exit_monitor(exiter.clone());
        let outcome = job
            .process(&ctx(), place_resp("Acme", "https://facebook.com/acme"))
            .await
            .unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert!(outcome.next.is_empty());
        assert!(job.use_in_results());
        assert_eq!(exiter.snapshot().places_completed, 1);
    }

    #[tokio::test]
    async fn claimed_meta_overrides_parse() {
        let mut job =
            PlaceJob::new("p", "en", "https://www.google.com/maps/place/X", false, false);
        let mut resp = place_resp("Acme", "");
        resp.meta.insert("claimed".to_string(), Value::String("YES".to_string()));
        let outcome = job.process(&ctx(), resp).await.unwrap();
        assert_eq!(outcome.entries[0].claimed, "YES");
    }

    #[tokio::test]
    async fn missing_blob_is_an_error() {
        let mut job =
            PlaceJob::new("p", "en", "https://www.google.com/maps/place/X", false, false);
        let resp = FetchResponse { status: 200, ..Default::default() };
        assert!(job.process(&ctx(), resp).await.is_err());
    }

    #[tokio::test]
    async fn extra_review_pages_consumed_when_enabled() {
        let mut job =
            PlaceJob::new("p", "en", "https://www.google.com/maps/place/X", false, true);
        let mut resp = place_resp("Acme", "");
        let review_el = json!([[
            null,
            [null, null, null, null, [null, null, null, null, null, ["Carol", ""]]],
            [[5.0]],
        ]]);
        let page = format!(")]}}'{}", json!([null, null, [review_el]]));
        resp.meta.insert("reviews_raw".to_string(), json!([page]));
        let outcome = job.process(&ctx(), resp).await.unwrap();
        assert_eq!(outcome.entries[0].user_reviews_extended.len(), 1);
        assert_eq!(outcome.entries[0].user_reviews_extended[0].name, "Carol");
    }
}
