//! Email and social-link extraction from a place's website, with a bounded
//! same-host candidate-page crawl (contact/about/privacy pages).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use email_address::EmailAddress;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::info;
use url::Url;
use uuid::Uuid;

use placescout_common::{classify_social_url, unique_strings, Entry};
use placescout_engine::{
    ExecMode, ExitMonitor, FetchResponse, Job, JobContext, Priority, ProcessOutcome,
};

use crate::verify::EmailVerifyJob;

const MAX_CANDIDATE_PAGES: usize = 3;
const CANDIDATE_FETCH_TIMEOUT: Duration = Duration::from_secs(8);

/// Anchor text / URL fragments marking likely contact pages, including the
/// localized equivalents seen in the source markets.
const CANDIDATE_TERMS: [&str; 6] = ["contact", "about", "privacy", "kontak", "tentang", "hubungi"];

pub struct EmailExtractJob {
    id: String,
    parent_id: String,
    entry: Option<Entry>,
    /// Chain to a verification job instead of emitting directly.
    pub verify: bool,
    pub exit_monitor: Option<Arc<ExitMonitor>>,

    use_in_results: bool,
}

impl EmailExtractJob {
    pub fn new(parent_id: &str, entry: Entry) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: parent_id.to_string(),
            entry: Some(entry),
            verify: true,
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
}

#[async_trait]
impl Job for EmailExtractJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> &str {
        &self.parent_id
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    fn max_retries(&self) -> u32 {
        0
    }

    fn mode(&self) -> ExecMode {
        ExecMode::StaticHttp
    }

    fn url(&self) -> String {
        self.entry.as_ref().map(|e| e.website.clone()).unwrap_or_default()
    }

    fn use_in_results(&self) -> bool {
        self.use_in_results
    }

    fn process_on_fetch_error(&self) -> bool {
        true
    }

    async fn process(
        &mut self,
        ctx: &JobContext,
        resp: FetchResponse,
    ) -> anyhow::Result<ProcessOutcome> {
        let mut entry = self
            .entry
            .take()
            .ok_or_else(|| anyhow::anyhow!("email job already consumed its entry"))?;

        // A dead homepage still yields the record, just unenriched.
        if resp.error.is_some() || resp.body.is_empty() {
            info!(
                url = entry.website.as_str(),
                error = resp.error.as_deref().unwrap_or("empty_body"),
                "email extraction skipped"
            );
            return Ok(self.emit(entry));
        }

        extract_from_html(&resp.body, &mut entry);
        info!(
            url = entry.website.as_str(),
            emails = entry.emails.len(),
            "homepage extraction complete"
        );

        let candidates = candidate_links(&resp.body, &entry.website, MAX_CANDIDATE_PAGES);
        for link in candidates {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let body = match fetch_candidate(&ctx.http, &link).await {
                Some(body) => body,
                None => continue,
            };
            extract_from_html(&body, &mut entry);
            info!(
                candidate = link.as_str(),
                emails = entry.emails.len(),
                "candidate page extraction complete"
            );
        }

        entry.backfill_legacy_social();

        if self.verify {
            self.use_in_results = false;
            let mut job = EmailVerifyJob::new(&self.id, entry);
            job.exit_monitor = self.exit_monitor.clone();
            return Ok(ProcessOutcome::children(vec![Box::new(job)]));
        }

        Ok(self.emit(entry))
    }
}

async fn fetch_candidate(client: &reqwest::Client, link: &str) -> Option<String> {
    let resp = client
        .get(link)
        .timeout(CANDIDATE_FETCH_TIMEOUT)
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    resp.text().await.ok()
}

// ---------------------------------------------------------------------------
// Extraction steps (synchronous — the parsed document never crosses an await)
// ---------------------------------------------------------------------------

pub(crate) fn extract_from_html(body: &str, entry: &mut Entry) {
    let doc = Html::parse_document(body);

    let mut emails = mailto_emails(&doc);
    emails.extend(regex_emails(&doc, body));
    let mut all = std::mem::take(&mut entry.emails);
    all.extend(emails);
    entry.emails = unique_strings(all);

    social_from_anchors(&doc, entry);
    social_from_json_ld(&doc, entry);
    meta_from_doc(&doc, entry);
    tracking_from_body(body, entry);
    phones_from_anchors(&doc, entry);
    entry.backfill_legacy_social();
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

fn mailto_emails(doc: &Html) -> Vec<String> {
    let mut out = Vec::new();
    for el in doc.select(&selector("a[href^='mailto:']")) {
        let Some(href) = el.value().attr("href") else { continue };
        let value = href.trim_start_matches("mailto:").trim();
        // Strip mailto query parameters (subject=, body=)
        let value = value.split('?').next().unwrap_or(value);
        if let Ok(email) = EmailAddress::from_str(value) {
            out.push(email.to_string());
        }
    }
    out
}

/// De-obfuscate the common `[at]` / `(dot)` spellings, then regex-scan.
/// Scans both the document text (entities already decoded by the parser)
/// and the raw body (attributes, scripts).
fn regex_emails(doc: &Html, body: &str) -> Vec<String> {
    let mut haystack: String = doc.root_element().text().collect::<Vec<_>>().join(" ");
    haystack.push(' ');
    haystack.push_str(body);

    let deobfuscated = deobfuscate(&haystack);

    let re = Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("static regex");
    let mut out = Vec::new();
    for m in re.find_iter(&deobfuscated) {
        if let Ok(email) = EmailAddress::from_str(m.as_str()) {
            out.push(email.to_string());
        }
    }
    out
}

fn deobfuscate(s: &str) -> String {
    let mut s = s.to_string();
    for (from, to) in [
        ("[at]", "@"),
        ("(at)", "@"),
        (" at ", "@"),
        ("[dot]", "."),
        ("(dot)", "."),
        (" dot ", "."),
        ("[.]", "."),
    ] {
        s = s.replace(from, to);
    }
    // The spelled-out forms leave whitespace around the separators.
    let re_at = Regex::new(r"\s*@\s*").expect("static regex");
    let s = re_at.replace_all(&s, "@").into_owned();
    let re_dot = Regex::new(r"([A-Za-z0-9])\s+\.\s*|\s*\.\s+([A-Za-z0-9])").expect("static regex");
    re_dot.replace_all(&s, "$1.$2").into_owned()
}

fn social_from_anchors(doc: &Html, entry: &mut Entry) {
    for el in doc.select(&selector("a[href]")) {
        let Some(href) = el.value().attr("href") else { continue };
        let href = href.trim();
        if href.is_empty() {
            continue;
        }
        if let Some(platform) = classify_social_url(href) {
            entry.add_social_link(platform, href);
        }
    }
}

fn social_from_json_ld(doc: &Html, entry: &mut Entry) {
    for el in doc.select(&selector(r#"script[type="application/ld+json"]"#)) {
        let raw: String = el.text().collect();
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else { continue };
        walk_same_as(&value, entry);
    }
}

fn walk_same_as(value: &serde_json::Value, entry: &mut Entry) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map {
                if key.eq_ignore_ascii_case("sameAs") {
                    if let Some(arr) = v.as_array() {
                        for item in arr {
                            if let Some(s) = item.as_str() {
                                if let Some(platform) = classify_social_url(s) {
                                    entry.add_social_link(platform, s);
                                }
                            }
                        }
                    }
                } else {
                    walk_same_as(v, entry);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr {
                walk_same_as(item, entry);
            }
        }
        _ => {}
    }
}

fn meta_from_doc(doc: &Html, entry: &mut Entry) {
    if entry.meta.title.is_empty() {
        if let Some(el) = doc.select(&selector("head title")).next() {
            entry.meta.title = el.text().collect::<String>().trim().to_string();
        }
    }
    if entry.meta.description.is_empty() {
        for css in [r#"meta[name="description"]"#, r#"meta[property="og:description"]"#] {
            if let Some(content) = doc
                .select(&selector(css))
                .next()
                .and_then(|el| el.value().attr("content"))
            {
                let content = content.trim();
                if !content.is_empty() {
                    entry.meta.description = content.to_string();
                    break;
                }
            }
        }
    }
}

fn tracking_from_body(body: &str, entry: &mut Entry) {
    if entry.tracking_ids.google_ua.is_empty() {
        let re = Regex::new(r"UA-\d{4,}-\d+").expect("static regex");
        if let Some(m) = re.find(body) {
            entry.tracking_ids.google_ua = m.as_str().to_string();
        }
    }
    if entry.tracking_ids.google_ga4.is_empty() {
        let re = Regex::new(r"G-[A-Z0-9]{6,}").expect("static regex");
        if let Some(m) = re.find(body) {
            entry.tracking_ids.google_ga4 = m.as_str().to_string();
        }
    }
}

fn phones_from_anchors(doc: &Html, entry: &mut Entry) {
    let mut found = Vec::new();
    for el in doc.select(&selector("a[href^='tel:']")) {
        let Some(href) = el.value().attr("href") else { continue };
        let num = href
            .trim_start_matches("tel:")
            .replace("%20", " ")
            .replace('-', " ")
            .replace("(0)", "0")
            .trim()
            .to_string();
        if !num.is_empty() {
            found.push(num);
        }
    }

    for num in &found {
        let normalized =
            placescout_common::normalize_phones(num, &entry.complete_address.country);
        let mut all = std::mem::take(&mut entry.phones);
        all.extend(normalized);
        entry.phones = unique_strings(all);
    }

    if entry.phone.trim().is_empty() {
        if let Some(first) = found.first() {
            entry.phone = first.clone();
        }
    }
}

/// Same-host anchors whose text or URL suggests a contact page, resolved
/// absolute, deduplicated, capped at `max`.
pub(crate) fn candidate_links(body: &str, base: &str, max: usize) -> Vec<String> {
    let Ok(base_url) = Url::parse(base) else { return Vec::new() };
    let Some(base_host) = base_url.host_str().map(str::to_lowercase) else { return Vec::new() };

    let doc = Html::parse_document(body);
    let mut out = Vec::new();
    for el in doc.select(&selector("a[href]")) {
        if out.len() >= max {
            break;
        }
        let Some(href) = el.value().attr("href") else { continue };
        let href = href.trim();
        if href.is_empty() {
            continue;
        }
        let Ok(resolved) = base_url.join(href) else { continue };
        let Some(host) = resolved.host_str() else { continue };
        if !host.eq_ignore_ascii_case(&base_host) {
            continue;
        }

        let text: String = el.text().collect();
        let hay = format!("{} {}", text.to_lowercase(), href.to_lowercase());
        if CANDIDATE_TERMS.iter().any(|t| hay.contains(t)) {
            let resolved = resolved.to_string();
            if !out.contains(&resolved) {
                out.push(resolved);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Entry {
        Entry { title: "Acme".into(), category: "Cafe".into(), ..Default::default() }
    }

    #[test]
    fn mailto_and_obfuscated_emails_both_found() {
        let body = r#"
            <html><body>
                <a href="mailto:hi@example.com">Email us</a>
                <p>Or write to info (at) example (dot) com</p>
            </body></html>
        "#;
        let mut e = entry();
        extract_from_html(body, &mut e);
        assert!(e.emails.contains(&"hi@example.com".to_string()), "emails: {:?}", e.emails);
        assert!(e.emails.contains(&"info@example.com".to_string()), "emails: {:?}", e.emails);
    }

    #[test]
    fn entity_obfuscated_email_decoded() {
        let mut e = entry();
        extract_from_html("<p>mail&#64;example&#46;com</p>", &mut e);
        assert!(e.emails.contains(&"mail@example.com".to_string()), "emails: {:?}", e.emails);
    }

    #[test]
    fn bracket_dot_obfuscation() {
        let mut e = entry();
        extract_from_html("<p>sales[at]example[dot]com</p>", &mut e);
        assert_eq!(e.emails, vec!["sales@example.com".to_string()]);
    }

    #[test]
    fn duplicate_emails_removed() {
        let body = r#"
            <a href="mailto:hi@example.com">a</a>
            <a href="mailto:hi@example.com">b</a>
        "#;
        let mut e = entry();
        extract_from_html(body, &mut e);
        assert_eq!(e.emails, vec!["hi@example.com".to_string()]);
    }

    #[test]
    fn mailto_query_params_stripped() {
        let mut e = entry();
        extract_from_html(r#"<a href="mailto:hi@example.com?subject=Hello">x</a>"#, &mut e);
        assert_eq!(e.emails, vec!["hi@example.com".to_string()]);
    }

    #[test]
    fn social_anchors_fill_singles_and_arrays() {
        let body = r#"
            <a href="https://www.facebook.com/acme">fb</a>
            <a href="https://www.facebook.com/acme2">fb2</a>
            <a href="https://instagram.com/acme">ig</a>
            <a href="https://www.tiktok.com/@acme">tt</a>
            <a href="https://wa.me/628123">wa</a>
        "#;
        let mut e = entry();
        extract_from_html(body, &mut e);
        assert_eq!(e.facebook, "https://www.facebook.com/acme");
        assert_eq!(e.facebook_links.len(), 2);
        assert_eq!(e.instagram, "https://instagram.com/acme");
        assert_eq!(e.tiktok_links.len(), 1);
        assert_eq!(e.whatsapp, "https://wa.me/628123");
    }

    #[test]
    fn json_ld_same_as_classified() {
        let body = r#"
            <script type="application/ld+json">
            {"@type": "LocalBusiness", "sameAs": ["https://yelp.com/biz/acme", "https://youtu.be/x"],
             "nested": {"sameAs": ["https://www.linkedin.com/company/acme"]}}
            </script>
        "#;
        let mut e = entry();
        extract_from_html(body, &mut e);
        assert_eq!(e.yelp_links.len(), 1);
        assert_eq!(e.youtube_links.len(), 1);
        assert_eq!(e.linkedin, "https://www.linkedin.com/company/acme");
    }

    #[test]
    fn meta_title_and_description() {
        let body = r#"
            <head>
                <title> Acme Pizza — Home </title>
                <meta property="og:description" content="Best pizza in town">
            </head>
        "#;
        let mut e = entry();
        extract_from_html(body, &mut e);
        assert_eq!(e.meta.title, "Acme Pizza — Home");
        assert_eq!(e.meta.description, "Best pizza in town");

        // name=description wins over og: when both exist
        let both = r#"
            <head>
                <meta name="description" content="Named">
                <meta property="og:description" content="OG">
            </head>
        "#;
        let mut e2 = entry();
        extract_from_html(both, &mut e2);
        assert_eq!(e2.meta.description, "Named");
    }

    #[test]
    fn tracking_ids_scanned() {
        let body = "gtag('config', 'UA-12345-6'); gtag('config', 'G-ABC123XYZ');";
        let mut e = entry();
        extract_from_html(body, &mut e);
        assert_eq!(e.tracking_ids.google_ua, "UA-12345-6");
        assert_eq!(e.tracking_ids.google_ga4, "G-ABC123XYZ");
    }

    #[test]
    fn tel_anchors_feed_phones() {
        let body = r#"<a href="tel:+62-21-555-1234">call</a>"#;
        let mut e = entry();
        e.complete_address.country = "Indonesia".into();
        extract_from_html(body, &mut e);
        assert_eq!(e.phone, "+62 21 555 1234");
        assert!(e.phones.contains(&"+62215551234".to_string()), "phones: {:?}", e.phones);
    }

    #[test]
    fn existing_phone_not_overwritten() {
        let body = r#"<a href="tel:555">call</a>"#;
        let mut e = entry();
        e.phone = "original".into();
        extract_from_html(body, &mut e);
        assert_eq!(e.phone, "original");
    }

    #[test]
    fn candidate_links_same_host_and_terms() {
        let body = r#"
            <a href="/contact">Contact</a>
            <a href="https://acme.com/about-us">About</a>
            <a href="https://other.com/contact">External contact</a>
            <a href="/products">Products</a>
            <a href="/kontak">Kontak kami</a>
        "#;
        let links = candidate_links(body, "https://acme.com", 3);
        assert_eq!(
            links,
            vec![
                "https://acme.com/contact".to_string(),
                "https://acme.com/about-us".to_string(),
                "https://acme.com/kontak".to_string(),
            ]
        );
    }

    #[test]
    fn candidate_links_capped() {
        let body = r#"
            <a href="/contact1">contact</a>
            <a href="/contact2">contact</a>
            <a href="/contact3">contact</a>
            <a href="/contact4">contact</a>
        "#;
        assert_eq!(candidate_links(body, "https://acme.com", 3).len(), 3);
    }

    mod job {
        use super::*;
        use tokio_util::sync::CancellationToken;

        fn ctx() -> JobContext {
            JobContext::new(reqwest::Client::new(), CancellationToken::new())
        }

        fn website_entry() -> Entry {
            let mut e = entry();
            e.website = "https://acme.example".into();
            e
        }

        #[tokio::test]
        async fn fetch_error_emits_unenriched_entry() {
            let exiter = Arc::new(ExitMonitor::new());
            let mut job = EmailExtractJob::new("p", website_entry());
            job.exit_monitor = Some(exiter.clone());
            let resp = FetchResponse::failed("https://acme.example", "connection refused");
            let outcome = job.process(&ctx(), resp).await.unwrap();
            assert_eq!(outcome.entries.len(), 1);
            assert!(outcome.entries[0].emails.is_empty());
            assert!(!outcome.entries[0].verified);
            assert!(job.use_in_results());
            assert_eq!(exiter.snapshot().places_completed, 1);
        }

        #[tokio::test]
        async fn success_with_verify_chains() {
            let mut job = EmailExtractJob::new("p", website_entry());
            let resp = FetchResponse {
                url: "https://acme.example".into(),
                status: 200,
                body: r#"<a href="mailto:hi@acme.example">hi</a>"#.into(),
                ..Default::default()
            };
            let outcome = job.process(&ctx(), resp).await.unwrap();
            assert!(outcome.entries.is_empty());
            assert_eq!(outcome.next.len(), 1);
            assert!(!job.use_in_results());
        }

        #[tokio::test]
        async fn success_without_verify_emits_enriched() {
            let exiter = Arc::new(ExitMonitor::new());
            let mut job = EmailExtractJob::new("p", website_entry());
            job.verify = false;
            job.exit_monitor = Some(exiter.clone());
            let resp = FetchResponse {
                url: "https://acme.example".into(),
                status: 200,
                body: r#"<a href="mailto:hi@acme.example">hi</a>"#.into(),
                ..Default::default()
            };
            let outcome = job.process(&ctx(), resp).await.unwrap();
            assert_eq!(outcome.entries.len(), 1);
            assert_eq!(outcome.entries[0].emails, vec!["hi@acme.example".to_string()]);
            assert_eq!(exiter.snapshot().places_completed, 1);
        }
    }
}
