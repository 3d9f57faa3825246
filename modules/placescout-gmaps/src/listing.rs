//! Browser-driven listing discovery: scroll the results feed and spawn a
//! PlaceJob per discovered place link.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::info;
use uuid::Uuid;

use headless_client::BrowserPage;
use placescout_engine::{
    Deduper, ExecMode, ExitMonitor, FetchResponse, Job, JobContext, Priority, ProcessOutcome,
};

use crate::browser::{click_reject_cookies_if_required, page_url, scroll_feed};
use crate::place::PlaceJob;
use crate::preflight::PreflightConfig;

const FEED_SELECTOR: &str = "div[role='feed']";
const PLACE_PATH: &str = "/maps/place/";

pub struct GmapJob {
    id: String,
    url: String,
    pub lang: String,
    pub query: String,
    pub max_depth: usize,
    pub extract_email: bool,
    pub extract_extra_reviews: bool,
    pub preflight: PreflightConfig,

    pub deduper: Option<Arc<dyn Deduper>>,
    pub exit_monitor: Option<Arc<ExitMonitor>>,
}

impl GmapJob {
    pub fn new(
        id: &str,
        lang: &str,
        query: &str,
        max_depth: usize,
        extract_email: bool,
        geo_coordinates: &str,
        zoom: u8,
    ) -> Self {
        let escaped: String =
            url::form_urlencoded::byte_serialize(query.as_bytes()).collect();

        // geo and zoom must be both set or neither
        let map_url = if !geo_coordinates.is_empty() && zoom > 0 {
            format!(
                "https://www.google.com/maps/search/{}/@{},{}z",
                escaped,
                geo_coordinates.replace(' ', ""),
                zoom
            )
        } else {
            format!("https://www.google.com/maps/search/{escaped}")
        };

        Self {
            id: if id.is_empty() { Uuid::new_v4().to_string() } else { id.to_string() },
            url: map_url,
            lang: lang.to_string(),
            query: query.to_string(),
            max_depth,
            extract_email,
            extract_extra_reviews: false,
            preflight: PreflightConfig::default(),
            deduper: None,
            exit_monitor: None,
        }
    }

    fn place_job(&self, href: &str) -> PlaceJob {
        let mut job = PlaceJob::new(
            &self.id,
            &self.lang,
            href,
            self.extract_email,
            self.extract_extra_reviews,
        );
        job.preflight = self.preflight.clone();
        if let Some(e) = &self.exit_monitor {
            job.exit_monitor = Some(e.clone());
        }
        job
    }
}

/// Hrefs of the place anchors inside the results feed.
fn extract_place_links(body: &str) -> Vec<String> {
    let doc = Html::parse_document(body);
    let selector = match Selector::parse("div[role='feed'] div[jsaction]>a") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    doc.select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| !href.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl Job for GmapJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> Priority {
        Priority::Low
    }

    fn mode(&self) -> ExecMode {
        ExecMode::BrowserRendered
    }

    fn url(&self) -> String {
        format!("{}?hl={}", self.url, self.lang)
    }

    fn use_in_results(&self) -> bool {
        false
    }

    async fn browser_actions(&mut self, page: &mut dyn BrowserPage) -> FetchResponse {
        if let Err(e) = page.navigate(&self.url()).await {
            return FetchResponse::failed(&self.url(), e.to_string());
        }

        click_reject_cookies_if_required(page).await;

        let feed_found = page.wait_for_selector(FEED_SELECTOR, 700).await.unwrap_or(false);

        // A single-result search slowly redirects to the place page itself.
        let mut single_place = false;
        if !feed_found {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while tokio::time::Instant::now() < deadline {
                if page_url(page).await.contains(PLACE_PATH) {
                    single_place = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
        }

        if !single_place {
            scroll_feed(page, self.max_depth).await;
        }

        let final_url = page_url(page).await;
        match page.content().await {
            Ok(body) => FetchResponse {
                url: final_url,
                status: 200,
                body,
                error: None,
                meta: Default::default(),
            },
            Err(e) => FetchResponse::failed(&final_url, e.to_string()),
        }
    }

    async fn process(
        &mut self,
        _ctx: &JobContext,
        resp: FetchResponse,
    ) -> anyhow::Result<ProcessOutcome> {
        let mut next: Vec<Box<dyn Job>> = Vec::new();

        if resp.url.contains(PLACE_PATH) {
            next.push(Box::new(self.place_job(&resp.url)));
        } else {
            for href in extract_place_links(&resp.body) {
                let unseen = match &self.deduper {
                    Some(d) => d.add_if_absent(&href).await,
                    None => true,
                };
                if unseen {
                    next.push(Box::new(self.place_job(&href)));
                }
            }
        }

        if let Some(exiter) = &self.exit_monitor {
            exiter.incr_places_found(next.len() as u64);
            exiter.incr_seed_completed(1);
        }

        info!(places = next.len(), query = self.query.as_str(), "places found");

        Ok(ProcessOutcome::children(next))
    }
}
