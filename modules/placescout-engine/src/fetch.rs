//! Static HTTP fetcher for jobs that do not need a rendered page.

use std::time::Duration;

use crate::job::FetchResponse;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct StaticFetcher {
    client: reqwest::Client,
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticFetcher {
    pub fn new() -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
                .parse()
                .expect("static header"),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            "en-US,en;q=0.5".parse().expect("static header"),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("Failed to build HTTP client");

        Self { client }
    }

    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    /// Fetch a URL; failures land in `FetchResponse::error` so the scheduler
    /// can apply retry and `process_on_fetch_error` policy.
    pub async fn fetch(&self, url: &str) -> FetchResponse {
        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return FetchResponse::failed(url, e.to_string()),
        };

        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => return FetchResponse::failed(&final_url, e.to_string()),
        };

        let error = if status.is_success() {
            None
        } else {
            Some(format!("HTTP {status} for {final_url}"))
        };

        FetchResponse {
            url: final_url,
            status: status.as_u16(),
            body,
            error,
            meta: Default::default(),
        }
    }
}
