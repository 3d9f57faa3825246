//! Page-driving helpers shared by the browser-mode jobs.

use headless_client::BrowserPage;
use tracing::info;

/// The consent form's reject button. Clicking is best-effort; absence of the
/// form is a no-op.
pub const CONSENT_SELECTOR: &str =
    r#"form[action="https://consent.google.com/save"]:first-of-type button:first-of-type"#;

const CONSENT_TIMEOUT_MS: u64 = 500;

pub async fn click_reject_cookies_if_required(page: &mut dyn BrowserPage) {
    if let Ok(true) = page.wait_for_selector(CONSENT_SELECTOR, CONSENT_TIMEOUT_MS).await {
        let script = format!(
            "(() => {{ const el = document.querySelector({CONSENT_SELECTOR:?}); if (el) el.click(); return true; }})()"
        );
        let _ = page.evaluate_script(&script).await;
    }
}

/// Current page URL as the page itself reports it.
pub async fn page_url(page: &mut dyn BrowserPage) -> String {
    page.evaluate_script("window.location.href")
        .await
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| page.url())
}

/// Scroll the results feed until the height stops changing or `max_depth`
/// rounds have run. Falls back through alternate feed selectors and finally
/// the viewport. Returns the number of scroll attempts made.
pub async fn scroll_feed(page: &mut dyn BrowserPage, max_depth: usize) -> usize {
    const CANDIDATES: [&str; 4] = [
        "div[role='feed']",
        "div[role='region']",
        "div[aria-label='Results']",
        "div[jscontroller][role='feed']",
    ];
    const BASE_DELAY_MS: u64 = 300;
    const MAX_DELAY_MS: u64 = 2000;
    const MAX_NO_CHANGE: u32 = 3;

    let selectors_json =
        serde_json::to_string(&CANDIDATES).expect("static selector list serializes");

    let mut current_height: i64 = 0;
    let mut consecutive_no_change: u32 = 0;
    let mut attempts = 0usize;

    for _ in 0..max_depth {
        attempts += 1;
        let delay = (BASE_DELAY_MS * attempts as u64).min(MAX_DELAY_MS);

        let script = format!(
            r#"(() => {{
                const selectors = {selectors_json};
                let el = null;
                for (const s of selectors) {{
                    el = document.querySelector(s);
                    if (el) break;
                }}
                if (!el) {{
                    window.scrollBy(0, window.innerHeight);
                    return document.documentElement.scrollHeight;
                }}
                el.scrollTop = el.scrollHeight;
                return el.scrollHeight;
            }})()"#
        );

        let height = match page.evaluate_script(&script).await {
            Ok(v) => v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)).unwrap_or(0),
            Err(e) => {
                info!(attempt = attempts, error = %e, "scroll evaluate error");
                if attempts >= 2 {
                    return attempts;
                }
                0
            }
        };

        if height <= 0 || height == current_height {
            consecutive_no_change += 1;
        } else {
            consecutive_no_change = 0;
            current_height = height;
        }

        if consecutive_no_change >= MAX_NO_CHANGE {
            info!(attempts, height = current_height, "scroll stop: no change");
            break;
        }

        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }

    attempts
}
