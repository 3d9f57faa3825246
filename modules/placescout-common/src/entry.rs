//! The business-record shape produced by the pipeline, with its CSV
//! projection and the derivation helpers that fill its computed fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geo::haversine_m;
use crate::phones::normalize_phones;
use crate::social::{classify_social_url, SocialPlatform};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub title: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkSource {
    pub link: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub name: String,
    pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub borough: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub state: String,
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AboutOption {
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct About {
    pub id: String,
    pub name: String,
    pub options: Vec<AboutOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub name: String,
    pub profile_picture: String,
    pub rating: i64,
    pub description: String,
    pub images: Vec<String>,
    pub when: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingIds {
    pub google_ua: String,
    pub google_ga4: String,
}

/// A single place record. Owned by exactly one job chain at a time; ownership
/// passes to the child job when the chain extends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub input_id: String,
    pub link: String,
    pub cid: String,
    pub title: String,
    pub categories: Vec<String>,
    pub category: String,
    pub address: String,
    pub open_hours: BTreeMap<String, Vec<String>>,
    /// day-of-week → hour-of-day → traffic
    pub popular_times: BTreeMap<String, BTreeMap<u8, u32>>,
    pub website: String,
    pub phone: String,
    pub plus_code: String,
    pub review_count: i64,
    pub review_rating: f64,
    pub reviews_per_rating: BTreeMap<u8, i64>,
    pub latitude: f64,
    pub longitude: f64,
    pub status: String,
    pub description: String,
    pub reviews_link: String,
    pub thumbnail: String,
    pub timezone: String,
    pub price_range: String,
    pub data_id: String,
    pub images: Vec<Image>,
    pub reservations: Vec<LinkSource>,
    pub order_online: Vec<LinkSource>,
    pub menu: LinkSource,
    pub owner: Owner,
    pub complete_address: Address,
    pub about: Vec<About>,
    pub user_reviews: Vec<Review>,
    pub user_reviews_extended: Vec<Review>,
    pub emails: Vec<String>,

    // Legacy single-valued social fields, kept for the CSV projection
    pub facebook: String,
    pub instagram: String,
    pub linkedin: String,
    pub whatsapp: String,

    // Derived fields
    pub place_id: String,
    pub kgmid: String,
    pub google_maps_url: String,
    pub google_knowledge_url: String,
    pub review_url: String,
    pub domain: String,
    pub phones: Vec<String>,
    /// "YES" / "NO"
    pub claimed: String,
    pub verified: bool,
    pub featured_image: String,
    /// Formatted "Monday: [..], ..." string in canonical weekday order.
    pub opening_hours: String,

    pub meta: PageMeta,
    pub tracking_ids: TrackingIds,

    pub facebook_links: Vec<String>,
    pub instagram_links: Vec<String>,
    pub linkedin_links: Vec<String>,
    pub pinterest_links: Vec<String>,
    pub tiktok_links: Vec<String>,
    pub twitter_links: Vec<String>,
    pub yelp_links: Vec<String>,
    pub youtube_links: Vec<String>,
}

impl Entry {
    pub fn validate(&self) -> Result<(), crate::PlacescoutError> {
        if self.title.is_empty() {
            return Err(crate::PlacescoutError::Validation("title is empty".into()));
        }
        if self.category.is_empty() {
            return Err(crate::PlacescoutError::Validation("category is empty".into()));
        }
        Ok(())
    }

    pub fn haversine_distance(&self, lat: f64, lon: f64) -> f64 {
        haversine_m(lat, lon, self.latitude, self.longitude)
    }

    pub fn is_within_radius(&self, lat: f64, lon: f64, radius: f64) -> bool {
        self.haversine_distance(lat, lon) <= radius
    }

    /// Whether the website is worth probing for email enrichment. Social and
    /// video platforms never are.
    pub fn is_website_valid_for_email(&self) -> bool {
        let s = self.website.trim().to_lowercase();
        if s.is_empty() {
            return false;
        }
        const BLOCK: [&str; 7] = [
            "facebook.com",
            "instagram.com",
            "twitter.com",
            "x.com",
            "tiktok.com",
            "youtube.com",
            "youtu.be",
        ];
        !BLOCK.iter().any(|b| s.contains(b))
    }

    /// Cross-tile dedup key: place-id if present, else cid|title|coords at six
    /// decimals. Empty key means the entry is never deduplicated.
    pub fn dedup_key(&self) -> String {
        if !self.place_id.is_empty() {
            return self.place_id.clone();
        }
        if self.cid.is_empty() && self.title.is_empty() {
            return String::new();
        }
        format!(
            "{}|{}|{:.6}|{:.6}",
            self.cid, self.title, self.latitude, self.longitude
        )
    }

    /// Record a social link on both the legacy single field (first occurrence
    /// wins) and the deduplicated array field.
    pub fn add_social_link(&mut self, platform: SocialPlatform, href: &str) {
        let href = href.trim();
        if href.is_empty() {
            return;
        }
        match platform {
            SocialPlatform::Facebook => {
                if self.facebook.is_empty() {
                    self.facebook = href.to_string();
                }
                push_unique(&mut self.facebook_links, href);
            }
            SocialPlatform::Instagram => {
                if self.instagram.is_empty() {
                    self.instagram = href.to_string();
                }
                push_unique(&mut self.instagram_links, href);
            }
            SocialPlatform::LinkedIn => {
                if self.linkedin.is_empty() {
                    self.linkedin = href.to_string();
                }
                push_unique(&mut self.linkedin_links, href);
            }
            SocialPlatform::Whatsapp => {
                if self.whatsapp.is_empty() {
                    self.whatsapp = href.to_string();
                }
            }
            SocialPlatform::Pinterest => push_unique(&mut self.pinterest_links, href),
            SocialPlatform::Tiktok => push_unique(&mut self.tiktok_links, href),
            SocialPlatform::Twitter => push_unique(&mut self.twitter_links, href),
            SocialPlatform::Yelp => push_unique(&mut self.yelp_links, href),
            SocialPlatform::Youtube => push_unique(&mut self.youtube_links, href),
        }
    }

    /// Backfill the legacy single fields from the arrays when only structured
    /// data (e.g. JSON-LD) provided them.
    pub fn backfill_legacy_social(&mut self) {
        if self.facebook.is_empty() {
            if let Some(first) = self.facebook_links.first() {
                self.facebook = first.clone();
            }
        }
        if self.instagram.is_empty() {
            if let Some(first) = self.instagram_links.first() {
                self.instagram = first.clone();
            }
        }
        if self.linkedin.is_empty() {
            if let Some(first) = self.linkedin_links.first() {
                self.linkedin = first.clone();
            }
        }
    }

    /// Classify the website itself as a social link when applicable.
    pub fn classify_own_website(&mut self) {
        let site = self.website.trim().to_string();
        if site.is_empty() {
            return;
        }
        if let Some(platform) = classify_social_url(&site) {
            if matches!(
                platform,
                SocialPlatform::Facebook
                    | SocialPlatform::Instagram
                    | SocialPlatform::LinkedIn
                    | SocialPlatform::Whatsapp
            ) {
                self.add_social_link(platform, &site);
            }
        }
    }

    /// Compute all derived fields from the parsed base fields. Idempotent.
    pub fn derive(&mut self, lang: &str) {
        self.google_maps_url = self.link.clone();
        self.featured_image = featured_image(&self.thumbnail, &self.images);
        self.place_id = place_id_from_reviews_link(&self.reviews_link);
        if !self.place_id.is_empty() {
            let gl = crate::phones::country_to_region(&self.complete_address.country);
            let gl = if self.complete_address.country.is_empty() { "" } else { gl.as_str() };
            self.review_url = build_review_url(&self.place_id, lang, gl);
        }
        self.opening_hours = format_opening_hours(&self.open_hours);
        self.domain = canonical_domain(&self.website);
        self.phones = normalize_phones(&self.phone, &self.complete_address.country);
        if !self.owner.id.is_empty() {
            self.owner.link = format!("https://www.google.com/maps/contrib/{}", self.owner.id);
            if self.claimed.is_empty() {
                self.claimed = "YES".to_string();
            }
        }
        if self.claimed.is_empty() {
            self.claimed = "NO".to_string();
        }
        if !self.kgmid.is_empty() {
            self.google_knowledge_url =
                format!("https://www.google.com/search?kgmid={}&kponly", self.kgmid);
        }
    }

    pub fn csv_headers() -> Vec<&'static str> {
        vec![
            "input_id",
            "link",
            "title",
            "category",
            "address",
            "open_hours",
            "popular_times",
            "website",
            "phone",
            "plus_code",
            "review_count",
            "review_rating",
            "reviews_per_rating",
            "latitude",
            "longitude",
            "cid",
            "status",
            "descriptions",
            "reviews_link",
            "thumbnail",
            "timezone",
            "price_range",
            "data_id",
            "images",
            "reservations",
            "order_online",
            "menu",
            "owner",
            "complete_address",
            "about",
            "user_reviews",
            "user_reviews_extended",
            "emails",
            "facebook",
            "instagram",
            "linkedin",
            "whatsapp",
        ]
    }

    pub fn csv_row(&self) -> Vec<String> {
        vec![
            self.input_id.clone(),
            self.link.clone(),
            self.title.clone(),
            self.category.clone(),
            self.address.clone(),
            stringify(&self.open_hours),
            stringify(&self.popular_times),
            self.website.clone(),
            self.phone.clone(),
            self.plus_code.clone(),
            self.review_count.to_string(),
            self.review_rating.to_string(),
            stringify(&self.reviews_per_rating),
            self.latitude.to_string(),
            self.longitude.to_string(),
            self.cid.clone(),
            self.status.clone(),
            self.description.clone(),
            self.reviews_link.clone(),
            self.thumbnail.clone(),
            self.timezone.clone(),
            self.price_range.clone(),
            self.data_id.clone(),
            stringify(&self.images),
            stringify(&self.reservations),
            stringify(&self.order_online),
            stringify(&self.menu),
            stringify(&self.owner),
            stringify(&self.complete_address),
            stringify(&self.about),
            stringify(&self.user_reviews),
            stringify(&self.user_reviews_extended),
            self.emails.join(", "),
            self.facebook.clone(),
            self.instagram.clone(),
            self.linkedin.clone(),
            self.whatsapp.clone(),
        ]
    }
}

fn stringify<T: Serialize>(v: &T) -> String {
    serde_json::to_string(v).unwrap_or_default()
}

fn push_unique(arr: &mut Vec<String>, v: &str) {
    if !arr.iter().any(|e| e == v) {
        arr.push(v.to_string());
    }
}

/// Trim, dedup, and drop empties, preserving first-occurrence order.
pub fn unique_strings(input: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(input.len());
    for s in input {
        let s = s.trim().to_string();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Derivation helpers
// ---------------------------------------------------------------------------

/// Lowercased host of a website URL with any leading `www.` stripped.
/// Idempotent: applying it to its own output is a no-op.
pub fn canonical_domain(site: &str) -> String {
    let site = site.trim();
    if site.is_empty() {
        return String::new();
    }
    let with_scheme = if site.starts_with("http://") || site.starts_with("https://") {
        site.to_string()
    } else {
        format!("http://{site}")
    };
    match url::Url::parse(&with_scheme) {
        Ok(u) => {
            let host = u.host_str().unwrap_or("").to_lowercase();
            host.trim_start_matches("www.").to_string()
        }
        Err(_) => site.to_lowercase().trim_start_matches("www.").to_string(),
    }
}

/// `"Monday: [t1, t2], Tuesday: [..]"` in canonical weekday order. Days not
/// present are omitted.
pub fn format_opening_hours(hours: &BTreeMap<String, Vec<String>>) -> String {
    if hours.is_empty() {
        return String::new();
    }
    const ORDER: [&str; 7] = [
        "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
    ];
    let mut parts = Vec::new();
    for day in ORDER {
        if let Some(times) = hours.get(day) {
            let times: Vec<String> = times.iter().map(|t| t.trim().to_string()).collect();
            parts.push(format!("{day}: [{}]", times.join(", ")));
        }
    }
    parts.join(", ")
}

pub fn featured_image(thumbnail: &str, images: &[Image]) -> String {
    if !thumbnail.trim().is_empty() {
        return thumbnail.to_string();
    }
    images
        .first()
        .map(|i| i.image.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_default()
}

/// The `placeid` query parameter of a reviews link, or empty.
pub fn place_id_from_reviews_link(link: &str) -> String {
    let link = link.trim();
    if link.is_empty() {
        return String::new();
    }
    match url::Url::parse(link) {
        Ok(u) => u
            .query_pairs()
            .find(|(k, _)| k == "placeid")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

pub fn build_review_url(place_id: &str, lang: &str, country: &str) -> String {
    let place_id = place_id.trim();
    if place_id.is_empty() {
        return String::new();
    }
    let mut base =
        format!("https://search.google.com/local/reviews?placeid={place_id}&authuser=0");
    if !lang.trim().is_empty() {
        base.push_str(&format!("&hl={}", lang.trim()));
    }
    if !country.trim().is_empty() {
        base.push_str(&format!("&gl={}", country.trim()));
    }
    base
}

/// Scan a JSON tree for the first `kgmid=/g/<id>` occurrence inside any
/// string value. Returns `/g/<id>` or empty.
pub fn scan_kgmid(value: &serde_json::Value) -> String {
    use serde_json::Value;
    let re = regex::Regex::new(r"kgmid=/g/([A-Za-z0-9]+)").expect("static regex");

    fn walk(v: &Value, re: &regex::Regex) -> Option<String> {
        match v {
            Value::String(s) => re
                .captures(s)
                .map(|c| format!("/g/{}", c.get(1).map(|m| m.as_str()).unwrap_or(""))),
            Value::Array(arr) => arr.iter().find_map(|x| walk(x, re)),
            Value::Object(map) => map.values().find_map(|x| walk(x, re)),
            _ => None,
        }
    }

    walk(value, &re).unwrap_or_default()
}

/// Radius filter: keep entries within `radius` meters of the center, sorted
/// ascending by distance.
pub fn filter_and_sort_within_radius(
    entries: Vec<Entry>,
    lat: f64,
    lon: f64,
    radius: f64,
) -> Vec<Entry> {
    let mut with_distance: Vec<(Entry, f64)> = entries
        .into_iter()
        .map(|e| {
            let d = e.haversine_distance(lat, lon);
            (e, d)
        })
        .filter(|(_, d)| *d <= radius)
        .collect();
    with_distance.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    with_distance.into_iter().map(|(e, _)| e).collect()
}
