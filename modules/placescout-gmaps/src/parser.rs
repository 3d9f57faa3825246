//! Decoding of the listing payload and the place-detail application state.
//!
//! Both payloads are deeply nested JSON arrays addressed by fixed integer
//! index paths. The walk helpers return zero values on any shape mismatch —
//! a malformed cell can never fault the parse.

use std::collections::BTreeMap;

use serde_json::Value;

use placescout_common::{
    scan_kgmid, About, AboutOption, Address, Entry, Image, LinkSource, Owner, PlacescoutError,
    Review,
};

/// The security prefix stripped from raw payloads before JSON decoding.
pub const PAYLOAD_PREFIX: &str = ")]}'";

// ---------------------------------------------------------------------------
// Index-walk helpers
// ---------------------------------------------------------------------------

/// Walk an array tree by index path. None on any missing, null, or
/// non-array intermediate cell.
fn nth<'a>(v: &'a Value, idxs: &[usize]) -> Option<&'a Value> {
    let mut cur = v;
    for &i in idxs {
        cur = cur.as_array()?.get(i)?;
        if cur.is_null() {
            return None;
        }
    }
    Some(cur)
}

fn get_str(v: &Value, idxs: &[usize]) -> String {
    nth(v, idxs).and_then(|x| x.as_str()).unwrap_or("").to_string()
}

fn get_f64(v: &Value, idxs: &[usize]) -> f64 {
    nth(v, idxs).and_then(|x| x.as_f64()).unwrap_or(0.0)
}

fn get_arr<'a>(v: &'a Value, idxs: &[usize]) -> &'a [Value] {
    nth(v, idxs).and_then(|x| x.as_array()).map(|a| a.as_slice()).unwrap_or(&[])
}

/// Strip the payload security prefix and surrounding whitespace.
pub fn strip_payload_prefix(raw: &str) -> &str {
    raw.trim().trim_start_matches(PAYLOAD_PREFIX).trim_start()
}

/// Discard everything up to and including the first newline. A body with no
/// newline is treated as empty.
pub fn remove_first_line(data: &str) -> &str {
    match data.find('\n') {
        Some(i) => &data[i + 1..],
        None => "",
    }
}

// ---------------------------------------------------------------------------
// Place record
// ---------------------------------------------------------------------------

/// Parse the place record array (`darray`) shared by the place-detail state
/// and each listing item. Derived fields are not computed here; callers run
/// `Entry::derive` after any root-level enrichment.
pub fn entry_from_record(darray: &Value) -> Entry {
    let mut entry = Entry::default();

    entry.review_count = get_f64(darray, &[4, 8]) as i64;
    entry.link = get_str(darray, &[27]);
    entry.title = get_str(darray, &[11]);

    entry.categories = get_arr(darray, &[13])
        .iter()
        .filter_map(|c| c.as_str().map(String::from))
        .collect();
    if let Some(first) = entry.categories.first() {
        entry.category = first.clone();
    }

    let raw_address = get_str(darray, &[18]);
    entry.address = raw_address
        .strip_prefix(&format!("{},", entry.title))
        .unwrap_or(&raw_address)
        .trim()
        .to_string();

    entry.open_hours = parse_hours(darray);
    entry.popular_times = parse_popular_times(darray);
    entry.website = get_str(darray, &[7, 0]);
    entry.classify_own_website();

    entry.phone = get_str(darray, &[178, 0, 0]);
    entry.plus_code = get_str(darray, &[183, 2, 2, 0]);
    entry.review_rating = get_f64(darray, &[4, 7]);
    entry.latitude = get_f64(darray, &[9, 2]);
    entry.longitude = get_f64(darray, &[9, 3]);
    entry.status = get_str(darray, &[34, 4, 4]);
    entry.description = get_str(darray, &[32, 1, 1]);
    entry.reviews_link = get_str(darray, &[4, 3, 0]);
    entry.thumbnail = get_str(darray, &[72, 0, 1, 6, 0]);
    entry.timezone = get_str(darray, &[30]);
    entry.price_range = get_str(darray, &[4, 2]);
    entry.data_id = get_str(darray, &[10]);

    entry.images = link_sources(get_arr(darray, &[171, 0]), &[3, 0, 6, 0], &[2])
        .into_iter()
        .map(|ls| Image { title: ls.source, image: ls.link })
        .collect();

    entry.reservations = link_sources(get_arr(darray, &[46]), &[0], &[1]);

    let mut order_online = get_arr(darray, &[75, 0, 1, 2]);
    if order_online.is_empty() {
        order_online = get_arr(darray, &[75, 0, 0, 2]);
    }
    entry.order_online = link_sources(order_online, &[1, 2, 0], &[0, 0]);

    entry.menu = LinkSource {
        link: get_str(darray, &[38, 0]),
        source: get_str(darray, &[38, 1]),
    };

    entry.owner = Owner {
        id: get_str(darray, &[57, 2]),
        name: get_str(darray, &[57, 1]),
        link: String::new(),
    };

    entry.complete_address = Address {
        borough: get_str(darray, &[183, 1, 0]),
        street: get_str(darray, &[183, 1, 1]),
        city: get_str(darray, &[183, 1, 3]),
        postal_code: get_str(darray, &[183, 1, 4]),
        state: get_str(darray, &[183, 1, 5]),
        country: get_str(darray, &[183, 1, 6]),
    };

    for el in get_arr(darray, &[100, 1]) {
        let mut about = About {
            id: get_str(el, &[0]),
            name: get_str(el, &[1]),
            options: Vec::new(),
        };
        for opt in get_arr(el, &[2]) {
            let option = AboutOption {
                name: get_str(opt, &[1]),
                enabled: get_f64(opt, &[2, 1, 0, 0]) == 1.0,
            };
            if !option.name.is_empty() {
                about.options.push(option);
            }
        }
        entry.about.push(about);
    }

    for (star, idx) in [(1u8, 0usize), (2, 1), (3, 2), (4, 3), (5, 4)] {
        entry
            .reviews_per_rating
            .insert(star, get_f64(darray, &[175, 3, idx]) as i64);
    }

    entry.user_reviews = parse_reviews(get_arr(darray, &[175, 9, 0, 0]));

    entry
}

/// Parse the full place-detail application state: strip the prefix, decode,
/// read the record at index 6, then enrich from the root (cid, kgmid) and
/// compute derived fields.
pub fn entry_from_app_state(raw: &str, lang: &str) -> Result<Entry, PlacescoutError> {
    let stripped = strip_payload_prefix(raw);
    let jd: Value = serde_json::from_str(stripped)
        .map_err(|e| PlacescoutError::Parse(format!("place state decode: {e}")))?;

    let arr = jd
        .as_array()
        .ok_or_else(|| PlacescoutError::Parse("place state is not an array".into()))?;
    if arr.len() < 7 {
        return Err(PlacescoutError::Parse("place state too short".into()));
    }
    if nth(&jd, &[6]).and_then(|v| v.as_array()).is_none() {
        return Err(PlacescoutError::Parse("place record missing at index 6".into()));
    }

    let darray = &arr[6];
    let mut entry = entry_from_record(darray);
    entry.cid = get_str(&jd, &[25, 3, 0, 13, 0, 0, 1]);
    entry.kgmid = scan_kgmid(&jd);
    entry.derive(lang);
    Ok(entry)
}

/// Fast path: only the review count, used to decide extra-review fetching.
pub fn review_count_from_app_state(raw: &str) -> i64 {
    let stripped = strip_payload_prefix(raw);
    match serde_json::from_str::<Value>(stripped) {
        Ok(jd) => get_f64(&jd, &[6, 4, 8]) as i64,
        Err(_) => 0,
    }
}

// ---------------------------------------------------------------------------
// Listing payload
// ---------------------------------------------------------------------------

/// Decode the compact listing payload (after first-line removal). Items sit
/// at `[0][1]`; the first item is a header artifact; each item's `[14]` is a
/// place record array. Records failing validation are dropped.
pub fn parse_search_results(body: &str) -> Result<Vec<Entry>, PlacescoutError> {
    let jd: Value = serde_json::from_str(body)
        .map_err(|e| PlacescoutError::Parse(format!("listing decode: {e}")))?;

    let items = nth(&jd, &[0, 1])
        .and_then(|v| v.as_array())
        .ok_or_else(|| PlacescoutError::Parse("listing items missing at [0][1]".into()))?;

    let mut entries = Vec::new();
    for item in items.iter().skip(1) {
        let Some(record) = nth(item, &[14]) else { continue };
        if !record.is_array() {
            continue;
        }
        let mut entry = entry_from_record(record);
        if entry.kgmid.is_empty() {
            entry.kgmid = scan_kgmid(item);
        }
        entry.derive("");
        if entry.validate().is_ok() {
            entries.push(entry);
        }
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Reviews
// ---------------------------------------------------------------------------

fn parse_reviews(reviews: &[Value]) -> Vec<Review> {
    let mut out = Vec::with_capacity(reviews.len());
    for item in reviews {
        let Some(el) = nth(item, &[0]) else { continue };

        let time = get_arr(el, &[2, 2, 0, 1, 21, 6, 8]);
        let when = if time.len() >= 3 {
            format!(
                "{}-{}-{}",
                value_display(&time[0]),
                value_display(&time[1]),
                value_display(&time[2])
            )
        } else {
            String::new()
        };

        let review = Review {
            name: get_str(el, &[1, 4, 5, 0]),
            profile_picture: get_str(el, &[1, 4, 5, 1]),
            when,
            rating: get_f64(el, &[2, 0, 0]) as i64,
            description: get_str(el, &[2, 15, 0, 0]),
            images: get_arr(el, &[2, 2, 0, 1, 21, 7])
                .iter()
                .enumerate()
                .filter_map(|(j, _)| {
                    let val = get_str(el, &[2, 2, 0, 1, 21, 7, j]);
                    // Image refs carry a 2-character control prefix.
                    (val.len() > 2).then(|| val[2..].to_string())
                })
                .collect(),
        };

        if review.name.is_empty() {
            continue;
        }
        out.push(review);
    }
    out
}

fn value_display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Parse one extra-review page (a `)]}'`-prefixed JSON array with reviews at
/// index 2) and append its reviews to the entry's extended set.
pub fn add_extra_reviews(entry: &mut Entry, pages: &[String]) {
    for page in pages {
        let stripped = strip_payload_prefix(page);
        let Ok(jd) = serde_json::from_str::<Value>(stripped) else { continue };
        let reviews = parse_reviews(get_arr(&jd, &[2]));
        entry.user_reviews_extended.extend(reviews);
    }
}

// ---------------------------------------------------------------------------
// Hours / popular times / link sources
// ---------------------------------------------------------------------------

fn parse_hours(darray: &Value) -> BTreeMap<String, Vec<String>> {
    let mut hours = BTreeMap::new();
    for item in get_arr(darray, &[34, 1]) {
        let day = get_str(item, &[0]);
        if day.is_empty() {
            continue;
        }
        let times: Vec<String> = get_arr(item, &[1])
            .iter()
            .filter_map(|t| t.as_str().map(String::from))
            .collect();
        hours.insert(day, times);
    }
    hours
}

fn parse_popular_times(darray: &Value) -> BTreeMap<String, BTreeMap<u8, u32>> {
    const DAYS: [&str; 8] =
        ["", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"];

    let mut popular = BTreeMap::new();
    for item in get_arr(darray, &[84, 0]) {
        let day_idx = get_f64(item, &[0]) as usize;
        let Some(day) = DAYS.get(day_idx).filter(|d| !d.is_empty()) else { continue };

        let mut times = BTreeMap::new();
        for t in get_arr(item, &[1]) {
            let hour = get_f64(t, &[0]) as u8;
            let traffic = get_f64(t, &[1]) as u32;
            times.insert(hour, traffic);
        }
        popular.insert(day.to_string(), times);
    }
    popular
}

fn link_sources(arr: &[Value], link_path: &[usize], source_path: &[usize]) -> Vec<LinkSource> {
    arr.iter()
        .filter_map(|item| {
            let ls = LinkSource {
                link: get_str(item, link_path),
                source: get_str(item, source_path),
            };
            (!ls.link.is_empty() && !ls.source.is_empty()).then_some(ls)
        })
        .collect()
}
