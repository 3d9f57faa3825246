//! Static-first tile probe with runtime 2×2 subdivision.
//!
//! A SearchJob covers one tile. It fetches the compact listing payload and
//! then branches: fall back to a browser listing on the brittle-static
//! signals (empty body, parse failure, zero or one entries), subdivide into
//! four children when saturated below max zoom, or accept its entries after
//! radius filtering and deduplication. A tile never both subdivides and
//! emits entries.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use placescout_common::{
    degree_offsets, filter_and_sort_within_radius, viewport_meters, Entry,
};
use placescout_engine::{
    Deduper, ExecMode, ExitMonitor, FetchResponse, Job, JobContext, Priority, ProcessOutcome,
};

use crate::listing::GmapJob;
use crate::parser::{parse_search_results, remove_first_line};
use crate::preflight::PreflightConfig;

pub const DEFAULT_SPLIT_THRESHOLD: usize = 90;
const DEFAULT_VIEWPORT_W: u32 = 600;
const DEFAULT_VIEWPORT_H: u32 = 800;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapLocation {
    pub lat: f64,
    pub lon: f64,
    pub zoom: u8,
    pub radius: f64,
}

#[derive(Debug, Clone)]
pub struct MapSearchParams {
    pub location: MapLocation,
    pub query: String,
    pub viewport_w: u32,
    pub viewport_h: u32,
    pub lang: String,

    // Adaptive tiling controls
    pub split_threshold: usize,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub subdiv_level: u32,

    // Strategy
    pub static_first: bool,

    // Browser-fallback knobs
    pub fallback_depth: usize,
    pub fallback_email: bool,
    pub preflight: PreflightConfig,
}

impl MapSearchParams {
    pub fn new(query: &str, lang: &str, location: MapLocation) -> Self {
        Self {
            location,
            query: query.to_string(),
            viewport_w: DEFAULT_VIEWPORT_W,
            viewport_h: DEFAULT_VIEWPORT_H,
            lang: lang.to_string(),
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            min_zoom: location.zoom,
            max_zoom: location.zoom,
            subdiv_level: 0,
            static_first: true,
            fallback_depth: 10,
            fallback_email: false,
            preflight: PreflightConfig::default(),
        }
    }
}

/// What the static listing told this tile to do. Pure function of the
/// response; the side effects live in `process`.
#[derive(Debug, PartialEq)]
pub(crate) enum TileAction {
    /// Escalate to the browser listing, with the reason tag for the log.
    Fallback(&'static str),
    /// Spawn the 2×2 children at zoom+1.
    Subdivide,
    /// Accept the parsed entries at this tile.
    Accept(Vec<Entry>),
}

pub(crate) fn decide_tile_action(
    body: &str,
    zoom: u8,
    max_zoom: u8,
    split_threshold: usize,
) -> TileAction {
    let payload = remove_first_line(body);
    if payload.is_empty() {
        return TileAction::Fallback("empty_body");
    }
    let entries = match parse_search_results(payload) {
        Ok(entries) => entries,
        Err(_) => return TileAction::Fallback("parse_failure"),
    };
    match entries.len() {
        0 => TileAction::Fallback("no_entries"),
        1 => TileAction::Fallback("single_place"),
        n if split_threshold > 0 && n >= split_threshold && zoom < max_zoom => {
            TileAction::Subdivide
        }
        _ => TileAction::Accept(entries),
    }
}

pub struct SearchJob {
    id: String,
    params: MapSearchParams,
    pub deduper: Option<Arc<dyn Deduper>>,
    pub exit_monitor: Option<Arc<ExitMonitor>>,
}

impl SearchJob {
    pub fn new(params: MapSearchParams) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            params,
            deduper: None,
            exit_monitor: None,
        }
    }

    pub fn with_deduper(mut self, deduper: Arc<dyn Deduper>) -> Self {
        self.deduper = Some(deduper);
        self
    }

    pub fn with_exit_monitor(mut self, exiter: Arc<ExitMonitor>) -> Self {
        self.exit_monitor = Some(exiter);
        self
    }

    pub fn params(&self) -> &MapSearchParams {
        &self.params
    }

    fn fallback_job(&self) -> Box<dyn Job> {
        let coords = format!("{:.6},{:.6}", self.params.location.lat, self.params.location.lon);
        let mut job = GmapJob::new(
            "",
            &self.params.lang,
            &self.params.query,
            self.params.fallback_depth,
            self.params.fallback_email,
            &coords,
            self.params.location.zoom,
        );
        job.preflight = self.params.preflight.clone();
        if let Some(d) = &self.deduper {
            job.deduper = Some(d.clone());
        }
        if let Some(e) = &self.exit_monitor {
            job.exit_monitor = Some(e.clone());
        }
        Box::new(job)
    }

    /// Quadrant centers for the 2×2 children, offset half a viewport in each
    /// direction at the current zoom.
    fn child_locations(&self) -> [MapLocation; 4] {
        let loc = self.params.location;
        let w = if self.params.viewport_w > 0 { self.params.viewport_w } else { DEFAULT_VIEWPORT_W };
        let h = if self.params.viewport_h > 0 { self.params.viewport_h } else { DEFAULT_VIEWPORT_H };

        let (vw_m, vh_m) = viewport_meters(loc.lat, loc.zoom, w, h);
        let (lat_off, lon_off) = degree_offsets(loc.lat, vw_m / 2.0, vh_m / 2.0);

        let child = |lat: f64, lon: f64| MapLocation {
            lat,
            lon,
            zoom: loc.zoom + 1,
            radius: loc.radius,
        };
        [
            child(loc.lat + lat_off, loc.lon - lon_off),
            child(loc.lat + lat_off, loc.lon + lon_off),
            child(loc.lat - lat_off, loc.lon - lon_off),
            child(loc.lat - lat_off, loc.lon + lon_off),
        ]
    }

    fn subdivide(&self) -> Vec<Box<dyn Job>> {
        self.child_locations()
            .into_iter()
            .map(|location| {
                let params = MapSearchParams {
                    location,
                    query: self.params.query.clone(),
                    viewport_w: self.params.viewport_w,
                    viewport_h: self.params.viewport_h,
                    lang: self.params.lang.clone(),
                    split_threshold: self.params.split_threshold,
                    min_zoom: self.params.min_zoom,
                    max_zoom: self.params.max_zoom,
                    subdiv_level: self.params.subdiv_level + 1,
                    static_first: self.params.static_first,
                    fallback_depth: self.params.fallback_depth,
                    fallback_email: self.params.fallback_email,
                    preflight: self.params.preflight.clone(),
                };
                let mut job = SearchJob::new(params);
                job.deduper = self.deduper.clone();
                job.exit_monitor = self.exit_monitor.clone();
                Box::new(job) as Box<dyn Job>
            })
            .collect()
    }
}

#[async_trait]
impl Job for SearchJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> Priority {
        Priority::Medium
    }

    fn mode(&self) -> ExecMode {
        ExecMode::StaticHttp
    }

    fn url(&self) -> String {
        build_listing_url(&self.params)
    }

    async fn process(
        &mut self,
        _ctx: &JobContext,
        resp: FetchResponse,
    ) -> anyhow::Result<ProcessOutcome> {
        let t0 = Instant::now();
        let loc = self.params.location;
        let action = decide_tile_action(
            &resp.body,
            loc.zoom,
            self.params.max_zoom,
            self.params.split_threshold,
        );

        match action {
            TileAction::Fallback(reason) => {
                if let Some(exiter) = &self.exit_monitor {
                    // The fallback listing is a seed of its own; register it
                    // before completing this one.
                    exiter.incr_seed_total(1);
                    exiter.incr_seed_completed(1);
                }
                info!(
                    reason,
                    query = self.params.query.as_str(),
                    lat = loc.lat,
                    lon = loc.lon,
                    zoom = loc.zoom,
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "tile fallback"
                );
                Ok(ProcessOutcome::children(vec![self.fallback_job()]))
            }
            TileAction::Subdivide => {
                let children = self.subdivide();
                if let Some(exiter) = &self.exit_monitor {
                    exiter.incr_seed_total(children.len() as u64);
                    exiter.incr_seed_completed(1);
                }
                info!(
                    query = self.params.query.as_str(),
                    lat = loc.lat,
                    lon = loc.lon,
                    zoom = loc.zoom,
                    children = children.len(),
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "tile subdivide"
                );
                Ok(ProcessOutcome { entries: Vec::new(), next: children })
            }
            TileAction::Accept(mut entries) => {
                if loc.radius > 0.0 {
                    entries = filter_and_sort_within_radius(entries, loc.lat, loc.lon, loc.radius);
                }

                if let Some(deduper) = &self.deduper {
                    let mut unique = Vec::with_capacity(entries.len());
                    for entry in entries {
                        let key = entry.dedup_key();
                        if key.is_empty() || deduper.add_if_absent(&key).await {
                            unique.push(entry);
                        }
                    }
                    entries = unique;
                }

                if let Some(exiter) = &self.exit_monitor {
                    exiter.incr_places_found(entries.len() as u64);
                    exiter.incr_places_completed(entries.len() as u64);
                    exiter.incr_seed_completed(1);
                }

                info!(
                    query = self.params.query.as_str(),
                    lat = loc.lat,
                    lon = loc.lon,
                    zoom = loc.zoom,
                    entries = entries.len(),
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "tile accept"
                );
                Ok(ProcessOutcome::entries(entries))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Listing URL
// ---------------------------------------------------------------------------

/// The static listing URL with its `pb` protocol parameter. The template is
/// bit-exact; only the tile's lon/lat/viewport/zoom interpolate.
pub fn build_listing_url(params: &MapSearchParams) -> String {
    let vw = if params.viewport_w > 0 { params.viewport_w } else { DEFAULT_VIEWPORT_W };
    let vh = if params.viewport_h > 0 { params.viewport_h } else { DEFAULT_VIEWPORT_H };

    let pb = format!(
        "!4m12!1m3!1d3826.902183192154!2d{lon:.4}!3d{lat:.4}!2m3!1f0!2f0!3f0!3m2!1i{vw}!2i{vh}!4f{zoom:.1}!7i20!8i0\
         !10b1!12m22!1m3!18b1!30b1!34e1!2m3!5m1!6e2!20e3!4b0!10b1!12b1!13b1!16b1!17m1!3e1!20m3!5e2!6b1!14b1!46m1!1b0\
         !96b1!19m4!2m3!1i360!2i120!4i8",
        lon = params.location.lon,
        lat = params.location.lat,
        vw = vw,
        vh = vh,
        zoom = params.location.zoom as f64,
    );

    let mut url = url::Url::parse("https://maps.google.com/search").expect("static base url");
    url.query_pairs_mut()
        .append_pair("tbm", "map")
        .append_pair("authuser", "0")
        .append_pair("hl", &params.lang)
        .append_pair("q", &params.query)
        .append_pair("pb", &pb);
    url.to_string()
}
