//! Seed construction: turn the keyword list plus geography knobs into
//! top-level jobs. Config errors surface here, synchronously, before
//! anything reaches a worker.

use std::sync::Arc;

use placescout_common::{
    parse_bbox, parse_coords, parse_keywords, validate_radius, validate_zoom, PlacescoutError,
};
use placescout_engine::{Deduper, ExitMonitor, Job};
use placescout_gmaps::preflight::PreflightConfig;
use placescout_gmaps::{GmapJob, MapLocation, MapSearchParams, SearchJob};

const FAST_VIEWPORT_W: u32 = 1920;
const FAST_VIEWPORT_H: u32 = 450;
const TILE_VIEWPORT_W: u32 = 600;
const TILE_VIEWPORT_H: u32 = 800;
const MAX_GRID_SIDE: usize = 256;
const DEFAULT_MAX_TILES: usize = 250_000;

/// Plumbing shared by every seed.
#[derive(Clone)]
pub struct SeedOptions {
    pub lang: String,
    pub email: bool,
    pub max_depth: usize,
    pub extra_reviews: bool,
    pub preflight: PreflightConfig,
    pub deduper: Option<Arc<dyn Deduper>>,
    pub exit_monitor: Option<Arc<ExitMonitor>>,
}

#[derive(Debug, Clone, Copy)]
pub struct TilingOptions {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub split_threshold: usize,
    pub max_tiles: usize,
    pub static_first: bool,
    pub radius: f64,
}

/// One seed per keyword: a static tile probe in fast mode, a browser
/// listing otherwise.
pub fn create_seed_jobs(
    fast_mode: bool,
    keywords_text: &str,
    geo_coordinates: &str,
    zoom: u8,
    radius: f64,
    opts: &SeedOptions,
) -> Result<Vec<Box<dyn Job>>, PlacescoutError> {
    let mut lat = 0.0;
    let mut lon = 0.0;

    if fast_mode {
        if geo_coordinates.is_empty() {
            return Err(PlacescoutError::Config(
                "geo coordinates are required in fast mode".to_string(),
            ));
        }
        (lat, lon) = parse_coords(geo_coordinates)?;
        validate_zoom(zoom as i32)?;
        validate_radius(radius)?;
    }

    let mut jobs: Vec<Box<dyn Job>> = Vec::new();
    for keyword in parse_keywords(keywords_text) {
        if fast_mode {
            let mut params = MapSearchParams::new(
                &keyword.query,
                &opts.lang,
                MapLocation { lat, lon, zoom, radius },
            );
            params.viewport_w = FAST_VIEWPORT_W;
            params.viewport_h = FAST_VIEWPORT_H;
            params.preflight = opts.preflight.clone();
            let mut job = SearchJob::new(params);
            job.deduper = opts.deduper.clone();
            job.exit_monitor = opts.exit_monitor.clone();
            jobs.push(Box::new(job));
        } else {
            let mut job = GmapJob::new(
                &keyword.id,
                &opts.lang,
                &keyword.query,
                opts.max_depth,
                opts.email,
                geo_coordinates,
                zoom,
            );
            job.extract_extra_reviews = opts.extra_reviews;
            job.preflight = opts.preflight.clone();
            job.deduper = opts.deduper.clone();
            job.exit_monitor = opts.exit_monitor.clone();
            jobs.push(Box::new(job));
        }
    }

    Ok(jobs)
}

/// Cover a bounding box with a uniform grid of static tile seeds at
/// `min_zoom`. Each tile subdivides at runtime when saturated; `max_tiles`
/// caps only the initial grid, per keyword.
pub fn create_tiled_seed_jobs(
    keywords_text: &str,
    bbox_min_lat: &str,
    bbox_min_lon: &str,
    bbox_max_lat: &str,
    bbox_max_lon: &str,
    tiling: TilingOptions,
    opts: &SeedOptions,
) -> Result<Vec<Box<dyn Job>>, PlacescoutError> {
    let (min_lat, min_lon, max_lat, max_lon) =
        parse_bbox(bbox_min_lat, bbox_min_lon, bbox_max_lat, bbox_max_lon)?;

    let min_zoom = if tiling.min_zoom < 1 { 10 } else { tiling.min_zoom };
    let max_zoom = tiling.max_zoom.max(min_zoom).min(21);
    let split_threshold = if tiling.split_threshold == 0 { 90 } else { tiling.split_threshold };
    let max_tiles = if tiling.max_tiles == 0 { DEFAULT_MAX_TILES } else { tiling.max_tiles };

    let n = ((max_tiles as f64).sqrt().floor() as usize).clamp(1, MAX_GRID_SIDE);

    let step_lat = (max_lat - min_lat) / n as f64;
    let step_lon = (max_lon - min_lon) / n as f64;

    let mut jobs: Vec<Box<dyn Job>> = Vec::new();
    for keyword in parse_keywords(keywords_text) {
        let mut emitted = 0usize;
        'grid: for i in 0..n {
            let center_lat = min_lat + (i as f64 + 0.5) * step_lat;
            for j in 0..n {
                let center_lon = min_lon + (j as f64 + 0.5) * step_lon;

                let mut params = MapSearchParams::new(
                    &keyword.query,
                    &opts.lang,
                    MapLocation {
                        lat: center_lat,
                        lon: center_lon,
                        zoom: min_zoom,
                        radius: tiling.radius,
                    },
                );
                params.viewport_w = TILE_VIEWPORT_W;
                params.viewport_h = TILE_VIEWPORT_H;
                params.split_threshold = split_threshold;
                params.min_zoom = min_zoom;
                params.max_zoom = max_zoom;
                params.static_first = tiling.static_first;
                params.preflight = opts.preflight.clone();

                let mut job = SearchJob::new(params);
                job.deduper = opts.deduper.clone();
                job.exit_monitor = opts.exit_monitor.clone();
                jobs.push(Box::new(job));

                emitted += 1;
                if emitted >= max_tiles {
                    break 'grid;
                }
            }
        }
    }

    Ok(jobs)
}
