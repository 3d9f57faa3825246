//! Geographic math shared by the tiling engine and radius filtering.

/// Haversine great-circle distance between two lat/lon points in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Meters per pixel at a given latitude and zoom (Web-Mercator approximation).
pub fn meters_per_pixel(lat: f64, zoom: u8) -> f64 {
    lat.to_radians().cos() * 2.0 * std::f64::consts::PI * 6_378_137.0
        / (256.0 * 2f64.powi(zoom as i32))
}

/// Approximate viewport width and height in meters for a pixel viewport.
pub fn viewport_meters(lat: f64, zoom: u8, vw: u32, vh: u32) -> (f64, f64) {
    let mpp = meters_per_pixel(lat, zoom);
    (mpp * vw as f64, mpp * vh as f64)
}

/// Convert half-viewport meter offsets at a latitude into degree offsets.
/// The longitude divisor is guarded against zero near the poles.
pub fn degree_offsets(lat: f64, half_w_m: f64, half_h_m: f64) -> (f64, f64) {
    let lat_offset = half_h_m / 110_540.0;
    let mut lon_meters_per_deg = 111_320.0 * lat.to_radians().cos();
    if lon_meters_per_deg == 0.0 {
        lon_meters_per_deg = 1.0;
    }
    (lat_offset, half_w_m / lon_meters_per_deg)
}
