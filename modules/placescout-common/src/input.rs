//! Input-spec parsing: keyword lists and the knob validation applied at seed
//! construction, before anything reaches a worker.

use crate::error::PlacescoutError;

/// A single search keyword, optionally carrying a caller-supplied identifier
/// (the part after the `#!#` delimiter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub query: String,
    pub id: String,
}

/// Parse a newline-separated keyword list. Blank lines are skipped; a `#!#`
/// delimiter splits each line into query and internal id.
pub fn parse_keywords(input: &str) -> Vec<Keyword> {
    input
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (query, id) = match line.split_once("#!#") {
                Some((before, after)) => (before.trim().to_string(), after.trim().to_string()),
                None => (line.to_string(), String::new()),
            };
            Some(Keyword { query, id })
        })
        .collect()
}

/// Parse and validate a `"lat,lon"` coordinate pair.
pub fn parse_coords(geo: &str) -> Result<(f64, f64), PlacescoutError> {
    let parts: Vec<&str> = geo.split(',').collect();
    if parts.len() != 2 {
        return Err(PlacescoutError::Config(format!("invalid geo coordinates: {geo}")));
    }
    let lat: f64 = parts[0]
        .trim()
        .parse()
        .map_err(|_| PlacescoutError::Config(format!("invalid latitude: {}", parts[0])))?;
    let lon: f64 = parts[1]
        .trim()
        .parse()
        .map_err(|_| PlacescoutError::Config(format!("invalid longitude: {}", parts[1])))?;
    validate_lat_lon(lat, lon)?;
    Ok((lat, lon))
}

pub fn validate_lat_lon(lat: f64, lon: f64) -> Result<(), PlacescoutError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(PlacescoutError::Config(format!("invalid latitude: {lat}")));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(PlacescoutError::Config(format!("invalid longitude: {lon}")));
    }
    Ok(())
}

pub fn validate_zoom(zoom: i32) -> Result<(), PlacescoutError> {
    if !(1..=21).contains(&zoom) {
        return Err(PlacescoutError::Config(format!("invalid zoom level: {zoom}")));
    }
    Ok(())
}

pub fn validate_radius(radius: f64) -> Result<(), PlacescoutError> {
    if radius < 0.0 {
        return Err(PlacescoutError::Config(format!("invalid radius: {radius}")));
    }
    Ok(())
}

/// Parse the four bbox strings; each min must be strictly below its max.
pub fn parse_bbox(
    min_lat: &str,
    min_lon: &str,
    max_lat: &str,
    max_lon: &str,
) -> Result<(f64, f64, f64, f64), PlacescoutError> {
    let parse = |name: &str, v: &str| -> Result<f64, PlacescoutError> {
        v.trim()
            .parse()
            .map_err(|_| PlacescoutError::Config(format!("invalid {name}: {v}")))
    };
    let min_lat = parse("bbox_min_lat", min_lat)?;
    let min_lon = parse("bbox_min_lon", min_lon)?;
    let max_lat = parse("bbox_max_lat", max_lat)?;
    let max_lon = parse("bbox_max_lon", max_lon)?;
    if min_lat >= max_lat || min_lon >= max_lon {
        return Err(PlacescoutError::Config(
            "invalid bbox: min must be less than max".to_string(),
        ));
    }
    Ok((min_lat, min_lon, max_lat, max_lon))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_split_on_delimiter() {
        let parsed = parse_keywords("pizza #!# id-1\nburgers\n\n  \ncoffee#!#7\n");
        assert_eq!(
            parsed,
            vec![
                Keyword { query: "pizza".into(), id: "id-1".into() },
                Keyword { query: "burgers".into(), id: "".into() },
                Keyword { query: "coffee".into(), id: "7".into() },
            ]
        );
    }

    #[test]
    fn coords_validated_in_range() {
        assert!(parse_coords("44.97,-93.26").is_ok());
        assert!(parse_coords("91,0").is_err());
        assert!(parse_coords("0,181").is_err());
        assert!(parse_coords("nonsense").is_err());
        assert!(parse_coords("1,2,3").is_err());
    }

    #[test]
    fn zoom_and_radius_bounds() {
        assert!(validate_zoom(1).is_ok());
        assert!(validate_zoom(21).is_ok());
        assert!(validate_zoom(0).is_err());
        assert!(validate_zoom(22).is_err());
        assert!(validate_radius(0.0).is_ok());
        assert!(validate_radius(-1.0).is_err());
    }

    #[test]
    fn bbox_min_must_be_below_max() {
        assert!(parse_bbox("1", "2", "3", "4").is_ok());
        assert!(parse_bbox("3", "2", "1", "4").is_err());
        assert!(parse_bbox("1", "4", "3", "2").is_err());
        assert!(parse_bbox("1", "1", "1", "2").is_err());
        assert!(parse_bbox("x", "2", "3", "4").is_err());
    }
}
