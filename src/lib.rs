pub mod converter;
pub mod difficulty;
pub mod error;
pub mod geo_math;
pub mod gpx_types;
pub mod options;
pub mod parser;
pub mod record;
pub mod service;
pub mod spatial;
pub mod stats;

use wasm_bindgen::prelude::*;

use crate::converter::route_to_feature;
use crate::geo_math::Coordinate;
use crate::options::AnalysisOptions;
use crate::record::RouteRecord;
use crate::spatial::is_candidate;

/// Parse a GPX string and return its statistics, path and waypoints as a JS object.
#[wasm_bindgen(js_name = analyzeGpx)]
pub fn analyze_gpx(gpx_string: &str, options: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let opts = parse_options(options)?;
    let analysis = service::analyze_gpx(gpx_string, &opts)?;
    serde_wasm_bindgen::to_value(&analysis).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Convert a GPX string into a route GeoJSON Feature, returned as a JSON string.
#[wasm_bindgen(js_name = gpxToRouteGeoJson)]
pub fn gpx_to_route_geojson(gpx_string: &str, options: JsValue) -> Result<String, JsValue> {
    console_error_panic_hook::set_once();

    let opts = parse_options(options)?;
    let analysis = service::analyze_gpx(gpx_string, &opts)?;
    let name = analysis.name.unwrap_or_default();
    let record = RouteRecord::new(name, analysis.path, &opts)?;
    let feature = route_to_feature(&record, opts.include_elevation);
    serde_json::to_string(&feature).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Difficulty label (`easy`, `medium`, `hard`) for a distance and climb.
#[wasm_bindgen(js_name = classifyDifficulty)]
pub fn classify_difficulty(distance_km: f64, elevation_gain_m: f64, options: JsValue) -> Result<String, JsValue> {
    let opts = parse_options(options)?;
    Ok(difficulty::classify(distance_km, elevation_gain_m, &opts.difficulty).to_string())
}

/// Whether a GPX track is a proximity candidate for `center`, given either as
/// `"lat, lng"` text or as `{ lat, lng }`.
#[wasm_bindgen(js_name = isGpxNearPoint)]
pub fn is_gpx_near_point(gpx_string: &str, center: JsValue, radius_km: f64, options: JsValue) -> Result<bool, JsValue> {
    console_error_panic_hook::set_once();

    let opts = parse_options(options)?;
    let center: Coordinate =
        serde_wasm_bindgen::from_value(center).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let center = center.normalize()?;
    let analysis = service::analyze_gpx(gpx_string, &opts)?;
    match analysis.statistics.bounding_box {
        Some(bbox) => Ok(is_candidate(&bbox, center.lat, center.lng, radius_km)?),
        None => Ok(false),
    }
}

fn parse_options(options: JsValue) -> Result<AnalysisOptions, JsValue> {
    let opts: AnalysisOptions = if options.is_undefined() || options.is_null() {
        AnalysisOptions::default()
    } else {
        serde_wasm_bindgen::from_value(options).map_err(|e| JsValue::from_str(&e.to_string()))?
    };
    opts.validate()?;
    Ok(opts)
}
