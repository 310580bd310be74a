use geojson::{Feature, FeatureCollection, Geometry, Value, feature::Id};
use serde_json::{Map, Value as JsonValue};

use crate::gpx_types::{TrackPoint, Waypoint};
use crate::record::{PathPoint, RouteRecord};

/// Normalize parsed track points into the persisted longitude-first path.
pub fn path_from_points(points: &[TrackPoint]) -> Vec<PathPoint> {
    points.iter().map(PathPoint::from).collect()
}

/// Export a route as a GeoJSON `LineString` Feature.
pub fn route_to_feature(record: &RouteRecord, include_elevation: bool) -> Feature {
    let coords: Vec<Vec<f64>> = record
        .path()
        .iter()
        .map(|p| path_coords(p, include_elevation))
        .collect();
    let geometry = Geometry::new(Value::LineString(coords));

    let stats = record.statistics();
    let mut props = Map::new();
    props.insert("name".to_string(), JsonValue::String(record.name.clone()));
    props.insert(
        "difficulty".to_string(),
        JsonValue::String(record.difficulty.as_str().to_string()),
    );
    insert_number(&mut props, "distance", stats.total_distance_km);
    insert_number(&mut props, "elevationGain", stats.elevation_gain_m);

    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: (!record.id.is_empty()).then(|| Id::String(record.id.clone())),
        properties: Some(props),
        foreign_members: None,
    }
}

/// Route line followed by one `Point` Feature per waypoint.
pub fn route_to_feature_collection(record: &RouteRecord, include_elevation: bool) -> FeatureCollection {
    let mut features = vec![route_to_feature(record, include_elevation)];
    features.extend(
        record
            .waypoints
            .iter()
            .map(|w| waypoint_to_feature(w, include_elevation)),
    );

    FeatureCollection {
        bbox: record
            .bounding_box()
            .map(|b| vec![b.min_lng, b.min_lat, b.max_lng, b.max_lat]),
        features,
        foreign_members: None,
    }
}

fn waypoint_to_feature(wpt: &Waypoint, include_elevation: bool) -> Feature {
    let coords = match (include_elevation, wpt.elevation) {
        (true, Some(ele)) => vec![wpt.lng, wpt.lat, ele],
        _ => vec![wpt.lng, wpt.lat],
    };
    let geometry = Geometry::new(Value::Point(coords));

    let mut props = Map::new();
    insert_optional(&mut props, "name", &wpt.name);
    insert_optional(&mut props, "desc", &wpt.description);
    insert_optional(&mut props, "sym", &wpt.symbol);

    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(props),
        foreign_members: None,
    }
}

/// Read the path back out of an exported route Feature. `None` unless the
/// geometry is a `LineString` of 2- or 3-value positions.
pub fn path_from_feature(feature: &Feature) -> Option<Vec<PathPoint>> {
    match &feature.geometry.as_ref()?.value {
        Value::LineString(coords) => coords.iter().map(|c| PathPoint::from_coords(c)).collect(),
        _ => None,
    }
}

/// Build [lng, lat] or [lng, lat, ele] coordinate array.
fn path_coords(p: &PathPoint, include_elevation: bool) -> Vec<f64> {
    match (include_elevation, p.elevation) {
        (true, Some(ele)) => vec![p.lng, p.lat, ele],
        _ => vec![p.lng, p.lat],
    }
}

fn insert_number(props: &mut Map<String, JsonValue>, key: &str, value: f64) {
    if let Some(n) = serde_json::Number::from_f64(value) {
        props.insert(key.to_string(), JsonValue::Number(n));
    }
}

fn insert_optional(props: &mut Map<String, JsonValue>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        props.insert(key.to_string(), JsonValue::String(v.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::AnalysisOptions;

    fn record() -> RouteRecord {
        let path = vec![
            PathPoint::new(11.90, 42.68, Some(100.0)),
            PathPoint::new(11.91, 42.69, None),
            PathPoint::new(11.92, 42.70, Some(130.0)),
        ];
        let mut r = RouteRecord::new("Roselle", path, &AnalysisOptions::default()).unwrap();
        r.id = "route-7".into();
        r
    }

    #[test]
    fn test_feature_shape() {
        let f = route_to_feature(&record(), true);
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["type"], "Feature");
        assert_eq!(json["id"], "route-7");
        assert_eq!(json["geometry"]["type"], "LineString");
        assert_eq!(json["properties"]["name"], "Roselle");
        assert_eq!(json["properties"]["difficulty"], "easy");
        assert_eq!(json["properties"]["elevationGain"], 30.0);
        assert!(json["properties"]["distance"].as_f64().unwrap() > 2.0);

        let coords = json["geometry"]["coordinates"].as_array().unwrap();
        assert_eq!(coords[0], serde_json::json!([11.90, 42.68, 100.0]));
        assert_eq!(coords[1], serde_json::json!([11.91, 42.69]));
    }

    #[test]
    fn test_roundtrip_path() {
        let r = record();
        let f = route_to_feature(&r, true);
        assert_eq!(path_from_feature(&f).unwrap(), r.path());
    }

    #[test]
    fn test_without_elevation() {
        let f = route_to_feature(&record(), false);
        let path = path_from_feature(&f).unwrap();
        assert!(path.iter().all(|p| p.elevation.is_none()));
    }

    #[test]
    fn test_collection_with_waypoints() {
        let mut r = record();
        r.waypoints.push(Waypoint {
            lat: 42.69,
            lng: 11.905,
            elevation: Some(120.0),
            name: Some("Fonte".into()),
            description: None,
            symbol: Some("Water".into()),
        });
        let fc = route_to_feature_collection(&r, true);
        assert_eq!(fc.features.len(), 2);
        assert_eq!(fc.bbox, Some(vec![11.90, 42.68, 11.92, 42.70]));

        let wpt = &fc.features[1];
        assert!(matches!(wpt.geometry.as_ref().unwrap().value, Value::Point(_)));
        let props = wpt.properties.as_ref().unwrap();
        assert_eq!(props["name"], "Fonte");
        assert_eq!(props["sym"], "Water");
        assert!(!props.contains_key("desc"));
        assert!(path_from_feature(wpt).is_none());
    }
}
