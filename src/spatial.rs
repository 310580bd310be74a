//! Proximity search over route bounding boxes.
//!
//! A route is a candidate when its bounding box intersects the envelope
//! around the query point. The envelope contains the search circle, so no
//! route passing within the radius is missed; routes near the envelope
//! corners may be returned although they are farther away.
//!
//! Envelopes crossing the antimeridian are split in two. Envelopes reaching
//! a pole, or so close to one that the longitude span covers every meridian,
//! span the full longitude range.

use rstar::{AABB, RTree, RTreeObject};

use crate::error::{Result, RouteError};
use crate::geo_math::{km_to_lat_degrees, km_to_lng_degrees};
use crate::stats::BoundingBox;

/// Validate a proximity query and build its search envelope as one or two
/// boxes.
///
/// Returns no boxes for a non-positive radius, which matches nothing.
pub fn query_envelope(lat: f64, lng: f64, radius_km: f64) -> Result<Vec<BoundingBox>> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(RouteError::invalid_query("lat", lat));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(RouteError::invalid_query("lng", lng));
    }
    if !radius_km.is_finite() {
        return Err(RouteError::invalid_query("radiusKm", radius_km));
    }
    if radius_km <= 0.0 {
        return Ok(Vec::new());
    }

    let d_lat = km_to_lat_degrees(radius_km);
    let min_lat = (lat - d_lat).max(-90.0);
    let max_lat = (lat + d_lat).min(90.0);
    let band = |min_lng, max_lng| BoundingBox {
        min_lng,
        max_lng,
        min_lat,
        max_lat,
    };

    // The longitude span is widest at the envelope edge nearest the pole.
    let poleward = min_lat.abs().max(max_lat.abs());
    let d_lng = match km_to_lng_degrees(radius_km, poleward) {
        Some(d) if poleward < 90.0 => d,
        _ => return Ok(vec![band(-180.0, 180.0)]),
    };

    let (west, east) = (lng - d_lng, lng + d_lng);
    Ok(if west < -180.0 {
        vec![band(west + 360.0, 180.0), band(-180.0, east)]
    } else if east > 180.0 {
        vec![band(west, 180.0), band(-180.0, east - 360.0)]
    } else {
        vec![band(west, east)]
    })
}

/// Linear-scan variant of the envelope test for callers without an index.
pub fn is_candidate(bbox: &BoundingBox, lat: f64, lng: f64, radius_km: f64) -> Result<bool> {
    Ok(query_envelope(lat, lng, radius_km)?
        .iter()
        .any(|env| env.intersects(bbox)))
}

/// Route bounds wrapper for R-tree spatial indexing
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRoute {
    pub route_id: String,
    pub bbox: BoundingBox,
}

impl RTreeObject for IndexedRoute {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        to_aabb(&self.bbox)
    }
}

fn to_aabb(bbox: &BoundingBox) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.min_lng, bbox.min_lat], [bbox.max_lng, bbox.max_lat])
}

/// R-tree of route bounding boxes keyed by route id.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    tree: RTree<IndexedRoute>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bulk_load(routes: impl IntoIterator<Item = (String, BoundingBox)>) -> Self {
        let items: Vec<IndexedRoute> = routes
            .into_iter()
            .map(|(route_id, bbox)| IndexedRoute { route_id, bbox })
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn insert(&mut self, route_id: impl Into<String>, bbox: BoundingBox) {
        self.tree.insert(IndexedRoute {
            route_id: route_id.into(),
            bbox,
        });
    }

    /// Remove an entry; the box must be the one it was inserted with.
    pub fn remove(&mut self, route_id: &str, bbox: BoundingBox) -> bool {
        self.tree
            .remove(&IndexedRoute {
                route_id: route_id.to_string(),
                bbox,
            })
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of routes whose bounding box intersects the query envelope.
    pub fn find_nearby(&self, lat: f64, lng: f64, radius_km: f64) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        for envelope in query_envelope(lat, lng, radius_km)? {
            ids.extend(
                self.tree
                    .locate_in_envelope_intersecting(&to_aabb(&envelope))
                    .map(|r| r.route_id.clone()),
            );
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_math::{LatLng, haversine_km};

    fn grosseto_route() -> BoundingBox {
        BoundingBox {
            min_lng: 11.9,
            max_lng: 11.95,
            min_lat: 42.68,
            max_lat: 42.70,
        }
    }

    #[test]
    fn test_query_inside_box() {
        let index = SpatialIndex::bulk_load([("r1".to_string(), grosseto_route())]);
        assert_eq!(index.find_nearby(42.685, 11.907, 1.0).unwrap(), vec!["r1"]);
    }

    #[test]
    fn test_query_far_away() {
        let index = SpatialIndex::bulk_load([("r1".to_string(), grosseto_route())]);
        assert!(index.find_nearby(45.0, 11.907, 1.0).unwrap().is_empty());
    }

    #[test]
    fn test_query_just_outside_box() {
        let index = SpatialIndex::bulk_load([("r1".to_string(), grosseto_route())]);
        // ~0.7 km south of the box: inside a 1 km envelope, outside a 0.5 km one
        assert_eq!(index.find_nearby(42.6737, 11.92, 1.0).unwrap(), vec!["r1"]);
        assert!(index.find_nearby(42.6737, 11.92, 0.5).unwrap().is_empty());
    }

    #[test]
    fn test_non_positive_radius_is_empty() {
        let index = SpatialIndex::bulk_load([("r1".to_string(), grosseto_route())]);
        assert!(index.find_nearby(42.685, 11.907, 0.0).unwrap().is_empty());
        assert!(index.find_nearby(42.685, 11.907, -5.0).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_parameters() {
        let index = SpatialIndex::new();
        for (lat, lng, r) in [
            (91.0, 0.0, 1.0),
            (-90.5, 0.0, 1.0),
            (f64::NAN, 0.0, 1.0),
            (0.0, 181.0, 1.0),
            (0.0, 0.0, f64::INFINITY),
            (0.0, 0.0, f64::NAN),
        ] {
            assert!(matches!(
                index.find_nearby(lat, lng, r),
                Err(RouteError::InvalidQueryParameter { .. })
            ));
        }
    }

    #[test]
    fn test_polar_query_spans_all_longitudes() {
        let env = query_envelope(90.0, 0.0, 10.0).unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!((env[0].min_lng, env[0].max_lng), (-180.0, 180.0));
        assert_eq!(env[0].max_lat, 90.0);
    }

    #[test]
    fn test_route_across_the_antimeridian() {
        let fiji = BoundingBox {
            min_lng: -179.999,
            max_lng: -179.99,
            min_lat: -17.0,
            max_lat: -16.99,
        };
        let index = SpatialIndex::bulk_load([("fiji".to_string(), fiji)]);
        let d = haversine_km(LatLng::new(-16.995, 179.995), LatLng::new(-16.995, -179.995));
        assert!(d < 10.0);

        assert_eq!(index.find_nearby(-16.995, 179.995, 10.0).unwrap(), vec!["fiji"]);
        assert!(is_candidate(&fiji, -16.995, 179.995, 10.0).unwrap());

        let env = query_envelope(-16.995, 179.995, 10.0).unwrap();
        assert_eq!(env.len(), 2);
        assert!(env.iter().all(|b| b.min_lng >= -180.0 && b.max_lng <= 180.0));

        // and from the other side
        let east = BoundingBox {
            min_lng: 179.99,
            max_lng: 179.999,
            ..fiji
        };
        assert!(is_candidate(&east, -16.995, -179.995, 10.0).unwrap());
    }

    #[test]
    fn test_route_near_the_pole_on_another_meridian() {
        // ~19 km from the query across the pole, 20° of longitude away
        let route = BoundingBox {
            min_lng: 20.0,
            max_lng: 20.01,
            min_lat: 89.55,
            max_lat: 89.551,
        };
        let d = haversine_km(LatLng::new(89.5, 0.0), LatLng::new(89.55, 20.0));
        assert!(d < 20.0, "{d}");

        let index = SpatialIndex::bulk_load([("arctic".to_string(), route)]);
        assert_eq!(index.find_nearby(89.5, 0.0, 20.0).unwrap(), vec!["arctic"]);

        // envelope touching the pole
        let route = BoundingBox {
            min_lng: -100.0,
            max_lng: -99.9,
            min_lat: 89.95,
            max_lat: 89.96,
        };
        assert!(is_candidate(&route, 89.95, 80.0, 20.0).unwrap());
    }

    #[test]
    fn test_two_boxes_report_each_route_once() {
        let wide = BoundingBox {
            min_lng: -180.0,
            max_lng: 180.0,
            min_lat: -17.0,
            max_lat: -16.99,
        };
        let index = SpatialIndex::bulk_load([("band".to_string(), wide)]);
        assert_eq!(index.find_nearby(-16.995, 179.995, 10.0).unwrap(), vec!["band"]);
    }

    #[test]
    fn test_longitude_widens_with_latitude() {
        let eq = query_envelope(0.0, 0.0, 10.0).unwrap()[0];
        let north = query_envelope(60.0, 0.0, 10.0).unwrap()[0];
        assert!((eq.max_lat - eq.min_lat - (north.max_lat - north.min_lat)).abs() < 1e-12);
        assert!(north.max_lng - north.min_lng > 1.9 * (eq.max_lng - eq.min_lng));
    }

    #[test]
    fn test_insert_remove() {
        let mut index = SpatialIndex::new();
        index.insert("a", grosseto_route());
        index.insert(
            "b",
            BoundingBox {
                min_lng: 11.0,
                max_lng: 11.1,
                min_lat: 43.0,
                max_lat: 43.1,
            },
        );
        assert_eq!(index.len(), 2);
        assert!(index.remove("a", grosseto_route()));
        assert!(!index.remove("a", grosseto_route()));
        assert!(index.find_nearby(42.685, 11.907, 1.0).unwrap().is_empty());
        assert_eq!(index.find_nearby(43.05, 11.05, 1.0).unwrap(), vec!["b"]);
    }

    #[test]
    fn test_is_candidate_matches_index() {
        assert!(is_candidate(&grosseto_route(), 42.685, 11.907, 1.0).unwrap());
        assert!(!is_candidate(&grosseto_route(), 45.0, 11.907, 1.0).unwrap());
        assert!(!is_candidate(&grosseto_route(), 42.685, 11.907, 0.0).unwrap());
    }
}
