//! Spherical-Earth helpers shared by the statistics and proximity code,
//! plus normalization of the coordinate shapes accepted at the boundary.

use geo::{Closest, Distance, Haversine, HaversineClosestPoint, LineString, Point};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouteError};

/// Kilometers per degree of latitude (and of longitude at the equator).
pub const KM_PER_DEGREE: f64 = 111.0;

/// Lower bound for `cos(latitude)` when widening a longitude delta, so that
/// queries close to the poles do not divide by ~0.
pub const MIN_LATITUDE_COS: f64 = 0.01;

/// Canonical latitude/longitude pair used everywhere past ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Coordinates as the web layer sends them: either `"lat, lng"` text or an
/// object with `lat`/`lng` fields.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Coordinate {
    Text(String),
    Struct { lat: f64, lng: f64 },
}

impl Coordinate {
    pub fn normalize(&self) -> Result<LatLng> {
        let point = match self {
            Coordinate::Text(text) => {
                let invalid = || RouteError::InvalidCoordinate {
                    input: text.clone(),
                };
                let (lat, lng) = text.split_once(',').ok_or_else(invalid)?;
                let lat = lat.trim().parse::<f64>().map_err(|_| invalid())?;
                let lng = lng.trim().parse::<f64>().map_err(|_| invalid())?;
                LatLng::new(lat, lng)
            }
            Coordinate::Struct { lat, lng } => LatLng::new(*lat, *lng),
        };

        if point.is_valid() {
            Ok(point)
        } else {
            Err(RouteError::InvalidCoordinate {
                input: format!("{}, {}", point.lat, point.lng),
            })
        }
    }
}

/// Great-circle distance in meters (haversine, mean Earth radius).
#[inline]
pub fn haversine_m(a: LatLng, b: LatLng) -> f64 {
    Haversine::distance(Point::new(a.lng, a.lat), Point::new(b.lng, b.lat))
}

#[inline]
pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    haversine_m(a, b) / 1000.0
}

#[inline]
pub fn deg_to_rad(deg: f64) -> f64 {
    deg.to_radians()
}

#[inline]
pub fn rad_to_deg(rad: f64) -> f64 {
    rad.to_degrees()
}

/// Latitude span in degrees covered by `km`.
#[inline]
pub fn km_to_lat_degrees(km: f64) -> f64 {
    km / KM_PER_DEGREE
}

/// Longitude half-span in degrees covered by `km` at `latitude`, or `None`
/// when the span reaches every meridian (a half-span of 180° or more, or
/// `|cos latitude|` below [`MIN_LATITUDE_COS`]).
#[inline]
pub fn km_to_lng_degrees(km: f64, latitude: f64) -> Option<f64> {
    let cos = deg_to_rad(latitude).cos().abs();
    if cos < MIN_LATITUDE_COS {
        return None;
    }
    let d_lng = km / (KM_PER_DEGREE * cos);
    (d_lng < 180.0).then_some(d_lng)
}

/// Great-circle distance in km from `from` to the nearest point of the
/// polyline through `path`, legs included. `None` for an empty path.
pub fn distance_to_path_km(from: LatLng, path: impl IntoIterator<Item = LatLng>) -> Option<f64> {
    let line: LineString<f64> = path.into_iter().map(|p| (p.lng, p.lat)).collect();
    if line.0.is_empty() {
        return None;
    }

    match line.haversine_closest_point(&Point::new(from.lng, from.lat)) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => {
            Some(haversine_km(from, LatLng::new(p.y(), p.x())))
        }
        // single vertex, no legs
        Closest::Indeterminate => line
            .0
            .iter()
            .map(|c| haversine_km(from, LatLng::new(c.y, c.x)))
            .reduce(f64::min),
    }
}
