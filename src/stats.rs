//! Route statistics derived from an ordered point sequence.
//!
//! Everything here is a fold over an immutable [`Accumulator`]. Two
//! accumulators over adjacent chunks merge into the accumulator of the joined
//! sequence, so long tracks can be split and reduced in any grouping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo_math::{LatLng, haversine_m};
use crate::gpx_types::{GpxSegment, TrackPoint};

/// Default "same place" tolerance between the first and last point.
pub const DEFAULT_CIRCULAR_THRESHOLD_M: f64 = 100.0;

/// Axis-aligned extent of a route, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lng: f64,
    pub max_lng: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn from_point(p: LatLng) -> Self {
        Self {
            min_lng: p.lng,
            max_lng: p.lng,
            min_lat: p.lat,
            max_lat: p.lat,
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            min_lng: self.min_lng.min(other.min_lng),
            max_lng: self.max_lng.max(other.max_lng),
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    /// Closed-interval rectangle overlap; touching edges count.
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_lng <= other.max_lng
            && other.min_lng <= self.max_lng
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }
}

/// Aggregate statistics of one route.
///
/// Sequences with fewer than two points produce [`RouteStats::degenerate`]:
/// zero distance, no bounding box, not circular.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStats {
    pub total_distance_km: f64,
    pub elevation_gain_m: f64,
    pub elevation_loss_m: f64,
    pub min_elevation_m: Option<f64>,
    pub max_elevation_m: Option<f64>,
    /// `max - min` elevation, independent of gain/loss.
    pub elevation_delta_m: Option<f64>,
    pub number_of_points: usize,
    pub bounding_box: Option<BoundingBox>,
    pub is_circular: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_s: Option<i64>,
}

impl RouteStats {
    pub fn degenerate(number_of_points: usize) -> Self {
        Self {
            total_distance_km: 0.0,
            elevation_gain_m: 0.0,
            elevation_loss_m: 0.0,
            min_elevation_m: None,
            max_elevation_m: None,
            elevation_delta_m: None,
            number_of_points,
            bounding_box: None,
            is_circular: false,
            start_time: None,
            end_time: None,
            duration_s: None,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.bounding_box.is_none()
    }
}

/// Running state of the statistics fold.
///
/// `first_elevation`/`last_elevation` are the first and last *known*
/// elevations; points without elevation never touch them, so the gain/loss
/// chain compares each known elevation with the previous known one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accumulator {
    count: usize,
    first: Option<LatLng>,
    last: Option<LatLng>,
    distance_m: f64,
    first_elevation: Option<f64>,
    last_elevation: Option<f64>,
    gain_m: f64,
    loss_m: f64,
    elevation_range: Option<(f64, f64)>,
    bbox: Option<BoundingBox>,
    timed: usize,
    first_time: Option<DateTime<Utc>>,
    last_time: Option<DateTime<Utc>>,
}

impl Accumulator {
    pub fn from_point(p: &TrackPoint) -> Self {
        let pos = LatLng::new(p.lat, p.lng);
        Self {
            count: 1,
            first: Some(pos),
            last: Some(pos),
            distance_m: 0.0,
            first_elevation: p.elevation,
            last_elevation: p.elevation,
            gain_m: 0.0,
            loss_m: 0.0,
            elevation_range: p.elevation.map(|e| (e, e)),
            bbox: Some(BoundingBox::from_point(pos)),
            timed: usize::from(p.time.is_some()),
            first_time: p.time,
            last_time: p.time,
        }
    }

    pub fn push(self, p: &TrackPoint) -> Self {
        self.merge(Self::from_point(p))
    }

    /// Accumulator of `self` followed directly by `next`, including the leg
    /// from `self`'s last point to `next`'s first.
    pub fn merge(self, next: Self) -> Self {
        self.join(next, true)
    }

    /// Like [`merge`](Self::merge) but treats the two parts as separate
    /// sub-trips: no distance or elevation change is counted between them.
    pub fn merge_disjoint(self, next: Self) -> Self {
        self.join(next, false)
    }

    fn join(self, next: Self, bridge: bool) -> Self {
        if self.count == 0 {
            return next;
        }
        if next.count == 0 {
            return self;
        }

        let mut distance_m = self.distance_m + next.distance_m;
        let mut gain_m = self.gain_m + next.gain_m;
        let mut loss_m = self.loss_m + next.loss_m;

        if bridge {
            if let (Some(a), Some(b)) = (self.last, next.first) {
                distance_m += haversine_m(a, b);
            }
            if let (Some(a), Some(b)) = (self.last_elevation, next.first_elevation) {
                let delta = b - a;
                if delta > 0.0 {
                    gain_m += delta;
                } else {
                    loss_m -= delta;
                }
            }
        }

        Self {
            count: self.count + next.count,
            first: self.first,
            last: next.last,
            distance_m,
            first_elevation: self.first_elevation.or(next.first_elevation),
            last_elevation: next.last_elevation.or(self.last_elevation),
            gain_m,
            loss_m,
            elevation_range: match (self.elevation_range, next.elevation_range) {
                (Some((a_min, a_max)), Some((b_min, b_max))) => {
                    Some((a_min.min(b_min), a_max.max(b_max)))
                }
                (a, b) => a.or(b),
            },
            bbox: match (self.bbox, next.bbox) {
                (Some(a), Some(b)) => Some(a.union(b)),
                (a, b) => a.or(b),
            },
            timed: self.timed + next.timed,
            first_time: self.first_time.or(next.first_time),
            last_time: next.last_time.or(self.last_time),
        }
    }

    pub fn finish(self, circular_threshold_m: f64) -> RouteStats {
        if self.count < 2 {
            return RouteStats::degenerate(self.count);
        }

        let is_circular = match (self.first, self.last) {
            (Some(a), Some(b)) => haversine_m(a, b) < circular_threshold_m,
            _ => false,
        };

        let (start_time, end_time, duration_s) = match (self.first_time, self.last_time) {
            (Some(start), Some(end)) if self.timed >= 2 => {
                let secs = (end - start).num_seconds();
                (Some(start), Some(end), (secs >= 0).then_some(secs))
            }
            _ => (None, None, None),
        };

        RouteStats {
            total_distance_km: self.distance_m / 1000.0,
            elevation_gain_m: self.gain_m,
            elevation_loss_m: self.loss_m,
            min_elevation_m: self.elevation_range.map(|(min, _)| min),
            max_elevation_m: self.elevation_range.map(|(_, max)| max),
            elevation_delta_m: self.elevation_range.map(|(min, max)| max - min),
            number_of_points: self.count,
            bounding_box: self.bbox,
            is_circular,
            start_time,
            end_time,
            duration_s,
        }
    }
}

fn fold(points: &[TrackPoint]) -> Accumulator {
    points
        .iter()
        .fold(Accumulator::default(), |acc, p| acc.push(p))
}

/// Compute statistics in one pass over `points`, in order.
pub fn compute(points: &[TrackPoint], circular_threshold_m: f64) -> RouteStats {
    fold(points).finish(circular_threshold_m)
}

/// Same result as [`compute`], reducing fixed-size chunks in parallel.
#[cfg(feature = "parallel")]
pub fn compute_parallel(points: &[TrackPoint], circular_threshold_m: f64) -> RouteStats {
    use rayon::prelude::*;

    const CHUNK: usize = 4096;
    points
        .par_chunks(CHUNK)
        .map(fold)
        .reduce(Accumulator::default, Accumulator::merge)
        .finish(circular_threshold_m)
}

/// Per-segment statistics plus a combined total.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentedStats {
    pub segments: Vec<RouteStats>,
    /// Sum over segments without the jumps between them; extent, elevation
    /// range and circularity cover the whole track.
    pub combined: RouteStats,
}

pub fn compute_segmented<'a>(
    segments: impl IntoIterator<Item = &'a GpxSegment>,
    circular_threshold_m: f64,
) -> SegmentedStats {
    let mut combined = Accumulator::default();
    let mut per_segment = Vec::new();

    for segment in segments {
        let acc = fold(&segment.points);
        per_segment.push(acc.finish(circular_threshold_m));
        combined = combined.merge_disjoint(acc);
    }

    SegmentedStats {
        segments: per_segment,
        combined: combined.finish(circular_threshold_m),
    }
}
