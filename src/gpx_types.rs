use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parsed GPX document: metadata, tracks (segment boundaries kept) and waypoints.
#[derive(Debug, Default)]
pub struct GpxData {
    pub metadata: GpxMetadata,
    pub tracks: Vec<GpxTrack>,
    pub waypoints: Vec<Waypoint>,
    /// Track points dropped for missing or invalid coordinates.
    pub skipped_points: usize,
}

impl GpxData {
    /// All track points of every segment of every track, in document order.
    pub fn track_points(&self) -> Vec<TrackPoint> {
        self.segments().flat_map(|s| s.points.iter().copied()).collect()
    }

    pub fn segments(&self) -> impl Iterator<Item = &GpxSegment> {
        self.tracks.iter().flat_map(|t| t.segments.iter())
    }

    pub fn segment_count(&self) -> usize {
        self.segments().count()
    }

    /// Metadata name, falling back to the first named track.
    pub fn display_name(&self) -> Option<&str> {
        non_blank(&self.metadata.name).or_else(|| self.tracks.iter().find_map(|t| non_blank(&t.name)))
    }
}

fn non_blank(name: &Option<String>) -> Option<&str> {
    name.as_deref().filter(|n| !n.trim().is_empty())
}

/// Top-level `<metadata>` content.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpxMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub time: Option<DateTime<Utc>>,
}

/// A single `<trkpt>`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackPoint {
    pub lat: f64,
    pub lng: f64,
    pub elevation: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}

impl TrackPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            elevation: None,
            time: None,
        }
    }
}

/// A `<wpt>`; independent of the track path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
    pub elevation: Option<f64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub symbol: Option<String>,
}

impl Waypoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            elevation: None,
            name: None,
            description: None,
            symbol: None,
        }
    }
}

/// A GPX track (`<trk>`).
#[derive(Debug, Default)]
pub struct GpxTrack {
    pub name: Option<String>,
    pub track_type: Option<String>,
    pub segments: Vec<GpxSegment>,
}

/// A GPX track segment (`<trkseg>`).
#[derive(Debug, Default)]
pub struct GpxSegment {
    pub points: Vec<TrackPoint>,
}
