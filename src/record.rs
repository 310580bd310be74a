//! The persisted route entity and the storage collaborators it relies on.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::difficulty::{Difficulty, classify};
use crate::error::{Result, RouteError};
use crate::geo_math::LatLng;
use crate::gpx_types::{TrackPoint, Waypoint};
use crate::options::AnalysisOptions;
use crate::spatial::is_candidate;
use crate::stats::{BoundingBox, DEFAULT_CIRCULAR_THRESHOLD_M, RouteStats, compute};

/// One path vertex, stored longitude-first like GeoJSON:
/// `[lng, lat]` or `[lng, lat, ele]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct PathPoint {
    pub lng: f64,
    pub lat: f64,
    pub elevation: Option<f64>,
}

impl PathPoint {
    pub fn new(lng: f64, lat: f64, elevation: Option<f64>) -> Self {
        Self {
            lng,
            lat,
            elevation,
        }
    }

    pub fn to_coords(&self) -> Vec<f64> {
        match self.elevation {
            Some(ele) => vec![self.lng, self.lat, ele],
            None => vec![self.lng, self.lat],
        }
    }

    pub fn from_coords(coords: &[f64]) -> Option<Self> {
        match *coords {
            [lng, lat] => Some(Self::new(lng, lat, None)),
            [lng, lat, ele] => Some(Self::new(lng, lat, Some(ele))),
            _ => None,
        }
    }
}

impl From<&TrackPoint> for PathPoint {
    fn from(p: &TrackPoint) -> Self {
        Self::new(p.lng, p.lat, p.elevation)
    }
}

impl From<&PathPoint> for TrackPoint {
    fn from(p: &PathPoint) -> Self {
        TrackPoint {
            lat: p.lat,
            lng: p.lng,
            elevation: p.elevation,
            time: None,
        }
    }
}

impl TryFrom<Vec<f64>> for PathPoint {
    type Error = String;

    fn try_from(coords: Vec<f64>) -> std::result::Result<Self, Self::Error> {
        Self::from_coords(&coords)
            .ok_or_else(|| format!("expected [lng, lat] or [lng, lat, ele], got {} values", coords.len()))
    }
}

impl From<PathPoint> for Vec<f64> {
    fn from(p: PathPoint) -> Self {
        p.to_coords()
    }
}

/// Author-editable fields of a route. On update, `None` leaves a field as is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteDetails {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub surface: Option<String>,
}

/// A persisted bike/hiking route.
///
/// `path` and `statistics` are private: the statistics are a function of the
/// path and only change together with it, through [`RouteRecord::set_path`].
/// Deserializing validates the path and recomputes the statistics from it;
/// any serialized `statistics` are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "StoredRoute")]
pub struct RouteRecord {
    /// Empty until the store assigns one on first save.
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub surface: Option<String>,
    pub difficulty: Difficulty,
    /// Set when the author picked the difficulty by hand.
    pub difficulty_override: bool,
    path: Vec<PathPoint>,
    statistics: RouteStats,
    /// Threshold `statistics.is_circular` was computed with.
    circular_threshold_m: f64,
    pub waypoints: Vec<Waypoint>,
    /// Reference to the uploaded GPX file this route came from.
    pub source_file: Option<String>,
}

/// Serialized form of [`RouteRecord`], before validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRoute {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    surface: Option<String>,
    difficulty: Difficulty,
    #[serde(default)]
    difficulty_override: bool,
    path: Vec<PathPoint>,
    #[serde(default = "default_circular_threshold_m")]
    circular_threshold_m: f64,
    #[serde(default)]
    waypoints: Vec<Waypoint>,
    #[serde(default)]
    source_file: Option<String>,
}

fn default_circular_threshold_m() -> f64 {
    DEFAULT_CIRCULAR_THRESHOLD_M
}

impl TryFrom<StoredRoute> for RouteRecord {
    type Error = RouteError;

    fn try_from(stored: StoredRoute) -> Result<Self> {
        if !stored.circular_threshold_m.is_finite() || stored.circular_threshold_m < 0.0 {
            return Err(RouteError::InvalidConfig {
                message: format!(
                    "stored circularThresholdM must be a non-negative number, got {}",
                    stored.circular_threshold_m
                ),
            });
        }
        let statistics = path_statistics(&stored.path, stored.circular_threshold_m)?;
        Ok(Self {
            id: stored.id,
            name: stored.name,
            description: stored.description,
            tags: stored.tags,
            surface: stored.surface,
            difficulty: stored.difficulty,
            difficulty_override: stored.difficulty_override,
            path: stored.path,
            statistics,
            circular_threshold_m: stored.circular_threshold_m,
            waypoints: stored.waypoints,
            source_file: stored.source_file,
        })
    }
}

impl RouteRecord {
    /// New unsaved record; fails with `DegenerateGeometry` for fewer than two points.
    pub fn new(name: impl Into<String>, path: Vec<PathPoint>, options: &AnalysisOptions) -> Result<Self> {
        let statistics = path_statistics(&path, options.circular_threshold_m)?;
        Ok(Self {
            id: String::new(),
            name: name.into(),
            description: None,
            tags: BTreeSet::new(),
            surface: None,
            difficulty: classify(
                statistics.total_distance_km,
                statistics.elevation_gain_m,
                &options.difficulty,
            ),
            difficulty_override: false,
            path,
            statistics,
            circular_threshold_m: options.circular_threshold_m,
            waypoints: Vec::new(),
            source_file: None,
        })
    }

    pub fn path(&self) -> &[PathPoint] {
        &self.path
    }

    pub fn statistics(&self) -> &RouteStats {
        &self.statistics
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.statistics.bounding_box
    }

    pub fn is_circular(&self) -> bool {
        self.statistics.is_circular
    }

    /// Replace the path and everything derived from it. On error the record
    /// is left untouched.
    pub fn set_path(&mut self, path: Vec<PathPoint>, options: &AnalysisOptions) -> Result<()> {
        let statistics = path_statistics(&path, options.circular_threshold_m)?;
        self.path = path;
        self.statistics = statistics;
        self.circular_threshold_m = options.circular_threshold_m;
        if !self.difficulty_override {
            self.difficulty = self.derived_difficulty(options);
        }
        Ok(())
    }

    /// Recompute statistics from the stored path, e.g. after changing the
    /// circular threshold.
    pub fn recompute(&mut self, options: &AnalysisOptions) -> Result<()> {
        self.statistics = path_statistics(&self.path, options.circular_threshold_m)?;
        self.circular_threshold_m = options.circular_threshold_m;
        if !self.difficulty_override {
            self.difficulty = self.derived_difficulty(options);
        }
        Ok(())
    }

    pub fn apply_details(&mut self, details: RouteDetails) {
        if let Some(name) = details.name {
            self.name = name;
        }
        if let Some(description) = details.description {
            self.description = Some(description);
        }
        if let Some(tags) = details.tags {
            self.tags = tags;
        }
        if let Some(surface) = details.surface {
            self.surface = Some(surface);
        }
    }

    /// `Some` pins the difficulty; `None` returns to the classified value.
    pub fn override_difficulty(&mut self, difficulty: Option<Difficulty>, options: &AnalysisOptions) {
        match difficulty {
            Some(d) => {
                self.difficulty = d;
                self.difficulty_override = true;
            }
            None => {
                self.difficulty_override = false;
                self.difficulty = self.derived_difficulty(options);
            }
        }
    }

    fn derived_difficulty(&self, options: &AnalysisOptions) -> Difficulty {
        classify(
            self.statistics.total_distance_km,
            self.statistics.elevation_gain_m,
            &options.difficulty,
        )
    }
}

fn path_statistics(path: &[PathPoint], circular_threshold_m: f64) -> Result<RouteStats> {
    if path.len() < 2 {
        return Err(RouteError::DegenerateGeometry {
            point_count: path.len(),
        });
    }
    if let Some(bad) = path
        .iter()
        .find(|p| !LatLng::new(p.lat, p.lng).is_valid() || p.elevation.is_some_and(|e| !e.is_finite()))
    {
        return Err(RouteError::InvalidCoordinate {
            input: format!("{:?}", bad.to_coords()),
        });
    }
    let points: Vec<TrackPoint> = path.iter().map(TrackPoint::from).collect();
    Ok(compute(&points, circular_threshold_m))
}

/// Attribute filter for [`RouteStore::find_matching`]. Unset fields match
/// everything.
#[derive(Debug, Clone, Default)]
pub struct RouteFilter {
    /// Case-insensitive substring of the name.
    pub name_contains: Option<String>,
    /// Every listed tag must be present.
    pub tags: Vec<String>,
    pub difficulty: Option<Difficulty>,
    pub circular: Option<bool>,
    /// `(lat, lng, radius_km)` bounding-box proximity candidate test.
    pub near: Option<(f64, f64, f64)>,
}

impl RouteFilter {
    pub fn matches(&self, record: &RouteRecord) -> Result<bool> {
        if let Some(needle) = &self.name_contains {
            if !record.name.to_lowercase().contains(&needle.to_lowercase()) {
                return Ok(false);
            }
        }
        if !self.tags.iter().all(|t| record.tags.contains(t)) {
            return Ok(false);
        }
        if self.difficulty.is_some_and(|d| d != record.difficulty) {
            return Ok(false);
        }
        if self.circular.is_some_and(|c| c != record.is_circular()) {
            return Ok(false);
        }
        if let Some((lat, lng, radius_km)) = self.near {
            return match record.bounding_box() {
                Some(bbox) => is_candidate(&bbox, lat, lng, radius_km),
                None => Ok(false),
            };
        }
        Ok(true)
    }
}

/// Persistence collaborator for route records.
pub trait RouteStore {
    fn find_by_id(&self, id: &str) -> Result<Option<RouteRecord>>;

    fn find_matching(&self, filter: &RouteFilter) -> Result<Vec<RouteRecord>>;

    /// Insert or replace. A record with an empty id gets a fresh one; the
    /// stored version is returned.
    fn save(&mut self, record: RouteRecord) -> Result<RouteRecord>;

    /// Returns the removed record, if there was one.
    fn delete_by_id(&mut self, id: &str) -> Result<Option<RouteRecord>>;
}

/// Holder of uploaded source files.
pub trait SourceFileStore {
    /// Store raw upload bytes, returning a reference for the record.
    fn store(&mut self, filename: &str, bytes: &[u8]) -> Result<String>;

    /// Drop a stored file. Unknown references are not an error.
    fn release(&mut self, reference: &str) -> Result<()>;
}

/// A GPX upload as handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// File name without directory and extension, if non-empty.
    pub fn stem(&self) -> Option<&str> {
        std::path::Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// In-memory [`RouteStore`], ordered by id.
#[derive(Debug, Default)]
pub struct MemoryRouteStore {
    records: BTreeMap<String, RouteRecord>,
    next_id: u64,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RouteStore for MemoryRouteStore {
    fn find_by_id(&self, id: &str) -> Result<Option<RouteRecord>> {
        Ok(self.records.get(id).cloned())
    }

    fn find_matching(&self, filter: &RouteFilter) -> Result<Vec<RouteRecord>> {
        let mut out = Vec::new();
        for record in self.records.values() {
            if filter.matches(record)? {
                out.push(record.clone());
            }
        }
        Ok(out)
    }

    fn save(&mut self, mut record: RouteRecord) -> Result<RouteRecord> {
        if record.id.is_empty() {
            self.next_id += 1;
            record.id = format!("route-{:06}", self.next_id);
        }
        self.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn delete_by_id(&mut self, id: &str) -> Result<Option<RouteRecord>> {
        Ok(self.records.remove(id))
    }
}

/// In-memory [`SourceFileStore`].
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: HashMap<String, Vec<u8>>,
    next_id: u64,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: &str) -> Option<&[u8]> {
        self.files.get(reference).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl SourceFileStore for MemoryFileStore {
    fn store(&mut self, filename: &str, bytes: &[u8]) -> Result<String> {
        self.next_id += 1;
        let reference = format!("upload-{}-{filename}", self.next_id);
        self.files.insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }

    fn release(&mut self, reference: &str) -> Result<()> {
        self.files.remove(reference);
        Ok(())
    }
}
