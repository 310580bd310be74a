//! Route lifecycle: upload → parse → statistics → classify → persist, plus
//! path replacement, edits, deletion and proximity queries.

use log::{info, warn};
use serde::Serialize;

use crate::converter::path_from_points;
use crate::difficulty::{Difficulty, classify};
use crate::error::{Result, RouteError};
use crate::geo_math::{LatLng, distance_to_path_km};
use crate::gpx_types::{GpxData, GpxMetadata, Waypoint};
use crate::options::{AnalysisOptions, SegmentPolicy};
use crate::parser::parse_gpx;
use crate::record::{
    PathPoint, RouteDetails, RouteFilter, RouteRecord, RouteStore, SourceFileStore, UploadedFile,
};
use crate::spatial::SpatialIndex;
use crate::stats::{RouteStats, SegmentedStats, compute, compute_segmented};

const UNTITLED_ROUTE: &str = "Untitled route";

/// Everything derived from one GPX document, before persistence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpxAnalysis {
    pub name: Option<String>,
    pub metadata: GpxMetadata,
    pub path: Vec<PathPoint>,
    pub waypoints: Vec<Waypoint>,
    /// Track points dropped by the parser for invalid coordinates.
    pub skipped_points: usize,
    /// Statistics of the flattened path.
    pub statistics: RouteStats,
    /// Per-segment breakdown; the combined total leaves out inter-segment jumps.
    pub segments: SegmentedStats,
    pub difficulty: Difficulty,
}

/// Parse a GPX document and derive all statistics from it.
pub fn analyze_gpx(xml: &str, options: &AnalysisOptions) -> Result<GpxAnalysis> {
    let data = parse_gpx(xml)?;
    analyze_parsed(data, options)
}

fn analyze_parsed(data: GpxData, options: &AnalysisOptions) -> Result<GpxAnalysis> {
    let segment_count = data.segment_count();
    if segment_count > 1 {
        match options.segment_policy {
            SegmentPolicy::Reject => {
                return Err(RouteError::MultiSegment {
                    segments: segment_count,
                });
            }
            SegmentPolicy::Concatenate => {
                warn!(
                    "concatenating {segment_count} track segments, distance includes the jumps between them"
                );
            }
        }
    }

    let points = data.track_points();
    let statistics = compute(&points, options.circular_threshold_m);
    let segments = compute_segmented(data.segments(), options.circular_threshold_m);
    let difficulty = classify(
        statistics.total_distance_km,
        statistics.elevation_gain_m,
        &options.difficulty,
    );

    Ok(GpxAnalysis {
        name: data.display_name().map(str::to_string),
        path: path_from_points(&points),
        metadata: data.metadata,
        waypoints: data.waypoints,
        skipped_points: data.skipped_points,
        statistics,
        segments,
        difficulty,
    })
}

fn decode_upload(bytes: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| RouteError::invalid_format(format!("upload is not valid UTF-8: {e}")))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

/// Outcome of [`RouteService::delete`].
#[derive(Debug)]
pub struct DeletedRoute {
    pub record: RouteRecord,
    /// Set when the route is gone but its source file could not be released.
    pub release_error: Option<RouteError>,
}

/// Route lifecycle on top of a record store and an upload store.
///
/// The service keeps an R-tree of route bounding boxes in step with the
/// store, so the store must only be modified through the service.
pub struct RouteService<S, F> {
    store: S,
    files: F,
    options: AnalysisOptions,
    index: SpatialIndex,
}

impl<S: RouteStore, F: SourceFileStore> RouteService<S, F> {
    /// Wrap a store, indexing the routes it already holds.
    pub fn new(store: S, files: F, options: AnalysisOptions) -> Result<Self> {
        options.validate()?;
        let index = index_store(&store)?;
        Ok(Self {
            store,
            files,
            options,
            index,
        })
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Swap the options; stored routes keep their statistics until
    /// [`recompute_all`](Self::recompute_all).
    pub fn set_options(&mut self, options: AnalysisOptions) -> Result<()> {
        options.validate()?;
        self.options = options;
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn files(&self) -> &F {
        &self.files
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Create a route from an uploaded GPX file. Nothing is stored unless
    /// parsing and statistics succeed.
    pub fn create_from_gpx(&mut self, upload: UploadedFile, details: RouteDetails) -> Result<RouteRecord> {
        let analysis = analyze_gpx(decode_upload(&upload.bytes)?, &self.options)?;

        let name = analysis
            .name
            .clone()
            .or_else(|| upload.stem().map(str::to_string))
            .unwrap_or_else(|| UNTITLED_ROUTE.to_string());

        let mut record = RouteRecord::new(name, analysis.path, &self.options)?;
        record.description = analysis.metadata.description;
        record.waypoints = analysis.waypoints;
        record.apply_details(details);

        let reference = self.files.store(&upload.filename, &upload.bytes)?;
        record.source_file = Some(reference.clone());
        let saved = match self.store.save(record) {
            Ok(saved) => saved,
            Err(e) => {
                if let Err(release) = self.files.release(&reference) {
                    warn!("failed save left upload {reference} behind: {release}");
                }
                return Err(e);
            }
        };
        self.index_record(&saved);

        info!(
            "created route {} '{}' from {} ({} points, {:.2} km)",
            saved.id,
            saved.name,
            upload.filename,
            saved.statistics().number_of_points,
            saved.statistics().total_distance_km
        );
        Ok(saved)
    }

    /// Create a route from an already-known path.
    pub fn create_from_path(&mut self, path: Vec<PathPoint>, details: RouteDetails) -> Result<RouteRecord> {
        let mut record = RouteRecord::new(UNTITLED_ROUTE, path, &self.options)?;
        record.apply_details(details);
        let saved = self.store.save(record)?;
        self.index_record(&saved);
        info!("created route {} '{}' from path", saved.id, saved.name);
        Ok(saved)
    }

    pub fn get(&self, id: &str) -> Result<RouteRecord> {
        self.store
            .find_by_id(id)?
            .ok_or_else(|| RouteError::NotFound { id: id.to_string() })
    }

    pub fn find_matching(&self, filter: &RouteFilter) -> Result<Vec<RouteRecord>> {
        self.store.find_matching(filter)
    }

    /// Replace the path and recompute everything derived from it.
    pub fn replace_path(&mut self, id: &str, path: Vec<PathPoint>) -> Result<RouteRecord> {
        let mut record = self.get(id)?;
        let previous = record.bounding_box();
        record.set_path(path, &self.options)?;
        let saved = self.store.save(record)?;
        if let Some(bbox) = previous {
            self.index.remove(&saved.id, bbox);
        }
        self.index_record(&saved);
        info!(
            "replaced path of route {} ({} points)",
            saved.id,
            saved.statistics().number_of_points
        );
        Ok(saved)
    }

    /// Edit descriptive fields; statistics are untouched.
    pub fn update_details(&mut self, id: &str, details: RouteDetails) -> Result<RouteRecord> {
        let mut record = self.get(id)?;
        record.apply_details(details);
        self.store.save(record)
    }

    /// Pin the difficulty (`Some`) or return to the classified one (`None`).
    pub fn override_difficulty(&mut self, id: &str, difficulty: Option<Difficulty>) -> Result<RouteRecord> {
        let mut record = self.get(id)?;
        record.override_difficulty(difficulty, &self.options);
        self.store.save(record)
    }

    /// Delete a route, then release its uploaded source file. A failed
    /// release does not undo the deletion; it is reported in
    /// [`DeletedRoute::release_error`].
    pub fn delete(&mut self, id: &str) -> Result<DeletedRoute> {
        let record = self
            .store
            .delete_by_id(id)?
            .ok_or_else(|| RouteError::NotFound { id: id.to_string() })?;
        if let Some(bbox) = record.bounding_box() {
            self.index.remove(id, bbox);
        }

        let release_error = match &record.source_file {
            Some(reference) => self.files.release(reference).err(),
            None => None,
        };
        match &release_error {
            Some(e) => warn!("deleted route {id} but kept its source file: {e}"),
            None => info!("deleted route {id}"),
        }
        Ok(DeletedRoute {
            record,
            release_error,
        })
    }

    /// Routes whose bounding box intersects the envelope around the point.
    /// `radius_km` falls back to the configured default.
    pub fn find_nearby(&self, lat: f64, lng: f64, radius_km: Option<f64>) -> Result<Vec<RouteRecord>> {
        let radius_km = radius_km.unwrap_or(self.options.default_radius_km);
        let ids = self.index.find_nearby(lat, lng, radius_km)?;

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.store.find_by_id(&id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// [`find_nearby`](Self::find_nearby) refined to routes whose path,
    /// vertices or legs, passes within `radius_km` of the point.
    pub fn find_nearby_exact(&self, lat: f64, lng: f64, radius_km: Option<f64>) -> Result<Vec<RouteRecord>> {
        let radius_km = radius_km.unwrap_or(self.options.default_radius_km);
        let center = LatLng::new(lat, lng);
        let candidates = self.find_nearby(lat, lng, Some(radius_km))?;
        Ok(candidates
            .into_iter()
            .filter(|r| {
                let path = r.path().iter().map(|p| LatLng::new(p.lat, p.lng));
                distance_to_path_km(center, path).is_some_and(|d| d <= radius_km)
            })
            .collect())
    }

    fn index_record(&mut self, record: &RouteRecord) {
        if let Some(bbox) = record.bounding_box() {
            self.index.insert(record.id.clone(), bbox);
        }
    }

    /// Recompute the statistics of every stored route from its path, e.g.
    /// after changing the options. Returns the number of records updated.
    pub fn recompute_all(&mut self) -> Result<usize> {
        let records = self.store.find_matching(&RouteFilter::default())?;
        let options = &self.options;

        #[cfg(feature = "parallel")]
        let recomputed: Vec<RouteRecord> = {
            use rayon::prelude::*;
            records
                .into_par_iter()
                .map(|mut r| r.recompute(options).map(|_| r))
                .collect::<Result<_>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let recomputed: Vec<RouteRecord> = records
            .into_iter()
            .map(|mut r| r.recompute(options).map(|_| r))
            .collect::<Result<_>>()?;

        let count = recomputed.len();
        for record in recomputed {
            self.store.save(record)?;
        }
        self.index = index_store(&self.store)?;
        info!("recomputed statistics of {count} routes");
        Ok(count)
    }
}

/// R-tree over the bounding boxes of every stored route.
fn index_store<S: RouteStore>(store: &S) -> Result<SpatialIndex> {
    let records = store.find_matching(&RouteFilter::default())?;
    Ok(SpatialIndex::bulk_load(
        records
            .into_iter()
            .filter_map(|r| r.bounding_box().map(|b| (r.id, b))),
    ))
}
