use serde::Deserialize;

use crate::error::{Result, RouteError};
use crate::stats::DEFAULT_CIRCULAR_THRESHOLD_M;

/// Options for GPX analysis and route bookkeeping.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    /// Max distance (m) between first and last point for a circular route (default: 100)
    #[serde(default = "default_circular_threshold_m")]
    pub circular_threshold_m: f64,

    /// Radius used by proximity search when the caller gives none (default: 10 km)
    #[serde(default = "default_radius_km")]
    pub default_radius_km: f64,

    /// What to do with multi-segment tracks (default: concatenate)
    #[serde(default)]
    pub segment_policy: SegmentPolicy,

    #[serde(default)]
    pub difficulty: DifficultyConfig,

    /// Include elevation as the 3rd coordinate value in GeoJSON (default: true)
    #[serde(default = "default_true")]
    pub include_elevation: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            circular_threshold_m: default_circular_threshold_m(),
            default_radius_km: default_radius_km(),
            segment_policy: SegmentPolicy::default(),
            difficulty: DifficultyConfig::default(),
            include_elevation: true,
        }
    }
}

impl AnalysisOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.circular_threshold_m.is_finite() || self.circular_threshold_m < 0.0 {
            return Err(RouteError::InvalidConfig {
                message: format!(
                    "circularThresholdM must be a non-negative number, got {}",
                    self.circular_threshold_m
                ),
            });
        }
        if !self.default_radius_km.is_finite() || self.default_radius_km <= 0.0 {
            return Err(RouteError::InvalidConfig {
                message: format!(
                    "defaultRadiusKm must be positive, got {}",
                    self.default_radius_km
                ),
            });
        }
        self.difficulty.validate()
    }
}

/// Handling of GPX files with more than one track segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentPolicy {
    /// Join all segments into one path, including the jump between them.
    #[default]
    Concatenate,
    /// Refuse multi-segment files.
    Reject,
}

/// Weights and thresholds of the difficulty score.
///
/// Each input falls into a bucket (0 below the first threshold, 1 below the
/// second, 2 above); `score = distance_weight * distance_bucket +
/// elevation_weight * elevation_bucket`. The label is `hard` from
/// `hard_score`, `medium` from `medium_score`, `easy` otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DifficultyConfig {
    pub distance_buckets_km: Vec<f64>,
    pub elevation_buckets_m: Vec<f64>,
    pub distance_weight: f64,
    pub elevation_weight: f64,
    pub medium_score: f64,
    pub hard_score: f64,
}

impl Default for DifficultyConfig {
    fn default() -> Self {
        Self {
            distance_buckets_km: vec![10.0, 25.0],
            elevation_buckets_m: vec![300.0, 800.0],
            distance_weight: 1.0,
            elevation_weight: 1.0,
            medium_score: 2.0,
            hard_score: 3.0,
        }
    }
}

impl DifficultyConfig {
    pub fn validate(&self) -> Result<()> {
        let message = if !ascending(&self.distance_buckets_km) {
            "distanceBucketsKm must be finite and ascending"
        } else if !ascending(&self.elevation_buckets_m) {
            "elevationBucketsM must be finite and ascending"
        } else if !(self.distance_weight >= 0.0 && self.elevation_weight >= 0.0) {
            "difficulty weights must be non-negative"
        } else if !(self.medium_score.is_finite() && self.hard_score >= self.medium_score) {
            "hardScore must not be lower than mediumScore"
        } else {
            return Ok(());
        };
        Err(RouteError::InvalidConfig {
            message: message.to_string(),
        })
    }
}

fn ascending(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite()) && values.windows(2).all(|w| w[0] <= w[1])
}

fn default_circular_threshold_m() -> f64 {
    DEFAULT_CIRCULAR_THRESHOLD_M
}

fn default_radius_km() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let opts: AnalysisOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.circular_threshold_m, 100.0);
        assert_eq!(opts.default_radius_km, 10.0);
        assert_eq!(opts.segment_policy, SegmentPolicy::Concatenate);
        assert_eq!(opts.difficulty, DifficultyConfig::default());
        assert!(opts.include_elevation);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let opts: AnalysisOptions = serde_json::from_str(
            r#"{"circularThresholdM": 500, "segmentPolicy": "reject", "difficulty": {"hardScore": 4}}"#,
        )
        .unwrap();
        assert_eq!(opts.circular_threshold_m, 500.0);
        assert_eq!(opts.segment_policy, SegmentPolicy::Reject);
        assert_eq!(opts.difficulty.hard_score, 4.0);
        assert_eq!(opts.difficulty.medium_score, 2.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut opts = AnalysisOptions::default();
        opts.circular_threshold_m = -1.0;
        assert!(matches!(opts.validate(), Err(RouteError::InvalidConfig { .. })));

        let mut cfg = DifficultyConfig::default();
        cfg.distance_weight = -0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = DifficultyConfig::default();
        cfg.elevation_buckets_m = vec![800.0, 300.0];
        assert!(cfg.validate().is_err());

        let mut cfg = DifficultyConfig::default();
        cfg.hard_score = 1.0;
        assert!(cfg.validate().is_err());
    }
}
