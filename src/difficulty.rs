use serde::{Deserialize, Serialize};

use crate::options::DifficultyConfig;

/// Route difficulty label (three tiers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{other}'")),
        }
    }
}

/// Number of thresholds `value` reaches. Non-finite or negative input counts
/// as zero.
fn bucket(value: f64, thresholds: &[f64]) -> usize {
    if !(value.is_finite() && value > 0.0) {
        return 0;
    }
    thresholds.iter().take_while(|t| value >= **t).count()
}

/// Weighted score of a route; non-decreasing in both inputs.
pub fn score(distance_km: f64, elevation_gain_m: f64, config: &DifficultyConfig) -> f64 {
    config.distance_weight * bucket(distance_km, &config.distance_buckets_km) as f64
        + config.elevation_weight * bucket(elevation_gain_m, &config.elevation_buckets_m) as f64
}

/// Classify a route from its length and total climb only.
pub fn classify(distance_km: f64, elevation_gain_m: f64, config: &DifficultyConfig) -> Difficulty {
    let score = score(distance_km, elevation_gain_m, config);
    if score >= config.hard_score {
        Difficulty::Hard
    } else if score >= config.medium_score {
        Difficulty::Medium
    } else {
        Difficulty::Easy
    }
}
