use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::forest::ForestParams;
use crate::trainer::FeatureSelection;

pub const DEFAULT_UPSET_MIN_GAP: u8 = 5;
pub const DEFAULT_ELIGIBLE_GAP_ABOVE: u8 = 4;
pub const DEFAULT_ELIGIBLE_MIN_ROUND: u32 = 16;
pub const DEFAULT_REGIONAL_MIN_ROUND: u32 = 8;
pub const DEFAULT_TEST_FROM_YEAR: i32 = 2021;
pub const DEFAULT_CALIBRATION_FOLDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Reporting threshold: an upset has `lower - higher >= upset_min_gap`.
    pub upset_min_gap: u8,
    /// Modeling threshold: a matchup is eligible when `lower - higher > eligible_gap_above`.
    pub eligible_gap_above: u8,
    /// Round-of ordinal at or above which a matchup is eligible (64 = first round).
    pub eligible_min_round: u32,
    /// Lowest round-of ordinal the bracket-tree adapter keeps (8 = regional final).
    pub regional_min_round: u32,
    pub test_from_year: i32,
    pub excluded_seasons: Vec<i32>,
    pub forest: ForestParams,
    pub calibration_folds: usize,
    pub feature_selection: FeatureSelection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upset_min_gap: DEFAULT_UPSET_MIN_GAP,
            eligible_gap_above: DEFAULT_ELIGIBLE_GAP_ABOVE,
            eligible_min_round: DEFAULT_ELIGIBLE_MIN_ROUND,
            regional_min_round: DEFAULT_REGIONAL_MIN_ROUND,
            test_from_year: DEFAULT_TEST_FROM_YEAR,
            excluded_seasons: vec![2020],
            forest: ForestParams::default(),
            calibration_folds: DEFAULT_CALIBRATION_FOLDS,
            feature_selection: FeatureSelection::All,
        }
    }
}

impl PipelineConfig {
    /// Reads a JSON config file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        let cfg: PipelineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(cfg)
    }

    /// Loads `path` when given, otherwise defaults, then applies env overrides and validates.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(year) = env_parse::<i32>("UPSET_TEST_FROM_YEAR") {
            self.test_from_year = year;
        }
        if let Some(seed) = env_parse::<u64>("UPSET_SEED") {
            self.forest.seed = seed;
        }
        if let Some(n_trees) = env_parse::<usize>("UPSET_N_TREES") {
            self.forest.n_trees = n_trees;
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if u16::from(self.upset_min_gap) != u16::from(self.eligible_gap_above) + 1 {
            return Err(PipelineError::ThresholdMismatch {
                upset_min_gap: self.upset_min_gap,
                eligible_gap_above: self.eligible_gap_above,
            });
        }
        for (name, round) in [
            ("eligible_min_round", self.eligible_min_round),
            ("regional_min_round", self.regional_min_round),
        ] {
            if !is_round_ordinal(round) {
                return Err(PipelineError::RoundOrdinalMismatch(format!(
                    "{name}={round} is not a round-of value in 2..=64"
                )));
            }
        }
        if self.regional_min_round > self.eligible_min_round {
            return Err(PipelineError::RoundOrdinalMismatch(format!(
                "regional_min_round={} drops rounds the eligibility cutoff {} needs",
                self.regional_min_round, self.eligible_min_round
            )));
        }
        if self.calibration_folds < 2 {
            return Err(PipelineError::InvalidForestParams(format!(
                "calibration_folds={} (need at least 2)",
                self.calibration_folds
            )));
        }
        self.forest.validate()
    }

    pub fn is_excluded_season(&self, year: i32) -> bool {
        self.excluded_seasons.contains(&year)
    }
}

/// Round-of ordinals: 64, 32, 16, 8, 4, 2.
pub fn is_round_ordinal(round: u32) -> bool {
    (2..=64).contains(&round) && round.is_power_of_two()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert_eq!(PipelineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn disagreeing_thresholds_fail_loudly() {
        let cfg = PipelineConfig {
            upset_min_gap: 6,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PipelineError::ThresholdMismatch {
                upset_min_gap: 6,
                eligible_gap_above: 4
            })
        ));
    }

    #[test]
    fn round_cutoffs_must_be_ordinals() {
        let cfg = PipelineConfig {
            eligible_min_round: 12,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PipelineError::RoundOrdinalMismatch(_))
        ));

        let cfg = PipelineConfig {
            regional_min_round: 32,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PipelineError::RoundOrdinalMismatch(_))
        ));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"test_from_year": 2019}"#).expect("partial config parses");
        assert_eq!(cfg.test_from_year, 2019);
        assert_eq!(cfg.upset_min_gap, DEFAULT_UPSET_MIN_GAP);
        assert_eq!(cfg.forest, ForestParams::default());
    }
}
