//! Temporal split, feature selection, and calibrated forest fitting.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::baseline::Prediction;
use crate::calibration::CalibratedForest;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::features::{DELTA_PREFIX, FeatureRow, SEED_DIFF, feature_columns};

/// Which feature columns enter the model. An entry ending in `*` matches by prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FeatureSelection {
    #[default]
    All,
    Drop {
        columns: Vec<String>,
    },
    Only {
        columns: Vec<String>,
    },
}

impl FeatureSelection {
    /// Everything except the seed gap, to see what the stats add on their own.
    pub fn without_seed_diff() -> Self {
        FeatureSelection::Drop {
            columns: vec![SEED_DIFF.to_string()],
        }
    }

    /// Only the offensive and defensive efficiency deltas.
    pub fn efficiency_only() -> Self {
        FeatureSelection::Only {
            columns: vec![
                format!("{DELTA_PREFIX}adjOE"),
                format!("{DELTA_PREFIX}adjDE"),
            ],
        }
    }

    /// Resolves the selection against the available columns, in sorted order.
    pub fn resolve(&self, available: &BTreeSet<String>) -> Result<Vec<String>, PipelineError> {
        let selected: Vec<String> = match self {
            FeatureSelection::All => available.iter().cloned().collect(),
            FeatureSelection::Drop { columns } => {
                let dropped = matching(columns, available)?;
                available
                    .iter()
                    .filter(|c| !dropped.contains(*c))
                    .cloned()
                    .collect()
            }
            FeatureSelection::Only { columns } => {
                matching(columns, available)?.into_iter().collect()
            }
        };
        if selected.is_empty() {
            return Err(PipelineError::EmptyPartition(
                "feature selection leaves no columns".to_string(),
            ));
        }
        Ok(selected)
    }
}

fn matching(patterns: &[String], available: &BTreeSet<String>) -> Result<BTreeSet<String>, PipelineError> {
    let mut out = BTreeSet::new();
    for pattern in patterns {
        let hits: Vec<&String> = match pattern.strip_suffix('*') {
            Some(prefix) => available.iter().filter(|c| c.starts_with(prefix)).collect(),
            None => available.iter().filter(|c| *c == pattern).collect(),
        };
        if hits.is_empty() {
            return Err(PipelineError::UnknownFeatureColumn(pattern.clone()));
        }
        out.extend(hits.into_iter().cloned());
    }
    Ok(out)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemporalSplit {
    pub train: Vec<FeatureRow>,
    pub test: Vec<FeatureRow>,
}

/// Seasons before `test_from_year` train, the rest are held out. Excluded seasons go nowhere.
pub fn temporal_split(rows: &[FeatureRow], cfg: &PipelineConfig) -> TemporalSplit {
    let mut split = TemporalSplit::default();
    for row in rows {
        if cfg.is_excluded_season(row.year) {
            continue;
        }
        if row.year < cfg.test_from_year {
            split.train.push(row.clone());
        } else {
            split.test.push(row.clone());
        }
    }
    split
}

pub fn ensure_no_leak(train: &[FeatureRow], test_from_year: i32) -> Result<(), PipelineError> {
    match train.iter().find(|r| r.year >= test_from_year) {
        Some(row) => Err(PipelineError::TemporalLeak {
            year: row.year,
            test_from_year,
        }),
        None => Ok(()),
    }
}

fn has_all(row: &FeatureRow, columns: &[String]) -> bool {
    columns
        .iter()
        .all(|c| row.features.get(c).is_some_and(|v| v.is_finite()))
}

fn keep_complete(rows: Vec<FeatureRow>, columns: &[String], partition: &str) -> Vec<FeatureRow> {
    let before = rows.len();
    let kept: Vec<FeatureRow> = rows.into_iter().filter(|r| has_all(r, columns)).collect();
    if kept.len() < before {
        warn!(
            partition,
            dropped = before - kept.len(),
            "rows missing selected feature columns"
        );
    }
    kept
}

fn matrix(rows: &[FeatureRow], columns: &[String]) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|r| {
            columns
                .iter()
                .map(|c| r.value(c).unwrap_or(f64::NAN))
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    columns: Vec<String>,
    model: CalibratedForest,
    train_rows: usize,
    train_years: BTreeSet<i32>,
    test: Vec<FeatureRow>,
}

/// Fits the calibrated forest on seasons before the cutoff.
///
/// Columns come from the training partition alone and are narrowed by the
/// configured selection first. Both partitions then keep exactly the rows that
/// carry a finite value for every selected column. An empty held-out partition
/// is an error since nothing could be scored.
pub fn train(rows: &[FeatureRow], cfg: &PipelineConfig) -> Result<TrainedModel, PipelineError> {
    cfg.validate()?;
    let split = temporal_split(rows, cfg);
    ensure_no_leak(&split.train, cfg.test_from_year)?;

    let all_columns = feature_columns(&split.train);
    let columns = cfg.feature_selection.resolve(&all_columns)?;

    let complete = keep_complete(split.train, &columns, "training");
    if complete.is_empty() {
        return Err(PipelineError::EmptyPartition(format!(
            "no complete rows before {}",
            cfg.test_from_year
        )));
    }
    let test = keep_complete(split.test, &columns, "held-out");
    if test.is_empty() {
        return Err(PipelineError::EmptyPartition(format!(
            "no held-out rows from {}",
            cfg.test_from_year
        )));
    }

    let x = matrix(&complete, &columns);
    let y: Vec<u8> = complete.iter().map(|r| r.upset).collect();
    let model = CalibratedForest::fit(&x, &y, &cfg.forest, cfg.calibration_folds)?;

    let train_years: BTreeSet<i32> = complete.iter().map(|r| r.year).collect();
    info!(
        train_rows = complete.len(),
        train_upsets = y.iter().filter(|l| **l == 1).count(),
        test_rows = test.len(),
        columns = columns.len(),
        seed = cfg.forest.seed,
        "trained calibrated forest"
    );

    Ok(TrainedModel {
        columns,
        model,
        train_rows: complete.len(),
        train_years,
        test,
    })
}

impl TrainedModel {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn model(&self) -> &CalibratedForest {
        &self.model
    }

    pub fn train_rows(&self) -> usize {
        self.train_rows
    }

    pub fn train_years(&self) -> &BTreeSet<i32> {
        &self.train_years
    }

    pub fn test_rows(&self) -> &[FeatureRow] {
        &self.test
    }

    /// Calibrated upset probability, or `None` when a selected column is missing.
    pub fn predict_row(&self, row: &FeatureRow) -> Option<f64> {
        let x: Option<Vec<f64>> = self
            .columns
            .iter()
            .map(|c| row.value(c).filter(|v| v.is_finite()))
            .collect();
        x.map(|x| self.model.predict_proba(&x))
    }

    /// Held-out rows paired with their calibrated probability and actual label.
    pub fn score_test(&self) -> Vec<Prediction> {
        self.test
            .iter()
            .filter_map(|row| {
                self.predict_row(row)
                    .map(|p| Prediction::from_feature_row(row, p))
            })
            .collect()
    }

    /// Column importances, highest first.
    pub fn feature_importances(&self) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = self
            .columns
            .iter()
            .cloned()
            .zip(self.model.feature_importances())
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        out
    }
}
