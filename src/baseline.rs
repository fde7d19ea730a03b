//! Seed-gap baseline comparison for held-out predictions.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::calibration::{
    CalibrationBin, Metrics, brier_score, calibration_bins, evaluate_probs,
    expected_calibration_error,
};
use crate::features::FeatureRow;
use crate::matchup::Matchup;

/// Historical first-round upset frequency by seed gap. Even gaps that rarely
/// occur in the first round are the mean of their odd neighbours.
pub static SEED_BASELINE: Lazy<SeedBaselineTable> = Lazy::new(|| {
    SeedBaselineTable::from_pairs([
        (5, 0.429),
        (6, 0.385),
        (7, 0.34),
        (8, 0.289),
        (9, 0.238),
        (10, 0.195),
        (11, 0.113),
        (12, 0.111),
        (13, 0.109),
        (14, 0.07),
        (15, 0.031),
    ])
});

#[derive(Debug, Clone, PartialEq)]
pub struct SeedBaselineTable {
    probs: BTreeMap<u8, f64>,
}

impl SeedBaselineTable {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u8, f64)>) -> Self {
        Self {
            probs: pairs.into_iter().collect(),
        }
    }

    pub fn get(&self, seed_gap: u8) -> Option<f64> {
        self.probs.get(&seed_gap).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, f64)> + '_ {
        self.probs.iter().map(|(k, v)| (*k, *v))
    }
}

/// A held-out matchup with its calibrated upset probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub hi_team: String,
    pub lo_team: String,
    pub year: i32,
    pub hi_seed: u8,
    pub lo_seed: u8,
    pub actual_upset: bool,
    pub upset_prob: f64,
}

impl Prediction {
    pub fn from_feature_row(row: &FeatureRow, upset_prob: f64) -> Self {
        Self {
            hi_team: row.hi_team.clone(),
            lo_team: row.lo_team.clone(),
            year: row.year,
            hi_seed: row.hi_seed,
            lo_seed: row.lo_seed,
            actual_upset: row.is_upset(),
            upset_prob,
        }
    }

    pub fn seed_diff(&self) -> u8 {
        self.lo_seed.saturating_sub(self.hi_seed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub higher_seed_team: String,
    pub lower_seed_team: String,
    pub year: i32,
    pub hi_seed: u8,
    pub lo_seed: u8,
    pub actual_upset: bool,
    pub upset_prob: f64,
    pub seed_diff: u8,
    /// `None` when the gap has no baseline entry.
    pub seed_prob: Option<f64>,
}

/// One row per prediction joined with its baseline, most likely upsets first.
pub fn results_table(predictions: &[Prediction], baseline: &SeedBaselineTable) -> Vec<ResultRow> {
    let mut rows: Vec<ResultRow> = predictions
        .iter()
        .map(|p| ResultRow {
            higher_seed_team: p.hi_team.clone(),
            lower_seed_team: p.lo_team.clone(),
            year: p.year,
            hi_seed: p.hi_seed,
            lo_seed: p.lo_seed,
            actual_upset: p.actual_upset,
            upset_prob: p.upset_prob,
            seed_diff: p.seed_diff(),
            seed_prob: baseline.get(p.seed_diff()),
        })
        .collect();
    rows.sort_by(|a, b| b.upset_prob.total_cmp(&a.upset_prob));
    rows
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub total: usize,
    pub upsets: usize,
}

impl PartitionStats {
    fn record(&mut self, upset: bool) {
        self.total += 1;
        if upset {
            self.upsets += 1;
        }
    }

    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.upsets as f64 / self.total as f64)
    }
}

/// Rows of one seed gap, split by whether the model sits above or below the baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EfficacyBucket {
    pub seed_diff: u8,
    pub baseline_prob: f64,
    pub model_higher: PartitionStats,
    pub model_lower: PartitionStats,
    /// Rows where the model matches the baseline exactly; in neither partition.
    pub model_equal: usize,
}

pub fn efficacy_breakdown(results: &[ResultRow]) -> Vec<EfficacyBucket> {
    let mut buckets: BTreeMap<u8, EfficacyBucket> = BTreeMap::new();
    for row in results {
        let Some(baseline_prob) = row.seed_prob else {
            continue;
        };
        let bucket = buckets.entry(row.seed_diff).or_insert(EfficacyBucket {
            seed_diff: row.seed_diff,
            baseline_prob,
            model_higher: PartitionStats::default(),
            model_lower: PartitionStats::default(),
            model_equal: 0,
        });
        if row.upset_prob > baseline_prob {
            bucket.model_higher.record(row.actual_upset);
        } else if row.upset_prob < baseline_prob {
            bucket.model_lower.record(row.actual_upset);
        } else {
            bucket.model_equal += 1;
        }
    }
    buckets.into_values().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsSummary {
    pub top: Vec<ResultRow>,
    /// Actual upsets, highest model probability first.
    pub actual_upsets: Vec<ResultRow>,
    pub mean_prob_upsets: Option<f64>,
    pub mean_prob_non_upsets: Option<f64>,
}

pub fn summarize(results: &[ResultRow], top_n: usize) -> ResultsSummary {
    let mut sorted = results.to_vec();
    sorted.sort_by(|a, b| b.upset_prob.total_cmp(&a.upset_prob));
    let actual_upsets: Vec<ResultRow> = sorted.iter().filter(|r| r.actual_upset).cloned().collect();
    let mean = |upset: bool| {
        let probs: Vec<f64> = sorted
            .iter()
            .filter(|r| r.actual_upset == upset)
            .map(|r| r.upset_prob)
            .collect();
        (!probs.is_empty()).then(|| probs.iter().sum::<f64>() / probs.len() as f64)
    };
    ResultsSummary {
        top: sorted.iter().take(top_n).cloned().collect(),
        mean_prob_upsets: mean(true),
        mean_prob_non_upsets: mean(false),
        actual_upsets,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Brier score of the calibrated model over every held-out row.
    pub brier: f64,
    /// Brier score of the seed baseline over rows whose gap it covers.
    pub baseline_brier: Option<f64>,
    pub metrics: Metrics,
    pub calibration: Vec<CalibrationBin>,
    pub ece: f64,
    pub efficacy: Vec<EfficacyBucket>,
    pub results: Vec<ResultRow>,
}

pub const CALIBRATION_BINS: usize = 10;

pub fn evaluate(predictions: &[Prediction], baseline: &SeedBaselineTable) -> EvaluationReport {
    let results = results_table(predictions, baseline);
    let probs: Vec<f64> = results.iter().map(|r| r.upset_prob).collect();
    let outcomes: Vec<bool> = results.iter().map(|r| r.actual_upset).collect();

    let (base_probs, base_outcomes): (Vec<f64>, Vec<bool>) = results
        .iter()
        .filter_map(|r| r.seed_prob.map(|p| (p, r.actual_upset)))
        .unzip();
    let baseline_brier =
        (!base_probs.is_empty()).then(|| brier_score(&base_probs, &base_outcomes));

    let calibration = calibration_bins(&probs, &outcomes, CALIBRATION_BINS);
    EvaluationReport {
        brier: brier_score(&probs, &outcomes),
        baseline_brier,
        metrics: evaluate_probs(&probs, &outcomes),
        ece: expected_calibration_error(&calibration),
        calibration,
        efficacy: efficacy_breakdown(&results),
        results,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GapRate {
    pub seed_gap: u8,
    pub games: usize,
    pub upsets: usize,
    pub rate: f64,
}

/// Realized lower-seed win rate per seed gap over played games.
pub fn empirical_seed_upset_rates<'a>(matchups: impl IntoIterator<Item = &'a Matchup>) -> Vec<GapRate> {
    let mut counts: BTreeMap<u8, PartitionStats> = BTreeMap::new();
    for m in matchups {
        if m.winning_team.is_none() {
            continue;
        }
        counts.entry(m.seed_gap()).or_default().record(m.lower_seed_won());
    }
    counts
        .into_iter()
        .map(|(seed_gap, s)| GapRate {
            seed_gap,
            games: s.total,
            upsets: s.upsets,
            rate: s.rate().unwrap_or(0.0),
        })
        .collect()
}
