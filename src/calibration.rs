//! Probability calibration and scoring for the binary upset label.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::debug;

use crate::error::PipelineError;
use crate::forest::{ForestParams, RandomForest, check_shape};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    fn empty() -> Self {
        Self {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

/// Mean squared error between predicted upset probability and the 0/1 outcome.
pub fn brier_score(predictions: &[f64], outcomes: &[bool]) -> f64 {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return 0.0;
    }
    let sum: f64 = predictions
        .iter()
        .zip(outcomes)
        .map(|(p, o)| (p - if *o { 1.0 } else { 0.0 }).powi(2))
        .sum();
    sum / predictions.len() as f64
}

pub fn evaluate_probs(predictions: &[f64], outcomes: &[bool]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::empty();
    }

    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;
    for (p, outcome) in predictions.iter().zip(outcomes) {
        let p = p.clamp(1e-12, 1.0 - 1e-12);
        log_loss_sum += if *outcome { -p.ln() } else { -(1.0 - p).ln() };
        if (p >= 0.5) == *outcome {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_score(predictions, outcomes),
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

pub fn calibration_bins(predictions: &[f64], outcomes: &[bool], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let p = p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        if *outcome {
            actual_sum[idx] += 1.0;
        }
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

/// Count-weighted mean gap between predicted and realized rate across bins.
pub fn expected_calibration_error(bins: &[CalibrationBin]) -> f64 {
    let total: usize = bins.iter().map(|b| b.count).sum();
    if total == 0 {
        return 0.0;
    }
    bins.iter()
        .map(|b| b.count as f64 * (b.avg_pred - b.actual_rate).abs())
        .sum::<f64>()
        / total as f64
}

/// Monotone non-decreasing step map fitted with pool-adjacent-violators.
///
/// Between knots the map interpolates linearly; outside it clips to the end values.
#[derive(Debug, Clone, PartialEq)]
pub struct IsotonicCalibrator {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

struct Block {
    sum_wy: f64,
    sum_w: f64,
    x_lo: f64,
    x_hi: f64,
}

impl Block {
    fn mean(&self) -> f64 {
        self.sum_wy / self.sum_w
    }
}

impl IsotonicCalibrator {
    pub fn fit(scores: &[f64], outcomes: &[bool]) -> Self {
        let mut pairs: Vec<(f64, f64)> = scores
            .iter()
            .zip(outcomes)
            .filter(|(s, _)| s.is_finite())
            .map(|(s, o)| (*s, if *o { 1.0 } else { 0.0 }))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut blocks: Vec<Block> = Vec::with_capacity(pairs.len());
        for (x, y) in pairs {
            if let Some(last) = blocks.last_mut()
                && last.x_hi == x
            {
                last.sum_wy += y;
                last.sum_w += 1.0;
            } else {
                blocks.push(Block {
                    sum_wy: y,
                    sum_w: 1.0,
                    x_lo: x,
                    x_hi: x,
                });
            }
            while blocks.len() >= 2 {
                let n = blocks.len();
                if blocks[n - 2].mean() <= blocks[n - 1].mean() {
                    break;
                }
                let Some(tail) = blocks.pop() else { break };
                let Some(head) = blocks.last_mut() else { break };
                head.sum_wy += tail.sum_wy;
                head.sum_w += tail.sum_w;
                head.x_hi = tail.x_hi;
            }
        }

        let mut xs = Vec::with_capacity(blocks.len() * 2);
        let mut ys = Vec::with_capacity(blocks.len() * 2);
        for b in &blocks {
            let y = b.mean();
            xs.push(b.x_lo);
            ys.push(y);
            if b.x_hi > b.x_lo {
                xs.push(b.x_hi);
                ys.push(y);
            }
        }
        Self { xs, ys }
    }

    pub fn predict(&self, score: f64) -> f64 {
        let (Some(&first_x), Some(&last_x)) = (self.xs.first(), self.xs.last()) else {
            return score.clamp(0.0, 1.0);
        };
        let out = if score.is_nan() || score <= first_x {
            self.ys[0]
        } else if score >= last_x {
            self.ys[self.ys.len() - 1]
        } else {
            let hi = self.xs.partition_point(|x| *x <= score);
            let lo = hi - 1;
            let (x0, x1, y0, y1) = (self.xs[lo], self.xs[hi], self.ys[lo], self.ys[hi]);
            if x1 > x0 {
                y0 + (y1 - y0) * (score - x0) / (x1 - x0)
            } else {
                y0
            }
        };
        out.clamp(0.0, 1.0)
    }

    pub fn knots(&self) -> usize {
        self.xs.len()
    }
}

/// Assigns each row to one of `k` folds with class proportions preserved.
pub fn stratified_folds(labels: &[u8], k: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut fold_of = vec![0usize; labels.len()];
    let mut offset = 0usize;
    for class in [0u8, 1u8] {
        let mut idx: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        idx.shuffle(&mut rng);
        for (pos, i) in idx.into_iter().enumerate() {
            fold_of[i] = (pos + offset) % k;
        }
        offset = labels.iter().filter(|l| **l == class).count() % k;
    }
    fold_of
}

#[derive(Debug, Clone, PartialEq)]
struct CalibratedMember {
    forest: RandomForest,
    calibrator: IsotonicCalibrator,
}

/// Forest plus isotonic calibrator fitted per cross-validation fold.
///
/// Each member's forest is trained on `k - 1` folds and its calibrator on the
/// held-out fold; predictions average the calibrated members.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedForest {
    members: Vec<CalibratedMember>,
}

impl CalibratedForest {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[u8],
        params: &ForestParams,
        folds: usize,
    ) -> Result<Self, PipelineError> {
        params.validate()?;
        check_shape(x, y)?;
        if folds < 2 {
            return Err(PipelineError::InvalidForestParams(format!(
                "calibration_folds={folds}"
            )));
        }
        let positives = y.iter().filter(|l| **l == 1).count();
        if positives == 0 || positives == y.len() {
            return Err(PipelineError::EmptyPartition(format!(
                "{} training rows hold a single class",
                y.len()
            )));
        }
        if x.len() < folds {
            return Err(PipelineError::EmptyPartition(format!(
                "{} training rows for {folds} calibration folds",
                x.len()
            )));
        }

        let fold_of = stratified_folds(y, folds, params.seed);
        let mut members = Vec::with_capacity(folds);
        for fold in 0..folds {
            let (mut fit_x, mut fit_y, mut cal_x, mut cal_y) =
                (Vec::new(), Vec::new(), Vec::new(), Vec::new());
            for (i, f) in fold_of.iter().enumerate() {
                if *f == fold {
                    cal_x.push(x[i].clone());
                    cal_y.push(y[i] == 1);
                } else {
                    fit_x.push(x[i].clone());
                    fit_y.push(y[i]);
                }
            }

            let member_params = params.with_seed(params.seed.wrapping_add(fold as u64 + 1));
            let forest = RandomForest::fit(&fit_x, &fit_y, &member_params)?;
            let scores = forest.predict_batch(&cal_x);
            let calibrator = IsotonicCalibrator::fit(&scores, &cal_y);
            debug!(
                fold,
                fit_rows = fit_x.len(),
                calibration_rows = cal_x.len(),
                knots = calibrator.knots(),
                "fitted calibration fold"
            );
            members.push(CalibratedMember { forest, calibrator });
        }
        Ok(Self { members })
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .members
            .iter()
            .map(|m| m.calibrator.predict(m.forest.predict_proba(row)))
            .sum();
        (sum / self.members.len() as f64).clamp(0.0, 1.0)
    }

    /// Uncalibrated mean vote fraction across member forests.
    pub fn predict_raw(&self, row: &[f64]) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .members
            .iter()
            .map(|m| m.forest.predict_proba(row))
            .sum();
        sum / self.members.len() as f64
    }

    pub fn folds(&self) -> usize {
        self.members.len()
    }

    /// Feature importances averaged over member forests.
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut out: Vec<f64> = Vec::new();
        for m in &self.members {
            let imp = m.forest.feature_importances();
            if out.is_empty() {
                out = vec![0.0; imp.len()];
            }
            for (acc, v) in out.iter_mut().zip(imp) {
                *acc += v;
            }
        }
        let n = self.members.len().max(1) as f64;
        out.iter_mut().for_each(|v| *v /= n);
        out
    }
}
