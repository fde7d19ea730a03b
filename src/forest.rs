//! Random forest of CART trees for the binary upset label.
//!
//! Every tree draws its bootstrap sample and feature subsets from its own
//! ChaCha stream seeded by `(seed, tree index)`, so the fitted forest is the
//! same however rayon schedules the fits.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    Sqrt,
    All,
    Fraction(f64),
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Fraction(f) => (f * n_features as f64).floor() as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Reweight classes inversely to their frequency in the training labels.
    pub balanced_classes: bool,
    pub max_features: MaxFeatures,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 600,
            max_depth: 5,
            min_samples_leaf: 20,
            balanced_classes: true,
            max_features: MaxFeatures::Sqrt,
            seed: 42,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.n_trees == 0 {
            return Err(PipelineError::InvalidForestParams("n_trees=0".to_string()));
        }
        if self.max_depth == 0 {
            return Err(PipelineError::InvalidForestParams("max_depth=0".to_string()));
        }
        if self.min_samples_leaf == 0 {
            return Err(PipelineError::InvalidForestParams(
                "min_samples_leaf=0".to_string(),
            ));
        }
        if let MaxFeatures::Fraction(f) = self.max_features
            && !(f > 0.0 && f <= 1.0)
        {
            return Err(PipelineError::InvalidForestParams(format!(
                "max_features fraction {f} outside (0, 1]"
            )));
        }
        Ok(())
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        p_upset: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl DecisionTree {
    /// Grows one tree on the samples with positive weight.
    pub fn fit<R: Rng>(
        x: &[Vec<f64>],
        y: &[u8],
        weights: &[f64],
        params: &ForestParams,
        rng: &mut R,
    ) -> Self {
        let n_features = x.first().map(Vec::len).unwrap_or(0);
        let mut builder = TreeBuilder {
            x,
            y,
            weights,
            params,
            n_features,
            max_features: params.max_features.resolve(n_features),
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
            rng,
        };
        let root: Vec<usize> = (0..x.len()).filter(|&i| weights[i] > 0.0).collect();
        builder.grow(root, 0);
        Self {
            nodes: builder.nodes,
            importances: builder.importances,
        }
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { p_upset } => return *p_upset,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

struct TreeBuilder<'a, R> {
    x: &'a [Vec<f64>],
    y: &'a [u8],
    weights: &'a [f64],
    params: &'a ForestParams,
    n_features: usize,
    max_features: usize,
    nodes: Vec<Node>,
    importances: Vec<f64>,
    rng: &'a mut R,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl<R: Rng> TreeBuilder<'_, R> {
    fn grow(&mut self, idx: Vec<usize>, depth: usize) -> usize {
        let (w_total, w_pos) = self.weight_sums(&idx);
        let p_upset = if w_total > 0.0 { w_pos / w_total } else { 0.0 };
        let node_id = self.nodes.len();
        self.nodes.push(Node::Leaf { p_upset });

        let pure = w_pos <= 0.0 || w_pos >= w_total;
        if depth >= self.params.max_depth
            || idx.len() < 2 * self.params.min_samples_leaf
            || pure
        {
            return node_id;
        }
        let Some(split) = self.best_split(&idx, w_total, w_pos) else {
            return node_id;
        };

        self.importances[split.feature] += split.gain;
        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = idx
            .into_iter()
            .partition(|&i| self.x[i][split.feature] <= split.threshold);
        let left = self.grow(left_idx, depth + 1);
        let right = self.grow(right_idx, depth + 1);
        self.nodes[node_id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_id
    }

    fn weight_sums(&self, idx: &[usize]) -> (f64, f64) {
        idx.iter().fold((0.0, 0.0), |(total, pos), &i| {
            let w = self.weights[i];
            (total + w, if self.y[i] == 1 { pos + w } else { pos })
        })
    }

    fn best_split(&mut self, idx: &[usize], w_total: f64, w_pos: f64) -> Option<Split> {
        let mut features: Vec<usize> = (0..self.n_features).collect();
        features.shuffle(&mut *self.rng);
        features.truncate(self.max_features);

        let parent = w_total * gini(w_total, w_pos);
        let min_leaf = self.params.min_samples_leaf;
        let mut best: Option<Split> = None;
        let mut sorted = idx.to_vec();

        for feature in features {
            sorted.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let mut wl = 0.0;
            let mut wl_pos = 0.0;
            for j in 0..sorted.len() - 1 {
                let i = sorted[j];
                wl += self.weights[i];
                if self.y[i] == 1 {
                    wl_pos += self.weights[i];
                }
                let n_left = j + 1;
                if n_left < min_leaf || sorted.len() - n_left < min_leaf {
                    continue;
                }
                let here = self.x[i][feature];
                let next = self.x[sorted[j + 1]][feature];
                if here >= next {
                    continue;
                }
                let wr = w_total - wl;
                let wr_pos = w_pos - wl_pos;
                let child = wl * gini(wl, wl_pos) + wr * gini(wr, wr_pos);
                let gain = parent - child;
                if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                    let mid = here + (next - here) / 2.0;
                    let threshold = if mid < next { mid } else { here };
                    best = Some(Split {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

fn gini(w: f64, w_pos: f64) -> f64 {
    if w <= 0.0 {
        return 0.0;
    }
    let p = w_pos / w;
    2.0 * p * (1.0 - p)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl RandomForest {
    pub fn fit(x: &[Vec<f64>], y: &[u8], params: &ForestParams) -> Result<Self, PipelineError> {
        params.validate()?;
        check_shape(x, y)?;
        let n = x.len();
        let n_features = x[0].len();
        let class_weights = class_weights(y, params.balanced_classes);

        let trees = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = ChaCha8Rng::seed_from_u64(tree_seed(params.seed, t));
                let mut counts = vec![0u32; n];
                for _ in 0..n {
                    counts[rng.gen_range(0..n)] += 1;
                }
                let weights: Vec<f64> = counts
                    .iter()
                    .zip(y)
                    .map(|(c, label)| f64::from(*c) * class_weights[usize::from(*label)])
                    .collect();
                DecisionTree::fit(x, y, &weights, params, &mut rng)
            })
            .collect::<Vec<_>>();

        Ok(Self { trees, n_features })
    }

    /// Mean of the per-tree leaf upset fractions.
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict_proba(row)).sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.par_iter().map(|r| self.predict_proba(r)).collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Mean decrease in impurity per feature, normalized to sum to one.
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.n_features];
        for tree in &self.trees {
            let sum: f64 = tree.importances.iter().sum();
            if sum <= 0.0 {
                continue;
            }
            for (acc, v) in total.iter_mut().zip(&tree.importances) {
                *acc += v / sum;
            }
        }
        let grand: f64 = total.iter().sum();
        if grand > 0.0 {
            for v in &mut total {
                *v /= grand;
            }
        }
        total
    }
}

pub(crate) fn check_shape(x: &[Vec<f64>], y: &[u8]) -> Result<(), PipelineError> {
    if x.is_empty() {
        return Err(PipelineError::EmptyPartition("no training rows".to_string()));
    }
    if x.len() != y.len() {
        return Err(PipelineError::ShapeMismatch(format!(
            "{} rows but {} labels",
            x.len(),
            y.len()
        )));
    }
    let width = x[0].len();
    if width == 0 {
        return Err(PipelineError::ShapeMismatch("no feature columns".to_string()));
    }
    if let Some((i, row)) = x.iter().enumerate().find(|(_, r)| r.len() != width) {
        return Err(PipelineError::ShapeMismatch(format!(
            "row {i} has {} features, expected {width}",
            row.len()
        )));
    }
    if let Some(label) = y.iter().find(|l| **l > 1) {
        return Err(PipelineError::ShapeMismatch(format!("label {label} is not 0/1")));
    }
    Ok(())
}

/// `n / (2 * n_class)` per class when balanced, otherwise unit weights.
fn class_weights(y: &[u8], balanced: bool) -> [f64; 2] {
    if !balanced {
        return [1.0, 1.0];
    }
    let n = y.len() as f64;
    let n_pos = y.iter().filter(|l| **l == 1).count() as f64;
    let n_neg = n - n_pos;
    let weight = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 0.0 };
    [weight(n_neg), weight(n_pos)]
}

fn tree_seed(seed: u64, tree: usize) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(tree as u64)
}
