//! Gradient-boosted ensemble with logistic loss
//!
//! Training grows one histogram tree per round on the gradient and hessian of
//! the weighted log-loss. Row and column subsamples are drawn from the seeded
//! LCG, so a fixed seed always yields the same ensemble.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::cart::{BinnedMatrix, CartBuilder, TreeConfig, MAX_TREE_DEPTH};
use super::tree::Tree;
use super::BinaryClassifier;
use crate::assembler::FeatureMatrix;
use crate::dataset::class_counts;
use crate::deterministic::LcgRng;
use crate::errors::{Result, RiskError};

/// Floor applied to per-row hessians
const MIN_HESSIAN: f64 = 1e-16;

/// GBDT training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Fraction of rows drawn for each tree
    pub subsample: f64,
    /// Fraction of columns searched by each tree
    pub colsample_bytree: f64,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub lambda: f64,
    /// Gradient multiplier for the positive class
    pub scale_pos_weight: f64,
    pub max_bins: usize,
    pub seed: u64,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.1,
            subsample: 0.8,
            colsample_bytree: 0.8,
            min_child_weight: 1.0,
            lambda: 1.0,
            scale_pos_weight: 2.0,
            max_bins: 64,
            seed: 42,
        }
    }
}

impl GbdtParams {
    pub fn validate(&self) -> Result<()> {
        let fraction_ok = |v: f64| v > 0.0 && v <= 1.0;

        if self.n_estimators == 0 {
            return Err(invalid("n_estimators must be at least 1"));
        }
        if !(1..=MAX_TREE_DEPTH).contains(&self.max_depth) {
            return Err(invalid(format!(
                "max_depth must be in [1, {}], got {}",
                MAX_TREE_DEPTH, self.max_depth
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !fraction_ok(self.subsample) {
            return Err(invalid(format!(
                "subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        if !fraction_ok(self.colsample_bytree) {
            return Err(invalid(format!(
                "colsample_bytree must be in (0, 1], got {}",
                self.colsample_bytree
            )));
        }
        let non_negative = |v: f64| v >= 0.0 && v.is_finite();
        if !non_negative(self.min_child_weight) || !non_negative(self.lambda) {
            return Err(invalid("min_child_weight and lambda must be non-negative"));
        }
        if !(self.scale_pos_weight > 0.0 && self.scale_pos_weight.is_finite()) {
            return Err(invalid(format!(
                "scale_pos_weight must be positive, got {}",
                self.scale_pos_weight
            )));
        }
        if !(2..=u16::MAX as usize).contains(&self.max_bins) {
            return Err(invalid(format!(
                "max_bins must be in [2, {}], got {}",
                u16::MAX,
                self.max_bins
            )));
        }
        Ok(())
    }

    fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            max_depth: self.max_depth,
            min_child_weight: self.min_child_weight,
            lambda: self.lambda,
        }
    }
}

fn invalid(msg: impl Into<String>) -> RiskError {
    RiskError::InvalidParameters(msg.into())
}

/// GBDT trainer
pub struct GbdtTrainer {
    params: GbdtParams,
}

impl GbdtTrainer {
    pub fn new(params: GbdtParams) -> Self {
        Self { params }
    }

    /// Fit a binary classifier on `labels` (1 = high risk)
    #[instrument(skip(self, matrix, labels), fields(rows = matrix.n_rows(), features = matrix.n_features()))]
    pub fn fit(&self, matrix: &FeatureMatrix, labels: &[u8]) -> Result<GbdtClassifier> {
        self.params.validate()?;
        if matrix.n_rows() != labels.len() {
            return Err(RiskError::ShapeMismatch {
                left: matrix.n_rows(),
                right: labels.len(),
            });
        }
        let (negatives, positives) = class_counts(labels);
        if negatives == 0 || positives == 0 {
            return Err(RiskError::Dataset(format!(
                "classifier needs both classes, got {negatives} negative and {positives} positive rows"
            )));
        }

        let n_rows = matrix.n_rows();
        let n_features = matrix.n_features();
        let weights: Vec<f64> = labels
            .iter()
            .map(|&y| if y == 1 { self.params.scale_pos_weight } else { 1.0 })
            .collect();
        let base_margin = weighted_log_odds(labels, &weights);

        let binned = BinnedMatrix::from_rows(&matrix.rows, n_features, self.params.max_bins);
        let tree_config = self.params.tree_config();
        let row_count = sample_size(n_rows, self.params.subsample);
        let col_count = sample_size(n_features, self.params.colsample_bytree);

        let mut rng = LcgRng::new(self.params.seed);
        let mut margins = vec![base_margin; n_rows];
        let mut gains = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(self.params.n_estimators);
        let mut gradients = vec![0.0; n_rows];
        let mut hessians = vec![0.0; n_rows];

        for round in 0..self.params.n_estimators {
            for i in 0..n_rows {
                let p = sigmoid(margins[i]);
                let y = f64::from(labels[i]);
                gradients[i] = weights[i] * (p - y);
                hessians[i] = (weights[i] * p * (1.0 - p)).max(MIN_HESSIAN);
            }

            let rows = rng.sample_indices(n_rows, row_count);
            let columns = rng.sample_indices(n_features, col_count);
            let grown = CartBuilder::new(
                &binned,
                &gradients,
                &hessians,
                &columns,
                tree_config.clone(),
            )
            .build(&rows);

            for (total, gain) in gains.iter_mut().zip(&grown.gains) {
                *total += gain;
            }

            let tree = Tree::new(grown.nodes, self.params.learning_rate);
            for (margin, row) in margins.iter_mut().zip(&matrix.rows) {
                *margin += tree.contribution(row);
            }
            trees.push(tree);

            if (round + 1) % 10 == 0 {
                debug!(
                    "Round {}/{}: training log-loss {:.5}",
                    round + 1,
                    self.params.n_estimators,
                    log_loss(labels, &weights, &margins)
                );
            }
        }

        let importances = normalize(gains);
        info!(
            "Trained {} trees on {} rows ({} positive, {} negative)",
            trees.len(),
            n_rows,
            positives,
            negatives
        );

        Ok(GbdtClassifier {
            feature_count: n_features,
            base_margin,
            trees,
            importances,
        })
    }
}

/// Trained ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtClassifier {
    feature_count: usize,
    base_margin: f64,
    trees: Vec<Tree>,
    importances: Vec<f64>,
}

impl GbdtClassifier {
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn base_margin(&self) -> f64 {
        self.base_margin
    }

    /// Raw log-odds for one row
    pub fn margin(&self, features: &[f64]) -> f64 {
        self.trees
            .iter()
            .fold(self.base_margin, |acc, tree| acc + tree.contribution(features))
    }

    /// Positive-class probability for one row
    pub fn probability(&self, features: &[f64]) -> f64 {
        sigmoid(self.margin(features))
    }

    /// Structural checks run after deserialization
    pub fn validate(&self) -> Result<()> {
        if !self.base_margin.is_finite() {
            return Err(RiskError::Dataset(format!(
                "classifier base margin is not finite: {}",
                self.base_margin
            )));
        }
        if self.importances.len() != self.feature_count {
            return Err(RiskError::ShapeMismatch {
                left: self.importances.len(),
                right: self.feature_count,
            });
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate()
                .map_err(|e| RiskError::Dataset(format!("tree {i} invalid: {e}")))?;
            if let Some(idx) = tree.max_feature_index() {
                if idx >= self.feature_count {
                    return Err(RiskError::Dataset(format!(
                        "tree {i} splits on feature {idx} but the model has {} features",
                        self.feature_count
                    )));
                }
            }
        }
        Ok(())
    }
}

impl BinaryClassifier for GbdtClassifier {
    fn feature_count(&self) -> usize {
        self.feature_count
    }

    fn predict_proba(&self, matrix: &FeatureMatrix) -> Result<Vec<[f64; 2]>> {
        if matrix.n_features() != self.feature_count {
            return Err(RiskError::ShapeMismatch {
                left: matrix.n_features(),
                right: self.feature_count,
            });
        }
        Ok(matrix
            .rows
            .iter()
            .map(|row| {
                let p = self.probability(row);
                [1.0 - p, p]
            })
            .collect())
    }

    fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn weighted_log_odds(labels: &[u8], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    let positive: f64 = labels
        .iter()
        .zip(weights)
        .filter(|(y, _)| **y == 1)
        .map(|(_, w)| w)
        .sum();
    let p = positive / total;
    (p / (1.0 - p)).ln()
}

fn log_loss(labels: &[u8], weights: &[f64], margins: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    labels
        .iter()
        .zip(weights)
        .zip(margins)
        .map(|((&y, w), &m)| {
            let p = sigmoid(m).clamp(1e-15, 1.0 - 1e-15);
            let y = f64::from(y);
            -w * (y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum::<f64>()
        / total
}

fn sample_size(n: usize, fraction: f64) -> usize {
    ((n as f64 * fraction).round() as usize).clamp(1, n.max(1))
}

fn normalize(gains: Vec<f64>) -> Vec<f64> {
    let total: f64 = gains.iter().sum();
    if total > 0.0 {
        gains.into_iter().map(|g| g / total).collect()
    } else {
        gains
    }
}
