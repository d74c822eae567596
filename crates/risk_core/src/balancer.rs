//! Synthetic minority oversampling for the high-risk class
//!
//! New positive rows are interpolated between a positive sample and one of its
//! `k` nearest positive neighbours until positives reach
//! `floor(target_ratio * negatives)`. Negative rows are never touched. Only
//! ever called on the training partition.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::assembler::FeatureMatrix;
use crate::dataset::class_counts;
use crate::deterministic::LcgRng;
use crate::errors::{Result, RiskError};

/// Balancing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Desired positive:negative ratio after oversampling
    pub target_ratio: f64,
    /// Neighbours considered for interpolation
    pub k_neighbors: usize,
    pub seed: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            target_ratio: 0.5,
            k_neighbors: 5,
            seed: 42,
        }
    }
}

/// Balanced training data
#[derive(Debug, Clone)]
pub struct BalancedSet {
    pub matrix: FeatureMatrix,
    pub labels: Vec<u8>,
    pub synthesized: usize,
}

/// SMOTE-style class balancer
#[derive(Debug, Clone)]
pub struct ClassBalancer {
    config: BalanceConfig,
}

impl ClassBalancer {
    pub fn new(config: BalanceConfig) -> Self {
        Self { config }
    }

    /// Oversample positives; original rows are kept in order, synthetic rows appended
    #[instrument(skip(self, matrix, labels), fields(rows = matrix.n_rows()))]
    pub fn balance(&self, matrix: &FeatureMatrix, labels: &[u8]) -> Result<BalancedSet> {
        if matrix.n_rows() != labels.len() {
            return Err(RiskError::ShapeMismatch {
                left: matrix.n_rows(),
                right: labels.len(),
            });
        }
        if !(self.config.target_ratio > 0.0 && self.config.target_ratio.is_finite()) {
            return Err(RiskError::InvalidParameters(format!(
                "target ratio must be positive, got {}",
                self.config.target_ratio
            )));
        }
        if self.config.k_neighbors == 0 {
            return Err(RiskError::InvalidParameters(
                "k_neighbors must be at least 1".to_string(),
            ));
        }

        let (negatives, positives) = class_counts(labels);
        let target = (self.config.target_ratio * negatives as f64).floor() as usize;
        let needed = target.saturating_sub(positives);

        let mut rows = matrix.rows.clone();
        let mut out_labels = labels.to_vec();

        if needed == 0 {
            info!(
                "No oversampling needed: {} positives, {} negatives, target {}",
                positives, negatives, target
            );
            return Ok(BalancedSet {
                matrix: FeatureMatrix::new(rows, matrix.feature_names.clone()),
                labels: out_labels,
                synthesized: 0,
            });
        }

        let required = self.config.k_neighbors + 1;
        if positives < required {
            return Err(RiskError::InsufficientMinoritySamples {
                found: positives,
                required,
            });
        }

        let minority: Vec<&Vec<f64>> = matrix
            .rows
            .iter()
            .zip(labels)
            .filter(|(_, label)| **label == 1)
            .map(|(row, _)| row)
            .collect();
        let neighbours = nearest_neighbours(&minority, self.config.k_neighbors);
        debug!(
            "Computed {} nearest neighbours for {} positives",
            self.config.k_neighbors,
            minority.len()
        );

        let mut rng = LcgRng::new(self.config.seed);
        rows.reserve(needed);
        out_labels.reserve(needed);
        for _ in 0..needed {
            let base = rng.next_index(minority.len());
            let neighbour = neighbours[base][rng.next_index(neighbours[base].len())];
            let gap = rng.next_unit();
            let synthetic = minority[base]
                .iter()
                .zip(minority[neighbour])
                .map(|(a, b)| a + gap * (b - a))
                .collect();
            rows.push(synthetic);
            out_labels.push(1);
        }

        info!(
            "Synthesized {} positive samples: {} positives / {} negatives",
            needed, target, negatives
        );

        Ok(BalancedSet {
            matrix: FeatureMatrix::new(rows, matrix.feature_names.clone()),
            labels: out_labels,
            synthesized: needed,
        })
    }
}

/// Indices of the `k` nearest other rows (squared Euclidean, ties by index)
fn nearest_neighbours(rows: &[&Vec<f64>], k: usize) -> Vec<Vec<usize>> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let mut distances: Vec<(f64, usize)> = rows
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(j, other)| (squared_distance(row, other), j))
                .collect();
            distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            distances.truncate(k);
            distances.into_iter().map(|(_, j)| j).collect()
        })
        .collect()
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
