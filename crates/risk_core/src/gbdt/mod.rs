//! Gradient-boosted decision tree classifier
//!
//! - `tree`: flat node storage and traversal
//! - `cart`: histogram split search and tree growth
//! - `model`: boosting loop, trained ensemble and its parameters

pub mod cart;
pub mod model;
pub mod tree;

pub use model::{sigmoid, GbdtClassifier, GbdtParams, GbdtTrainer};
pub use tree::{Node, Tree};

use crate::assembler::FeatureMatrix;
use crate::errors::Result;

/// Probability cut used for hard labels
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Fit/predict contract consumed by the training pipeline and the evaluator
pub trait BinaryClassifier {
    /// Width of the matrices the model accepts
    fn feature_count(&self) -> usize;

    /// `[P(other), P(high risk)]` per row
    fn predict_proba(&self, matrix: &FeatureMatrix) -> Result<Vec<[f64; 2]>>;

    /// Per-feature contribution aligned with the matrix's feature names
    fn feature_importances(&self) -> &[f64];

    /// Hard labels: 1 when the positive probability exceeds [`DECISION_THRESHOLD`]
    fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(matrix)?
            .into_iter()
            .map(|[_, p]| u8::from(p > DECISION_THRESHOLD))
            .collect())
    }
}
