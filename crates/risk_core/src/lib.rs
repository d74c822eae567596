//! RoadRisk core - accident risk feature engineering and imbalance-aware training
//!
//! Turns raw incident records into a fixed numeric feature space, balances the
//! high-risk minority, trains a gradient-boosted classifier and evaluates it on
//! a holdout that only ever sees training-time statistics.
//!
//! Modules:
//! - `record`, `dataset`: incident schema, CSV loading, stratified holdout split
//! - `features`, `risk_tables`: temporal and weather/surface/speed risk features
//! - `encoder`, `normalizer`, `assembler`, `preprocess`: fitted feature pipeline
//! - `balancer`: SMOTE-style oversampling of the high-risk class
//! - `gbdt`: histogram GBDT classifier
//! - `evaluation`, `bundle`, `inference`: holdout report, persisted artifact, scoring
//! - `pipeline`, `config`: end-to-end training run and its settings

pub mod assembler;
pub mod balancer;
pub mod bundle;
pub mod config;
pub mod dataset;
pub mod deterministic;
pub mod encoder;
pub mod errors;
pub mod evaluation;
pub mod features;
pub mod gbdt;
pub mod inference;
pub mod normalizer;
pub mod pipeline;
pub mod preprocess;
pub mod record;
pub mod risk_tables;
pub mod serialization;

use std::path::Path;

pub use assembler::{assemble, FeatureMatrix};
pub use balancer::{BalanceConfig, BalancedSet, ClassBalancer};
pub use bundle::{ModelBundle, ScoredBatch, BUNDLE_FORMAT_VERSION};
pub use config::{EvaluationConfig, LabelConfig, PipelineConfig, SplitConfig};
pub use dataset::{
    binary_labels, holdout_split, load_incidents_csv, load_incidents_csv_unlabeled,
    resolve_positive_label,
};
pub use deterministic::{LcgRng, SplitTieBreaker};
pub use encoder::{CategoricalEncoder, FittedCategoricalEncoder, UnknownCategoryWarning};
pub use errors::{PipelineStage, Result, RiskError, StageError};
pub use evaluation::{EvaluationReport, HoldoutEvaluator, RiskCorrelation};
pub use features::{derive_features, DerivedFeatures};
pub use gbdt::{BinaryClassifier, GbdtClassifier, GbdtParams, GbdtTrainer};
pub use inference::{RiskAssessment, RiskPredictor, RiskTier};
pub use normalizer::{NumericNormalizer, ScalerStats};
pub use pipeline::{train_pipeline, ClassCounts, TrainingOutcome};
pub use preprocess::FeaturePipeline;
pub use record::{IncidentRecord, CATEGORICAL_COLUMNS, NUMERIC_COLUMNS};

/// Load a labeled CSV and run the full training protocol on it
pub fn train_from_csv(
    path: &Path,
    config: &PipelineConfig,
) -> std::result::Result<TrainingOutcome, StageError> {
    let records = load_incidents_csv(path).map_err(|e| StageError::new(PipelineStage::Load, e))?;
    train_pipeline(&records, config)
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
