//! End-to-end training run
//!
//! split -> fit preprocessing on the training partition -> transform ->
//! balance -> train -> bundle -> holdout evaluation. The holdout is carved off
//! before any statistic is computed and never reaches the balancer.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::balancer::ClassBalancer;
use crate::bundle::ModelBundle;
use crate::config::PipelineConfig;
use crate::dataset::{binary_labels, class_counts, holdout_split, resolve_positive_label};
use crate::errors::{PipelineStage, StageContext, StageError};
use crate::evaluation::{risk_correlations, EvaluationReport, HoldoutEvaluator, RiskCorrelation};
use crate::gbdt::GbdtTrainer;
use crate::preprocess::FeaturePipeline;
use crate::record::IncidentRecord;

/// (negative, positive) row counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub other: usize,
    pub high_risk: usize,
}

impl From<(usize, usize)> for ClassCounts {
    fn from((other, high_risk): (usize, usize)) -> Self {
        Self { other, high_risk }
    }
}

/// Everything a training run produces
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub bundle: ModelBundle,
    pub report: EvaluationReport,
    pub train_rows: usize,
    pub holdout_rows: usize,
    /// Strongest feature correlations with the label on the balanced training matrix
    pub risk_correlations: Vec<RiskCorrelation>,
    pub before_balance: ClassCounts,
    pub after_balance: ClassCounts,
}

/// Run the full training protocol on labeled records
#[instrument(skip(records, config), fields(rows = records.len()))]
pub fn train_pipeline(
    records: &[IncidentRecord],
    config: &PipelineConfig,
) -> Result<TrainingOutcome, StageError> {
    config.validate().stage(PipelineStage::Load)?;

    let (train, holdout) = holdout_split(records, config.split.holdout_fraction, config.split.seed)
        .stage(PipelineStage::Split)?;
    let positive_label = resolve_positive_label(&train, config.labels.positive_label.as_deref())
        .stage(PipelineStage::Split)?;
    info!("High-risk class is risk_level '{}'", positive_label);

    let pipeline = FeaturePipeline::fit(&train)?;
    let train_matrix = pipeline.transform(&train)?.matrix;
    let labels = binary_labels(&train, &positive_label).stage(PipelineStage::Split)?;
    let before_balance = ClassCounts::from(class_counts(&labels));
    info!(
        "Training class distribution: {} other / {} high risk",
        before_balance.other, before_balance.high_risk
    );

    let balanced = ClassBalancer::new(config.balance.clone())
        .balance(&train_matrix, &labels)
        .stage(PipelineStage::Balance)?;
    let after_balance = ClassCounts::from(class_counts(&balanced.labels));
    info!(
        "Balanced class distribution: {} other / {} high risk ({} synthetic)",
        after_balance.other, after_balance.high_risk, balanced.synthesized
    );

    let correlations = risk_correlations(
        &balanced.matrix,
        &balanced.labels,
        config.evaluation.top_n_correlations,
    );

    let classifier = GbdtTrainer::new(config.classifier.clone())
        .fit(&balanced.matrix, &balanced.labels)
        .stage(PipelineStage::Train)?;
    let bundle =
        ModelBundle::new(pipeline, classifier, positive_label).stage(PipelineStage::Bundle)?;

    let report = HoldoutEvaluator::new(config.evaluation.top_n_features).evaluate(&bundle, &holdout)?;

    Ok(TrainingOutcome {
        bundle,
        report,
        train_rows: train.len(),
        holdout_rows: holdout.len(),
        risk_correlations: correlations,
        before_balance,
        after_balance,
    })
}
