//! Model artifact bundle
//!
//! The bundle is the only object that crosses the training/inference boundary.
//! It owns the trained classifier together with the fitted encoder and scaler,
//! so any consumer rebuilds the training-time feature matrix from stored state
//! alone.
//!
//! On disk the bundle is canonical JSON wrapped in an envelope carrying the
//! BLAKE3 digest of that canonical payload:
//!
//! ```json
//! { "format_version": 1, "hash": "<hex>", "bundle": { ... } }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, instrument};

use crate::assembler::FeatureMatrix;
use crate::encoder::UnknownCategoryWarning;
use crate::errors::{PipelineStage, Result, RiskError, StageContext, StageError};
use crate::features::DerivedFeatures;
use crate::gbdt::{BinaryClassifier, GbdtClassifier};
use crate::preprocess::FeaturePipeline;
use crate::record::{IncidentRecord, CATEGORICAL_COLUMNS, NUMERIC_COLUMNS};
use crate::serialization::{canonicalize_value, digest_hex, write_atomic};

/// On-disk layout version understood by this build
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Immutable snapshot of everything inference needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    format_version: u32,
    created_at: DateTime<Utc>,
    positive_label: String,
    feature_names: Vec<String>,
    categorical_columns: Vec<String>,
    numeric_columns: Vec<String>,
    pipeline: FeaturePipeline,
    classifier: GbdtClassifier,
}

#[derive(Debug, Serialize, Deserialize)]
struct BundleEnvelope {
    format_version: u32,
    hash: String,
    bundle: Value,
}

/// Probabilities for a batch plus the intermediate values that produced them
#[derive(Debug, Clone)]
pub struct ScoredBatch {
    pub matrix: FeatureMatrix,
    pub derived: Vec<DerivedFeatures>,
    /// Positive-class probability per record
    pub probabilities: Vec<f64>,
    pub unknown_categories: Vec<UnknownCategoryWarning>,
}

impl ModelBundle {
    /// Package a fitted pipeline with the classifier trained on its output
    pub fn new(
        pipeline: FeaturePipeline,
        classifier: GbdtClassifier,
        positive_label: impl Into<String>,
    ) -> Result<Self> {
        if classifier.feature_count() != pipeline.n_features() {
            return Err(RiskError::ShapeMismatch {
                left: classifier.feature_count(),
                right: pipeline.n_features(),
            });
        }

        Ok(Self {
            format_version: BUNDLE_FORMAT_VERSION,
            created_at: Utc::now(),
            positive_label: positive_label.into(),
            feature_names: pipeline.feature_names(),
            categorical_columns: pipeline.encoder().columns(),
            numeric_columns: pipeline.scaler().columns().to_vec(),
            pipeline,
            classifier,
        })
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn positive_label(&self) -> &str {
        &self.positive_label
    }

    /// Ordered names of the assembled matrix columns
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn categorical_columns(&self) -> &[String] {
        &self.categorical_columns
    }

    pub fn numeric_columns(&self) -> &[String] {
        &self.numeric_columns
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    pub fn classifier(&self) -> &GbdtClassifier {
        &self.classifier
    }

    /// Transform with stored state only and score every record
    ///
    /// Classifier failures are tagged with `stage`, the caller's view of the run.
    pub fn score(
        &self,
        records: &[IncidentRecord],
        stage: PipelineStage,
    ) -> std::result::Result<ScoredBatch, StageError> {
        let output = self.pipeline.transform(records)?;
        let probabilities = self
            .classifier
            .predict_proba(&output.matrix)
            .stage(stage)?
            .into_iter()
            .map(|[_, p]| p)
            .collect();

        Ok(ScoredBatch {
            matrix: output.matrix,
            derived: output.derived,
            probabilities,
            unknown_categories: output.unknown_categories,
        })
    }

    /// BLAKE3 digest of the canonical payload
    pub fn digest(&self) -> Result<String> {
        let (_, digest) = self.canonical_payload()?;
        Ok(digest)
    }

    fn canonical_payload(&self) -> Result<(Value, String)> {
        let value = canonicalize_value(&serde_json::to_value(self)?);
        let digest = digest_hex(serde_json::to_string(&value)?.as_bytes());
        Ok((value, digest))
    }

    /// Atomically write the bundle and its digest to `path`
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let (bundle, hash) = self.canonical_payload()?;
        let envelope = BundleEnvelope {
            format_version: self.format_version,
            hash: hash.clone(),
            bundle,
        };
        write_atomic(path.as_ref(), serde_json::to_string(&envelope)?.as_bytes())?;
        info!("Saved model bundle ({} features, hash {})", self.feature_names.len(), hash);
        Ok(())
    }

    /// Load a bundle, verifying its digest and then its layout
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let envelope: BundleEnvelope = serde_json::from_str(&content)?;

        let canonical = canonicalize_value(&envelope.bundle);
        let computed = digest_hex(serde_json::to_string(&canonical)?.as_bytes());
        if computed != envelope.hash {
            return Err(RiskError::ArtifactIntegrity {
                expected: envelope.hash,
                computed,
            });
        }
        if envelope.format_version != BUNDLE_FORMAT_VERSION {
            return Err(RiskError::version_mismatch(
                "format_version",
                BUNDLE_FORMAT_VERSION,
                envelope.format_version,
            ));
        }

        let bundle: ModelBundle = serde_json::from_value(canonical)?;
        bundle.verify()?;
        info!(
            "Loaded model bundle created {} ({} features)",
            bundle.created_at.to_rfc3339(),
            bundle.feature_names.len()
        );
        Ok(bundle)
    }

    /// Layout checks against what this build produces
    pub fn verify(&self) -> Result<()> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(RiskError::version_mismatch(
                "format_version",
                BUNDLE_FORMAT_VERSION,
                self.format_version,
            ));
        }
        if self.categorical_columns != CATEGORICAL_COLUMNS {
            return Err(RiskError::version_mismatch(
                "categorical_columns",
                CATEGORICAL_COLUMNS,
                &self.categorical_columns,
            ));
        }
        if self.numeric_columns != NUMERIC_COLUMNS {
            return Err(RiskError::version_mismatch(
                "numeric_columns",
                NUMERIC_COLUMNS,
                &self.numeric_columns,
            ));
        }
        if self.pipeline.encoder().columns() != self.categorical_columns
            || self.pipeline.scaler().columns() != self.numeric_columns.as_slice()
        {
            return Err(RiskError::version_mismatch(
                "pipeline_columns",
                (&self.categorical_columns, &self.numeric_columns),
                (
                    self.pipeline.encoder().columns(),
                    self.pipeline.scaler().columns(),
                ),
            ));
        }
        if self.pipeline.feature_names() != self.feature_names {
            return Err(RiskError::version_mismatch(
                "feature_names",
                &self.feature_names,
                self.pipeline.feature_names(),
            ));
        }
        if self.classifier.feature_count() != self.feature_names.len() {
            return Err(RiskError::version_mismatch(
                "feature_count",
                self.feature_names.len(),
                self.classifier.feature_count(),
            ));
        }
        self.classifier.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gbdt::{GbdtParams, GbdtTrainer};

    fn record(hour: u32, weather: &str, speed: f64, label: &str) -> IncidentRecord {
        IncidentRecord {
            date: "14/03/2023".into(),
            time: format!("{hour:02}:15"),
            day_of_week: Some("Tuesday".into()),
            road_type: Some(if speed > 50.0 { "3" } else { "6" }.into()),
            weather_conditions: Some(weather.into()),
            light_conditions: Some(if hour >= 22 { "4" } else { "1" }.into()),
            road_surface_conditions: Some("1".into()),
            junction_detail: Some("0".into()),
            speed_limit: Some(speed),
            number_of_vehicles: Some(2.0),
            number_of_casualties: Some(1.0),
            risk_level: Some(label.into()),
        }
    }

    fn trained_bundle() -> ModelBundle {
        let mut records = Vec::new();
        for i in 0..40u32 {
            records.push(record(i % 12 + 6, "1", 30.0, "3"));
            if i % 4 == 0 {
                records.push(record(22 + i % 2, "6", 70.0, "1"));
            }
        }
        let pipeline = FeaturePipeline::fit(&records).unwrap();
        let matrix = pipeline.transform(&records).unwrap().matrix;
        let labels = crate::dataset::binary_labels(&records, "1").unwrap();
        let params = GbdtParams {
            n_estimators: 10,
            max_depth: 2,
            ..GbdtParams::default()
        };
        let classifier = GbdtTrainer::new(params).fit(&matrix, &labels).unwrap();
        ModelBundle::new(pipeline, classifier, "1").unwrap()
    }

    #[test]
    fn save_load_round_trip_is_exact() {
        let bundle = trained_bundle();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        bundle.save(&path).unwrap();

        let loaded = ModelBundle::load(&path).unwrap();
        assert_eq!(loaded, bundle);
        assert_eq!(loaded.digest().unwrap(), bundle.digest().unwrap());

        let batch = vec![record(23, "6", 70.0, "1"), record(9, "1", 30.0, "3")];
        let before = bundle
            .score(&batch, PipelineStage::Predict)
            .unwrap()
            .probabilities;
        let after = loaded
            .score(&batch, PipelineStage::Predict)
            .unwrap()
            .probabilities;
        assert_eq!(before, after);
        assert!(before[0] > before[1]);
    }

    #[test]
    fn tampered_payload_fails_integrity_check() {
        let bundle = trained_bundle();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        bundle.save(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let tampered = content.replacen("\"positive_label\":\"1\"", "\"positive_label\":\"2\"", 1);
        assert_ne!(content, tampered);
        fs::write(&path, tampered).unwrap();

        assert!(matches!(
            ModelBundle::load(&path),
            Err(RiskError::ArtifactIntegrity { .. })
        ));
    }

    #[test]
    fn unexpected_numeric_columns_are_rejected() {
        let mut bundle = trained_bundle();
        bundle.numeric_columns.pop();
        assert!(matches!(
            bundle.verify(),
            Err(RiskError::ArtifactVersionMismatch { ref field, .. }) if field == "numeric_columns"
        ));
    }

    #[test]
    fn stored_columns_match_constants() {
        let bundle = trained_bundle();
        assert_eq!(bundle.categorical_columns(), CATEGORICAL_COLUMNS);
        assert_eq!(bundle.numeric_columns(), NUMERIC_COLUMNS);
        assert_eq!(
            bundle.feature_names().len(),
            bundle.classifier().feature_count()
        );
        assert!(bundle.verify().is_ok());
    }

    #[test]
    fn classifier_failure_carries_caller_stage() {
        let mut bundle = trained_bundle();
        let narrow = FeatureMatrix::new(
            vec![vec![0.0], vec![1.0], vec![0.2], vec![0.9]],
            vec!["x".into()],
        );
        bundle.classifier = GbdtTrainer::new(GbdtParams {
            n_estimators: 2,
            max_depth: 1,
            ..GbdtParams::default()
        })
        .fit(&narrow, &[0, 1, 0, 1])
        .unwrap();

        let batch = vec![record(9, "1", 30.0, "3")];
        for stage in [PipelineStage::Predict, PipelineStage::Evaluate] {
            let err = bundle.score(&batch, stage).unwrap_err();
            assert_eq!(err.stage, stage);
            assert!(matches!(err.source, RiskError::ShapeMismatch { .. }));
        }
    }
}
