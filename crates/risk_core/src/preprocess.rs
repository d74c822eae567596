//! Fitted preprocessing snapshot
//!
//! [`FeaturePipeline`] is the single canonical path from raw records to a
//! feature matrix. It is fitted once on the training partition and is
//! immutable afterwards; training, holdout evaluation and inference all call
//! the same `transform`.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::assembler::{assemble, FeatureMatrix};
use crate::encoder::{CategoricalEncoder, FittedCategoricalEncoder, UnknownCategoryWarning};
use crate::errors::{PipelineStage, StageContext, StageError};
use crate::features::{derive_batch, DerivedFeatures};
use crate::normalizer::{NumericNormalizer, ScalerStats};
use crate::record::IncidentRecord;

/// Fit-time encoder and scaler state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePipeline {
    encoder: FittedCategoricalEncoder,
    scaler: ScalerStats,
}

/// Matrix plus the non-fatal notices raised while building it
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub matrix: FeatureMatrix,
    pub derived: Vec<DerivedFeatures>,
    pub unknown_categories: Vec<UnknownCategoryWarning>,
}

impl FeaturePipeline {
    /// Fit the encoder and scaler on training records only
    #[instrument(skip(records), fields(rows = records.len()))]
    pub fn fit(records: &[IncidentRecord]) -> std::result::Result<Self, StageError> {
        let derived = derive_batch(records).stage(PipelineStage::Derive)?;
        let encoder = CategoricalEncoder::default()
            .fit(records)
            .stage(PipelineStage::Encode)?;
        let scaler = NumericNormalizer::default()
            .fit(&numeric_block(records, &derived))
            .stage(PipelineStage::Normalize)?;

        debug!(
            "Feature pipeline fitted: {} one-hot + {} numeric columns",
            encoder.width(),
            scaler.columns().len()
        );
        Ok(Self { encoder, scaler })
    }

    /// Rebuild from previously persisted parts
    pub fn from_parts(encoder: FittedCategoricalEncoder, scaler: ScalerStats) -> Self {
        Self { encoder, scaler }
    }

    pub fn encoder(&self) -> &FittedCategoricalEncoder {
        &self.encoder
    }

    pub fn scaler(&self) -> &ScalerStats {
        &self.scaler
    }

    /// Reference one-hot columns followed by the numeric columns
    pub fn feature_names(&self) -> Vec<String> {
        self.encoder
            .reference_columns()
            .iter()
            .chain(self.scaler.columns())
            .cloned()
            .collect()
    }

    pub fn n_features(&self) -> usize {
        self.encoder.width() + self.scaler.columns().len()
    }

    /// Derive, encode, scale and assemble using fit-time state only
    pub fn transform(
        &self,
        records: &[IncidentRecord],
    ) -> std::result::Result<TransformOutput, StageError> {
        let derived = derive_batch(records).stage(PipelineStage::Derive)?;
        let encoded = self.encoder.transform(records);
        let scaled = self
            .scaler
            .transform(&numeric_block(records, &derived))
            .stage(PipelineStage::Normalize)?;
        let matrix = assemble(
            encoded.rows,
            self.encoder.reference_columns(),
            scaled,
            self.scaler.columns(),
        )
        .stage(PipelineStage::Assemble)?;

        Ok(TransformOutput {
            matrix,
            derived,
            unknown_categories: encoded.warnings,
        })
    }
}

fn numeric_block(records: &[IncidentRecord], derived: &[DerivedFeatures]) -> Vec<Vec<Option<f64>>> {
    records
        .iter()
        .zip(derived)
        .map(|(record, features)| features.numeric_row(record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NUMERIC_COLUMNS;

    fn rec(time: &str, road: &str, speed: Option<f64>) -> IncidentRecord {
        IncidentRecord {
            date: "01/06/2022".into(),
            time: time.into(),
            day_of_week: Some("Monday".into()),
            road_type: Some(road.into()),
            weather_conditions: Some("1".into()),
            light_conditions: Some("1".into()),
            road_surface_conditions: Some("1".into()),
            junction_detail: Some("0".into()),
            speed_limit: speed,
            number_of_vehicles: Some(2.0),
            number_of_casualties: Some(1.0),
            risk_level: Some("1".into()),
        }
    }

    #[test]
    fn transform_width_matches_feature_names() {
        let train = vec![rec("08:00", "6", Some(30.0)), rec("23:00", "3", Some(70.0))];
        let pipeline = FeaturePipeline::fit(&train).unwrap();
        let out = pipeline.transform(&[rec("12:00", "9", None)]).unwrap();

        assert_eq!(out.matrix.feature_names, pipeline.feature_names());
        assert_eq!(out.matrix.rows[0].len(), pipeline.n_features());
        assert_eq!(out.unknown_categories.len(), 1);
        assert_eq!(
            &pipeline.feature_names()[pipeline.encoder().width()..],
            NUMERIC_COLUMNS
        );
    }

    #[test]
    fn transform_leaves_fitted_state_untouched() {
        let train = vec![rec("08:00", "6", Some(30.0)), rec("23:00", "3", Some(70.0))];
        let pipeline = FeaturePipeline::fit(&train).unwrap();
        let snapshot = pipeline.clone();

        let holdout = vec![rec("02:00", "1", Some(20.0)); 5];
        pipeline.transform(&holdout).unwrap();
        assert_eq!(pipeline, snapshot);
    }

    #[test]
    fn malformed_time_fails_in_derive_stage() {
        let train = vec![rec("08:00", "6", Some(30.0))];
        let pipeline = FeaturePipeline::fit(&train).unwrap();
        let err = pipeline.transform(&[rec("8 o'clock", "6", None)]).unwrap_err();
        assert_eq!(err.stage, PipelineStage::Derive);
    }
}
