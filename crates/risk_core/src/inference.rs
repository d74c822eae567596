//! Risk assessment for unlabeled incidents
//!
//! A [`RiskPredictor`] holds a shared, read-only bundle snapshot. Each call
//! scores a batch through the stored preprocessing; nothing about the batch
//! feeds back into the snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::bundle::ModelBundle;
use crate::encoder::UnknownCategoryWarning;
use crate::errors::{PipelineStage, StageContext, StageError};
use crate::record::IncidentRecord;

/// Probability above which an incident is high risk
pub const HIGH_RISK_THRESHOLD: f64 = 0.7;
/// Probability above which an incident is medium risk
pub const MEDIUM_RISK_THRESHOLD: f64 = 0.3;
/// Speed limits above this value trigger a speed recommendation
const SPEED_REVIEW_LIMIT: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTier {
    #[serde(rename = "High Risk")]
    High,
    #[serde(rename = "Medium Risk")]
    Medium,
    #[serde(rename = "Low Risk")]
    Low,
}

impl RiskTier {
    pub fn from_probability(p: f64) -> Self {
        if p > HIGH_RISK_THRESHOLD {
            RiskTier::High
        } else if p > MEDIUM_RISK_THRESHOLD {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskTier::High => "High Risk",
            RiskTier::Medium => "Medium Risk",
            RiskTier::Low => "Low Risk",
        })
    }
}

/// Assessment of a single record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 1-based position in the input batch
    pub row: usize,
    pub probability: f64,
    pub tier: RiskTier,
    pub interventions: Vec<String>,
    pub warnings: Vec<UnknownCategoryWarning>,
}

/// Scores incidents against a loaded bundle
#[derive(Debug, Clone)]
pub struct RiskPredictor {
    bundle: Arc<ModelBundle>,
}

impl RiskPredictor {
    pub fn new(bundle: ModelBundle) -> Self {
        Self {
            bundle: Arc::new(bundle),
        }
    }

    /// Load and verify a bundle from disk
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, StageError> {
        let bundle = ModelBundle::load(path).stage(PipelineStage::Bundle)?;
        Ok(Self::new(bundle))
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    #[instrument(skip(self, records), fields(rows = records.len()))]
    pub fn assess(&self, records: &[IncidentRecord]) -> Result<Vec<RiskAssessment>, StageError> {
        let scored = self.bundle.score(records, PipelineStage::Predict)?;

        let mut warnings: Vec<Vec<UnknownCategoryWarning>> = vec![Vec::new(); records.len()];
        for warning in scored.unknown_categories {
            if let Some(slot) = warning.row.checked_sub(1).and_then(|i| warnings.get_mut(i)) {
                slot.push(warning);
            }
        }

        let assessments: Vec<RiskAssessment> = records
            .iter()
            .zip(scored.probabilities)
            .zip(warnings)
            .enumerate()
            .map(|(idx, ((record, probability), warnings))| {
                let tier = RiskTier::from_probability(probability);
                let interventions = if tier == RiskTier::High {
                    recommend_interventions(record)
                } else {
                    Vec::new()
                };
                RiskAssessment {
                    row: idx + 1,
                    probability,
                    tier,
                    interventions,
                    warnings,
                }
            })
            .collect();

        debug!(
            "Assessed {} records, {} high risk",
            assessments.len(),
            assessments.iter().filter(|a| a.tier == RiskTier::High).count()
        );
        Ok(assessments)
    }
}

/// Suggested countermeasures for a high-risk incident
pub fn recommend_interventions(record: &IncidentRecord) -> Vec<String> {
    let mut out = Vec::new();

    if record.speed_limit.is_some_and(|s| s > SPEED_REVIEW_LIMIT) {
        out.push("Consider reducing speed limit".to_string());
    }
    if record
        .light_conditions
        .as_deref()
        .is_some_and(|l| l.trim().to_ascii_lowercase().starts_with("darkness"))
    {
        out.push("Improve street lighting".to_string());
    }
    if record
        .junction_detail
        .as_deref()
        .map(str::trim)
        .is_some_and(|j| !j.is_empty() && !j.eq_ignore_ascii_case("not at junction"))
    {
        out.push("Install traffic monitoring cameras".to_string());
    }
    out.push("Increase police patrols in the area".to_string());
    out
}
