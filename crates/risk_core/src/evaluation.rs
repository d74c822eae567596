//! Holdout evaluation
//!
//! The holdout partition goes through the bundle's stored preprocessing
//! exactly as inference would. Nothing is refitted and nothing is balanced.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, instrument, warn};

use crate::assembler::FeatureMatrix;
use crate::bundle::ModelBundle;
use crate::dataset::binary_labels;
use crate::errors::{PipelineStage, StageContext, StageError};
use crate::gbdt::{BinaryClassifier, DECISION_THRESHOLD};
use crate::record::IncidentRecord;

/// Display names of the binary classes, index = label
pub const CLASS_NAMES: [&str; 2] = ["Other", "High Risk"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// 2x2 confusion matrix, rows = actual class, columns = predicted class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
    /// Each row divided by its total (zero rows stay zero)
    pub normalized: [[f64; 2]; 2],
}

impl ConfusionMatrix {
    pub fn from_labels(actual: &[u8], predicted: &[u8]) -> Self {
        let mut counts = [[0usize; 2]; 2];
        for (&a, &p) in actual.iter().zip(predicted) {
            counts[usize::from(a.min(1))][usize::from(p.min(1))] += 1;
        }

        let mut normalized = [[0.0; 2]; 2];
        for (row, out) in counts.iter().zip(normalized.iter_mut()) {
            let total = row[0] + row[1];
            if total > 0 {
                out[0] = row[0] as f64 / total as f64;
                out[1] = row[1] as f64 / total as f64;
            }
        }

        Self { counts, normalized }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Pearson correlation of one feature column with the high-risk indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCorrelation {
    pub feature: String,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRisk {
    pub hour: u32,
    pub incidents: usize,
    pub high_risk_rate: f64,
}

/// Structured summary of a holdout run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub rows: usize,
    pub positive_label: String,
    pub accuracy: f64,
    pub per_class: Vec<ClassMetrics>,
    /// `None` when the partition holds a single class
    pub roc_auc: Option<f64>,
    pub confusion: ConfusionMatrix,
    /// Fraction of true high-risk incidents the model flags
    pub high_risk_recall: f64,
    pub top_features: Vec<FeatureImportance>,
    pub hourly_high_risk_rate: Vec<HourlyRisk>,
    pub unknown_categories: usize,
}

/// Evaluates a bundle against a labeled partition
#[derive(Debug, Clone)]
pub struct HoldoutEvaluator {
    top_n: usize,
}

impl HoldoutEvaluator {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    #[instrument(skip(self, bundle, holdout), fields(rows = holdout.len()))]
    pub fn evaluate(
        &self,
        bundle: &ModelBundle,
        holdout: &[IncidentRecord],
    ) -> Result<EvaluationReport, StageError> {
        let actual = binary_labels(holdout, bundle.positive_label()).stage(PipelineStage::Evaluate)?;
        let scored = bundle.score(holdout, PipelineStage::Evaluate)?;
        let predicted: Vec<u8> = scored
            .probabilities
            .iter()
            .map(|&p| u8::from(p > DECISION_THRESHOLD))
            .collect();

        let confusion = ConfusionMatrix::from_labels(&actual, &predicted);
        let correct = confusion.counts[0][0] + confusion.counts[1][1];
        let accuracy = ratio(correct, confusion.total());
        let roc_auc = roc_auc(&scored.probabilities, &actual);
        if roc_auc.is_none() {
            warn!("Holdout contains a single class; ROC-AUC is undefined");
        }

        let hours: Vec<u32> = scored.derived.iter().map(|d| d.hour).collect();
        let report = EvaluationReport {
            rows: holdout.len(),
            positive_label: bundle.positive_label().to_string(),
            accuracy,
            per_class: class_metrics(&confusion),
            roc_auc,
            high_risk_recall: confusion.normalized[1][1],
            confusion,
            top_features: top_importances(
                bundle.feature_names(),
                bundle.classifier().feature_importances(),
                self.top_n,
            ),
            hourly_high_risk_rate: hourly_high_risk_rate(&hours, &actual),
            unknown_categories: scored.unknown_categories.len(),
        };

        info!(
            "Holdout accuracy {:.4}, high-risk recall {:.4}, ROC-AUC {}",
            report.accuracy,
            report.high_risk_recall,
            report
                .roc_auc
                .map_or_else(|| "n/a".to_string(), |auc| format!("{auc:.4}"))
        );
        Ok(report)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn class_metrics(confusion: &ConfusionMatrix) -> Vec<ClassMetrics> {
    let c = &confusion.counts;
    (0..2)
        .map(|k| {
            let other = 1 - k;
            let tp = c[k][k];
            let precision = ratio(tp, tp + c[other][k]);
            let recall = ratio(tp, tp + c[k][other]);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassMetrics {
                class: CLASS_NAMES[k].to_string(),
                precision,
                recall,
                f1,
                support: c[k][0] + c[k][1],
            }
        })
        .collect()
}

/// ROC-AUC as the normalized Mann-Whitney U statistic, ties get average ranks
pub fn roc_auc(scores: &[f64], labels: &[u8]) -> Option<f64> {
    let mut pairs: Vec<(f64, u8)> = scores.iter().copied().zip(labels.iter().copied()).collect();
    let n_pos = pairs.iter().filter(|(_, y)| *y == 1).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < pairs.len() {
        let mut j = i;
        while j < pairs.len() && pairs[j].0 == pairs[i].0 {
            j += 1;
        }
        // 1-based ranks i+1..=j share their mean
        let avg_rank = (i + j + 1) as f64 / 2.0;
        let tied_pos = pairs[i..j].iter().filter(|(_, y)| *y == 1).count();
        rank_sum_pos += avg_rank * tied_pos as f64;
        i = j;
    }

    let n_pos = n_pos as f64;
    let u = rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * n_neg as f64))
}

/// Highest importances first; ties keep feature order
pub fn top_importances(names: &[String], importances: &[f64], n: usize) -> Vec<FeatureImportance> {
    let mut ranked: Vec<(usize, f64)> = importances.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(n)
        .filter_map(|(idx, importance)| {
            names.get(idx).map(|name| FeatureImportance {
                feature: name.clone(),
                importance,
            })
        })
        .collect()
}

/// Features most positively correlated with the high-risk label
///
/// Constant columns have no defined correlation and are skipped, as is every
/// column when the labels themselves are constant.
pub fn risk_correlations(matrix: &FeatureMatrix, labels: &[u8], n: usize) -> Vec<RiskCorrelation> {
    let rows = matrix.n_rows().min(labels.len());
    if rows < 2 {
        return Vec::new();
    }
    let y: Vec<f64> = labels[..rows].iter().map(|&l| f64::from(l)).collect();
    let y_mean = y.iter().sum::<f64>() / rows as f64;
    let y_ss: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    if y_ss <= 0.0 {
        return Vec::new();
    }

    let mut out: Vec<(usize, f64)> = (0..matrix.n_features())
        .filter_map(|col| {
            let x_mean = matrix.rows[..rows].iter().map(|r| r[col]).sum::<f64>() / rows as f64;
            let (mut cov, mut x_ss) = (0.0, 0.0);
            for (row, &yv) in matrix.rows[..rows].iter().zip(&y) {
                let dx = row[col] - x_mean;
                cov += dx * (yv - y_mean);
                x_ss += dx * dx;
            }
            (x_ss > 0.0).then(|| (col, cov / (x_ss * y_ss).sqrt()))
        })
        .filter(|(_, r)| r.is_finite())
        .collect();

    out.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    out.into_iter()
        .take(n)
        .filter_map(|(col, correlation)| {
            matrix.feature_names.get(col).map(|name| RiskCorrelation {
                feature: name.clone(),
                correlation,
            })
        })
        .collect()
}

/// Share of high-risk incidents per hour of day, for hours present in the data
pub fn hourly_high_risk_rate(hours: &[u32], labels: &[u8]) -> Vec<HourlyRisk> {
    let mut by_hour: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    for (&hour, &label) in hours.iter().zip(labels) {
        let entry = by_hour.entry(hour).or_default();
        entry.0 += 1;
        entry.1 += usize::from(label == 1);
    }
    by_hour
        .into_iter()
        .map(|(hour, (incidents, high))| HourlyRisk {
            hour,
            incidents,
            high_risk_rate: ratio(high, incidents),
        })
        .collect()
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Holdout rows:      {}", self.rows)?;
        writeln!(f, "Positive label:    {}", self.positive_label)?;
        writeln!(f, "Accuracy:          {:.4}", self.accuracy)?;
        match self.roc_auc {
            Some(auc) => writeln!(f, "ROC-AUC:           {auc:.4}")?,
            None => writeln!(f, "ROC-AUC:           n/a (single class)")?,
        }
        writeln!(f, "High-risk recall:  {:.4}", self.high_risk_recall)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:<10} {:>9} {:>9} {:>9} {:>8}",
            "class", "precision", "recall", "f1", "support"
        )?;
        for m in &self.per_class {
            writeln!(
                f,
                "{:<10} {:>9.4} {:>9.4} {:>9.4} {:>8}",
                m.class, m.precision, m.recall, m.f1, m.support
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Confusion (row-normalized, actual x predicted):")?;
        for (name, row) in CLASS_NAMES.iter().zip(&self.confusion.normalized) {
            writeln!(f, "  {:<10} {:.4} {:.4}", name, row[0], row[1])?;
        }
        if !self.top_features.is_empty() {
            writeln!(f)?;
            writeln!(f, "Top features:")?;
            for feat in &self.top_features {
                writeln!(f, "  {:<40} {:.4}", feat.feature, feat.importance)?;
            }
        }
        if self.unknown_categories > 0 {
            writeln!(f)?;
            writeln!(f, "Unknown categories encountered: {}", self.unknown_categories)?;
        }
        Ok(())
    }
}
