//! Numeric imputation and standardization
//!
//! Statistics are learned once from the training block and then reused as-is
//! for holdout and inference batches. Transform never looks at the batch's own
//! distribution.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, RiskError};
use crate::record::NUMERIC_COLUMNS;

/// Unfitted normalizer over a list of numeric columns
#[derive(Debug, Clone)]
pub struct NumericNormalizer {
    columns: Vec<String>,
}

impl Default for NumericNormalizer {
    fn default() -> Self {
        Self::new(NUMERIC_COLUMNS.iter().map(|c| c.to_string()).collect())
    }
}

impl NumericNormalizer {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Compute per-column median, mean and population variance from training rows
    ///
    /// Mean and variance are taken after median imputation, so they describe
    /// exactly the values the scaler will see.
    pub fn fit(&self, block: &[Vec<Option<f64>>]) -> Result<ScalerStats> {
        if block.is_empty() {
            return Err(RiskError::Dataset(
                "cannot fit numeric normalizer on an empty partition".to_string(),
            ));
        }
        check_width(block, self.columns.len())?;

        let width = self.columns.len();
        let mut medians = Vec::with_capacity(width);
        let mut means = Vec::with_capacity(width);
        let mut variances = Vec::with_capacity(width);

        for col in 0..width {
            let observed: Vec<f64> = block.iter().filter_map(|row| present(row[col])).collect();
            let median = median(observed).unwrap_or(0.0);

            let filled: Vec<f64> = block
                .iter()
                .map(|row| present(row[col]).unwrap_or(median))
                .collect();
            let n = filled.len() as f64;
            let mean = filled.iter().sum::<f64>() / n;
            let variance = filled.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;

            medians.push(median);
            means.push(mean);
            variances.push(variance);
        }

        debug!("Fitted numeric normalizer on {} rows", block.len());
        Ok(ScalerStats {
            columns: self.columns.clone(),
            medians,
            means,
            variances,
        })
    }
}

/// Scaler statistics frozen at fit time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerStats {
    columns: Vec<String>,
    medians: Vec<f64>,
    means: Vec<f64>,
    variances: Vec<f64>,
}

impl ScalerStats {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn medians(&self) -> &[f64] {
        &self.medians
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn variances(&self) -> &[f64] {
        &self.variances
    }

    /// Standard deviation used as divisor; constant columns scale by 1
    pub fn scale(&self, col: usize) -> f64 {
        let std = self.variances[col].sqrt();
        if std > 0.0 && std.is_finite() {
            std
        } else {
            1.0
        }
    }

    /// Fill missing values with fit-time medians and standardize
    pub fn transform(&self, block: &[Vec<Option<f64>>]) -> Result<Vec<Vec<f64>>> {
        check_width(block, self.columns.len())?;
        let scales: Vec<f64> = (0..self.columns.len()).map(|c| self.scale(c)).collect();

        Ok(block
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(col, value)| {
                        let v = present(*value).unwrap_or(self.medians[col]);
                        (v - self.means[col]) / scales[col]
                    })
                    .collect()
            })
            .collect())
    }
}

fn present(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn check_width(block: &[Vec<Option<f64>>], width: usize) -> Result<()> {
    match block.iter().position(|row| row.len() != width) {
        Some(idx) => Err(RiskError::Dataset(format!(
            "numeric row {} has {} values, expected {}",
            idx + 1,
            block[idx].len(),
            width
        ))),
        None => Ok(()),
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_column() -> NumericNormalizer {
        NumericNormalizer::new(vec!["a".into(), "b".into()])
    }

    #[test]
    fn fit_computes_median_mean_variance() {
        let block = vec![
            vec![Some(1.0), Some(5.0)],
            vec![Some(3.0), Some(5.0)],
            vec![None, Some(5.0)],
        ];
        let stats = two_column().fit(&block).unwrap();
        assert_eq!(stats.medians(), &[2.0, 5.0]);
        assert_eq!(stats.means(), &[2.0, 5.0]);
        assert!((stats.variances()[0] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.variances()[1], 0.0);
        assert_eq!(stats.scale(1), 1.0);
    }

    #[test]
    fn transform_uses_fit_time_median() {
        let train = vec![vec![Some(0.0), Some(1.0)], vec![Some(4.0), Some(3.0)]];
        let stats = two_column().fit(&train).unwrap();

        // The batch's own median would be 100; the fit-time median is 2
        let batch = vec![vec![None, Some(2.0)], vec![Some(100.0), Some(2.0)]];
        let out = stats.transform(&batch).unwrap();
        assert_eq!(out[0][0], 0.0);
        assert_eq!(out[1][0], 49.0);
        assert_eq!(out[0][1], 0.0);
    }

    #[test]
    fn transform_does_not_change_stats() {
        let train = vec![vec![Some(1.0), Some(2.0)], vec![Some(3.0), Some(4.0)]];
        let stats = two_column().fit(&train).unwrap();
        let before = stats.clone();
        let _ = stats.transform(&[vec![Some(1000.0), None]]).unwrap();
        assert_eq!(stats, before);
    }

    #[test]
    fn all_missing_column_gets_zero_median() {
        let block = vec![vec![None, Some(1.0)], vec![None, Some(2.0)]];
        let stats = two_column().fit(&block).unwrap();
        assert_eq!(stats.medians()[0], 0.0);
        assert_eq!(stats.transform(&[vec![None, None]]).unwrap()[0][0], 0.0);
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let stats = two_column()
            .fit(&[vec![Some(1.0), Some(2.0)]])
            .unwrap();
        assert!(stats.transform(&[vec![Some(1.0)]]).is_err());
        assert!(two_column().fit(&[]).is_err());
    }
}
