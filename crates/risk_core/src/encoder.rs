//! Categorical one-hot encoding with a frozen reference column set
//!
//! `fit` imputes missing values with the training mode and one-hot expands the
//! training partition; the resulting column names become the reference set.
//! `transform` expands any later batch the same way and re-aligns it to that
//! reference: absent reference columns become zeros, columns for categories
//! never seen in training are dropped (reported as warnings), order follows
//! the reference exactly.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{Result, RiskError};
use crate::record::{IncidentRecord, CATEGORICAL_COLUMNS};

/// Non-fatal notice that a category unseen at fit time was zero-filled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownCategoryWarning {
    pub column: String,
    pub value: String,
    /// 1-based row within the transformed batch
    pub row: usize,
}

/// Fit-time state for one categorical column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub column: String,
    /// Most frequent training value, used to fill missing cells
    pub mode: Option<String>,
    /// Training categories in output order
    pub categories: Vec<String>,
}

/// Unfitted encoder over a list of categorical columns
#[derive(Debug, Clone)]
pub struct CategoricalEncoder {
    columns: Vec<String>,
}

impl Default for CategoricalEncoder {
    fn default() -> Self {
        Self::new(CATEGORICAL_COLUMNS.iter().map(|c| c.to_string()).collect())
    }
}

impl CategoricalEncoder {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Learn modes and the reference column set from training records
    pub fn fit(&self, records: &[IncidentRecord]) -> Result<FittedCategoricalEncoder> {
        if records.is_empty() {
            return Err(RiskError::Dataset(
                "cannot fit categorical encoder on an empty partition".to_string(),
            ));
        }

        let modes: Vec<(String, Option<String>)> = self
            .columns
            .iter()
            .map(|column| (column.clone(), column_mode(records, column)))
            .collect();

        let dummies = one_hot(records, &modes);
        let mut groups: Vec<CategoryGroup> = modes
            .into_iter()
            .map(|(column, mode)| CategoryGroup {
                column,
                mode,
                categories: Vec::new(),
            })
            .collect();
        for key in &dummies.keys {
            groups[key.group].categories.push(key.value.clone());
        }

        let reference_columns = dummies.keys.iter().map(ColumnKey::name).collect();
        debug!(
            "Fitted categorical encoder: {} columns -> {} one-hot columns",
            groups.len(),
            dummies.keys.len()
        );

        Ok(FittedCategoricalEncoder {
            groups,
            reference_columns,
        })
    }
}

/// Encoder state frozen at fit time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedCategoricalEncoder {
    groups: Vec<CategoryGroup>,
    reference_columns: Vec<String>,
}

/// Output of [`FittedCategoricalEncoder::transform`]
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBlock {
    pub rows: Vec<Vec<f64>>,
    pub warnings: Vec<UnknownCategoryWarning>,
}

impl FittedCategoricalEncoder {
    /// Ordered one-hot column names established from training
    pub fn reference_columns(&self) -> &[String] {
        &self.reference_columns
    }

    /// Source categorical column names
    pub fn columns(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.column.clone()).collect()
    }

    pub fn groups(&self) -> &[CategoryGroup] {
        &self.groups
    }

    pub fn width(&self) -> usize {
        self.reference_columns.len()
    }

    /// One-hot encode a batch and align it to the reference column set
    pub fn transform(&self, records: &[IncidentRecord]) -> EncodedBlock {
        let modes: Vec<(String, Option<String>)> = self
            .groups
            .iter()
            .map(|g| (g.column.clone(), g.mode.clone()))
            .collect();
        let dummies = one_hot(records, &modes);
        let (rows, warnings) = align_to_reference(&dummies, &self.reference_columns);

        if !warnings.is_empty() {
            let mut seen: BTreeMap<(&str, &str), usize> = BTreeMap::new();
            for w in &warnings {
                *seen.entry((w.column.as_str(), w.value.as_str())).or_default() += 1;
            }
            for ((column, value), count) in seen {
                warn!(
                    "Unknown category '{}' in column '{}' ({} rows), zero-filled",
                    value, column, count
                );
            }
        }

        EncodedBlock { rows, warnings }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnKey {
    group: usize,
    column: String,
    value: String,
}

impl ColumnKey {
    fn name(&self) -> String {
        format!("{}_{}", self.column, self.value)
    }
}

/// Batch-local one-hot expansion (column set depends only on this batch)
struct OneHotFrame {
    keys: Vec<ColumnKey>,
    rows: Vec<Vec<f64>>,
}

fn one_hot(records: &[IncidentRecord], modes: &[(String, Option<String>)]) -> OneHotFrame {
    let filled: Vec<Vec<Option<&str>>> = records
        .iter()
        .map(|record| {
            modes
                .iter()
                .map(|(column, mode)| {
                    record
                        .categorical(column)
                        .map(str::trim)
                        .or(mode.as_deref())
                })
                .collect()
        })
        .collect();

    let mut keys = Vec::new();
    for (group, (column, _)) in modes.iter().enumerate() {
        let mut values: Vec<&str> = filled.iter().filter_map(|row| row[group]).collect();
        values.sort_by(|a, b| category_order(a, b));
        values.dedup();
        keys.extend(values.into_iter().map(|value| ColumnKey {
            group,
            column: column.clone(),
            value: value.to_string(),
        }));
    }

    let index: HashMap<(usize, &str), usize> = keys
        .iter()
        .enumerate()
        .map(|(idx, key)| ((key.group, key.value.as_str()), idx))
        .collect();

    let rows = filled
        .iter()
        .map(|row| {
            let mut out = vec![0.0; keys.len()];
            for (group, value) in row.iter().enumerate() {
                if let Some(&idx) = value.and_then(|v| index.get(&(group, v))) {
                    out[idx] = 1.0;
                }
            }
            out
        })
        .collect();

    OneHotFrame { keys, rows }
}

/// Re-align a batch-local frame to the reference column set
fn align_to_reference(
    frame: &OneHotFrame,
    reference: &[String],
) -> (Vec<Vec<f64>>, Vec<UnknownCategoryWarning>) {
    let names: Vec<String> = frame.keys.iter().map(ColumnKey::name).collect();
    let positions: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();
    let source: Vec<Option<usize>> = reference
        .iter()
        .map(|name| positions.get(name.as_str()).copied())
        .collect();
    let dropped: Vec<usize> = {
        let kept: HashSet<&str> = reference.iter().map(String::as_str).collect();
        (0..names.len())
            .filter(|&idx| !kept.contains(names[idx].as_str()))
            .collect()
    };

    let mut warnings = Vec::new();
    let rows = frame
        .rows
        .iter()
        .enumerate()
        .map(|(row_idx, row)| {
            for &idx in &dropped {
                if row[idx] != 0.0 {
                    warnings.push(UnknownCategoryWarning {
                        column: frame.keys[idx].column.clone(),
                        value: frame.keys[idx].value.clone(),
                        row: row_idx + 1,
                    });
                }
            }
            source
                .iter()
                .map(|pos| pos.map_or(0.0, |p| row[p]))
                .collect()
        })
        .collect();

    (rows, warnings)
}

/// Most frequent value; ties go to the value encountered first
fn column_mode(records: &[IncidentRecord], column: &str) -> Option<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, value) in records
        .iter()
        .filter_map(|r| r.categorical(column).map(str::trim))
        .enumerate()
    {
        counts.entry(value).or_insert((0, position)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (ca, fa)), (_, (cb, fb))| ca.cmp(cb).then(fb.cmp(fa)))
        .map(|(value, _)| value.to_string())
}

/// Finite numeric codes sort numerically, everything else lexicographically after them
fn category_order(a: &str, b: &str) -> Ordering {
    match (numeric_code(a), numeric_code(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y).then(a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn numeric_code(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}
