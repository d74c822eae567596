//! Feature matrix assembly
//!
//! Concatenates the categorical one-hot block and the scaled numeric block,
//! always in that order, and carries the matching feature names.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RiskError};

/// Dense row-major feature matrix with named columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub rows: Vec<Vec<f64>>,
    pub feature_names: Vec<String>,
}

impl FeatureMatrix {
    pub fn new(rows: Vec<Vec<f64>>, feature_names: Vec<String>) -> Self {
        Self {
            rows,
            feature_names,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Horizontally concatenate `[categorical | numeric]`
pub fn assemble(
    categorical: Vec<Vec<f64>>,
    categorical_names: &[String],
    numeric: Vec<Vec<f64>>,
    numeric_names: &[String],
) -> Result<FeatureMatrix> {
    if categorical.len() != numeric.len() {
        return Err(RiskError::ShapeMismatch {
            left: categorical.len(),
            right: numeric.len(),
        });
    }

    let width = categorical_names.len() + numeric_names.len();
    let rows = categorical
        .into_iter()
        .zip(numeric)
        .map(|(mut row, num)| {
            row.reserve_exact(num.len());
            row.extend(num);
            row
        })
        .collect::<Vec<_>>();

    if let Some(bad) = rows.iter().position(|r| r.len() != width) {
        return Err(RiskError::Dataset(format!(
            "assembled row {} has {} values, expected {}",
            bad + 1,
            rows[bad].len(),
            width
        )));
    }

    let feature_names = categorical_names
        .iter()
        .chain(numeric_names)
        .cloned()
        .collect();

    Ok(FeatureMatrix::new(rows, feature_names))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn concatenates_in_fixed_order() {
        let matrix = assemble(
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            &names(&["road_type_1", "road_type_2"]),
            vec![vec![0.5], vec![-0.5]],
            &names(&["speed_limit"]),
        )
        .unwrap();

        assert_eq!(matrix.rows[0], vec![1.0, 0.0, 0.5]);
        assert_eq!(matrix.rows[1], vec![0.0, 1.0, -0.5]);
        assert_eq!(
            matrix.feature_names,
            names(&["road_type_1", "road_type_2", "speed_limit"])
        );
        assert_eq!(matrix.n_features(), 3);
    }

    #[test]
    fn row_count_mismatch_fails() {
        let err = assemble(
            vec![vec![1.0]],
            &names(&["a"]),
            vec![vec![0.5], vec![0.1]],
            &names(&["b"]),
        )
        .unwrap_err();
        assert!(matches!(err, RiskError::ShapeMismatch { left: 1, right: 2 }));
    }

    #[test]
    fn empty_blocks_assemble() {
        let matrix = assemble(vec![], &names(&["a"]), vec![], &names(&["b"])).unwrap();
        assert!(matrix.is_empty());
        assert_eq!(matrix.n_features(), 2);
    }
}
