//! CSV dataset loading, stratified holdout splitting and binary labels
//!
//! The split happens on raw records, before any statistic is fitted, so that
//! the holdout partition can never influence imputation, scaling or balancing.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use tracing::{debug, info};

use crate::deterministic::LcgRng;
use crate::errors::{Result, RiskError};
use crate::record::{is_missing, IncidentRecord, LABEL_COLUMN, REQUIRED_COLUMNS};

/// Load a labeled incident table; every row must carry `risk_level`
pub fn load_incidents_csv<P: AsRef<Path>>(path: P) -> Result<Vec<IncidentRecord>> {
    let file = std::fs::File::open(path.as_ref())?;
    let records = read_incidents(file, true)?;
    info!(
        "Loaded {} labeled incidents from {}",
        records.len(),
        path.as_ref().display()
    );
    Ok(records)
}

/// Load an inference batch; `risk_level` is optional and ignored when present
pub fn load_incidents_csv_unlabeled<P: AsRef<Path>>(path: P) -> Result<Vec<IncidentRecord>> {
    let file = std::fs::File::open(path.as_ref())?;
    let mut records = read_incidents(file, false)?;
    for record in &mut records {
        record.risk_level = None;
    }
    info!(
        "Loaded {} incidents from {}",
        records.len(),
        path.as_ref().display()
    );
    Ok(records)
}

/// Parse incident rows from any CSV reader
pub fn read_incidents<R: Read>(reader: R, require_label: bool) -> Result<Vec<IncidentRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h == name);

    let mut columns = BTreeMap::new();
    for name in REQUIRED_COLUMNS {
        let idx = position(name).ok_or_else(|| RiskError::MissingColumn(name.to_string()))?;
        columns.insert(name, idx);
    }
    let label_idx = position(LABEL_COLUMN);
    if require_label && label_idx.is_none() {
        return Err(RiskError::MissingColumn(LABEL_COLUMN.to_string()));
    }

    let mut records = Vec::new();
    for (row_idx, row) in csv_reader.records().enumerate() {
        let row = row?;
        let row_number = row_idx + 1;
        let text = |name: &str| -> Option<String> {
            columns
                .get(name)
                .and_then(|&idx| row.get(idx))
                .filter(|v| !is_missing(v))
                .map(str::to_string)
        };
        let number = |name: &str| -> Result<Option<f64>> {
            match text(name) {
                None => Ok(None),
                Some(raw) => raw
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(Some)
                    .ok_or_else(|| RiskError::parse(name, &raw, row_number)),
            }
        };

        let record = IncidentRecord {
            date: text("date").unwrap_or_default(),
            time: text("time").unwrap_or_default(),
            day_of_week: text("day_of_week"),
            road_type: text("road_type"),
            weather_conditions: text("weather_conditions"),
            light_conditions: text("light_conditions"),
            road_surface_conditions: text("road_surface_conditions"),
            junction_detail: text("junction_detail"),
            speed_limit: number("speed_limit")?,
            number_of_vehicles: number("number_of_vehicles")?,
            number_of_casualties: number("number_of_casualties")?,
            risk_level: label_idx
                .and_then(|idx| row.get(idx))
                .filter(|v| !is_missing(v))
                .map(str::to_string),
        };

        if require_label && record.risk_level.is_none() {
            return Err(RiskError::MissingLabel { row: row_number });
        }
        records.push(record);
    }

    if records.is_empty() {
        return Err(RiskError::Dataset("Dataset is empty".to_string()));
    }

    Ok(records)
}

/// Stratified split into (training, holdout) partitions
///
/// Each label group is shuffled with the seeded LCG and `round(fraction * len)`
/// of its rows go to the holdout. Relative row order is preserved inside both
/// partitions.
pub fn holdout_split(
    records: &[IncidentRecord],
    fraction: f64,
    seed: u64,
) -> Result<(Vec<IncidentRecord>, Vec<IncidentRecord>)> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(RiskError::InvalidParameters(format!(
            "holdout fraction must be in (0, 1), got {fraction}"
        )));
    }

    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, record) in records.iter().enumerate() {
        let label = record
            .risk_level
            .as_deref()
            .ok_or(RiskError::MissingLabel { row: idx + 1 })?;
        groups.entry(label).or_default().push(idx);
    }

    let mut rng = LcgRng::new(seed);
    let mut in_holdout = vec![false; records.len()];
    for (label, mut members) in groups {
        rng.shuffle(&mut members);
        let take = (fraction * members.len() as f64).round() as usize;
        debug!("Stratum '{}': {} rows, {} to holdout", label, members.len(), take);
        for &idx in members.iter().take(take) {
            in_holdout[idx] = true;
        }
    }

    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for (record, held) in records.iter().zip(in_holdout) {
        if held {
            holdout.push(record.clone());
        } else {
            train.push(record.clone());
        }
    }

    if train.is_empty() || holdout.is_empty() {
        return Err(RiskError::Dataset(format!(
            "split produced {} training and {} holdout rows",
            train.len(),
            holdout.len()
        )));
    }

    info!(
        "Split {} records into {} training and {} holdout",
        records.len(),
        train.len(),
        holdout.len()
    );
    Ok((train, holdout))
}

/// Pick the high-risk label: the configured one, else the smallest label in sorted order
pub fn resolve_positive_label(
    records: &[IncidentRecord],
    configured: Option<&str>,
) -> Result<String> {
    if let Some(label) = configured {
        return Ok(label.to_string());
    }
    let labels: BTreeSet<&str> = records
        .iter()
        .filter_map(|r| r.risk_level.as_deref())
        .collect();
    labels
        .into_iter()
        .next()
        .map(str::to_string)
        .ok_or_else(|| RiskError::Dataset("no risk_level labels present".to_string()))
}

/// Binary reduction of `risk_level`: 1 for the high-risk label, 0 otherwise
pub fn binary_labels(records: &[IncidentRecord], positive_label: &str) -> Result<Vec<u8>> {
    records
        .iter()
        .enumerate()
        .map(|(idx, record)| match record.risk_level.as_deref() {
            Some(label) => Ok(u8::from(label == positive_label)),
            None => Err(RiskError::MissingLabel { row: idx + 1 }),
        })
        .collect()
}

/// Count of (negative, positive) labels
pub fn class_counts(labels: &[u8]) -> (usize, usize) {
    let positives = labels.iter().filter(|&&l| l == 1).count();
    (labels.len() - positives, positives)
}
