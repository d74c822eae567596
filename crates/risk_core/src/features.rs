//! Temporal and risk feature derivation
//!
//! Pure per-record transform shared by training, holdout evaluation and
//! inference. Output depends only on the record itself, never on other rows or
//! on the label.

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, RiskError};
use crate::record::IncidentRecord;
use crate::risk_tables::{SURFACE_RISK, WEATHER_RISK};

const DATE_FORMAT: &str = "%d/%m/%Y";
const TIME_FORMAT: &str = "%H:%M";

/// Hours counted as rush hour
pub const RUSH_HOURS: [u32; 6] = [7, 8, 9, 16, 17, 18];

/// Speed limit at or above which a road counts as high speed
pub const HIGH_SPEED_LIMIT: f64 = 60.0;

/// Features derived from a single incident record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatures {
    pub hour: u32,
    pub month: u32,
    pub is_night: u8,
    pub is_rush_hour: u8,
    pub is_weekend: u8,
    /// Casualties per vehicle; `None` when either count is missing
    pub casualty_rate: Option<f64>,
    pub high_speed: u8,
    pub weather_risk: i32,
    pub surface_risk: i32,
    pub combined_risk: i32,
    pub night_speed_risk: i32,
    pub weather_speed_risk: i32,
}

/// Derive the feature set for one record; `row` is only used in error reports
pub fn derive_features(record: &IncidentRecord, row: usize) -> Result<DerivedFeatures> {
    let date = NaiveDate::parse_from_str(record.date.trim(), DATE_FORMAT)
        .map_err(|_| RiskError::parse("date", &record.date, row))?;
    let time = NaiveTime::parse_from_str(record.time.trim(), TIME_FORMAT)
        .map_err(|_| RiskError::parse("time", &record.time, row))?;

    let hour = time.hour();
    let is_night = u8::from(hour >= 22 || hour <= 5);
    let is_rush_hour = u8::from(RUSH_HOURS.contains(&hour));
    let is_weekend = u8::from(matches!(
        record.day_of_week.as_deref().map(str::trim),
        Some("Saturday") | Some("Sunday")
    ));

    let casualty_rate = casualty_rate(record.number_of_casualties, record.number_of_vehicles);
    let high_speed = u8::from(record.speed_limit.is_some_and(|s| s >= HIGH_SPEED_LIMIT));

    let weather_risk = WEATHER_RISK.weight(record.weather_conditions.as_deref());
    let surface_risk = SURFACE_RISK.weight(record.road_surface_conditions.as_deref());
    let combined_risk =
        weather_risk + surface_risk + 2 * i32::from(is_night) + 2 * i32::from(high_speed);

    Ok(DerivedFeatures {
        hour,
        month: date.month(),
        is_night,
        is_rush_hour,
        is_weekend,
        casualty_rate,
        high_speed,
        weather_risk,
        surface_risk,
        combined_risk,
        night_speed_risk: i32::from(is_night) * i32::from(high_speed),
        weather_speed_risk: weather_risk * i32::from(high_speed),
    })
}

/// Derive features for a batch; rows are numbered from 1 in errors
pub fn derive_batch(records: &[IncidentRecord]) -> Result<Vec<DerivedFeatures>> {
    records
        .iter()
        .enumerate()
        .map(|(idx, record)| derive_features(record, idx + 1))
        .collect()
}

/// Casualties per vehicle with the vehicle count floored at 1
pub fn casualty_rate(casualties: Option<f64>, vehicles: Option<f64>) -> Option<f64> {
    let casualties = casualties?;
    let vehicles = vehicles?;
    Some(casualties / vehicles.max(1.0))
}

impl DerivedFeatures {
    /// Numeric block row in `NUMERIC_COLUMNS` order; `None` marks a missing value
    pub fn numeric_row(&self, record: &IncidentRecord) -> Vec<Option<f64>> {
        vec![
            record.speed_limit,
            record.number_of_vehicles,
            record.number_of_casualties,
            self.casualty_rate,
            Some(f64::from(self.weather_risk)),
            Some(f64::from(self.surface_risk)),
            Some(f64::from(self.combined_risk)),
            Some(f64::from(self.night_speed_risk)),
            Some(f64::from(self.weather_speed_risk)),
            Some(f64::from(self.is_night)),
            Some(f64::from(self.is_rush_hour)),
            Some(f64::from(self.is_weekend)),
            Some(f64::from(self.high_speed)),
        ]
    }
}
