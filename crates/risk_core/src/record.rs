//! Incident record schema
//!
//! One [`IncidentRecord`] per accident report. Date and time stay as raw text
//! here; they are parsed by the feature deriver so that malformed values are
//! reported by the stage that depends on them.

use serde::{Deserialize, Serialize};

/// Categorical columns expanded into the one-hot block, in output order
pub const CATEGORICAL_COLUMNS: [&str; 5] = [
    "road_type",
    "weather_conditions",
    "light_conditions",
    "road_surface_conditions",
    "junction_detail",
];

/// Numeric columns of the scaled block, in output order
pub const NUMERIC_COLUMNS: [&str; 13] = [
    "speed_limit",
    "number_of_vehicles",
    "number_of_casualties",
    "casualty_rate",
    "weather_risk",
    "surface_risk",
    "combined_risk",
    "night_speed_risk",
    "weather_speed_risk",
    "is_night",
    "is_rush_hour",
    "is_weekend",
    "high_speed",
];

/// Columns every input table must carry (the label is optional for inference)
pub const REQUIRED_COLUMNS: [&str; 11] = [
    "date",
    "time",
    "day_of_week",
    "road_type",
    "weather_conditions",
    "light_conditions",
    "road_surface_conditions",
    "junction_detail",
    "speed_limit",
    "number_of_vehicles",
    "number_of_casualties",
];

/// Target column
pub const LABEL_COLUMN: &str = "risk_level";

/// Raw accident report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    /// Calendar date, `dd/mm/yyyy`
    pub date: String,
    /// Time of day, `HH:MM`
    pub time: String,
    pub day_of_week: Option<String>,
    pub road_type: Option<String>,
    pub weather_conditions: Option<String>,
    pub light_conditions: Option<String>,
    pub road_surface_conditions: Option<String>,
    pub junction_detail: Option<String>,
    pub speed_limit: Option<f64>,
    pub number_of_vehicles: Option<f64>,
    pub number_of_casualties: Option<f64>,
    /// Target label; absent on inference batches
    pub risk_level: Option<String>,
}

impl IncidentRecord {
    /// Value of one of the [`CATEGORICAL_COLUMNS`] (None when missing or unknown column)
    pub fn categorical(&self, column: &str) -> Option<&str> {
        let value = match column {
            "road_type" => &self.road_type,
            "weather_conditions" => &self.weather_conditions,
            "light_conditions" => &self.light_conditions,
            "road_surface_conditions" => &self.road_surface_conditions,
            "junction_detail" => &self.junction_detail,
            "day_of_week" => &self.day_of_week,
            _ => return None,
        };
        value.as_deref()
    }
}

/// Cell values treated as missing, in addition to the empty string
pub(crate) fn is_missing(value: &str) -> bool {
    let value = value.trim();
    value.is_empty()
        || value.eq_ignore_ascii_case("na")
        || value.eq_ignore_ascii_case("nan")
        || value.eq_ignore_ascii_case("null")
}
