//! Fixed severity-weight lookup tables for weather and road surface
//!
//! Tables accept either the numeric condition code used by the source data or
//! a textual label. Unmapped values fall back to the table default because
//! unseen codes are expected at inference time.

/// Immutable code/label to weight mapping with a default weight
#[derive(Debug, Clone, Copy)]
pub struct RiskTable {
    name: &'static str,
    codes: &'static [(i64, i32)],
    labels: &'static [(&'static str, i32)],
    default_weight: i32,
}

impl RiskTable {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_weight(&self) -> i32 {
        self.default_weight
    }

    /// Weight for a raw cell value; missing or unmapped values get the default
    pub fn weight(&self, value: Option<&str>) -> i32 {
        value
            .and_then(|raw| self.lookup(raw.trim()))
            .unwrap_or(self.default_weight)
    }

    /// Weight for a mapped value, `None` if the value is not in the table
    pub fn lookup(&self, value: &str) -> Option<i32> {
        if let Some(code) = parse_code(value) {
            return self
                .codes
                .iter()
                .find(|(c, _)| *c == code)
                .map(|(_, w)| *w);
        }
        self.labels
            .iter()
            .find(|(label, _)| label.eq_ignore_ascii_case(value))
            .map(|(_, w)| *w)
    }
}

/// Integer codes may be written as `6` or `6.0`
fn parse_code(value: &str) -> Option<i64> {
    if let Ok(code) = value.parse::<i64>() {
        return Some(code);
    }
    let float = value.parse::<f64>().ok()?;
    (float.fract() == 0.0 && float.is_finite()).then_some(float as i64)
}

/// Weather condition severity weights, default 3
pub const WEATHER_RISK: RiskTable = RiskTable {
    name: "weather_risk",
    codes: &[
        (1, 0),
        (2, 2),
        (3, 4),
        (4, 2),
        (5, 4),
        (6, 6),
        (7, 5),
        (8, 1),
        (9, 3),
    ],
    labels: &[("Fine", 0), ("Rain", 2), ("Fog", 4), ("Snow", 6)],
    default_weight: 3,
};

/// Road surface severity weights, default 2
pub const SURFACE_RISK: RiskTable = RiskTable {
    name: "surface_risk",
    codes: &[(1, 0), (2, 2), (3, 4), (4, 5), (5, 5)],
    labels: &[
        ("Dry", 0),
        ("Wet", 2),
        ("Snow", 4),
        ("Frost", 5),
        ("Ice", 5),
        ("Flood", 5),
    ],
    default_weight: 2,
};
