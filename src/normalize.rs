//! Mapping of raw upstream activities into the flat CSV row.

use std::fmt;

use crate::garmin_client::{ActivityDetail, ActivitySummary, SummaryDto};

pub const HEADER: [&str; 8] = [
    "Activity ID",
    "Category",
    "Start Time",
    "Distance (km)",
    "Steps",
    "Duration (min)",
    "Heartrate (BPM)",
    "Elevation Gain (m)",
];

const NOT_AVAILABLE: &str = "N/A";
const UNKNOWN_TYPE: &str = "unknown";
const STEP_COUNTING_TYPES: [&str; 2] = ["running", "walking"];

/// An optional upstream number, rendered as upstream sent it or as `N/A`.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Value(serde_json::Number),
    NotAvailable,
}

impl From<Option<serde_json::Number>> for Metric {
    fn from(value: Option<serde_json::Number>) -> Self {
        value.map_or(Metric::NotAvailable, Metric::Value)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Value(n) => write!(f, "{n}"),
            Metric::NotAvailable => f.write_str(NOT_AVAILABLE),
        }
    }
}

/// One row of the activity store.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub activity_id: String,
    pub category: String,
    pub start_time: String,
    pub distance_km: f64,
    pub steps: Metric,
    pub duration_min: f64,
    pub heartrate_bpm: Metric,
    pub elevation_gain_m: Metric,
}

impl Record {
    /// Fields in [`HEADER`] order.
    pub fn to_row(&self) -> [String; 8] {
        [
            self.activity_id.clone(),
            self.category.clone(),
            self.start_time.clone(),
            format_decimal(self.distance_km),
            self.steps.to_string(),
            format_decimal(self.duration_min),
            self.heartrate_bpm.to_string(),
            self.elevation_gain_m.to_string(),
        ]
    }
}

pub fn normalize(summary: &ActivitySummary, detail: &ActivityDetail) -> Record {
    let type_key = summary
        .activity_type
        .as_ref()
        .and_then(|t| t.type_key.as_deref())
        .unwrap_or(UNKNOWN_TYPE);

    let steps = if STEP_COUNTING_TYPES.contains(&type_key) {
        Metric::from(summary.steps.clone())
    } else {
        Metric::NotAvailable
    };

    let dto = detail.summary.clone().unwrap_or_default();

    Record {
        activity_id: summary.activity_id.clone(),
        category: category_label(type_key),
        start_time: summary.start_time_local.clone().unwrap_or_default(),
        distance_km: round2(summary.distance.unwrap_or(0.0) / 1000.0),
        steps,
        duration_min: round2(summary.duration.unwrap_or(0.0) / 60.0),
        heartrate_bpm: heart_rate(&dto),
        elevation_gain_m: elevation_gain(&dto),
    }
}

// A present zero is a real reading; only a missing or null field falls through.
fn heart_rate(dto: &SummaryDto) -> Metric {
    Metric::from(dto.average_hr.clone().or_else(|| dto.average_heart_rate.clone()))
}

fn elevation_gain(dto: &SummaryDto) -> Metric {
    Metric::from(
        dto.total_elevation_gain
            .clone()
            .or_else(|| dto.elevation_gain.clone()),
    )
}

/// `road_biking` -> `Road Biking`
pub fn category_label(type_key: &str) -> String {
    let mut label = String::with_capacity(type_key.len());
    let mut at_word_start = true;
    for c in type_key.replace('_', " ").chars() {
        if c.is_alphabetic() {
            if at_word_start {
                label.extend(c.to_uppercase());
            } else {
                label.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            label.push(c);
            at_word_start = true;
        }
    }
    label
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Shortest round-trip form, always with a fractional part: `5.0`, `30.25`.
fn format_decimal(value: f64) -> String {
    format!("{value:?}")
}
