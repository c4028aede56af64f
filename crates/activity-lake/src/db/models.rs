//! Row models matching schema tables
//!
//! Every unit-bearing field is already in physical units; raw provider units
//! never reach these structs.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::ingest::units::Converter;

/// Activity summary (root entity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRow {
    pub activity_id: i64,
    pub activity_date: NaiveDate,
    pub activity_name: Option<String>,
    pub activity_type: Option<String>,
    pub start_time_local: NaiveDateTime,
    pub duration_sec: Option<f64>,
    pub distance_m: Option<f64>,
    pub avg_hr: Option<i32>,
    pub max_hr: Option<i32>,
    pub avg_speed_mps: Option<f64>,
    pub avg_pace_sec_per_km: Option<f64>,
    pub elevation_gain_m: Option<f64>,
    pub elevation_loss_m: Option<f64>,
    pub calories: Option<i32>,
    pub training_effect: Option<f64>,
}

/// Per-split (lap) metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRow {
    pub activity_id: i64,
    pub split_index: i32,
    pub distance_m: f64,
    pub duration_sec: f64,
    pub pace_sec_per_km: Option<f64>,
    pub avg_hr: Option<i32>,
    pub max_hr: Option<i32>,
    pub avg_cadence: Option<f64>,
    pub avg_power: Option<f64>,
    pub ground_contact_time_ms: Option<f64>,
    pub vertical_oscillation_cm: Option<f64>,
    pub vertical_ratio_pct: Option<f64>,
    pub elevation_gain_m: Option<f64>,
    pub elevation_loss_m: Option<f64>,
    pub terrain: Option<String>,
}

/// Summary statistics for one running-form metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormMetricStats {
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub std: Option<f64>,
    pub rating: Option<String>,
}

/// Running form efficiency (ground contact time, vertical oscillation, vertical ratio)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormEfficiencyRow {
    pub activity_id: i64,
    pub gct: FormMetricStats,
    pub vo: FormMetricStats,
    pub vr: FormMetricStats,
}

/// Time spent in one heart-rate zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateZoneRow {
    pub activity_id: i64,
    pub zone_number: i32,
    pub low_boundary_bpm: Option<i32>,
    pub high_boundary_bpm: Option<i32>,
    pub time_in_zone_sec: f64,
    pub zone_percentage: Option<f64>,
}

/// Heart-rate efficiency analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrEfficiencyRow {
    pub activity_id: i64,
    pub primary_zone: String,
    pub zone_distribution_rating: Option<String>,
    pub hr_stability: Option<String>,
    pub aerobic_efficiency: Option<String>,
    pub training_quality: Option<String>,
    /// Zone 1..=5 percentages
    pub zone_pct: [Option<f64>; 5],
}

/// Average pace and heart rate for one phase of an activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub avg_pace_sec_per_km: Option<f64>,
    pub avg_hr: Option<f64>,
}

/// Pace/HR trends across warmup, main and finish phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTrendsRow {
    pub activity_id: i64,
    pub pace_consistency: f64,
    pub hr_drift_pct: Option<f64>,
    pub cadence_consistency: Option<String>,
    pub fatigue_pattern: Option<String>,
    pub warmup: PhaseStats,
    pub main: PhaseStats,
    pub finish: PhaseStats,
}

/// VO2max estimate attached to an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vo2MaxRow {
    pub activity_id: i64,
    pub vo2max_value: f64,
    pub vo2max_precise: Option<f64>,
    pub calendar_date: Option<NaiveDate>,
    pub fitness_age: Option<i32>,
}

/// Lactate threshold estimate attached to an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LactateThresholdRow {
    pub activity_id: i64,
    pub heart_rate_bpm: Option<i32>,
    pub speed_mps: Option<f64>,
    pub pace_sec_per_km: Option<f64>,
    pub ftp_watts: Option<i32>,
    pub power_to_weight: Option<f64>,
    pub weight_kg: Option<f64>,
    pub calendar_date: Option<NaiveDate>,
}

/// One time-series sample; `values` is aligned with [`TIME_SERIES_COLUMNS`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRow {
    pub activity_id: i64,
    pub seq_no: i64,
    pub timestamp: Option<NaiveDateTime>,
    pub values: Vec<Option<f64>>,
}

/// Daily body-composition snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyCompositionRow {
    pub date: NaiveDate,
    pub weight_kg: Option<f64>,
    pub bmi: Option<f64>,
    pub body_fat_pct: Option<f64>,
    pub body_water_pct: Option<f64>,
    pub bone_mass_kg: Option<f64>,
    pub muscle_mass_kg: Option<f64>,
}

/// SQL storage type of a time-series metric column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Double,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Double => "DOUBLE",
        }
    }
}

/// A time-series metric column and the raw descriptor key feeding it
#[derive(Debug, Clone, Copy)]
pub struct MetricColumn {
    pub column: &'static str,
    pub raw_key: &'static str,
    pub kind: ColumnKind,
    pub converter: Converter,
}

const fn metric(
    column: &'static str,
    raw_key: &'static str,
    kind: ColumnKind,
    converter: Converter,
) -> MetricColumn {
    MetricColumn {
        column,
        raw_key,
        kind,
        converter,
    }
}

/// Metric columns of `time_series_metrics`, in table order
pub const TIME_SERIES_COLUMNS: &[MetricColumn] = &[
    metric("sum_duration_sec", "sumDuration", ColumnKind::Double, Converter::Identity),
    metric("sum_moving_duration_sec", "sumMovingDuration", ColumnKind::Double, Converter::Identity),
    metric(
        "sum_elapsed_duration_sec",
        "sumElapsedDuration",
        ColumnKind::Double,
        Converter::Identity,
    ),
    metric("sum_distance_m", "sumDistance", ColumnKind::Double, Converter::Divide(100.0)),
    metric("heart_rate", "directHeartRate", ColumnKind::Integer, Converter::Identity),
    metric("speed_mps", "directSpeed", ColumnKind::Double, Converter::Scale(0.1)),
    metric(
        "grade_adjusted_speed_mps",
        "directGradeAdjustedSpeed",
        ColumnKind::Double,
        Converter::Scale(0.1),
    ),
    metric("vertical_speed_mps", "directVerticalSpeed", ColumnKind::Double, Converter::Scale(0.1)),
    metric("cadence_spm", "directDoubleCadence", ColumnKind::Double, Converter::Identity),
    metric("run_cadence", "directRunCadence", ColumnKind::Double, Converter::Identity),
    metric(
        "fractional_cadence",
        "directFractionalCadence",
        ColumnKind::Double,
        Converter::Identity,
    ),
    metric("power_w", "directPower", ColumnKind::Integer, Converter::Identity),
    metric(
        "ground_contact_time_ms",
        "directGroundContactTime",
        ColumnKind::Double,
        Converter::Identity,
    ),
    metric(
        "ground_contact_balance_left_pct",
        "directGroundContactBalanceLeft",
        ColumnKind::Double,
        Converter::Identity,
    ),
    metric(
        "vertical_oscillation_cm",
        "directVerticalOscillation",
        ColumnKind::Double,
        Converter::Identity,
    ),
    metric("vertical_ratio_pct", "directVerticalRatio", ColumnKind::Double, Converter::Identity),
    metric("stride_length_cm", "directStrideLength", ColumnKind::Double, Converter::Identity),
    metric("elevation_m", "directElevation", ColumnKind::Double, Converter::Divide(100.0)),
    metric("latitude", "directLatitude", ColumnKind::Double, Converter::Identity),
    metric("longitude", "directLongitude", ColumnKind::Double, Converter::Identity),
    metric("air_temperature_c", "directAirTemperature", ColumnKind::Double, Converter::Identity),
    metric("respiration_rate", "directRespirationRate", ColumnKind::Double, Converter::Identity),
    metric(
        "performance_condition",
        "directPerformanceCondition",
        ColumnKind::Double,
        Converter::Identity,
    ),
    metric("body_battery", "directBodyBattery", ColumnKind::Integer, Converter::Identity),
    metric("stamina_pct", "directCurrentStamina", ColumnKind::Double, Converter::Identity),
    metric(
        "potential_stamina_pct",
        "directPotentialStamina",
        ColumnKind::Double,
        Converter::Identity,
    ),
];
