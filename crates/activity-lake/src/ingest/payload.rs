//! Raw domain documents and their validated payloads
//!
//! Each raw JSON document maps onto one [`DomainPayload`] variant. The
//! field-presence contract of a domain is checked here, at the ingestion
//! boundary, and unit conversion happens while the rows are built.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::db::models::*;
use crate::error::{LakeError, Result};

use super::units::{self, Converter};

/// One category of fitness data, each with its own table and inserter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Activity,
    Splits,
    FormEfficiency,
    HeartRateZones,
    HrEfficiency,
    PerformanceTrends,
    #[serde(rename = "vo2max")]
    Vo2Max,
    LactateThreshold,
    TimeSeries,
    BodyComposition,
}

impl Domain {
    /// Every domain, root first
    pub const ALL: [Domain; 10] = [
        Domain::Activity,
        Domain::Splits,
        Domain::FormEfficiency,
        Domain::HeartRateZones,
        Domain::HrEfficiency,
        Domain::PerformanceTrends,
        Domain::Vo2Max,
        Domain::LactateThreshold,
        Domain::TimeSeries,
        Domain::BodyComposition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Activity => "activity",
            Domain::Splits => "splits",
            Domain::FormEfficiency => "form_efficiency",
            Domain::HeartRateZones => "heart_rate_zones",
            Domain::HrEfficiency => "hr_efficiency",
            Domain::PerformanceTrends => "performance_trends",
            Domain::Vo2Max => "vo2max",
            Domain::LactateThreshold => "lactate_threshold",
            Domain::TimeSeries => "time_series",
            Domain::BodyComposition => "body_composition",
        }
    }

    /// Raw file name inside an activity directory
    pub fn file_name(&self) -> &'static str {
        match self {
            Domain::Activity => "activity.json",
            Domain::Splits => "splits.json",
            Domain::FormEfficiency => "form_efficiency.json",
            Domain::HeartRateZones => "hr_zones.json",
            Domain::HrEfficiency => "hr_efficiency.json",
            Domain::PerformanceTrends => "performance_trends.json",
            Domain::Vo2Max => "vo2max.json",
            Domain::LactateThreshold => "lactate_threshold.json",
            Domain::TimeSeries => "time_series.json",
            Domain::BodyComposition => "body_composition.json",
        }
    }

    /// Table written by this domain's inserter
    pub fn table_name(&self) -> &'static str {
        match self {
            Domain::Activity => "activities",
            Domain::TimeSeries => "time_series_metrics",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated domain payload, ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub enum DomainPayload {
    Activity(ActivityRow),
    Splits(Vec<SplitRow>),
    FormEfficiency(FormEfficiencyRow),
    HeartRateZones(Vec<HeartRateZoneRow>),
    HrEfficiency(HrEfficiencyRow),
    PerformanceTrends(PerformanceTrendsRow),
    Vo2Max(Vo2MaxRow),
    LactateThreshold(LactateThresholdRow),
    TimeSeries(Vec<TimeSeriesRow>),
    BodyComposition(Vec<BodyCompositionRow>),
}

impl DomainPayload {
    /// Validate a raw document for `domain` and build its rows
    pub fn parse(domain: Domain, activity_id: i64, raw: &serde_json::Value) -> Result<Self> {
        let payload = match domain {
            Domain::Activity => DomainPayload::Activity(parse_activity(activity_id, raw)?),
            Domain::Splits => DomainPayload::Splits(parse_splits(activity_id, raw)?),
            Domain::FormEfficiency => {
                DomainPayload::FormEfficiency(parse_form_efficiency(activity_id, raw)?)
            }
            Domain::HeartRateZones => {
                DomainPayload::HeartRateZones(parse_hr_zones(activity_id, raw)?)
            }
            Domain::HrEfficiency => {
                DomainPayload::HrEfficiency(parse_hr_efficiency(activity_id, raw)?)
            }
            Domain::PerformanceTrends => {
                DomainPayload::PerformanceTrends(parse_performance_trends(activity_id, raw)?)
            }
            Domain::Vo2Max => DomainPayload::Vo2Max(parse_vo2max(activity_id, raw)?),
            Domain::LactateThreshold => {
                DomainPayload::LactateThreshold(parse_lactate_threshold(activity_id, raw)?)
            }
            Domain::TimeSeries => DomainPayload::TimeSeries(parse_time_series(activity_id, raw)?),
            Domain::BodyComposition => DomainPayload::BodyComposition(parse_body_composition(raw)?),
        };
        Ok(payload)
    }

    pub fn domain(&self) -> Domain {
        match self {
            DomainPayload::Activity(_) => Domain::Activity,
            DomainPayload::Splits(_) => Domain::Splits,
            DomainPayload::FormEfficiency(_) => Domain::FormEfficiency,
            DomainPayload::HeartRateZones(_) => Domain::HeartRateZones,
            DomainPayload::HrEfficiency(_) => Domain::HrEfficiency,
            DomainPayload::PerformanceTrends(_) => Domain::PerformanceTrends,
            DomainPayload::Vo2Max(_) => Domain::Vo2Max,
            DomainPayload::LactateThreshold(_) => Domain::LactateThreshold,
            DomainPayload::TimeSeries(_) => Domain::TimeSeries,
            DomainPayload::BodyComposition(_) => Domain::BodyComposition,
        }
    }

    /// Number of rows the payload will write
    pub fn row_count(&self) -> usize {
        match self {
            DomainPayload::Splits(rows) => rows.len(),
            DomainPayload::HeartRateZones(rows) => rows.len(),
            DomainPayload::TimeSeries(rows) => rows.len(),
            DomainPayload::BodyComposition(rows) => rows.len(),
            _ => 1,
        }
    }
}

fn from_doc<T: serde::de::DeserializeOwned>(domain: Domain, raw: &serde_json::Value) -> Result<T> {
    T::deserialize(raw).map_err(|e| LakeError::validation(domain.as_str(), e.to_string()))
}

fn required<T>(domain: Domain, value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| LakeError::validation(domain.as_str(), format!("missing {}", field)))
}

/// Provider timestamps: `YYYY-MM-DD HH:MM:SS` with optional fraction or `T` separator
pub fn parse_local_datetime(value: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

fn parse_date(domain: Domain, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        LakeError::validation(
            domain.as_str(),
            format!("invalid date {}, expected YYYY-MM-DD", value),
        )
    })
}

fn round_i32(value: Option<f64>) -> Option<i32> {
    value.filter(|v| v.is_finite()).map(|v| v.round() as i32)
}

// =========================================================================
// Activity
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawActivity {
    activity_id: Option<i64>,
    start_time_local: Option<String>,
    #[serde(default)]
    activity_name: Option<String>,
    #[serde(default)]
    activity_type: Option<RawActivityType>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    distance: Option<f64>,
    #[serde(default, rename = "averageHR")]
    average_hr: Option<f64>,
    #[serde(default, rename = "maxHR")]
    max_hr: Option<f64>,
    #[serde(default)]
    average_speed: Option<f64>,
    #[serde(default)]
    elevation_gain: Option<f64>,
    #[serde(default)]
    elevation_loss: Option<f64>,
    #[serde(default)]
    calories: Option<f64>,
    #[serde(default)]
    aerobic_training_effect: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawActivityType {
    type_key: String,
}

fn parse_activity(activity_id: i64, raw: &serde_json::Value) -> Result<ActivityRow> {
    let domain = Domain::Activity;
    let doc: RawActivity = from_doc(domain, raw)?;

    let doc_id = required(domain, doc.activity_id, "activityId")?;
    if doc_id != activity_id {
        return Err(LakeError::validation(
            domain.as_str(),
            format!("activityId {} does not match requested activity {}", doc_id, activity_id),
        ));
    }

    let start = required(domain, doc.start_time_local, "startTimeLocal")?;
    let start_time_local = parse_local_datetime(&start).ok_or_else(|| {
        LakeError::validation(domain.as_str(), format!("invalid startTimeLocal {}", start))
    })?;

    let avg_pace_sec_per_km = doc
        .average_speed
        .and_then(units::pace_from_speed)
        .or_else(|| match (doc.distance, doc.duration) {
            (Some(d), Some(t)) => units::pace_from_distance(d, t),
            _ => None,
        });

    Ok(ActivityRow {
        activity_id,
        activity_date: start_time_local.date(),
        activity_name: doc.activity_name,
        activity_type: doc.activity_type.map(|t| t.type_key),
        start_time_local,
        duration_sec: doc.duration,
        distance_m: doc.distance,
        avg_hr: round_i32(doc.average_hr),
        max_hr: round_i32(doc.max_hr),
        avg_speed_mps: doc.average_speed,
        avg_pace_sec_per_km,
        elevation_gain_m: doc.elevation_gain,
        elevation_loss_m: doc.elevation_loss,
        calories: round_i32(doc.calories),
        training_effect: doc.aerobic_training_effect,
    })
}

// =========================================================================
// Splits
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSplits {
    lap_dtos: Option<Vec<RawLap>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLap {
    distance: Option<f64>,
    duration: Option<f64>,
    #[serde(default)]
    average_speed: Option<f64>,
    #[serde(default, rename = "averageHR")]
    average_hr: Option<f64>,
    #[serde(default, rename = "maxHR")]
    max_hr: Option<f64>,
    #[serde(default)]
    average_run_cadence: Option<f64>,
    #[serde(default)]
    average_power: Option<f64>,
    #[serde(default)]
    ground_contact_time: Option<f64>,
    #[serde(default)]
    vertical_oscillation: Option<f64>,
    #[serde(default)]
    vertical_ratio: Option<f64>,
    #[serde(default)]
    elevation_gain: Option<f64>,
    #[serde(default)]
    elevation_loss: Option<f64>,
}

fn parse_splits(activity_id: i64, raw: &serde_json::Value) -> Result<Vec<SplitRow>> {
    let domain = Domain::Splits;
    let doc: RawSplits = from_doc(domain, raw)?;
    let laps = required(domain, doc.lap_dtos, "lapDTOs")?;

    laps.into_iter()
        .enumerate()
        .map(|(index, lap)| {
            let field = |name: &str| format!("lapDTOs[{}].{}", index, name);
            let distance_m = required(domain, lap.distance, &field("distance"))?;
            let duration_sec = required(domain, lap.duration, &field("duration"))?;

            let pace_sec_per_km = lap
                .average_speed
                .and_then(units::pace_from_speed)
                .or_else(|| units::pace_from_distance(distance_m, duration_sec));

            let terrain = units::terrain_label(
                lap.elevation_gain.unwrap_or(0.0),
                lap.elevation_loss.unwrap_or(0.0),
                distance_m,
            )
            .map(str::to_string);

            Ok(SplitRow {
                activity_id,
                split_index: index as i32,
                distance_m,
                duration_sec,
                pace_sec_per_km,
                avg_hr: round_i32(lap.average_hr),
                max_hr: round_i32(lap.max_hr),
                avg_cadence: lap.average_run_cadence,
                avg_power: lap.average_power,
                ground_contact_time_ms: lap.ground_contact_time,
                vertical_oscillation_cm: lap.vertical_oscillation,
                vertical_ratio_pct: lap.vertical_ratio,
                elevation_gain_m: lap.elevation_gain,
                elevation_loss_m: lap.elevation_loss,
                terrain,
            })
        })
        .collect()
}

// =========================================================================
// Form efficiency
// =========================================================================

#[derive(Debug, Deserialize)]
struct RawFormEfficiency {
    gct: Option<FormMetricStats>,
    #[serde(default)]
    vo: Option<FormMetricStats>,
    #[serde(default)]
    vr: Option<FormMetricStats>,
}

fn parse_form_efficiency(activity_id: i64, raw: &serde_json::Value) -> Result<FormEfficiencyRow> {
    let domain = Domain::FormEfficiency;
    let doc: RawFormEfficiency = from_doc(domain, raw)?;
    let gct = required(domain, doc.gct, "gct")?;
    required(domain, gct.average, "gct.average")?;

    Ok(FormEfficiencyRow {
        activity_id,
        gct,
        vo: doc.vo.unwrap_or_default(),
        vr: doc.vr.unwrap_or_default(),
    })
}

// =========================================================================
// Heart-rate zones
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHrZone {
    zone_number: Option<i32>,
    #[serde(default)]
    secs_in_zone: Option<f64>,
    #[serde(default)]
    zone_low_boundary: Option<f64>,
}

fn parse_hr_zones(activity_id: i64, raw: &serde_json::Value) -> Result<Vec<HeartRateZoneRow>> {
    let domain = Domain::HeartRateZones;
    let mut zones: Vec<RawHrZone> = from_doc(domain, raw)?;

    for (i, zone) in zones.iter().enumerate() {
        required(domain, zone.zone_number, &format!("[{}].zoneNumber", i))?;
    }
    zones.sort_by_key(|z| z.zone_number);
    if zones.windows(2).any(|w| w[0].zone_number == w[1].zone_number) {
        return Err(LakeError::validation(domain.as_str(), "duplicate zoneNumber"));
    }

    let total: f64 = zones.iter().filter_map(|z| z.secs_in_zone).sum();
    let lows: Vec<Option<i32>> = zones.iter().map(|z| round_i32(z.zone_low_boundary)).collect();

    Ok(zones
        .iter()
        .enumerate()
        .map(|(i, zone)| {
            let time_in_zone_sec = zone.secs_in_zone.unwrap_or(0.0);
            HeartRateZoneRow {
                activity_id,
                zone_number: zone.zone_number.unwrap_or_default(),
                low_boundary_bpm: lows[i],
                high_boundary_bpm: lows.get(i + 1).copied().flatten().map(|next| next - 1),
                time_in_zone_sec,
                zone_percentage: (total > 0.0).then(|| time_in_zone_sec / total * 100.0),
            }
        })
        .collect())
}

// =========================================================================
// Heart-rate efficiency
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHrEfficiency {
    primary_zone: Option<String>,
    #[serde(default)]
    zone_distribution_rating: Option<String>,
    #[serde(default)]
    hr_stability: Option<String>,
    #[serde(default)]
    aerobic_efficiency: Option<String>,
    #[serde(default)]
    training_quality: Option<String>,
    #[serde(default)]
    zone_percentages: HashMap<String, f64>,
}

fn parse_hr_efficiency(activity_id: i64, raw: &serde_json::Value) -> Result<HrEfficiencyRow> {
    let domain = Domain::HrEfficiency;
    let doc: RawHrEfficiency = from_doc(domain, raw)?;
    let primary_zone = required(domain, doc.primary_zone, "primaryZone")?;

    let mut zone_pct = [None; 5];
    for (i, pct) in zone_pct.iter_mut().enumerate() {
        *pct = doc.zone_percentages.get(&format!("zone{}", i + 1)).copied();
    }

    Ok(HrEfficiencyRow {
        activity_id,
        primary_zone,
        zone_distribution_rating: doc.zone_distribution_rating,
        hr_stability: doc.hr_stability,
        aerobic_efficiency: doc.aerobic_efficiency,
        training_quality: doc.training_quality,
        zone_pct,
    })
}

// =========================================================================
// Performance trends
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPerformanceTrends {
    pace_consistency: Option<f64>,
    #[serde(default)]
    hr_drift: Option<f64>,
    #[serde(default)]
    cadence_consistency: Option<String>,
    #[serde(default)]
    fatigue_pattern: Option<String>,
    #[serde(default)]
    warmup_phase: Option<RawPhase>,
    #[serde(default)]
    main_phase: Option<RawPhase>,
    #[serde(default)]
    finish_phase: Option<RawPhase>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPhase {
    #[serde(default)]
    avg_pace: Option<f64>,
    #[serde(default)]
    avg_hr: Option<f64>,
}

impl From<Option<RawPhase>> for PhaseStats {
    fn from(phase: Option<RawPhase>) -> Self {
        phase
            .map(|p| PhaseStats {
                avg_pace_sec_per_km: p.avg_pace,
                avg_hr: p.avg_hr,
            })
            .unwrap_or_default()
    }
}

fn parse_performance_trends(
    activity_id: i64,
    raw: &serde_json::Value,
) -> Result<PerformanceTrendsRow> {
    let domain = Domain::PerformanceTrends;
    let doc: RawPerformanceTrends = from_doc(domain, raw)?;

    Ok(PerformanceTrendsRow {
        activity_id,
        pace_consistency: required(domain, doc.pace_consistency, "paceConsistency")?,
        hr_drift_pct: doc.hr_drift,
        cadence_consistency: doc.cadence_consistency,
        fatigue_pattern: doc.fatigue_pattern,
        warmup: doc.warmup_phase.into(),
        main: doc.main_phase.into(),
        finish: doc.finish_phase.into(),
    })
}

// =========================================================================
// VO2max
// =========================================================================

#[derive(Debug, Deserialize)]
struct RawVo2Max {
    generic: Option<RawVo2MaxGeneric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVo2MaxGeneric {
    vo2_max_value: Option<f64>,
    #[serde(default)]
    vo2_max_precise_value: Option<f64>,
    #[serde(default)]
    calendar_date: Option<String>,
    #[serde(default)]
    fitness_age: Option<f64>,
}

fn parse_vo2max(activity_id: i64, raw: &serde_json::Value) -> Result<Vo2MaxRow> {
    let domain = Domain::Vo2Max;
    // The provider sometimes wraps the entry in a one-element array
    let entry = raw.as_array().and_then(|a| a.first()).unwrap_or(raw);
    let doc: RawVo2Max = from_doc(domain, entry)?;
    let generic = required(domain, doc.generic, "generic")?;

    Ok(Vo2MaxRow {
        activity_id,
        vo2max_value: required(domain, generic.vo2_max_value, "generic.vo2MaxValue")?,
        vo2max_precise: generic.vo2_max_precise_value,
        calendar_date: generic
            .calendar_date
            .as_deref()
            .map(|d| parse_date(domain, d))
            .transpose()?,
        fitness_age: round_i32(generic.fitness_age),
    })
}

// =========================================================================
// Lactate threshold
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLactateThreshold {
    #[serde(default)]
    speed_and_heart_rate: Option<RawLtSpeedHr>,
    #[serde(default)]
    power: Option<RawLtPower>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLtSpeedHr {
    #[serde(default)]
    heart_rate: Option<f64>,
    /// Raw speed, decimetres per second
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    calendar_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLtPower {
    #[serde(default)]
    functional_threshold_power: Option<f64>,
    #[serde(default)]
    power_to_weight: Option<f64>,
    /// Grams
    #[serde(default)]
    weight: Option<f64>,
}

fn parse_lactate_threshold(
    activity_id: i64,
    raw: &serde_json::Value,
) -> Result<LactateThresholdRow> {
    let domain = Domain::LactateThreshold;
    let doc: RawLactateThreshold = from_doc(domain, raw)?;
    if doc.speed_and_heart_rate.is_none() && doc.power.is_none() {
        return Err(LakeError::validation(
            domain.as_str(),
            "missing both speedAndHeartRate and power",
        ));
    }

    let speed_mps = doc
        .speed_and_heart_rate
        .as_ref()
        .and_then(|s| s.speed)
        .map(|s| Converter::Scale(units::RAW_SPEED_SCALE).apply(s));

    Ok(LactateThresholdRow {
        activity_id,
        heart_rate_bpm: round_i32(doc.speed_and_heart_rate.as_ref().and_then(|s| s.heart_rate)),
        speed_mps,
        pace_sec_per_km: speed_mps.and_then(units::pace_from_speed),
        ftp_watts: round_i32(doc.power.as_ref().and_then(|p| p.functional_threshold_power)),
        power_to_weight: doc.power.as_ref().and_then(|p| p.power_to_weight),
        weight_kg: doc.power.as_ref().and_then(|p| p.weight).map(units::grams_to_kg),
        calendar_date: doc
            .speed_and_heart_rate
            .as_ref()
            .and_then(|s| s.calendar_date.as_deref())
            .map(|d| parse_date(domain, d.get(..10).unwrap_or(d)))
            .transpose()?,
    })
}

// =========================================================================
// Time series
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTimeSeries {
    metric_descriptors: Option<Vec<RawDescriptor>>,
    activity_detail_metrics: Option<Vec<RawSample>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    metrics_index: usize,
    key: String,
}

#[derive(Debug, Deserialize)]
struct RawSample {
    metrics: Vec<Option<f64>>,
}

/// Key of the per-sample epoch-millisecond timestamp
const TIMESTAMP_KEY: &str = "directTimestamp";

fn parse_time_series(activity_id: i64, raw: &serde_json::Value) -> Result<Vec<TimeSeriesRow>> {
    let domain = Domain::TimeSeries;
    let doc: RawTimeSeries = from_doc(domain, raw)?;
    let descriptors = required(domain, doc.metric_descriptors, "metricDescriptors")?;
    let samples = required(domain, doc.activity_detail_metrics, "activityDetailMetrics")?;

    let index_of: HashMap<&str, usize> = descriptors
        .iter()
        .map(|d| (d.key.as_str(), d.metrics_index))
        .collect();
    let width = descriptors.iter().map(|d| d.metrics_index + 1).max().unwrap_or(0);

    // Column position -> sample position, for columns present in this payload
    let sources: Vec<Option<usize>> = TIME_SERIES_COLUMNS
        .iter()
        .map(|c| index_of.get(c.raw_key).copied())
        .collect();
    let timestamp_index = index_of.get(TIMESTAMP_KEY).copied();

    samples
        .into_iter()
        .enumerate()
        .map(|(seq_no, sample)| {
            if sample.metrics.len() < width {
                return Err(LakeError::validation(
                    domain.as_str(),
                    format!(
                        "sample {} has {} metrics, descriptors need {}",
                        seq_no,
                        sample.metrics.len(),
                        width
                    ),
                ));
            }

            let timestamp = timestamp_index
                .and_then(|i| sample.metrics[i])
                .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
                .map(|dt| dt.naive_utc());

            let values = TIME_SERIES_COLUMNS
                .iter()
                .zip(&sources)
                .map(|(column, source)| {
                    source
                        .and_then(|i| sample.metrics[i])
                        .map(|raw| column.converter.apply(raw))
                })
                .collect();

            Ok(TimeSeriesRow {
                activity_id,
                seq_no: seq_no as i64,
                timestamp,
                values,
            })
        })
        .collect()
}

// =========================================================================
// Body composition
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBodyComposition {
    date_weight_list: Option<Vec<RawWeighIn>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWeighIn {
    calendar_date: Option<String>,
    /// Grams
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    bmi: Option<f64>,
    #[serde(default)]
    body_fat: Option<f64>,
    #[serde(default)]
    body_water: Option<f64>,
    /// Grams
    #[serde(default)]
    bone_mass: Option<f64>,
    /// Grams
    #[serde(default)]
    muscle_mass: Option<f64>,
}

fn parse_body_composition(raw: &serde_json::Value) -> Result<Vec<BodyCompositionRow>> {
    let domain = Domain::BodyComposition;
    let doc: RawBodyComposition = from_doc(domain, raw)?;
    let entries = required(domain, doc.date_weight_list, "dateWeightList")?;

    let mut rows: Vec<BodyCompositionRow> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.into_iter().enumerate() {
        let field = format!("dateWeightList[{}].calendarDate", i);
        let date = required(domain, entry.calendar_date, &field)?;
        let row = BodyCompositionRow {
            date: parse_date(domain, &date)?,
            weight_kg: entry.weight.map(units::grams_to_kg),
            bmi: entry.bmi,
            body_fat_pct: entry.body_fat,
            body_water_pct: entry.body_water,
            bone_mass_kg: entry.bone_mass.map(units::grams_to_kg),
            muscle_mass_kg: entry.muscle_mass.map(units::grams_to_kg),
        };
        // Several weigh-ins on one day: the last one wins
        rows.retain(|r| r.date != row.date);
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_activity_requires_start_time() {
        let raw = json!({"activityId": 1, "activityName": "Run"});
        let err = DomainPayload::parse(Domain::Activity, 1, &raw).unwrap_err();
        assert!(err.to_string().contains("startTimeLocal"));
    }

    #[test]
    fn test_activity_id_mismatch_rejected() {
        let raw = json!({"activityId": 2, "startTimeLocal": "2024-12-01 07:00:00"});
        assert!(matches!(
            DomainPayload::parse(Domain::Activity, 1, &raw),
            Err(LakeError::Validation { .. })
        ));
    }

    #[test]
    fn test_activity_pace_from_speed() {
        let raw = json!({
            "activityId": 1,
            "startTimeLocal": "2024-12-01 07:00:00",
            "activityType": {"typeKey": "running"},
            "averageSpeed": 4.0,
            "averageHR": 151.6
        });
        let DomainPayload::Activity(row) = DomainPayload::parse(Domain::Activity, 1, &raw).unwrap()
        else {
            panic!("expected activity payload");
        };
        assert_eq!(row.avg_pace_sec_per_km, Some(250.0));
        assert_eq!(row.avg_hr, Some(152));
        assert_eq!(row.activity_type.as_deref(), Some("running"));
        assert_eq!(row.activity_date, NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
    }

    #[test]
    fn test_splits_indexed_by_position() {
        let raw = json!({"lapDTOs": [
            {"distance": 1000.0, "duration": 300.0, "elevationGain": 2.0, "elevationLoss": 1.0},
            {"distance": 1000.0, "duration": 290.0, "averageSpeed": 4.0}
        ]});
        let DomainPayload::Splits(rows) = DomainPayload::parse(Domain::Splits, 9, &raw).unwrap()
        else {
            panic!("expected splits payload");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].split_index, 0);
        assert_eq!(rows[1].split_index, 1);
        assert_eq!(rows[0].pace_sec_per_km, Some(300.0));
        assert_eq!(rows[1].pace_sec_per_km, Some(250.0));
        assert_eq!(rows[0].terrain.as_deref(), Some("flat"));
    }

    #[test]
    fn test_split_missing_duration_rejected() {
        let raw = json!({"lapDTOs": [{"distance": 1000.0}]});
        let err = DomainPayload::parse(Domain::Splits, 9, &raw).unwrap_err();
        assert!(err.to_string().contains("lapDTOs[0].duration"));
    }

    #[test]
    fn test_hr_zone_boundaries_and_percentages() {
        let raw = json!([
            {"zoneNumber": 2, "secsInZone": 300.0, "zoneLowBoundary": 120},
            {"zoneNumber": 1, "secsInZone": 100.0, "zoneLowBoundary": 100},
            {"zoneNumber": 3, "secsInZone": 600.0, "zoneLowBoundary": 140}
        ]);
        let DomainPayload::HeartRateZones(rows) =
            DomainPayload::parse(Domain::HeartRateZones, 1, &raw).unwrap()
        else {
            panic!("expected zones payload");
        };
        assert_eq!(rows[0].zone_number, 1);
        assert_eq!(rows[0].high_boundary_bpm, Some(119));
        assert_eq!(rows[2].high_boundary_bpm, None);
        assert_eq!(rows[2].zone_percentage, Some(60.0));
    }

    #[test]
    fn test_time_series_converts_units() {
        let raw = json!({
            "metricDescriptors": [
                {"metricsIndex": 0, "key": "directTimestamp"},
                {"metricsIndex": 1, "key": "directSpeed"},
                {"metricsIndex": 2, "key": "directElevation"},
                {"metricsIndex": 3, "key": "directHeartRate"}
            ],
            "activityDetailMetrics": [
                {"metrics": [1733036400000.0, 33.0, 12345.0, 150.0]},
                {"metrics": [1733036400000.0, null, 12400.0, 151.0]}
            ]
        });
        let DomainPayload::TimeSeries(rows) =
            DomainPayload::parse(Domain::TimeSeries, 5, &raw).unwrap()
        else {
            panic!("expected time series payload");
        };
        let speed = TIME_SERIES_COLUMNS.iter().position(|c| c.column == "speed_mps").unwrap();
        let elevation = TIME_SERIES_COLUMNS.iter().position(|c| c.column == "elevation_m").unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].seq_no, 1);
        assert_eq!(rows[0].timestamp, rows[1].timestamp);
        assert!((rows[0].values[speed].unwrap() - 3.3).abs() < 1e-9);
        assert_eq!(rows[1].values[speed], None);
        assert_eq!(rows[0].values[elevation], Some(123.45));
    }

    #[test]
    fn test_time_series_short_sample_rejected() {
        let raw = json!({
            "metricDescriptors": [{"metricsIndex": 2, "key": "directHeartRate"}],
            "activityDetailMetrics": [{"metrics": [1.0]}]
        });
        assert!(DomainPayload::parse(Domain::TimeSeries, 5, &raw).is_err());
    }

    #[test]
    fn test_body_composition_grams_to_kg() {
        let raw = json!({"dateWeightList": [
            {"calendarDate": "2024-12-01", "weight": 70500.0, "muscleMass": 32000.0},
            {"calendarDate": "2024-12-01", "weight": 70300.0}
        ]});
        let DomainPayload::BodyComposition(rows) =
            DomainPayload::parse(Domain::BodyComposition, 1, &raw).unwrap()
        else {
            panic!("expected body composition payload");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].weight_kg, Some(70.3));
    }

    #[test]
    fn test_lactate_threshold_requires_a_section() {
        let raw = json!({});
        assert!(DomainPayload::parse(Domain::LactateThreshold, 1, &raw).is_err());

        let raw = json!({"speedAndHeartRate": {
            "heartRate": 171,
            "speed": 40.0,
            "calendarDate": "2024-11-20T08:00:00.0"
        }});
        let DomainPayload::LactateThreshold(row) =
            DomainPayload::parse(Domain::LactateThreshold, 1, &raw).unwrap()
        else {
            panic!("expected lactate threshold payload");
        };
        assert_eq!(row.speed_mps, Some(4.0));
        assert_eq!(row.pace_sec_per_km, Some(250.0));
        assert_eq!(row.calendar_date, NaiveDate::from_ymd_opt(2024, 11, 20));
    }

    #[test]
    fn test_vo2max_accepts_wrapped_entry() {
        let raw = json!([{"generic": {"vo2MaxValue": 52.0, "calendarDate": "2024-12-01"}}]);
        let payload = DomainPayload::parse(Domain::Vo2Max, 1, &raw).unwrap();
        assert_eq!(payload.domain(), Domain::Vo2Max);
        assert_eq!(payload.row_count(), 1);
    }

    #[test]
    fn test_domain_names() {
        assert_eq!(Domain::TimeSeries.table_name(), "time_series_metrics");
        assert_eq!(Domain::Activity.table_name(), "activities");
        assert_eq!(Domain::HeartRateZones.file_name(), "hr_zones.json");
        assert_eq!(serde_json::to_string(&Domain::Vo2Max).unwrap(), "\"vo2max\"");
    }
}
