//! Domain inserters
//!
//! Each inserter writes exactly one table. The activity row is updated in
//! place (or inserted when new); every other domain replaces its rows with delete-then-insert, so
//! re-ingestion never duplicates. Callers run these inside one transaction.

use duckdb::{params, ToSql, Transaction};

use crate::db::models::*;
use crate::error::{LakeError, Result};

use super::payload::DomainPayload;

/// Write a validated payload, returning the number of rows written
pub fn insert(tx: &Transaction<'_>, activity_id: i64, payload: &DomainPayload) -> Result<usize> {
    match payload {
        DomainPayload::Activity(row) => upsert_activity(tx, row),
        DomainPayload::Splits(rows) => insert_splits(tx, activity_id, rows),
        DomainPayload::FormEfficiency(row) => insert_form_efficiency(tx, row),
        DomainPayload::HeartRateZones(rows) => insert_hr_zones(tx, activity_id, rows),
        DomainPayload::HrEfficiency(row) => insert_hr_efficiency(tx, row),
        DomainPayload::PerformanceTrends(row) => insert_performance_trends(tx, row),
        DomainPayload::Vo2Max(row) => insert_vo2max(tx, row),
        DomainPayload::LactateThreshold(row) => insert_lactate_threshold(tx, row),
        DomainPayload::TimeSeries(rows) => insert_time_series(tx, activity_id, rows),
        DomainPayload::BodyComposition(rows) => insert_body_composition(tx, rows),
    }
}

fn exec(tx: &Transaction<'_>, context: &str, sql: &str, params: &[&dyn ToSql]) -> Result<usize> {
    tx.execute(sql, params)
        .map_err(|e| LakeError::from_duckdb(context, e))
}

fn delete_for_activity(tx: &Transaction<'_>, table: &str, activity_id: i64) -> Result<usize> {
    exec(
        tx,
        &format!("Failed to clear {}", table),
        &format!("DELETE FROM {} WHERE activity_id = ?", table),
        params![activity_id],
    )
}

fn upsert_activity(tx: &Transaction<'_>, row: &ActivityRow) -> Result<usize> {
    // Children reference this row; it is updated in place, never replaced
    let updated = exec(
        tx,
        "Failed to update activity",
        "UPDATE activities SET
            activity_date = ?,
            activity_name = ?,
            activity_type = ?,
            start_time_local = ?,
            duration_sec = ?,
            distance_m = ?,
            avg_hr = ?,
            max_hr = ?,
            avg_speed_mps = ?,
            avg_pace_sec_per_km = ?,
            elevation_gain_m = ?,
            elevation_loss_m = ?,
            calories = ?,
            training_effect = ?,
            ingested_at = CURRENT_TIMESTAMP
        WHERE activity_id = ?",
        params![
            row.activity_date,
            row.activity_name,
            row.activity_type,
            row.start_time_local,
            row.duration_sec,
            row.distance_m,
            row.avg_hr,
            row.max_hr,
            row.avg_speed_mps,
            row.avg_pace_sec_per_km,
            row.elevation_gain_m,
            row.elevation_loss_m,
            row.calories,
            row.training_effect,
            row.activity_id,
        ],
    )?;
    if updated > 0 {
        return Ok(1);
    }

    exec(
        tx,
        "Failed to insert activity",
        "INSERT INTO activities (
            activity_id, activity_date, activity_name, activity_type, start_time_local,
            duration_sec, distance_m, avg_hr, max_hr, avg_speed_mps, avg_pace_sec_per_km,
            elevation_gain_m, elevation_loss_m, calories, training_effect
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            row.activity_id,
            row.activity_date,
            row.activity_name,
            row.activity_type,
            row.start_time_local,
            row.duration_sec,
            row.distance_m,
            row.avg_hr,
            row.max_hr,
            row.avg_speed_mps,
            row.avg_pace_sec_per_km,
            row.elevation_gain_m,
            row.elevation_loss_m,
            row.calories,
            row.training_effect,
        ],
    )?;
    Ok(1)
}

fn insert_splits(tx: &Transaction<'_>, activity_id: i64, rows: &[SplitRow]) -> Result<usize> {
    delete_for_activity(tx, "splits", activity_id)?;

    let mut stmt = tx
        .prepare(
            "INSERT INTO splits (
                activity_id, split_index, distance_m, duration_sec, pace_sec_per_km,
                avg_hr, max_hr, avg_cadence, avg_power, ground_contact_time_ms,
                vertical_oscillation_cm, vertical_ratio_pct, elevation_gain_m,
                elevation_loss_m, terrain
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .map_err(|e| LakeError::from_duckdb("Failed to prepare split insert", e))?;

    for row in rows {
        stmt.execute(params![
            activity_id,
            row.split_index,
            row.distance_m,
            row.duration_sec,
            row.pace_sec_per_km,
            row.avg_hr,
            row.max_hr,
            row.avg_cadence,
            row.avg_power,
            row.ground_contact_time_ms,
            row.vertical_oscillation_cm,
            row.vertical_ratio_pct,
            row.elevation_gain_m,
            row.elevation_loss_m,
            row.terrain,
        ])
        .map_err(|e| LakeError::from_duckdb("Failed to insert split", e))?;
    }
    Ok(rows.len())
}

fn insert_form_efficiency(tx: &Transaction<'_>, row: &FormEfficiencyRow) -> Result<usize> {
    delete_for_activity(tx, "form_efficiency", row.activity_id)?;
    let (gct, vo, vr) = (&row.gct, &row.vo, &row.vr);
    exec(
        tx,
        "Failed to insert form efficiency",
        "INSERT INTO form_efficiency (
            activity_id,
            gct_average, gct_min, gct_max, gct_std, gct_rating,
            vo_average, vo_min, vo_max, vo_std, vo_rating,
            vr_average, vr_min, vr_max, vr_std, vr_rating
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            row.activity_id,
            gct.average,
            gct.min,
            gct.max,
            gct.std,
            gct.rating,
            vo.average,
            vo.min,
            vo.max,
            vo.std,
            vo.rating,
            vr.average,
            vr.min,
            vr.max,
            vr.std,
            vr.rating,
        ],
    )
}

fn insert_hr_zones(
    tx: &Transaction<'_>,
    activity_id: i64,
    rows: &[HeartRateZoneRow],
) -> Result<usize> {
    delete_for_activity(tx, "heart_rate_zones", activity_id)?;

    let mut stmt = tx
        .prepare(
            "INSERT INTO heart_rate_zones (
                activity_id, zone_number, low_boundary_bpm, high_boundary_bpm,
                time_in_zone_sec, zone_percentage
            ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .map_err(|e| LakeError::from_duckdb("Failed to prepare zone insert", e))?;

    for row in rows {
        stmt.execute(params![
            activity_id,
            row.zone_number,
            row.low_boundary_bpm,
            row.high_boundary_bpm,
            row.time_in_zone_sec,
            row.zone_percentage,
        ])
        .map_err(|e| LakeError::from_duckdb("Failed to insert heart rate zone", e))?;
    }
    Ok(rows.len())
}

fn insert_hr_efficiency(tx: &Transaction<'_>, row: &HrEfficiencyRow) -> Result<usize> {
    delete_for_activity(tx, "hr_efficiency", row.activity_id)?;
    let [z1, z2, z3, z4, z5] = row.zone_pct;
    exec(
        tx,
        "Failed to insert HR efficiency",
        "INSERT INTO hr_efficiency (
            activity_id, primary_zone, zone_distribution_rating, hr_stability,
            aerobic_efficiency, training_quality,
            zone1_pct, zone2_pct, zone3_pct, zone4_pct, zone5_pct
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            row.activity_id,
            row.primary_zone,
            row.zone_distribution_rating,
            row.hr_stability,
            row.aerobic_efficiency,
            row.training_quality,
            z1,
            z2,
            z3,
            z4,
            z5,
        ],
    )
}

fn insert_performance_trends(tx: &Transaction<'_>, row: &PerformanceTrendsRow) -> Result<usize> {
    delete_for_activity(tx, "performance_trends", row.activity_id)?;
    exec(
        tx,
        "Failed to insert performance trends",
        "INSERT INTO performance_trends (
            activity_id, pace_consistency, hr_drift_pct, cadence_consistency, fatigue_pattern,
            warmup_avg_pace_sec_per_km, warmup_avg_hr,
            main_avg_pace_sec_per_km, main_avg_hr,
            finish_avg_pace_sec_per_km, finish_avg_hr
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            row.activity_id,
            row.pace_consistency,
            row.hr_drift_pct,
            row.cadence_consistency,
            row.fatigue_pattern,
            row.warmup.avg_pace_sec_per_km,
            row.warmup.avg_hr,
            row.main.avg_pace_sec_per_km,
            row.main.avg_hr,
            row.finish.avg_pace_sec_per_km,
            row.finish.avg_hr,
        ],
    )
}

fn insert_vo2max(tx: &Transaction<'_>, row: &Vo2MaxRow) -> Result<usize> {
    delete_for_activity(tx, "vo2max", row.activity_id)?;
    exec(
        tx,
        "Failed to insert VO2max",
        "INSERT INTO vo2max (activity_id, vo2max_value, vo2max_precise, calendar_date, fitness_age)
         VALUES (?, ?, ?, ?, ?)",
        params![
            row.activity_id,
            row.vo2max_value,
            row.vo2max_precise,
            row.calendar_date,
            row.fitness_age,
        ],
    )
}

fn insert_lactate_threshold(tx: &Transaction<'_>, row: &LactateThresholdRow) -> Result<usize> {
    delete_for_activity(tx, "lactate_threshold", row.activity_id)?;
    exec(
        tx,
        "Failed to insert lactate threshold",
        "INSERT INTO lactate_threshold (
            activity_id, heart_rate_bpm, speed_mps, pace_sec_per_km,
            ftp_watts, power_to_weight, weight_kg, calendar_date
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            row.activity_id,
            row.heart_rate_bpm,
            row.speed_mps,
            row.pace_sec_per_km,
            row.ftp_watts,
            row.power_to_weight,
            row.weight_kg,
            row.calendar_date,
        ],
    )
}

fn insert_time_series(
    tx: &Transaction<'_>,
    activity_id: i64,
    rows: &[TimeSeriesRow],
) -> Result<usize> {
    delete_for_activity(tx, "time_series_metrics", activity_id)?;

    let columns: Vec<&str> = TIME_SERIES_COLUMNS.iter().map(|c| c.column).collect();
    let placeholders = vec!["?"; 3 + columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO time_series_metrics (activity_id, seq_no, timestamp, {}) VALUES ({})",
        columns.join(", "),
        placeholders
    );
    let mut stmt = tx
        .prepare(&sql)
        .map_err(|e| LakeError::from_duckdb("Failed to prepare time series insert", e))?;

    for row in rows {
        let mut values: Vec<Box<dyn ToSql>> = Vec::with_capacity(3 + columns.len());
        values.push(Box::new(activity_id));
        values.push(Box::new(row.seq_no));
        values.push(Box::new(row.timestamp));
        for (column, value) in TIME_SERIES_COLUMNS.iter().zip(&row.values) {
            match column.kind {
                ColumnKind::Integer => values.push(Box::new(value.map(|v| v.round() as i32))),
                ColumnKind::Double => values.push(Box::new(*value)),
            }
        }

        let param_refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
        stmt.execute(param_refs.as_slice())
            .map_err(|e| LakeError::from_duckdb("Failed to insert time series sample", e))?;
    }
    Ok(rows.len())
}

fn insert_body_composition(tx: &Transaction<'_>, rows: &[BodyCompositionRow]) -> Result<usize> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO body_composition (
                date, weight_kg, bmi, body_fat_pct, body_water_pct, bone_mass_kg, muscle_mass_kg
            ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .map_err(|e| LakeError::from_duckdb("Failed to prepare body composition insert", e))?;

    for row in rows {
        exec(
            tx,
            "Failed to clear body composition",
            "DELETE FROM body_composition WHERE date = ?",
            params![row.date],
        )?;
        stmt.execute(params![
            row.date,
            row.weight_kg,
            row.bmi,
            row.body_fat_pct,
            row.body_water_pct,
            row.bone_mass_kg,
            row.muscle_mass_kg,
        ])
        .map_err(|e| LakeError::from_duckdb("Failed to insert body composition", e))?;
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::NaiveDate;

    fn activity(id: i64) -> ActivityRow {
        let date = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        ActivityRow {
            activity_id: id,
            activity_date: date,
            activity_name: Some("Morning Run".to_string()),
            activity_type: Some("running".to_string()),
            start_time_local: date.and_hms_opt(7, 0, 0).unwrap(),
            duration_sec: Some(1800.0),
            distance_m: Some(6000.0),
            avg_hr: Some(150),
            max_hr: Some(172),
            avg_speed_mps: Some(3.33),
            avg_pace_sec_per_km: Some(300.0),
            elevation_gain_m: None,
            elevation_loss_m: None,
            calories: Some(420),
            training_effect: None,
        }
    }

    fn vo2(id: i64, value: f64) -> DomainPayload {
        DomainPayload::Vo2Max(Vo2MaxRow {
            activity_id: id,
            vo2max_value: value,
            vo2max_precise: None,
            calendar_date: None,
            fitness_age: None,
        })
    }

    fn write(db: &Database, id: i64, payload: &DomainPayload) -> Result<usize> {
        db.transaction(|tx| insert(tx, id, payload))
    }

    #[test]
    fn test_activity_upsert_updates_in_place() {
        let db = Database::open_in_memory().unwrap();
        write(&db, 1, &DomainPayload::Activity(activity(1))).unwrap();

        let mut changed = activity(1);
        changed.activity_name = Some("Renamed".to_string());
        write(&db, 1, &DomainPayload::Activity(changed)).unwrap();

        let conn = db.reader().unwrap();
        let (count, name): (i64, String) = conn
            .query_row(
                "SELECT COUNT(*), MAX(activity_name) FROM activities WHERE activity_id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(name, "Renamed");
    }

    #[test]
    fn test_activity_update_keeps_children() {
        let db = Database::open_in_memory().unwrap();
        write(&db, 1, &DomainPayload::Activity(activity(1))).unwrap();
        write(&db, 1, &vo2(1, 50.0)).unwrap();

        let mut changed = activity(1);
        changed.calories = Some(512);
        write(&db, 1, &DomainPayload::Activity(changed)).unwrap();

        assert_eq!(db.count_rows("activities", 1).unwrap(), 1);
        assert_eq!(db.count_rows("vo2max", 1).unwrap(), 1);
    }

    #[test]
    fn test_child_replaces_rows() {
        let db = Database::open_in_memory().unwrap();
        write(&db, 1, &DomainPayload::Activity(activity(1))).unwrap();
        write(&db, 1, &vo2(1, 50.0)).unwrap();
        write(&db, 1, &vo2(1, 52.5)).unwrap();

        let conn = db.reader().unwrap();
        let value: f64 = conn
            .query_row("SELECT vo2max_value FROM vo2max WHERE activity_id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(value, 52.5);
        assert_eq!(db.count_rows("vo2max", 1).unwrap(), 1);
    }

    #[test]
    fn test_child_without_parent_is_referential() {
        let db = Database::open_in_memory().unwrap();
        let err = write(&db, 42, &vo2(42, 50.0)).unwrap_err();
        assert!(matches!(err, LakeError::Referential(_)), "got {:?}", err);
    }

    #[test]
    fn test_time_series_binds_integer_columns() {
        let db = Database::open_in_memory().unwrap();
        write(&db, 1, &DomainPayload::Activity(activity(1))).unwrap();

        let heart_rate = TIME_SERIES_COLUMNS.iter().position(|c| c.column == "heart_rate").unwrap();
        let rows: Vec<TimeSeriesRow> = (0..3)
            .map(|i| {
                let mut values = vec![None; TIME_SERIES_COLUMNS.len()];
                values[heart_rate] = Some(140.6 + i as f64);
                TimeSeriesRow {
                    activity_id: 1,
                    seq_no: i,
                    timestamp: None,
                    values,
                }
            })
            .collect();
        assert_eq!(write(&db, 1, &DomainPayload::TimeSeries(rows)).unwrap(), 3);

        let conn = db.reader().unwrap();
        let hr: i32 = conn
            .query_row(
                "SELECT heart_rate FROM time_series_metrics WHERE activity_id = 1 AND seq_no = 0",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hr, 141);
    }

    #[test]
    fn test_body_composition_replaces_by_date() {
        let db = Database::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let row = |kg: f64| BodyCompositionRow {
            date,
            weight_kg: Some(kg),
            bmi: None,
            body_fat_pct: None,
            body_water_pct: None,
            bone_mass_kg: None,
            muscle_mass_kg: None,
        };
        write(&db, 0, &DomainPayload::BodyComposition(vec![row(70.5)])).unwrap();
        write(&db, 0, &DomainPayload::BodyComposition(vec![row(70.1)])).unwrap();

        assert_eq!(db.count_rows("body_composition", 0).unwrap(), 1);
    }
}
