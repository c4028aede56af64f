//! Raw provider units to physical units
//!
//! Conversions are applied exactly once, while building rows for insertion.

/// Grams per kilogram (body composition masses arrive in grams)
pub const GRAMS_PER_KG: f64 = 1000.0;

/// Centimetres per metre (raw elevation and distance samples)
pub const CM_PER_M: f64 = 100.0;

/// Raw speed samples are in decimetres per second
pub const RAW_SPEED_SCALE: f64 = 0.1;

/// Converter from a raw provider value to a stored physical value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Converter {
    Identity,
    /// Multiply by a fixed factor
    Scale(f64),
    /// Divide by a fixed divisor
    Divide(f64),
}

impl Converter {
    pub fn apply(&self, raw: f64) -> f64 {
        match self {
            Converter::Identity => raw,
            Converter::Scale(factor) => raw * factor,
            Converter::Divide(divisor) => raw / divisor,
        }
    }
}

/// Pace in seconds per kilometre from speed in metres per second
pub fn pace_from_speed(speed_mps: f64) -> Option<f64> {
    (speed_mps.is_finite() && speed_mps > 0.0).then(|| 1000.0 / speed_mps)
}

/// Pace in seconds per kilometre from distance and duration
pub fn pace_from_distance(distance_m: f64, duration_sec: f64) -> Option<f64> {
    (distance_m > 0.0 && duration_sec > 0.0).then(|| duration_sec / (distance_m / 1000.0))
}

/// Grams to kilograms
pub fn grams_to_kg(grams: f64) -> f64 {
    grams / GRAMS_PER_KG
}

/// Terrain label from elevation change per kilometre
pub fn terrain_label(
    elevation_gain_m: f64,
    elevation_loss_m: f64,
    distance_m: f64,
) -> Option<&'static str> {
    if distance_m <= 0.0 {
        return None;
    }
    let per_km = (elevation_gain_m + elevation_loss_m) / (distance_m / 1000.0);
    Some(if per_km < 10.0 {
        "flat"
    } else if per_km < 25.0 {
        "undulating"
    } else if per_km < 50.0 {
        "hilly"
    } else {
        "mountainous"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converters() {
        assert_eq!(Converter::Identity.apply(42.0), 42.0);
        assert!((Converter::Scale(RAW_SPEED_SCALE).apply(33.0) - 3.3).abs() < 1e-9);
        assert_eq!(Converter::Divide(CM_PER_M).apply(12_345.0), 123.45);
    }

    #[test]
    fn test_pace() {
        assert_eq!(pace_from_speed(4.0), Some(250.0));
        assert_eq!(pace_from_speed(0.0), None);
        assert_eq!(pace_from_distance(1000.0, 300.0), Some(300.0));
        assert_eq!(pace_from_distance(0.0, 300.0), None);
    }

    #[test]
    fn test_terrain_label() {
        assert_eq!(terrain_label(2.0, 3.0, 1000.0), Some("flat"));
        assert_eq!(terrain_label(10.0, 5.0, 1000.0), Some("undulating"));
        assert_eq!(terrain_label(20.0, 20.0, 1000.0), Some("hilly"));
        assert_eq!(terrain_label(80.0, 10.0, 1000.0), Some("mountainous"));
        assert_eq!(terrain_label(5.0, 5.0, 0.0), None);
    }

    #[test]
    fn test_grams_to_kg() {
        assert_eq!(grams_to_kg(70_500.0), 70.5);
    }
}
