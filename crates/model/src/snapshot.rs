use serde::{Deserialize, Serialize};

use crate::Corners;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaceTrend {
    Improving,
    Degrading,
    #[default]
    Consistent,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TyreTrend {
    Rising,
    #[default]
    Stable,
    Cooling,
}

/// Whether the session consumes fuel at all. Starts undetermined and is
/// settled one way within the first 30 seconds of a race session; it never
/// transitions back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelUsage {
    #[default]
    Undetermined,
    On,
    Off,
}

/// The analyzer's exported 1 Hz summary. Regenerated on demand; every field
/// is derived from the frame stream of the current race session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub lap_count: i16,
    pub laps_in_race: i16,
    pub last_lap_ms: i32,
    pub best_lap_ms: i32,
    /// last - best; zero unless both are set.
    pub lap_delta_ms: i32,
    pub pace_trend: PaceTrend,
    /// Most recent completed lap times, oldest first, capped at five.
    pub recent_lap_ms: Vec<i32>,
    pub fuel_level: f32,
    pub fuel_capacity: f32,
    /// Litres per lap; zero while unknown.
    pub fuel_per_lap: f32,
    /// Positive infinity while unknown (serializes to null).
    pub est_laps_remaining: f64,
    pub fuel_usage: FuelUsage,
    pub tyre_temp: Corners<f32>,
    pub tyre_trend: Corners<TyreTrend>,
    /// Fraction of the current lap spent on the rev limiter, 0..1.
    pub rev_limiter_fraction: f32,
    pub tcs_fraction: f32,
    pub asm_fraction: f32,
    pub speed_kmh: f32,
    pub top_speed_kmh: f32,
    pub engine_rpm: f32,
    pub current_gear: u8,
    pub suggested_gear: u8,
    pub car_code: i32,
    pub on_track: bool,
    pub session_duration_ms: u64,
    pub lap_start_ms: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            lap_count: 0,
            laps_in_race: 0,
            last_lap_ms: -1,
            best_lap_ms: -1,
            lap_delta_ms: 0,
            pace_trend: PaceTrend::Consistent,
            recent_lap_ms: Vec::new(),
            fuel_level: 0.0,
            fuel_capacity: 0.0,
            fuel_per_lap: 0.0,
            est_laps_remaining: f64::INFINITY,
            fuel_usage: FuelUsage::Undetermined,
            tyre_temp: Corners::default(),
            tyre_trend: Corners::default(),
            rev_limiter_fraction: 0.0,
            tcs_fraction: 0.0,
            asm_fraction: 0.0,
            speed_kmh: 0.0,
            top_speed_kmh: 0.0,
            engine_rpm: 0.0,
            current_gear: 0,
            suggested_gear: 0,
            car_code: -1,
            on_track: false,
            session_duration_ms: 0,
            lap_start_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_fresh() {
        let s = Snapshot::default();
        assert_eq!(s.best_lap_ms, -1);
        assert_eq!(s.fuel_per_lap, 0.0);
        assert!(s.est_laps_remaining.is_infinite());
        assert_eq!(s.fuel_usage, FuelUsage::Undetermined);
        assert!(s.recent_lap_ms.is_empty());
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(serde_json::to_value(PaceTrend::Improving).unwrap(), "improving");
        assert_eq!(serde_json::to_value(TyreTrend::Cooling).unwrap(), "cooling");
        assert_eq!(serde_json::to_value(FuelUsage::Undetermined).unwrap(), "undetermined");
    }

    #[test]
    fn infinite_estimate_serializes_to_null() {
        let s = Snapshot::default();
        let v = serde_json::to_value(&s).unwrap();
        assert!(v["estLapsRemaining"].is_null());
    }
}
