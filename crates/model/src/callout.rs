use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalloutKind {
    FuelLow,
    FuelEstimate,
    TyreTempHigh,
    TyreTrend,
    LapDelta,
    LapSummary,
    RevLimiter,
    TcsIntervention,
    AsmIntervention,
    RaceProgress,
    PaceSummary,
}

impl CalloutKind {
    /// Wire/tag name, matching the serde form.
    pub fn as_str(&self) -> &'static str {
        match self {
            CalloutKind::FuelLow => "fuel_low",
            CalloutKind::FuelEstimate => "fuel_estimate",
            CalloutKind::TyreTempHigh => "tyre_temp_high",
            CalloutKind::TyreTrend => "tyre_trend",
            CalloutKind::LapDelta => "lap_delta",
            CalloutKind::LapSummary => "lap_summary",
            CalloutKind::RevLimiter => "rev_limiter",
            CalloutKind::TcsIntervention => "tcs_intervention",
            CalloutKind::AsmIntervention => "asm_intervention",
            CalloutKind::RaceProgress => "race_progress",
            CalloutKind::PaceSummary => "pace_summary",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    Normal,
    Info,
}

/// A short message describing a noteworthy event. Lives from generation to
/// delivery, then is discarded.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Callout {
    #[serde(rename = "type")]
    pub kind: CalloutKind,
    pub priority: Priority,
    /// Free-form payload handed to the voice model for verbalization.
    pub data: serde_json::Value,
    /// Plaintext fallback sentence.
    pub message: String,
    pub timestamp_ms: u64,
}

/// Callout filter level, 1..=3. Level 1 admits only critical callouts,
/// level 2 adds normal, level 3 admits everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Verbosity(u8);

impl Verbosity {
    pub fn new(level: u8) -> Self {
        Self(level.clamp(1, 3))
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    pub fn admits(&self, priority: Priority) -> bool {
        match priority {
            Priority::Critical => true,
            Priority::Normal => self.0 >= 2,
            Priority::Info => self.0 >= 3,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Self(2)
    }
}

/// Lap-time presentation, `MM:SS.mmm`.
pub fn format_lap_time(ms: i32) -> String {
    let ms = ms.max(0);
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{minutes:02}:{seconds:02}.{millis:03}")
}

/// Delta presentation, `+S.sss s` / `-S.sss s` without a space before the
/// suffix.
pub fn format_delta(ms: i32) -> String {
    let sign = if ms >= 0 { "+" } else { "-" };
    format!("{}{:.3}s", sign, ms.abs() as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_clamps_and_gates() {
        assert_eq!(Verbosity::new(0).level(), 1);
        assert_eq!(Verbosity::new(7).level(), 3);

        let v1 = Verbosity::new(1);
        assert!(v1.admits(Priority::Critical));
        assert!(!v1.admits(Priority::Normal));
        assert!(!v1.admits(Priority::Info));

        let v2 = Verbosity::new(2);
        assert!(v2.admits(Priority::Normal));
        assert!(!v2.admits(Priority::Info));

        let v3 = Verbosity::new(3);
        assert!(v3.admits(Priority::Info));
    }

    #[test]
    fn kind_names_match_serde() {
        for kind in [
            CalloutKind::FuelLow,
            CalloutKind::TyreTempHigh,
            CalloutKind::LapDelta,
            CalloutKind::PaceSummary,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }

    #[test]
    fn lap_time_formatting() {
        assert_eq!(format_lap_time(102_350), "01:42.350");
        assert_eq!(format_lap_time(59_999), "00:59.999");
        assert_eq!(format_lap_time(600_000), "10:00.000");
        assert_eq!(format_lap_time(-1), "00:00.000");
    }

    #[test]
    fn delta_formatting() {
        assert_eq!(format_delta(527), "+0.527s");
        assert_eq!(format_delta(-1_204), "-1.204s");
        assert_eq!(format_delta(0), "+0.000s");
    }

    #[test]
    fn callout_wire_shape() {
        let c = Callout {
            kind: CalloutKind::FuelLow,
            priority: Priority::Critical,
            data: serde_json::json!({"lapsRemaining": 2.4}),
            message: "Fuel is low.".into(),
            timestamp_ms: 1000,
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"], "fuel_low");
        assert_eq!(v["priority"], "critical");
        assert_eq!(v["timestampMs"], 1000);
    }
}
