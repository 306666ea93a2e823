//! Deterministic callout rules with verbosity and cooldown gates.
//!
//! Two rule sets: periodic rules run on every 1 Hz tick, lap rules run once
//! per completed lap and therefore carry no cooldown of their own.

use std::collections::HashMap;

use serde_json::json;

use model::{
    format_delta, format_lap_time, Callout, CalloutKind, FuelUsage, Priority, Snapshot, TyreTrend,
    Verbosity,
};

const CORNER_NAMES: [&str; 4] = ["front left", "front right", "rear left", "rear right"];

pub struct Rule {
    pub kind: CalloutKind,
    pub priority: Priority,
    pub min_verbosity: u8,
    pub cooldown_ms: u64,
    pub eval: fn(&Snapshot) -> Option<(serde_json::Value, String)>,
}

pub const PERIODIC_RULES: &[Rule] = &[
    Rule {
        kind: CalloutKind::FuelLow,
        priority: Priority::Critical,
        min_verbosity: 1,
        cooldown_ms: 60_000,
        eval: eval_fuel_low,
    },
    Rule {
        kind: CalloutKind::TyreTempHigh,
        priority: Priority::Critical,
        min_verbosity: 1,
        cooldown_ms: 30_000,
        eval: eval_tyre_temp_high,
    },
    Rule {
        kind: CalloutKind::TyreTrend,
        priority: Priority::Normal,
        min_verbosity: 2,
        cooldown_ms: 60_000,
        eval: eval_tyre_trend,
    },
];

pub const LAP_RULES: &[Rule] = &[
    Rule {
        kind: CalloutKind::LapDelta,
        priority: Priority::Normal,
        min_verbosity: 2,
        cooldown_ms: 0,
        eval: eval_lap_delta,
    },
    Rule {
        kind: CalloutKind::LapSummary,
        priority: Priority::Info,
        min_verbosity: 3,
        cooldown_ms: 0,
        eval: eval_lap_summary,
    },
    Rule {
        kind: CalloutKind::FuelEstimate,
        priority: Priority::Normal,
        min_verbosity: 2,
        cooldown_ms: 0,
        eval: eval_fuel_estimate,
    },
    Rule {
        kind: CalloutKind::RevLimiter,
        priority: Priority::Normal,
        min_verbosity: 2,
        cooldown_ms: 0,
        eval: eval_rev_limiter,
    },
    Rule {
        kind: CalloutKind::TcsIntervention,
        priority: Priority::Normal,
        min_verbosity: 2,
        cooldown_ms: 0,
        eval: eval_tcs,
    },
    Rule {
        kind: CalloutKind::AsmIntervention,
        priority: Priority::Normal,
        min_verbosity: 2,
        cooldown_ms: 0,
        eval: eval_asm,
    },
    Rule {
        kind: CalloutKind::RaceProgress,
        priority: Priority::Normal,
        min_verbosity: 2,
        cooldown_ms: 0,
        eval: eval_race_progress,
    },
    Rule {
        kind: CalloutKind::PaceSummary,
        priority: Priority::Info,
        min_verbosity: 3,
        cooldown_ms: 0,
        eval: eval_pace_summary,
    },
];

pub struct CalloutEngine {
    verbosity: Verbosity,
    last_fired: HashMap<CalloutKind, u64>,
}

impl CalloutEngine {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity, last_fired: HashMap::new() }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    pub fn periodic_at(&mut self, snapshot: &Snapshot, now_ms: u64) -> Vec<Callout> {
        self.evaluate(PERIODIC_RULES, snapshot, now_ms)
    }

    pub fn lap_complete_at(&mut self, snapshot: &Snapshot, now_ms: u64) -> Vec<Callout> {
        self.evaluate(LAP_RULES, snapshot, now_ms)
    }

    fn evaluate(&mut self, rules: &[Rule], snapshot: &Snapshot, now_ms: u64) -> Vec<Callout> {
        let mut out = Vec::new();
        for rule in rules {
            if !self.verbosity.admits(rule.priority) {
                continue;
            }
            if self.verbosity.level() < rule.min_verbosity {
                continue;
            }
            if rule.cooldown_ms > 0 {
                if let Some(&last) = self.last_fired.get(&rule.kind) {
                    if now_ms.saturating_sub(last) < rule.cooldown_ms {
                        continue;
                    }
                }
            }
            if let Some((data, message)) = (rule.eval)(snapshot) {
                self.last_fired.insert(rule.kind, now_ms);
                out.push(Callout {
                    kind: rule.kind,
                    priority: rule.priority,
                    data,
                    message,
                    timestamp_ms: now_ms,
                });
            }
        }
        out
    }
}

fn eval_fuel_low(s: &Snapshot) -> Option<(serde_json::Value, String)> {
    if s.fuel_usage != FuelUsage::On || s.fuel_per_lap <= 0.0 {
        return None;
    }
    if !(s.est_laps_remaining.is_finite() && s.est_laps_remaining < 3.0) {
        return None;
    }
    Some((
        json!({
            "lapsRemaining": s.est_laps_remaining,
            "fuelLevel": s.fuel_level,
            "perLap": s.fuel_per_lap,
        }),
        format!("Fuel is low, about {:.1} laps left in the tank.", s.est_laps_remaining),
    ))
}

fn eval_tyre_temp_high(s: &Snapshot) -> Option<(serde_json::Value, String)> {
    let temps = s.tyre_temp.as_array();
    let (idx, hottest) = temps
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    if **hottest <= 100.0 {
        return None;
    }
    Some((
        json!({
            "corner": s.tyre_temp.labelled()[idx].0,
            "temperature": **hottest,
            "temps": s.tyre_temp,
        }),
        format!("{} tyre is at {:.0} degrees, look after it.", capitalize(CORNER_NAMES[idx]), hottest),
    ))
}

fn eval_tyre_trend(s: &Snapshot) -> Option<(serde_json::Value, String)> {
    let rising: Vec<usize> = s
        .tyre_trend
        .as_array()
        .iter()
        .enumerate()
        .filter(|(_, t)| ***t == TyreTrend::Rising)
        .map(|(i, _)| i)
        .collect();
    if rising.is_empty() {
        return None;
    }
    let names: Vec<&str> = rising.iter().map(|&i| CORNER_NAMES[i]).collect();
    let labels: Vec<&str> = rising.iter().map(|&i| s.tyre_trend.labelled()[i].0).collect();
    Some((
        json!({"rising": labels, "temps": s.tyre_temp}),
        format!("Tyre temps are climbing at the {}.", names.join(" and ")),
    ))
}

fn eval_lap_delta(s: &Snapshot) -> Option<(serde_json::Value, String)> {
    if !(s.last_lap_ms > 0 && s.best_lap_ms > 0 && s.lap_delta_ms.abs() > 500) {
        return None;
    }
    Some((
        json!({
            "lastLapMs": s.last_lap_ms,
            "bestLapMs": s.best_lap_ms,
            "deltaMs": s.lap_delta_ms,
        }),
        format!(
            "Last lap {}, {} to your best.",
            format_lap_time(s.last_lap_ms),
            format_delta(s.lap_delta_ms)
        ),
    ))
}

fn eval_lap_summary(s: &Snapshot) -> Option<(serde_json::Value, String)> {
    if s.last_lap_ms <= 0 {
        return None;
    }
    let completed = (s.lap_count - 1).max(1);
    Some((
        json!({"lap": completed, "timeMs": s.last_lap_ms, "topSpeedKmh": s.top_speed_kmh}),
        format!("Lap {} done in {}.", completed, format_lap_time(s.last_lap_ms)),
    ))
}

fn eval_fuel_estimate(s: &Snapshot) -> Option<(serde_json::Value, String)> {
    if s.fuel_usage != FuelUsage::On || s.fuel_per_lap <= 0.0 {
        return None;
    }
    Some((
        json!({
            "perLap": s.fuel_per_lap,
            "lapsRemaining": s.est_laps_remaining,
            "fuelLevel": s.fuel_level,
        }),
        format!(
            "Using {:.1} litres a lap, about {:.1} laps of fuel left.",
            s.fuel_per_lap, s.est_laps_remaining
        ),
    ))
}

fn eval_rev_limiter(s: &Snapshot) -> Option<(serde_json::Value, String)> {
    if s.rev_limiter_fraction <= 0.15 {
        return None;
    }
    Some((
        json!({"fraction": s.rev_limiter_fraction}),
        format!(
            "You were on the limiter {:.0}% of that lap, worth an earlier shift.",
            s.rev_limiter_fraction * 100.0
        ),
    ))
}

fn eval_tcs(s: &Snapshot) -> Option<(serde_json::Value, String)> {
    if s.tcs_fraction <= 0.10 {
        return None;
    }
    Some((
        json!({"fraction": s.tcs_fraction}),
        format!("Traction control was in for {:.0}% of the lap.", s.tcs_fraction * 100.0),
    ))
}

fn eval_asm(s: &Snapshot) -> Option<(serde_json::Value, String)> {
    if s.asm_fraction <= 0.10 {
        return None;
    }
    Some((
        json!({"fraction": s.asm_fraction}),
        format!("Stability management stepped in for {:.0}% of the lap.", s.asm_fraction * 100.0),
    ))
}

fn eval_race_progress(s: &Snapshot) -> Option<(serde_json::Value, String)> {
    if s.laps_in_race <= 0 {
        return None;
    }
    let completed = s.lap_count - 1;
    let remaining = s.laps_in_race - completed;
    if completed <= 0 || remaining < 0 {
        return None;
    }
    if completed % 5 != 0 && remaining > 3 {
        return None;
    }
    Some((
        json!({"lap": completed, "total": s.laps_in_race, "remaining": remaining}),
        format!("Lap {} of {} done, {} to go.", completed, s.laps_in_race, remaining),
    ))
}

fn eval_pace_summary(s: &Snapshot) -> Option<(serde_json::Value, String)> {
    if s.recent_lap_ms.len() < 3 {
        return None;
    }
    let last3 = &s.recent_lap_ms[s.recent_lap_ms.len() - 3..];
    let avg = last3.iter().map(|&ms| ms as i64).sum::<i64>() / 3;
    let word = match s.pace_trend {
        model::PaceTrend::Improving => "picking up",
        model::PaceTrend::Degrading => "falling away",
        model::PaceTrend::Consistent => "steady",
    };
    Some((
        json!({"trend": s.pace_trend, "averageMs": avg, "recent": s.recent_lap_ms}),
        format!(
            "Pace is {}, averaging {} over the last three laps.",
            word,
            format_lap_time(avg as i32)
        ),
    ))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
