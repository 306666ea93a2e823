//! Stateful per-session telemetry analyzer.
//!
//! Single-writer: only the frame consumer feeds it. Snapshots are built on
//! demand and are plain values, so readers never see torn state.

use std::collections::VecDeque;

use model::{Corners, Frame, FuelUsage, PaceTrend, Snapshot, TyreTrend};

pub const RECENT_LAPS_CAP: usize = 5;

const TYRE_WINDOW_MS: u64 = 5_000;
const TYRE_TREND_DELTA_C: f32 = 3.0;
/// Fuel consumption below this is measurement noise.
const FUEL_EPSILON: f32 = 0.01;
const FUEL_CHECKPOINTS_MS: [u64; 6] = [5_000, 10_000, 15_000, 20_000, 25_000, 30_000];
/// The per-ms fallback projection needs some elapsed time to be meaningful.
const FUEL_FALLBACK_MIN_ELAPSED_MS: u64 = 5_000;

/// Emitted after lap-change bookkeeping completes; a subsequent
/// `snapshot_at` sees post-change state.
#[derive(Clone, Copy, Debug)]
pub struct LapEvent {
    pub lap_count: i16,
    pub last_lap_ms: i32,
}

#[derive(Default)]
pub struct Analyzer {
    race: Option<RaceState>,
}

struct RaceState {
    started_ms: u64,
    car_code: i32,
    initial_fuel: f32,
    fuel_usage: FuelUsage,
    next_checkpoint: usize,
    /// Fuel level at each lap start; index 0 is the out-lap.
    lap_fuel: Vec<f32>,
    recent_laps: VecDeque<i32>,
    lap: LapAccum,
    tyres: Corners<VecDeque<(u64, f32)>>,
    prev_lap_count: i16,
    prev_best_lap_ms: i32,
    prev_fuel_level: f32,
    latest: Frame,
    latest_ms: u64,
}

struct LapAccum {
    start_ms: u64,
    frames: u32,
    rev_limiter: u32,
    tcs: u32,
    asm: u32,
    top_speed_mps: f32,
}

impl LapAccum {
    fn new(start_ms: u64) -> Self {
        Self { start_ms, frames: 0, rev_limiter: 0, tcs: 0, asm: 0, top_speed_mps: 0.0 }
    }

    fn fraction(count: u32, total: u32) -> f32 {
        if total == 0 {
            0.0
        } else {
            count as f32 / total as f32
        }
    }
}

impl RaceState {
    fn new(frame: &Frame, now_ms: u64) -> Self {
        Self {
            started_ms: now_ms,
            car_code: frame.car_code,
            initial_fuel: frame.fuel_level,
            fuel_usage: FuelUsage::Undetermined,
            next_checkpoint: 0,
            lap_fuel: vec![frame.fuel_level],
            recent_laps: VecDeque::new(),
            lap: LapAccum::new(now_ms),
            tyres: Corners::default(),
            prev_lap_count: frame.lap_count,
            prev_best_lap_ms: frame.best_lap_ms,
            prev_fuel_level: frame.fuel_level,
            latest: frame.clone(),
            latest_ms: now_ms,
        }
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, frame: &Frame) -> Option<LapEvent> {
        self.ingest_at(frame, crate::now_ms())
    }

    /// Feed one frame. Off-track frames are a pause: visible state tracks
    /// them, derived state does not.
    pub fn ingest_at(&mut self, frame: &Frame, now_ms: u64) -> Option<LapEvent> {
        if !frame.flags.on_track {
            if let Some(race) = &mut self.race {
                race.latest = frame.clone();
                race.latest_ms = now_ms;
            }
            return None;
        }

        if self.is_new_race(frame) {
            self.race = Some(RaceState::new(frame, now_ms));
        }
        let race = self.race.as_mut().expect("race state exists after reset check");

        let mut event = None;
        if frame.lap_count != race.prev_lap_count {
            if frame.last_lap_ms > 0 {
                race.recent_laps.push_back(frame.last_lap_ms);
                while race.recent_laps.len() > RECENT_LAPS_CAP {
                    race.recent_laps.pop_front();
                }
            }
            race.lap_fuel.push(frame.fuel_level);
            race.lap = LapAccum::new(now_ms);
            event = Some(LapEvent { lap_count: frame.lap_count, last_lap_ms: frame.last_lap_ms });
        }

        race.lap.frames += 1;
        if frame.flags.rev_limiter {
            race.lap.rev_limiter += 1;
        }
        if frame.flags.tcs_active {
            race.lap.tcs += 1;
        }
        if frame.flags.asm_active {
            race.lap.asm += 1;
        }
        if frame.speed_mps > race.lap.top_speed_mps {
            race.lap.top_speed_mps = frame.speed_mps;
        }

        push_tyre_samples(&mut race.tyres, &frame.tyre_temp, now_ms);

        if race.fuel_usage == FuelUsage::Undetermined {
            let elapsed = now_ms.saturating_sub(race.started_ms);
            while race.next_checkpoint < FUEL_CHECKPOINTS_MS.len()
                && elapsed >= FUEL_CHECKPOINTS_MS[race.next_checkpoint]
            {
                if race.initial_fuel - frame.fuel_level > FUEL_EPSILON {
                    race.fuel_usage = FuelUsage::On;
                    break;
                }
                race.next_checkpoint += 1;
                if race.next_checkpoint == FUEL_CHECKPOINTS_MS.len() {
                    race.fuel_usage = FuelUsage::Off;
                }
            }
        }

        race.prev_lap_count = frame.lap_count;
        race.prev_best_lap_ms = frame.best_lap_ms;
        race.prev_fuel_level = frame.fuel_level;
        race.latest = frame.clone();
        race.latest_ms = now_ms;

        event
    }

    fn is_new_race(&self, frame: &Frame) -> bool {
        let Some(race) = &self.race else {
            return true; // first on-track frame in this process
        };
        if frame.car_code != race.car_code {
            return true;
        }
        if frame.lap_count == 0 && race.prev_lap_count > 0 {
            return true;
        }
        if frame.lap_count < race.prev_lap_count - 1 {
            return true;
        }
        if frame.best_lap_ms == -1 && race.prev_best_lap_ms > 0 {
            return true;
        }
        // refuel heuristic; known to mis-fire on endurance pit strategies
        if frame.fuel_capacity > 0.0
            && frame.fuel_level >= frame.fuel_capacity * 0.99
            && race.prev_fuel_level < frame.fuel_capacity * 0.95
        {
            return true;
        }
        false
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_at(crate::now_ms())
    }

    pub fn snapshot_at(&self, now_ms: u64) -> Snapshot {
        let Some(race) = &self.race else {
            return Snapshot::default();
        };
        let f = &race.latest;

        let lap_delta_ms = if f.last_lap_ms > 0 && f.best_lap_ms > 0 {
            f.last_lap_ms - f.best_lap_ms
        } else {
            0
        };
        let (fuel_per_lap, est_laps_remaining) = fuel_model(race, now_ms);

        Snapshot {
            lap_count: f.lap_count,
            laps_in_race: f.laps_in_race,
            last_lap_ms: f.last_lap_ms,
            best_lap_ms: f.best_lap_ms,
            lap_delta_ms,
            pace_trend: pace_trend(&race.recent_laps),
            recent_lap_ms: race.recent_laps.iter().copied().collect(),
            fuel_level: f.fuel_level,
            fuel_capacity: f.fuel_capacity,
            fuel_per_lap,
            est_laps_remaining,
            fuel_usage: race.fuel_usage,
            tyre_temp: f.tyre_temp,
            tyre_trend: race.tyres.map(tyre_trend),
            rev_limiter_fraction: LapAccum::fraction(race.lap.rev_limiter, race.lap.frames),
            tcs_fraction: LapAccum::fraction(race.lap.tcs, race.lap.frames),
            asm_fraction: LapAccum::fraction(race.lap.asm, race.lap.frames),
            speed_kmh: f.speed_kmh(),
            top_speed_kmh: race.lap.top_speed_mps * 3.6,
            engine_rpm: f.engine_rpm,
            current_gear: f.current_gear,
            suggested_gear: f.suggested_gear,
            car_code: f.car_code,
            on_track: f.flags.on_track,
            session_duration_ms: now_ms.saturating_sub(race.started_ms),
            lap_start_ms: race.lap.start_ms,
        }
    }
}

fn push_tyre_samples(rings: &mut Corners<VecDeque<(u64, f32)>>, temps: &Corners<f32>, now_ms: u64) {
    let pairs: [(&mut VecDeque<(u64, f32)>, f32); 4] = [
        (&mut rings.fl, temps.fl),
        (&mut rings.fr, temps.fr),
        (&mut rings.rl, temps.rl),
        (&mut rings.rr, temps.rr),
    ];
    for (ring, temp) in pairs {
        ring.push_back((now_ms, temp));
        while ring.front().is_some_and(|(t, _)| now_ms.saturating_sub(*t) > TYRE_WINDOW_MS) {
            ring.pop_front();
        }
    }
}

fn tyre_trend(ring: &VecDeque<(u64, f32)>) -> TyreTrend {
    if ring.len() < 2 {
        return TyreTrend::Stable;
    }
    let first = ring.front().map(|(_, t)| *t).unwrap_or(0.0);
    let last = ring.back().map(|(_, t)| *t).unwrap_or(0.0);
    if last - first > TYRE_TREND_DELTA_C {
        TyreTrend::Rising
    } else if first - last > TYRE_TREND_DELTA_C {
        TyreTrend::Cooling
    } else {
        TyreTrend::Stable
    }
}

fn pace_trend(recent: &VecDeque<i32>) -> PaceTrend {
    if recent.len() < 3 {
        return PaceTrend::Consistent;
    }
    let n = recent.len();
    let (a, b, c) = (recent[n - 3], recent[n - 2], recent[n - 1]);
    if c < b && b < a {
        PaceTrend::Improving
    } else if c > b && b > a {
        PaceTrend::Degrading
    } else {
        PaceTrend::Consistent
    }
}

/// Burn rate in litres/lap and estimated laps of fuel left. Gated on the
/// usage-determined flag: anything other than `On` reports unknown.
fn fuel_model(race: &RaceState, now_ms: u64) -> (f32, f64) {
    if race.fuel_usage != FuelUsage::On {
        return (0.0, f64::INFINITY);
    }
    let fuel_level = race.latest.fuel_level;

    let rate = burn_rate(&race.lap_fuel);
    if rate > 0.0 {
        return (rate, (fuel_level / rate) as f64);
    }

    // no per-lap data yet; project the session-average consumption onto a
    // reference lap duration
    let elapsed = now_ms.saturating_sub(race.started_ms);
    let consumed = race.initial_fuel - fuel_level;
    if elapsed > FUEL_FALLBACK_MIN_ELAPSED_MS && consumed > FUEL_EPSILON {
        let per_ms = consumed / elapsed as f32;
        let reference_ms = if race.latest.best_lap_ms > 0 {
            race.latest.best_lap_ms
        } else if race.latest.last_lap_ms > 0 {
            race.latest.last_lap_ms
        } else {
            0
        };
        if reference_ms > 0 {
            return (0.0, (fuel_level / (per_ms * reference_ms as f32)) as f64);
        }
    }
    (0.0, f64::INFINITY)
}

/// Average of the most recent three positive per-lap drops, skipping the
/// partial out-lap interval.
fn burn_rate(lap_fuel: &[f32]) -> f32 {
    let mut burns: Vec<f32> = Vec::new();
    for i in 2..lap_fuel.len() {
        let burn = lap_fuel[i - 1] - lap_fuel[i];
        if burn > 0.0 {
            burns.push(burn);
        }
    }
    let take = burns.len().min(3);
    if take == 0 {
        return 0.0;
    }
    burns[burns.len() - take..].iter().sum::<f32>() / take as f32
}
