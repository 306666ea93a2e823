use serde::{Deserialize, Serialize};

/// Per-corner quad, always in FL/FR/RL/RR order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Corners<T> {
    pub fl: T,
    pub fr: T,
    pub rl: T,
    pub rr: T,
}

impl<T> Corners<T> {
    pub fn as_array(&self) -> [&T; 4] {
        [&self.fl, &self.fr, &self.rl, &self.rr]
    }

    /// Corner values paired with their conventional short labels.
    pub fn labelled(&self) -> [(&'static str, &T); 4] {
        [("FL", &self.fl), ("FR", &self.fr), ("RL", &self.rl), ("RR", &self.rr)]
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Corners<U> {
        Corners { fl: f(&self.fl), fr: f(&self.fr), rl: f(&self.rl), rr: f(&self.rr) }
    }

    pub fn any(&self, mut f: impl FnMut(&T) -> bool) -> bool {
        f(&self.fl) || f(&self.fr) || f(&self.rl) || f(&self.rr)
    }
}

/// Booleans decoded from the 16-bit flag word at 0x8E.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flags {
    pub on_track: bool,
    pub paused: bool,
    pub loading: bool,
    pub in_gear: bool,
    pub has_turbo: bool,
    pub rev_limiter: bool,
    pub handbrake: bool,
    pub lights: bool,
    pub high_beam: bool,
    pub low_beam: bool,
    pub asm_active: bool,
    pub tcs_active: bool,
}

impl Flags {
    pub fn from_word(w: u16) -> Self {
        Self {
            on_track: w & (1 << 0) != 0,
            paused: w & (1 << 1) != 0,
            loading: w & (1 << 2) != 0,
            in_gear: w & (1 << 3) != 0,
            has_turbo: w & (1 << 4) != 0,
            rev_limiter: w & (1 << 5) != 0,
            handbrake: w & (1 << 6) != 0,
            lights: w & (1 << 7) != 0,
            high_beam: w & (1 << 8) != 0,
            low_beam: w & (1 << 9) != 0,
            asm_active: w & (1 << 10) != 0,
            tcs_active: w & (1 << 11) != 0,
        }
    }

    pub fn to_word(&self) -> u16 {
        let mut w = 0u16;
        let bits = [
            self.on_track,
            self.paused,
            self.loading,
            self.in_gear,
            self.has_turbo,
            self.rev_limiter,
            self.handbrake,
            self.lights,
            self.high_beam,
            self.low_beam,
            self.asm_active,
            self.tcs_active,
        ];
        for (i, set) in bits.into_iter().enumerate() {
            if set {
                w |= 1 << i;
            }
        }
        w
    }
}

/// One decoded telemetry sample (~60 Hz). Immutable after decode; shared
/// read-only between the analyzer, the logger and the client fan-out.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub packet_id: u32,
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub rotation: [f32; 3],
    pub rel_orientation_to_north: f32,
    pub angular_velocity: [f32; 3],
    pub body_height: f32,
    pub engine_rpm: f32,
    pub fuel_level: f32,
    pub fuel_capacity: f32,
    /// Wire value, metres per second. Clients get km/h via `speed_kmh`.
    pub speed_mps: f32,
    pub boost: f32,
    pub oil_pressure: f32,
    pub water_temp: f32,
    pub oil_temp: f32,
    pub tyre_temp: Corners<f32>,
    pub lap_count: i16,
    pub laps_in_race: i16,
    /// Milliseconds, -1 = not set yet.
    pub best_lap_ms: i32,
    /// Milliseconds, -1 = not set yet.
    pub last_lap_ms: i32,
    pub day_progression_ms: i32,
    pub qualifying_position: i16,
    pub pre_race_num_cars: i16,
    pub rpm_alert_min: i16,
    pub rpm_alert_max: i16,
    pub calculated_max_speed: i16,
    pub flags: Flags,
    pub current_gear: u8,
    pub suggested_gear: u8,
    /// 0..100, normalized from the wire byte.
    pub throttle_pct: f32,
    /// 0..100, normalized from the wire byte.
    pub brake_pct: f32,
    pub wheel_rps: Corners<f32>,
    pub tyre_radius: Corners<f32>,
    pub suspension_height: Corners<f32>,
    pub clutch_pedal: f32,
    pub clutch_engagement: f32,
    pub rpm_after_clutch: f32,
    pub transmission_top_speed: f32,
    pub gear_ratios: [f32; 8],
    pub car_code: i32,
}

impl Frame {
    pub fn speed_kmh(&self) -> f32 {
        self.speed_mps * 3.6
    }
}
