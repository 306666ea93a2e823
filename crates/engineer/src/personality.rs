//! Voice personalities and prompt composition.

use once_cell::sync::Lazy;

use model::{
    format_delta, format_lap_time, Callout, CustomPersonality, FuelUsage, PaceTrend, Personality,
    SessionConfig, Snapshot,
};

/// Fixed base block. Personality and custom text may shape style only; this
/// part of the instruction is never overridable.
const BASE_INSTRUCTION: &str = "\
You are a race engineer on the radio with a driver in a live session. \
Keep every reply to one or two sentences; the driver is at speed and can \
only absorb short messages. Use natural racing terminology (box, stint, \
delta, out-lap). You will receive background messages prefixed with \
[CONTEXT UPDATE]; integrate them silently and do not reply to them. \
Messages prefixed with [CALLOUT: <type>] are events you must relay to the \
driver in your own words, keeping every number intact. When the driver \
speaks to you, answer their question directly using the most recent \
context before anything else.";

pub static PERSONALITIES: Lazy<Vec<Personality>> = Lazy::new(|| {
    vec![
        Personality {
            id: "grace".into(),
            name: "Grace".into(),
            prompt: "You are calm, precise and economical with words, in the \
                     manner of a veteran British endurance engineer. Dry \
                     understatement is welcome; panic never is."
                .into(),
            voice: "Aoede".into(),
        },
        Personality {
            id: "viktor".into(),
            name: "Viktor".into(),
            prompt: "You are blunt and data-driven. Lead with the number, \
                     skip pleasantries, and tell the driver exactly what to \
                     change next lap."
                .into(),
            voice: "Charon".into(),
        },
        Personality {
            id: "sofia".into(),
            name: "Sofia".into(),
            prompt: "You are warm and energetic, quick to celebrate good \
                     sectors and quicker to refocus the driver after a \
                     mistake. Keep the enthusiasm short and useful."
                .into(),
            voice: "Kore".into(),
        },
    ]
});

pub const DEFAULT_VOICE: &str = "Puck";

pub fn personality_by_id(id: &str) -> Option<Personality> {
    PERSONALITIES.iter().find(|p| p.id == id).cloned()
}

pub fn default_personality() -> Personality {
    PERSONALITIES[0].clone()
}

fn from_custom(custom: &CustomPersonality) -> Personality {
    Personality {
        id: "custom".into(),
        name: custom.name.clone(),
        prompt: custom.prompt.clone(),
        voice: custom.voice.clone().unwrap_or_else(|| DEFAULT_VOICE.to_string()),
    }
}

/// Custom personality wins over a selected id; unknown ids fall back to the
/// default.
pub fn resolve(config: &SessionConfig) -> Personality {
    if let Some(custom) = &config.custom_personality {
        return from_custom(custom);
    }
    config
        .personality_id
        .as_deref()
        .and_then(personality_by_id)
        .unwrap_or_else(default_personality)
}

/// Base block, then personality prompt, then the user's custom text.
pub fn compose_instruction(personality: &Personality, custom_instructions: Option<&str>) -> String {
    let mut instruction = String::from(BASE_INSTRUCTION);
    instruction.push_str("\n\n");
    instruction.push_str(&personality.prompt);
    if let Some(custom) = custom_instructions {
        let custom = custom.trim();
        if !custom.is_empty() {
            instruction.push_str("\n\n");
            instruction.push_str(custom);
        }
    }
    instruction
}

/// One callout rendered as a complete user turn.
pub fn callout_turn(callout: &Callout) -> String {
    format!(
        "[CALLOUT: {}] {} Deliver this information in your style.",
        callout.kind.as_str(),
        callout.message
    )
}

/// The ~5 s background context block. Sent with `turn_complete = false` so
/// the model absorbs it without replying.
pub fn format_context(s: &Snapshot) -> String {
    let mut lines = vec!["[CONTEXT UPDATE]".to_string()];
    if s.laps_in_race > 0 {
        lines.push(format!("Lap {}/{}", s.lap_count, s.laps_in_race));
    } else {
        lines.push(format!("Lap {}", s.lap_count));
    }
    if s.best_lap_ms > 0 || s.last_lap_ms > 0 {
        let mut times = Vec::new();
        if s.best_lap_ms > 0 {
            times.push(format!("Best {}", format_lap_time(s.best_lap_ms)));
        }
        if s.last_lap_ms > 0 {
            times.push(format!("Last {}", format_lap_time(s.last_lap_ms)));
        }
        if s.lap_delta_ms != 0 {
            times.push(format!("Delta {}", format_delta(s.lap_delta_ms)));
        }
        lines.push(times.join(" | "));
    }
    let pace = match s.pace_trend {
        PaceTrend::Improving => "improving",
        PaceTrend::Degrading => "degrading",
        PaceTrend::Consistent => "consistent",
    };
    lines.push(format!("Pace: {pace}"));
    lines.push(format!(
        "Speed {:.0} km/h | Gear {} | {:.0} rpm",
        s.speed_kmh, s.current_gear, s.engine_rpm
    ));
    if s.fuel_usage == FuelUsage::On {
        let mut fuel = format!("Fuel {:.1} L", s.fuel_level);
        if s.fuel_per_lap > 0.0 {
            fuel.push_str(&format!(
                ", {:.1} L/lap, {:.1} laps left",
                s.fuel_per_lap, s.est_laps_remaining
            ));
        }
        lines.push(fuel);
    }
    lines.push(format!(
        "Tyres FL {:.0} FR {:.0} RL {:.0} RR {:.0}",
        s.tyre_temp.fl, s.tyre_temp.fr, s.tyre_temp.rl, s.tyre_temp.rr
    ));
    let mut assists = Vec::new();
    if s.tcs_fraction > 0.05 {
        assists.push(format!("TCS {:.0}%", s.tcs_fraction * 100.0));
    }
    if s.asm_fraction > 0.05 {
        assists.push(format!("ASM {:.0}%", s.asm_fraction * 100.0));
    }
    if !assists.is_empty() {
        lines.push(assists.join(" | "));
    }
    lines.join("\n")
}
