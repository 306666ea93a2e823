//! Frame fan-out and the two schedulers.
//!
//! The consumer task is the analyzer's single writer: every frame goes to
//! the logger and the analyzer at full rate, and to clients through a
//! shared monotonic throttle. Lap events cross to the scheduler task, which
//! owns the callout engine and its cooldown map.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tracing::debug;

use analysis::{now_ms, Analyzer, CalloutEngine, LapEvent};
use model::{Callout, Verbosity};
use pitwall_engineer::Engineer;
use pitwall_ingest_gt7::FrameRx;
use pitwall_io::{ConfigStore, LoggerHandle};

use crate::hub::Hub;

pub const DEFAULT_BROADCAST_HZ: u32 = 30;
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);
const CONTEXT_INTERVAL: Duration = Duration::from_secs(5);

/// Shared client-facing throttle: emissions are spaced at least
/// `1000 / hz` ms apart, regardless of how many clients are connected.
pub struct Throttle {
    min_interval: Duration,
    last_emit: Option<Instant>,
    emitted: u64,
    dropped: u64,
}

impl Throttle {
    pub fn new(hz: u32) -> Self {
        let divisor = hz.max(1) as u64;
        Self {
            min_interval: Duration::from_nanos(1_000_000_000 / divisor),
            last_emit: None,
            emitted: 0,
            dropped: 0,
        }
    }

    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.min_interval {
                self.dropped += 1;
                return false;
            }
        }
        self.last_emit = Some(now);
        self.emitted += 1;
        true
    }

    pub fn counts(&self) -> (u64, u64) {
        (self.emitted, self.dropped)
    }
}

pub fn spawn_consumer(
    mut frames: FrameRx,
    analyzer: Arc<Mutex<Analyzer>>,
    logger: LoggerHandle,
    hub: Hub,
    lap_tx: mpsc::Sender<LapEvent>,
    broadcast_hz: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut throttle = Throttle::new(broadcast_hz);
        while let Some(frame) = frames.recv().await {
            let now = now_ms();
            logger.log_frame(now, frame.clone());
            let lap_event = analyzer.lock().ingest_at(&frame, now);
            if let Some(event) = lap_event {
                debug!(lap = event.lap_count, "lap edge");
                // low-rate channel; losing one under pathological load is
                // preferable to stalling frame consumption
                let _ = lap_tx.try_send(event);
            }
            if throttle.should_emit() {
                if let Ok(value) = serde_json::to_value(&*frame) {
                    hub.broadcast("telemetry", value);
                }
            }
        }
    })
}

/// 1 Hz: snapshot broadcast + periodic rules; lap edges: lap rules. One
/// task owns the engine, so a tick's callouts always go out before the
/// next tick's.
pub fn spawn_scheduler(
    analyzer: Arc<Mutex<Analyzer>>,
    engineer: Arc<Engineer>,
    hub: Hub,
    store: Arc<ConfigStore>,
    mut lap_rx: mpsc::Receiver<LapEvent>,
    verbosity: Arc<AtomicU8>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut engine = CalloutEngine::new(Verbosity::default());
        let mut tick = time::interval(SNAPSHOT_INTERVAL);
        tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            let callouts = tokio::select! {
                _ = tick.tick() => {
                    engine.set_verbosity(Verbosity::new(verbosity.load(Ordering::Relaxed)));
                    let now = now_ms();
                    let snapshot = analyzer.lock().snapshot_at(now);
                    if let Ok(value) = serde_json::to_value(&snapshot) {
                        hub.broadcast("telemetry:snapshot", value);
                    }
                    engine.periodic_at(&snapshot, now)
                }
                Some(_) = lap_rx.recv() => {
                    engine.set_verbosity(Verbosity::new(verbosity.load(Ordering::Relaxed)));
                    let now = now_ms();
                    let snapshot = analyzer.lock().snapshot_at(now);
                    engine.lap_complete_at(&snapshot, now)
                }
            };
            deliver(&callouts, &engineer, &hub, &store).await;
        }
    })
}

/// Voice session live: callouts go to the model. Otherwise, when the
/// engineer is enabled, the plaintext keeps the dashboard history useful.
async fn deliver(callouts: &[Callout], engineer: &Engineer, hub: &Hub, store: &ConfigStore) {
    if callouts.is_empty() {
        return;
    }
    if engineer.deliver_callouts(callouts).await {
        return;
    }
    if store.engineer_enabled() {
        for callout in callouts {
            hub.broadcast(
                "engineer:text",
                json!({
                    "text": callout.message,
                    "type": callout.kind,
                    "timestamp": callout.timestamp_ms,
                }),
            );
        }
    }
}

pub fn spawn_context_ticker(
    analyzer: Arc<Mutex<Analyzer>>,
    engineer: Arc<Engineer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = time::interval(CONTEXT_INTERVAL);
        tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if !engineer.is_active().await {
                continue;
            }
            let snapshot = analyzer.lock().snapshot_at(now_ms());
            engineer.update_context(&snapshot).await;
        }
    })
}
