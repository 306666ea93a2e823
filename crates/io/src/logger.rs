//! NDJSON session logging.
//!
//! A pure sink on its own OS thread, fed over a bounded channel. A log file
//! opens on the first on-track frame, closes on the off-track edge or after
//! 30 s without on-track frames, and reopens on the next edge. Frames seen
//! while the sim is paused or loading are not written (menus report
//! on-track with the loading bit set).

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{info, warn};

use model::Frame;

const IDLE_TIMEOUT_MS: u64 = 30_000;
const QUEUE_CAP: usize = 256;

#[derive(Debug)]
pub enum LogCmd {
    Frame { timestamp_ms: u64, frame: Arc<Frame> },
    Shutdown,
}

pub struct SessionLogger {
    tx: Sender<LogCmd>,
    join: Option<std::thread::JoinHandle<()>>,
}

/// Cheap cloneable feed for the pipeline; the `SessionLogger` itself stays
/// with whoever is responsible for shutdown.
#[derive(Clone)]
pub struct LoggerHandle {
    tx: Sender<LogCmd>,
}

impl LoggerHandle {
    /// Best-effort: a full queue drops the frame rather than stalling the
    /// pipeline.
    pub fn log_frame(&self, timestamp_ms: u64, frame: Arc<Frame>) {
        let _ = self.tx.try_send(LogCmd::Frame { timestamp_ms, frame });
    }
}

impl SessionLogger {
    pub fn spawn(dir: PathBuf) -> Self {
        let (tx, rx) = bounded(QUEUE_CAP);
        let join = std::thread::Builder::new()
            .name("session-logger".into())
            .spawn(move || {
                let mut active: Option<ActiveLog> = None;
                let mut last_on_track_ms: Option<u64> = None;
                loop {
                    match rx.recv_timeout(Duration::from_secs(1)) {
                        Ok(LogCmd::Frame { timestamp_ms, frame }) => {
                            if frame.flags.on_track {
                                last_on_track_ms = Some(timestamp_ms);
                                if frame.flags.paused || frame.flags.loading {
                                    continue;
                                }
                                if active.is_none() {
                                    match ActiveLog::open(&dir, &frame, timestamp_ms) {
                                        Ok(log) => {
                                            info!(path = %log.path.display(), "session log opened");
                                            active = Some(log);
                                        }
                                        Err(e) => warn!(error = %e, "could not open session log"),
                                    }
                                }
                                if let Some(log) = &mut active {
                                    log.write(timestamp_ms, &frame);
                                }
                            } else if let Some(log) = active.take() {
                                log.finalize(timestamp_ms);
                                last_on_track_ms = None;
                            }
                        }
                        Ok(LogCmd::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                            if let Some(log) = active.take() {
                                let end = last_on_track_ms.unwrap_or(0);
                                log.finalize(end);
                            }
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            let idle = last_on_track_ms
                                .map(|t| wall_ms().saturating_sub(t) > IDLE_TIMEOUT_MS)
                                .unwrap_or(false);
                            if idle {
                                if let Some(log) = active.take() {
                                    let end = last_on_track_ms.unwrap_or(0);
                                    log.finalize(end);
                                    last_on_track_ms = None;
                                }
                            }
                        }
                    }
                }
            })
            .expect("spawn session-logger thread");
        Self { tx, join: Some(join) }
    }

    pub fn handle(&self) -> LoggerHandle {
        LoggerHandle { tx: self.tx.clone() }
    }

    /// Best-effort: a full queue drops the frame rather than stalling the
    /// pipeline.
    pub fn log_frame(&self, timestamp_ms: u64, frame: Arc<Frame>) {
        let _ = self.tx.try_send(LogCmd::Frame { timestamp_ms, frame });
    }

    pub fn shutdown(mut self) {
        let _ = self.tx.send(LogCmd::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

struct ActiveLog {
    path: PathBuf,
    meta_path: PathBuf,
    writer: BufWriter<File>,
    started_ms: u64,
    car_code: i32,
    packet_count: u64,
    best_lap_ms: i32,
    final_lap: i16,
}

impl ActiveLog {
    fn open(dir: &Path, frame: &Frame, timestamp_ms: u64) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let stem = format!("{}_car-{}", file_timestamp(timestamp_ms)?, frame.car_code);
        let path = dir.join(format!("{stem}.ndjson"));
        let meta_path = dir.join(format!("{stem}.meta.json"));
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            meta_path,
            writer,
            started_ms: timestamp_ms,
            car_code: frame.car_code,
            packet_count: 0,
            best_lap_ms: -1,
            final_lap: frame.lap_count,
        })
    }

    fn write(&mut self, timestamp_ms: u64, frame: &Frame) {
        let line = json!({"timestamp": timestamp_ms, "data": frame});
        if let Err(e) = writeln!(self.writer, "{line}") {
            warn!(error = %e, "session log write failed");
            return;
        }
        self.packet_count += 1;
        self.final_lap = frame.lap_count;
        if frame.best_lap_ms > 0 {
            self.best_lap_ms = frame.best_lap_ms;
        }
    }

    fn finalize(mut self, ended_ms: u64) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "session log flush failed");
        }
        let meta = json!({
            "startedAt": self.started_ms,
            "endedAt": ended_ms,
            "carCode": self.car_code,
            "totalLaps": self.final_lap,
            "bestLapMs": self.best_lap_ms,
            "packetCount": self.packet_count,
        });
        match serde_json::to_string_pretty(&meta) {
            Ok(text) => {
                if let Err(e) = std::fs::write(&self.meta_path, text) {
                    warn!(error = %e, "session metadata write failed");
                }
            }
            Err(e) => warn!(error = %e, "session metadata serialize failed"),
        }
        info!(path = %self.path.display(), packets = self.packet_count, "session log closed");
    }
}

/// `YYYY-MM-DDTHH-MM-SS`, filesystem-safe.
fn file_timestamp(timestamp_ms: u64) -> anyhow::Result<String> {
    let fmt = format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]");
    let when = OffsetDateTime::from_unix_timestamp((timestamp_ms / 1000) as i64)?;
    Ok(when.format(&fmt)?)
}

fn wall_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Flags;
    use tempfile::tempdir;

    fn on_track_frame(lap: i16, best: i32) -> Arc<Frame> {
        Arc::new(Frame {
            car_code: 3341,
            lap_count: lap,
            best_lap_ms: best,
            flags: Flags { on_track: true, ..Default::default() },
            ..Default::default()
        })
    }

    fn off_track_frame() -> Arc<Frame> {
        Arc::new(Frame { car_code: 3341, ..Default::default() })
    }

    #[test]
    fn opens_on_edge_and_finalizes_on_exit() {
        let dir = tempdir().unwrap();
        let logger = SessionLogger::spawn(dir.path().to_path_buf());

        let t0 = 1_700_000_000_000u64;
        logger.log_frame(t0, on_track_frame(1, -1));
        logger.log_frame(t0 + 16, on_track_frame(1, -1));
        logger.log_frame(t0 + 32, on_track_frame(2, 101_823));
        logger.log_frame(t0 + 60_000, off_track_frame());
        logger.shutdown();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 2, "ndjson + sidecar expected");

        let ndjson = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.path().extension().is_some_and(|x| x == "ndjson"))
            .unwrap();
        let name = ndjson.file_name().into_string().unwrap();
        assert!(name.ends_with("_car-3341.ndjson"), "got {name}");

        let body = std::fs::read_to_string(ndjson.path()).unwrap();
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["timestamp"], t0);
        assert_eq!(first["data"]["carCode"], 3341);

        let meta_path = ndjson.path().with_extension("").with_extension("meta.json");
        let meta: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(meta_path).unwrap()).unwrap();
        assert_eq!(meta["startedAt"], t0);
        assert_eq!(meta["endedAt"], t0 + 60_000);
        assert_eq!(meta["packetCount"], 3);
        assert_eq!(meta["totalLaps"], 2);
        assert_eq!(meta["bestLapMs"], 101_823);
        assert_eq!(meta["carCode"], 3341);
    }

    #[test]
    fn paused_frames_are_not_written() {
        let dir = tempdir().unwrap();
        let logger = SessionLogger::spawn(dir.path().to_path_buf());

        let t0 = 1_700_000_000_000u64;
        logger.log_frame(t0, on_track_frame(1, -1));
        let mut paused = (*on_track_frame(1, -1)).clone();
        paused.flags.paused = true;
        logger.log_frame(t0 + 16, Arc::new(paused));
        logger.log_frame(t0 + 32, on_track_frame(1, -1));
        logger.shutdown();

        let ndjson = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.path().extension().is_some_and(|x| x == "ndjson"))
            .unwrap();
        let body = std::fs::read_to_string(ndjson.path()).unwrap();
        assert_eq!(body.lines().count(), 2);
    }

    #[test]
    fn reopens_on_next_edge_with_distinct_files() {
        let dir = tempdir().unwrap();
        let logger = SessionLogger::spawn(dir.path().to_path_buf());

        let t0 = 1_700_000_000_000u64;
        logger.log_frame(t0, on_track_frame(1, -1));
        logger.log_frame(t0 + 100, off_track_frame());
        // a second stint a little later gets its own file
        logger.log_frame(t0 + 5_000, on_track_frame(1, -1));
        logger.log_frame(t0 + 5_100, off_track_frame());
        logger.shutdown();

        let ndjson_count = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "ndjson"))
            .count();
        assert_eq!(ndjson_count, 2);
    }

    #[test]
    fn file_timestamp_shape() {
        let s = file_timestamp(1_700_000_000_000).unwrap();
        // 2023-11-14T22-13-20
        assert_eq!(s.len(), 19);
        assert!(s.contains('T'));
        assert!(!s.contains(':'));
    }
}
