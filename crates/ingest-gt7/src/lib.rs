//! GT7 UDP ingestion: discovery, heartbeat, decode.
//!
//! The console unicasts telemetry to whoever sent the last heartbeat, so the
//! source broadcasts a probe until the first valid frame arrives, then locks
//! onto that sender for the rest of the process lifetime.

use anyhow::Context;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

use model::Frame;

pub mod decode;

pub const RECEIVE_PORT: u16 = 33740;
pub const SEND_PORT: u16 = 33739;
/// One ASCII byte; the console replies with packet variant A.
pub const PROBE: u8 = b'A';
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

pub type FrameTx = mpsc::Sender<Arc<Frame>>;
pub type FrameRx = mpsc::Receiver<Arc<Frame>>;

/// Bounded frames channel. Realtime data goes stale fast, so the sender
/// drops the newest frame when the consumer falls behind.
pub fn frame_channel(capacity: usize) -> (FrameTx, FrameRx) {
    mpsc::channel(capacity)
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    Msg(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Trait for any live source connector.
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn run(&self, tx: FrameTx) -> Result<(), IngestError>;
}

/// Counters for the silent per-datagram drop paths.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub accepted: AtomicU64,
    pub too_short: AtomicU64,
    pub bad_magic: AtomicU64,
    pub backpressure_dropped: AtomicU64,
}

impl IngestStats {
    pub fn summary(&self) -> (u64, u64, u64, u64) {
        (
            self.accepted.load(Ordering::Relaxed),
            self.too_short.load(Ordering::Relaxed),
            self.bad_magic.load(Ordering::Relaxed),
            self.backpressure_dropped.load(Ordering::Relaxed),
        )
    }
}

#[derive(Clone, Debug)]
pub struct GT7Config {
    /// Local bind address for receiving packets (default port 33740).
    pub bind_addr: String,
    /// Explicit console address. When set, discovery is skipped and the
    /// source starts locked.
    pub console_ip: Option<Ipv4Addr>,
    pub heartbeat: Duration,
}

impl Default for GT7Config {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{RECEIVE_PORT}"),
            console_ip: None,
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }
}

pub struct GT7Source {
    cfg: GT7Config,
    stats: Arc<IngestStats>,
}

impl GT7Source {
    pub fn new(cfg: GT7Config) -> Self {
        Self { cfg, stats: Arc::new(IngestStats::default()) }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }
}

#[async_trait::async_trait]
impl TelemetrySource for GT7Source {
    async fn run(&self, tx: FrameTx) -> Result<(), IngestError> {
        let socket = UdpSocket::bind(&self.cfg.bind_addr)
            .await
            .with_context(|| format!("bind {}", self.cfg.bind_addr))?;
        socket.set_broadcast(true).context("enable broadcast")?;

        let mut locked = self.cfg.console_ip.is_some();
        let mut targets: Vec<SocketAddr> = match self.cfg.console_ip {
            Some(ip) => vec![SocketAddr::new(ip.into(), SEND_PORT)],
            None => broadcast_targets()
                .into_iter()
                .map(|ip| SocketAddr::new(ip.into(), SEND_PORT))
                .collect(),
        };
        info!(?targets, locked, "gt7 source up");

        let mut hb = time::interval(self.cfg.heartbeat);
        hb.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let mut buf = vec![0u8; 2048];
        loop {
            tokio::select! {
                _ = hb.tick() => {
                    for target in &targets {
                        // the network may be asymmetric mid-discovery
                        if let Err(e) = socket.send_to(&[PROBE], target).await {
                            warn!(%target, error = %e, "heartbeat send failed");
                        }
                    }
                    let (accepted, too_short, bad_magic, dropped) = self.stats.summary();
                    debug!(accepted, too_short, bad_magic, dropped, "ingest stats");
                }
                recv = socket.recv_from(&mut buf) => {
                    let (len, peer) = match recv {
                        Ok(ok) => ok,
                        Err(e) => {
                            warn!(error = %e, "udp recv failed");
                            continue;
                        }
                    };
                    match decode::decode(&buf[..len]) {
                        Ok(frame) => {
                            self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                            if !locked {
                                locked = true;
                                targets = vec![SocketAddr::new(peer.ip(), SEND_PORT)];
                                info!(%peer, "telemetry peer locked");
                            }
                            if tx.try_send(Arc::new(frame)).is_err() {
                                self.stats.backpressure_dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(decode::Rejection::TooShort) => {
                            self.stats.too_short.fetch_add(1, Ordering::Relaxed);
                            debug!(len, %peer, "dropped short datagram");
                        }
                        Err(decode::Rejection::BadMagic) => {
                            self.stats.bad_magic.fetch_add(1, Ordering::Relaxed);
                            debug!(%peer, "dropped datagram with bad magic");
                        }
                    }
                }
            }
        }
    }
}

/// Directed broadcast address for every non-loopback IPv4 interface,
/// `addr | !mask`, falling back to the limited broadcast address.
fn broadcast_targets() -> Vec<Ipv4Addr> {
    let mut out: Vec<Ipv4Addr> = Vec::new();
    if let Ok(ifaces) = if_addrs::get_if_addrs() {
        for iface in ifaces {
            if iface.is_loopback() {
                continue;
            }
            if let if_addrs::IfAddr::V4(v4) = iface.addr {
                let bcast = Ipv4Addr::from(u32::from(v4.ip) | !u32::from(v4.netmask));
                if !out.contains(&bcast) {
                    out.push(bcast);
                }
            }
        }
    }
    if out.is_empty() {
        out.push(Ipv4Addr::BROADCAST);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_fallback_is_limited_broadcast() {
        // whatever interfaces the host has, the list is never empty
        assert!(!broadcast_targets().is_empty());
    }

    #[test]
    fn default_config_binds_receive_port() {
        let cfg = GT7Config::default();
        assert!(cfg.bind_addr.ends_with(":33740"));
        assert!(cfg.console_ip.is_none());
        assert_eq!(cfg.heartbeat, Duration::from_secs(10));
    }

    /// Discovery end to end over loopback: a valid frame locks the source
    /// onto its sender, and subsequent heartbeats are unicast back to it.
    #[tokio::test]
    async fn discovery_locks_onto_first_valid_sender() {
        let cfg = GT7Config {
            bind_addr: "127.0.0.1:41740".into(),
            console_ip: None,
            heartbeat: Duration::from_millis(100),
        };
        let source = GT7Source::new(cfg);
        let stats = source.stats();
        let (tx, mut rx) = frame_channel(8);
        let task = tokio::spawn(async move { source.run(tx).await });

        // console stand-in on the heartbeat port
        let console = UdpSocket::bind(format!("127.0.0.1:{SEND_PORT}"))
            .await
            .expect("bind console stand-in");
        let raw = decode::testutil::encode(&decode::testutil::sample_frame(), 0xBEEF);
        console.send_to(&raw, "127.0.0.1:41740").await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("frame within deadline")
            .expect("channel open");
        assert_eq!(frame.packet_id, 91_411);
        assert_eq!(stats.summary().0, 1);

        // locked: the next heartbeat is unicast straight back to us
        let mut buf = [0u8; 8];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), console.recv_from(&mut buf))
            .await
            .expect("heartbeat within deadline")
            .expect("recv");
        assert_eq!(&buf[..len], &[PROBE]);

        task.abort();
    }

    #[tokio::test]
    async fn frame_channel_drops_newest_on_overflow() {
        let (tx, mut rx) = frame_channel(2);
        for i in 0..5u32 {
            let frame = Frame { packet_id: i, ..Default::default() };
            let _ = tx.try_send(Arc::new(frame));
        }
        // the two oldest frames survive, later ones were dropped
        assert_eq!(rx.recv().await.unwrap().packet_id, 0);
        assert_eq!(rx.recv().await.unwrap().packet_id, 1);
        assert!(rx.try_recv().is_err());
    }
}
