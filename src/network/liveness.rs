//! ## Heartbeats and peer liveness
//!
//! Every node broadcasts a [HeartbeatPacket] each `heartbeat_interval`. The monitor
//! keeps one periodic timer per peer, started by the first heartbeat heard from a
//! disconnected peer. On every tick a peer that stayed silent since the previous tick
//! collects a miss; reaching `heartbeat_miss_threshold` consecutive misses marks it
//! disconnected and stops its timer.
//!
//! Only transitions are published, as [ConnectionEvent]s.

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::config::{self, NodeConfig};
use crate::events::{ConnectionEvent, EventBus, NodeId};
use crate::print;
use super::packet::{self, HeartbeatPacket};

/// Liveness state of one peer
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerRecord {
    /// A heartbeat arrived since the last tick
    pub heard: bool,
    /// Consecutive ticks without a heartbeat
    pub misses: u32,
    /// Current verdict
    pub connected: bool,
}

/// Tracks every peer of one node. Pure state; timing is driven by [run_liveness_monitor].
#[derive(Debug, Clone)]
pub struct PeerMonitor {
    self_id: NodeId,
    threshold: u32,
    peers: [PeerRecord; config::MAX_NODES],
}

impl PeerMonitor {
    /// Every peer starts disconnected
    pub fn new(self_id: NodeId, threshold: u32) -> Self {
        Self { self_id, threshold, peers: [PeerRecord::default(); config::MAX_NODES] }
    }

    /// Registers a heartbeat from `node`.
    ///
    /// Returns the connection event if `node` was disconnected. The caller must then
    /// (re)start the peer's timer.
    pub fn on_heartbeat(&mut self, node: NodeId) -> Option<ConnectionEvent> {
        if node == self.self_id {
            return None;
        }
        let peer = self.peers.get_mut(node as usize)?;
        peer.heard = true;
        peer.misses = 0;
        if peer.connected {
            return None;
        }
        peer.connected = true;
        Some(ConnectionEvent { node, connected: true })
    }

    /// Handles a timer tick for `node`.
    ///
    /// Returns the disconnect event when the miss threshold is reached. The caller must
    /// then stop the peer's timer.
    pub fn on_tick(&mut self, node: NodeId) -> Option<ConnectionEvent> {
        let threshold = self.threshold;
        let peer = self.peers.get_mut(node as usize)?;
        let mut event = None;
        if !peer.heard {
            peer.misses += 1;
            if peer.misses == threshold && peer.connected {
                peer.connected = false;
                event = Some(ConnectionEvent { node, connected: false });
            }
        }
        peer.heard = false;
        event
    }

    /// Current verdict for `node`. Self is always connected.
    pub fn is_connected(&self, node: NodeId) -> bool {
        node == self.self_id || self.peers.get(node as usize).is_some_and(|p| p.connected)
    }
}

/// Broadcasts a heartbeat every `heartbeat_interval`.
///
/// ## Note
/// This function is permanently blocking, and should be called asynchronously
pub async fn run_heartbeat_sender(cfg: NodeConfig, heartbeat_tx: mpsc::Sender<Vec<u8>>) {
    let Some(frame) = packet::encode(&HeartbeatPacket { node: cfg.id }) else {
        return;
    };
    let mut interval = tokio::time::interval(cfg.heartbeat_interval);
    loop {
        interval.tick().await;
        if heartbeat_tx.send(frame.clone()).await.is_err() {
            print::err("Heartbeat channel closed".to_string());
            return;
        }
    }
}

/// Listens for heartbeats and publishes connectivity changes.
///
/// ## Parameters
/// `cfg`: This node's config
/// `bus`: Where [ConnectionEvent]s are published
/// `heartbeat_rx`: Raw frames from the heartbeat port
///
/// ## Note
/// This function is permanently blocking, and should be called asynchronously
pub async fn run_liveness_monitor(
    cfg: NodeConfig,
    bus: EventBus,
    mut heartbeat_rx: mpsc::Receiver<Vec<u8>>,
) {
    let mut monitor = PeerMonitor::new(cfg.id, cfg.heartbeat_miss_threshold);
    let mut next_tick: [Option<Instant>; config::MAX_NODES] = [None; config::MAX_NODES];

    loop {
        let soonest = next_tick
            .iter()
            .enumerate()
            .filter_map(|(node, t)| t.map(|t| (node, t)))
            .min_by_key(|(_, t)| *t);

        tokio::select! {
            frame = heartbeat_rx.recv() => {
                let Some(frame) = frame else {
                    print::warn("Heartbeat channel closed, liveness monitor stopping".to_string());
                    return;
                };
                let Some(hb) = packet::decode::<HeartbeatPacket>(&frame) else { continue };
                if let Some(evt) = monitor.on_heartbeat(hb.node) {
                    next_tick[hb.node as usize] = Some(Instant::now() + cfg.heartbeat_interval);
                    print::ok(format!("Node {} connected", hb.node));
                    let _ = bus.connection.send(evt);
                }
            }
            _ = async {
                match soonest {
                    Some((_, t)) => sleep_until(t).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                let Some((node, t)) = soonest else { continue };
                next_tick[node] = Some(t + cfg.heartbeat_interval);
                if let Some(evt) = monitor.on_tick(node as NodeId) {
                    next_tick[node] = None;
                    print::warn(format!("Node {} lost after {} missed heartbeats", node, cfg.heartbeat_miss_threshold));
                    let _ = bus.connection.send(evt);
                }
            }
        }
    }
}
