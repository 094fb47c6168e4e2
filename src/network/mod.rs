//! ## Network module
//!
//! Reliable delivery of events over lossy UDP broadcast, and peer liveness.
//!
//! ## Sub-modules
//! - [packet]: wire formats and codecs
//! - [dedup]: rotating-bucket duplicate suppression
//! - [transmitter]: ack/resend sending side
//! - [receiver]: ack-and-dedup receiving side
//! - [liveness]: heartbeats and the per-peer miss counter
//! - [udp_broadcast]: the sockets
//!
//! ## Key Features
//! - Three broadcast ports: data, heartbeat and ack.
//! - Every port is seen by the rest of the program as a pair of byte-frame channels,
//!   [PortLink]. [udp_broadcast::open_links] backs them with sockets; tests back them
//!   with an in-memory hub.

pub mod packet;
pub mod dedup;
pub mod transmitter;
pub mod receiver;
pub mod liveness;
pub mod udp_broadcast;

use tokio::sync::mpsc;

use crate::config::NodeConfig;
use crate::events::EventBus;

/// Both directions of one broadcast port
pub struct PortLink {
    /// Frames to broadcast
    pub tx: mpsc::Sender<Vec<u8>>,
    /// Frames received, including own broadcasts looping back
    pub rx: mpsc::Receiver<Vec<u8>>,
}

/// The three ports a node talks on
#[allow(missing_docs)]
pub struct NodeLinks {
    pub data: PortLink,
    pub heartbeat: PortLink,
    pub ack: PortLink,
}

/// Spawns every transport task of one node on `links`.
///
/// Subscriptions are taken before anything is spawned, so no event published after
/// this call returns is missed.
pub fn start_transport(cfg: &NodeConfig, bus: &EventBus, links: NodeLinks) {
    let NodeLinks { data, heartbeat, ack } = links;
    let tx_subs = transmitter::Subscriptions::new(bus);

    {
        let cfg = cfg.clone();
        let data_tx = data.tx;
        let ack_rx = ack.rx;
        tokio::spawn(async move {
            transmitter::run_transmitter(cfg, tx_subs, data_tx, ack_rx).await;
        });
    }
    {
        let cfg = cfg.clone();
        let bus = bus.clone();
        let data_rx = data.rx;
        let ack_tx = ack.tx;
        tokio::spawn(async move {
            receiver::run_receiver(cfg, bus, data_rx, ack_tx).await;
        });
    }
    {
        let cfg = cfg.clone();
        let heartbeat_tx = heartbeat.tx;
        tokio::spawn(async move {
            liveness::run_heartbeat_sender(cfg, heartbeat_tx).await;
        });
    }
    {
        let cfg = cfg.clone();
        let bus = bus.clone();
        let heartbeat_rx = heartbeat.rx;
        tokio::spawn(async move {
            liveness::run_liveness_monitor(cfg, bus, heartbeat_rx).await;
        });
    }
}
