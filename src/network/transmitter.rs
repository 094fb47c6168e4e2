//! ## Sending side of the reliable broadcast
//!
//! Every network-visible event this node originates is wrapped in a [DataPacket] and
//! broadcast. Each packet gets its own send task that resends the frame every
//! `ack_timeout` until as many distinct peers have acked it as were connected when it
//! was sent, or until `ack_attempts` resends have gone unanswered.
//!
//! ## Tasks
//! - `run_transmitter`: picks own events off the bus and spawns send tasks
//! - `ack_router`: hands decoded acks to the send task waiting for them
//! - `tx_pump`: writes frames to the data port, spaced by `tx_spacing`

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::{self, NodeConfig};
use crate::events::{self, EventBus, NetMessage, NodeId};
use crate::print;
use super::packet::{self, AckPacket, DataPacket, PacketId};

/// Ack bookkeeping for one packet in flight
#[derive(Debug, Clone)]
pub struct PendingPacket {
    expected: usize,
    acked: [bool; config::MAX_NODES],
}

impl PendingPacket {
    /// Waits for `expected` distinct peers
    pub fn new(expected: usize) -> Self {
        Self { expected, acked: [false; config::MAX_NODES] }
    }

    /// Registers an ack from `from`. Returns `true` once enough peers have acked.
    pub fn register_ack(&mut self, from: NodeId) -> bool {
        if let Some(slot) = self.acked.get_mut(from as usize) {
            *slot = true;
        }
        self.is_complete()
    }

    /// Enough distinct peers have acked
    pub fn is_complete(&self) -> bool {
        self.acked.iter().filter(|a| **a).count() >= self.expected
    }
}

enum RouterMsg {
    Register(PacketId, mpsc::Sender<NodeId>),
    Done(PacketId),
}

/// The bus channels the transmitter listens on
pub struct Subscriptions {
    new_order: tokio::sync::broadcast::Receiver<events::NewOrderEvent>,
    cost_result: tokio::sync::broadcast::Receiver<events::CostResultEvent>,
    availability: tokio::sync::broadcast::Receiver<events::AvailabilityEvent>,
    order_complete: tokio::sync::broadcast::Receiver<events::OrderCompleteEvent>,
    check_assigned: tokio::sync::broadcast::Receiver<events::CheckAssignedEvent>,
    connection: tokio::sync::broadcast::Receiver<events::ConnectionEvent>,
}

impl Subscriptions {
    /// Subscribes now, so nothing published after this call is missed
    pub fn new(bus: &EventBus) -> Self {
        Self {
            new_order: bus.new_order.subscribe(),
            cost_result: bus.cost_result.subscribe(),
            availability: bus.availability.subscribe(),
            order_complete: bus.order_complete.subscribe(),
            check_assigned: bus.check_assigned.subscribe(),
            connection: bus.connection.subscribe(),
        }
    }
}

/// Runs the transmitter.
///
/// ## Parameters
/// `cfg`: This node's config
/// `subs`: Bus subscriptions, see [Subscriptions::new]
/// `data_tx`: Raw frames for the data port
/// `ack_rx`: Raw frames from the ack port
///
/// ## Behavior
/// - Only events whose `node` is this node are sent. Events received from peers are
///   republished on the same bus and must not echo back out.
/// - The set of reachable peers follows the liveness monitor's connection events.
///
/// ## Note
/// This function is permanently blocking, and should be called asynchronously
pub async fn run_transmitter(
    cfg: NodeConfig,
    mut subs: Subscriptions,
    data_tx: mpsc::Sender<Vec<u8>>,
    ack_rx: mpsc::Receiver<Vec<u8>>,
) {
    let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(config::CHANNEL_CAPACITY);
    let (router_tx, router_rx) = mpsc::channel::<RouterMsg>(config::CHANNEL_CAPACITY);

    {
        let spacing = cfg.tx_spacing;
        tokio::spawn(async move {
            tx_pump(frame_rx, data_tx, spacing).await;
        });
    }
    {
        let self_id = cfg.id;
        tokio::spawn(async move {
            ack_router(self_id, ack_rx, router_rx).await;
        });
    }

    let mut reachable = [false; config::MAX_NODES];
    let mut seq: u32 = 0;

    loop {
        let message = tokio::select! {
            Some(e) = events::recv(&mut subs.new_order) => NetMessage::NewOrder(e),
            Some(e) = events::recv(&mut subs.cost_result) => NetMessage::CostResult(e),
            Some(e) = events::recv(&mut subs.availability) => NetMessage::Availability(e),
            Some(e) = events::recv(&mut subs.order_complete) => NetMessage::OrderComplete(e),
            Some(e) = events::recv(&mut subs.check_assigned) => NetMessage::CheckAssigned(e),
            Some(e) = events::recv(&mut subs.connection) => {
                if e.node != cfg.id {
                    if let Some(slot) = reachable.get_mut(e.node as usize) {
                        *slot = e.connected;
                    }
                }
                continue;
            }
            else => break,
        };

        if message.origin() != cfg.id {
            continue;
        }

        let packet_id = PacketId::new(cfg.id, seq);
        seq = seq.wrapping_add(1);
        let Some(frame) = packet::encode(&DataPacket { packet_id, message }) else {
            continue;
        };
        let expected = reachable.iter().filter(|r| **r).count();

        let frame_tx = frame_tx.clone();
        let router_tx = router_tx.clone();
        let cfg = cfg.clone();
        tokio::spawn(async move {
            handle_send(&cfg, packet_id, frame, expected, frame_tx, router_tx).await;
        });
    }
    print::warn("Event bus closed, transmitter stopping".to_string());
}

/// Sends one packet until it is acked by `expected` peers or the attempts run out.
///
/// With no peers connected the frame goes out once, unacknowledged.
async fn handle_send(
    cfg: &NodeConfig,
    packet_id: PacketId,
    frame: Vec<u8>,
    expected: usize,
    frame_tx: mpsc::Sender<Vec<u8>>,
    router_tx: mpsc::Sender<RouterMsg>,
) {
    if expected == 0 {
        let _ = frame_tx.send(frame).await;
        return;
    }

    let (ack_tx, mut ack_rx) = mpsc::channel::<NodeId>(config::MAX_NODES * 4);
    if router_tx.send(RouterMsg::Register(packet_id, ack_tx)).await.is_err() {
        return;
    }

    let mut pending = PendingPacket::new(expected);
    for _attempt in 0..=cfg.ack_attempts {
        if frame_tx.send(frame.clone()).await.is_err() {
            break;
        }

        let deadline = sleep(cfg.ack_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                from = ack_rx.recv() => {
                    match from {
                        Some(from) if pending.register_ack(from) => {
                            let _ = router_tx.send(RouterMsg::Done(packet_id)).await;
                            return;
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
                _ = &mut deadline => break,
            }
        }
    }

    print::warn(format!(
        "Packet {:#06x} not acked by {} peers after {} resends, giving up",
        packet_id.0, expected, cfg.ack_attempts
    ));
    let _ = router_tx.send(RouterMsg::Done(packet_id)).await;
}

/// Routes acks for own packets to the send task that waits for them.
///
/// Acks for other nodes' packets, acks sent by this node itself and acks for packets
/// no longer in flight are dropped.
async fn ack_router(
    self_id: NodeId,
    mut ack_rx: mpsc::Receiver<Vec<u8>>,
    mut router_rx: mpsc::Receiver<RouterMsg>,
) {
    let mut pending: HashMap<PacketId, mpsc::Sender<NodeId>> = HashMap::new();

    loop {
        tokio::select! {
            // Registrations first, so an ack never overtakes the send task it belongs to
            biased;
            msg = router_rx.recv() => {
                match msg {
                    Some(RouterMsg::Register(id, tx)) => { pending.insert(id, tx); }
                    Some(RouterMsg::Done(id)) => { pending.remove(&id); }
                    None => return,
                }
            }
            frame = ack_rx.recv() => {
                let Some(frame) = frame else { return };
                let Some(ack) = packet::decode::<AckPacket>(&frame) else { continue };
                if ack.packet_id.origin() != self_id || ack.from_node == self_id {
                    continue;
                }
                if let Some(tx) = pending.get(&ack.packet_id) {
                    let _ = tx.try_send(ack.from_node);
                }
            }
        }
    }
}

/// Writes frames to the data port, at most one per `spacing`
async fn tx_pump(
    mut frame_rx: mpsc::Receiver<Vec<u8>>,
    data_tx: mpsc::Sender<Vec<u8>>,
    spacing: std::time::Duration,
) {
    while let Some(frame) = frame_rx.recv().await {
        if data_tx.send(frame).await.is_err() {
            print::err("Data port closed, tx pump stopping".to_string());
            return;
        }
        sleep(spacing).await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ConnectionEvent, OrderCompleteEvent};
    use std::time::Duration;

    #[test]
    fn pending_counts_distinct_peers() {
        let mut p = PendingPacket::new(2);
        assert!(!p.register_ack(1));
        assert!(!p.register_ack(1));
        assert!(p.register_ack(2));
    }

    #[test]
    fn pending_with_no_peers_is_complete() {
        assert!(PendingPacket::new(0).is_complete());
    }

    fn ack_frame(from: NodeId, id: PacketId) -> Vec<u8> {
        packet::encode(&AckPacket { from_node: from, packet_id: id }).unwrap()
    }

    struct Harness {
        bus: EventBus,
        data_rx: mpsc::Receiver<Vec<u8>>,
        ack_tx: mpsc::Sender<Vec<u8>>,
    }

    fn start(cfg: NodeConfig) -> Harness {
        let bus = EventBus::new();
        let (data_tx, data_rx) = mpsc::channel(config::CHANNEL_CAPACITY);
        let (ack_tx, ack_rx) = mpsc::channel(config::CHANNEL_CAPACITY);
        let subs = Subscriptions::new(&bus);
        tokio::spawn(run_transmitter(cfg, subs, data_tx, ack_rx));
        Harness { bus, data_rx, ack_tx }
    }

    #[tokio::test(start_paused = true)]
    async fn without_peers_a_frame_is_sent_once() {
        let mut h = start(NodeConfig::new(0));
        h.bus.order_complete.send(OrderCompleteEvent { node: 0, floor: 1 }).unwrap();

        let frame = h.data_rx.recv().await.unwrap();
        let packet: DataPacket = packet::decode(&frame).unwrap();
        assert_eq!(packet.message, NetMessage::OrderComplete(OrderCompleteEvent { node: 0, floor: 1 }));

        sleep(Duration::from_secs(1)).await;
        assert!(h.data_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn peer_events_are_not_echoed() {
        let mut h = start(NodeConfig::new(0));
        h.bus.order_complete.send(OrderCompleteEvent { node: 2, floor: 1 }).unwrap();
        sleep(Duration::from_millis(100)).await;
        assert!(h.data_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn resends_until_every_peer_acked() {
        let mut h = start(NodeConfig::new(0));
        h.bus.connection.send(ConnectionEvent { node: 1, connected: true }).unwrap();
        h.bus.connection.send(ConnectionEvent { node: 2, connected: true }).unwrap();
        sleep(Duration::from_millis(1)).await;

        h.bus.order_complete.send(OrderCompleteEvent { node: 0, floor: 2 }).unwrap();
        let first = h.data_rx.recv().await.unwrap();
        let id = packet::decode::<DataPacket>(&first).unwrap().packet_id;

        // One ack is not enough; the frame comes around again
        h.ack_tx.send(ack_frame(1, id)).await.unwrap();
        let again = h.data_rx.recv().await.unwrap();
        assert_eq!(again, first);

        // Acks from self and for foreign packets do not count
        h.ack_tx.send(ack_frame(0, id)).await.unwrap();
        h.ack_tx.send(ack_frame(2, PacketId::new(1, id.0))).await.unwrap();
        assert_eq!(h.data_rx.recv().await.unwrap(), first);

        h.ack_tx.send(ack_frame(2, id)).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        while h.data_rx.try_recv().is_ok() {}
        sleep(Duration::from_secs(1)).await;
        assert!(h.data_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_last_attempt() {
        let mut cfg = NodeConfig::new(0);
        cfg.ack_attempts = 3;
        let mut h = start(cfg);
        h.bus.connection.send(ConnectionEvent { node: 1, connected: true }).unwrap();
        sleep(Duration::from_millis(1)).await;

        h.bus.order_complete.send(OrderCompleteEvent { node: 0, floor: 0 }).unwrap();
        sleep(Duration::from_secs(2)).await;

        let mut sent = 0;
        while h.data_rx.try_recv().is_ok() {
            sent += 1;
        }
        assert_eq!(sent, 4);
    }
}
