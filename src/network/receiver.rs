//! ## Receiving side of the reliable broadcast
//!
//! Every data frame from a peer is acknowledged, then passed through the dedup register.
//! Only the first copy of a packet is published on the local [EventBus].
//!
//! Duplicates are acknowledged too. A resend means the sender missed our earlier ack,
//! and withholding the ack would make it retry until it gives up.

use tokio::sync::mpsc;

use crate::config::NodeConfig;
use crate::events::{EventBus, NetMessage, NodeId};
use crate::print;
use super::dedup::PacketRegister;
use super::packet::{self, AckPacket, DataPacket};

/// What to do with one received data frame
#[derive(Debug, Default, PartialEq)]
pub struct Received {
    /// Encoded ack to broadcast, if the frame came from a peer
    pub ack: Option<Vec<u8>>,
    /// Event to publish, if this was the first copy
    pub message: Option<NetMessage>,
}

/// Per-node receive state
pub struct PacketReceiver {
    self_id: NodeId,
    register: PacketRegister,
}

impl PacketReceiver {
    /// Fresh dedup register sized from `cfg`
    pub fn new(cfg: &NodeConfig) -> Self {
        Self {
            self_id: cfg.id,
            register: PacketRegister::new(cfg.dedup_register_length),
        }
    }

    /// Handles one raw frame from the data port.
    ///
    /// Own broadcasts looping back and malformed frames yield an empty [Received].
    pub fn accept(&mut self, frame: &[u8]) -> Received {
        let Some(packet) = packet::decode::<DataPacket>(frame) else {
            return Received::default();
        };
        if packet.packet_id.origin() == self.self_id {
            return Received::default();
        }

        let ack = packet::encode(&AckPacket {
            from_node: self.self_id,
            packet_id: packet.packet_id,
        });

        let message = self
            .register
            .check_and_insert(packet.packet_id)
            .then_some(packet.message);

        Received { ack, message }
    }
}

/// Runs the receiver until the data channel closes.
///
/// ## Parameters
/// `cfg`: This node's config
/// `bus`: Where accepted events are published
/// `data_rx`: Raw frames from the data port
/// `ack_tx`: Raw frames for the ack port
///
/// ## Note
/// This function is permanently blocking, and should be called asynchronously
pub async fn run_receiver(
    cfg: NodeConfig,
    bus: EventBus,
    mut data_rx: mpsc::Receiver<Vec<u8>>,
    ack_tx: mpsc::Sender<Vec<u8>>,
) {
    let mut receiver = PacketReceiver::new(&cfg);

    while let Some(frame) = data_rx.recv().await {
        let received = receiver.accept(&frame);

        if let Some(ack) = received.ack {
            if ack_tx.send(ack).await.is_err() {
                print::err("Ack channel closed, receiver stopping".to_string());
                return;
            }
        }
        if let Some(message) = received.message {
            bus.publish_net(message);
        }
    }
    print::warn("Data channel closed, receiver stopping".to_string());
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AvailabilityEvent, Direction, HallCall, NewOrderEvent, OrderCompleteEvent, OrderId};
    use super::super::packet::PacketId;

    fn frame(origin: NodeId, seq: u32, message: NetMessage) -> Vec<u8> {
        packet::encode(&DataPacket { packet_id: PacketId::new(origin, seq), message }).unwrap()
    }

    fn complete(node: NodeId, floor: u8) -> NetMessage {
        NetMessage::OrderComplete(OrderCompleteEvent { node, floor })
    }

    #[test]
    fn own_packets_are_ignored() {
        let mut rx = PacketReceiver::new(&NodeConfig::new(1));
        assert_eq!(rx.accept(&frame(1, 0, complete(1, 0))), Received::default());
    }

    #[test]
    fn duplicates_are_acked_but_published_once() {
        let mut rx = PacketReceiver::new(&NodeConfig::new(0));
        let f = frame(2, 4, complete(2, 3));

        let first = rx.accept(&f);
        let second = rx.accept(&f);

        assert_eq!(first.message, Some(complete(2, 3)));
        assert!(second.message.is_none());
        assert!(first.ack.is_some());
        assert_eq!(first.ack, second.ack);

        let ack: AckPacket = packet::decode(&first.ack.unwrap()).unwrap();
        assert_eq!(ack, AckPacket { from_node: 0, packet_id: PacketId::new(2, 4) });
    }

    #[test]
    fn frames_naming_missing_buttons_are_dropped() {
        let mut rx = PacketReceiver::new(&NodeConfig::new(0));
        let bogus = NetMessage::NewOrder(NewOrderEvent {
            node: 2,
            order_id: OrderId::new(2, 0),
            call: HallCall { floor: 9, direction: Direction::Up },
        });
        assert_eq!(rx.accept(&frame(2, 0, bogus)), Received::default());
    }

    #[test]
    fn garbage_is_dropped() {
        let mut rx = PacketReceiver::new(&NodeConfig::new(0));
        assert_eq!(rx.accept(&[0xff, 0x01]), Received::default());
    }

    #[tokio::test]
    async fn run_receiver_publishes_each_packet_once() {
        let bus = EventBus::new();
        let mut avail_rx = bus.availability.subscribe();
        let (data_tx, data_rx) = mpsc::channel(8);
        let (ack_tx, mut ack_rx) = mpsc::channel(8);

        tokio::spawn(run_receiver(NodeConfig::new(0), bus.clone(), data_rx, ack_tx));

        let msg = NetMessage::Availability(AvailabilityEvent { node: 1, available: false });
        for _ in 0..3 {
            data_tx.send(frame(1, 7, msg)).await.unwrap();
        }
        for _ in 0..3 {
            assert!(ack_rx.recv().await.is_some());
        }

        assert_eq!(
            avail_rx.recv().await.unwrap(),
            AvailabilityEvent { node: 1, available: false }
        );
        assert!(avail_rx.try_recv().is_err());
    }
}
