//! Wire formats for the three broadcast ports, and their bincode codecs.
//!
//! Every frame is a self-contained bincode blob. A frame that fails to decode is
//! logged and dropped by the caller; nothing on the wire is trusted to be well formed.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::config;
use crate::events::{NetMessage, NodeId};
use crate::print;

/// Identifier of one data packet.
///
/// High bits hold the originating node, low [config::PACKET_SEQ_BITS] bits a rolling
/// sequence number. Resends of a packet reuse its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketId(pub u32);

impl PacketId {
    /// Packs `origin` and the low bits of `seq`
    pub fn new(origin: NodeId, seq: u32) -> Self {
        let mask = (1u32 << config::PACKET_SEQ_BITS) - 1;
        PacketId(((origin as u32) << config::PACKET_SEQ_BITS) | (seq & mask))
    }

    /// Node that sent the packet first
    pub fn origin(self) -> NodeId {
        (self.0 >> config::PACKET_SEQ_BITS) as NodeId
    }
}

/// Frame on the data port
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataPacket {
    /// Id shared by every resend of this packet
    pub packet_id: PacketId,
    /// The event being carried
    pub message: NetMessage,
}

/// Frame on the ack port: `from_node` has received `packet_id`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckPacket {
    /// Node acknowledging
    pub from_node: NodeId,
    /// Packet being acknowledged
    pub packet_id: PacketId,
}

/// Frame on the heartbeat port
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatPacket {
    /// Node sending the heartbeat
    pub node: NodeId,
}

/// Serializes a frame into a binary format.
///
/// Uses `bincode`. If serialization fails, the error is logged and `None` returned.
pub fn encode<T: Serialize>(frame: &T) -> Option<Vec<u8>> {
    match bincode::serialize(frame) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            print::err(format!("Serialization failed: {} (packet.rs, encode())", e));
            None
        }
    }
}

/// Deserializes a frame from a binary format.
///
/// Returns `None` on malformed input. Garbage on a shared broadcast port is expected
/// now and then, so this only warns.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Option<T> {
    match bincode::deserialize(bytes) {
        Ok(frame) => Some(frame),
        Err(e) => {
            print::warn(format!("Dropped malformed frame ({} bytes): {}", bytes.len(), e));
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Direction, HallCall, NewOrderEvent, OrderId};

    #[test]
    fn packet_id_keeps_origin_through_sequence_wrap() {
        let id = PacketId::new(2, (1 << config::PACKET_SEQ_BITS) + 5);
        assert_eq!(id.origin(), 2);
        assert_eq!(id, PacketId::new(2, 5));
    }

    #[test]
    fn data_packet_survives_the_wire() {
        let packet = DataPacket {
            packet_id: PacketId::new(1, 9),
            message: NetMessage::NewOrder(NewOrderEvent {
                node: 1,
                order_id: OrderId::new(1, 3),
                call: HallCall::new(2, Direction::Down).unwrap(),
            }),
        };
        let bytes = encode(&packet).unwrap();
        assert_eq!(decode::<DataPacket>(&bytes), Some(packet));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let bytes = encode(&AckPacket { from_node: 0, packet_id: PacketId::new(1, 1) }).unwrap();
        assert!(decode::<AckPacket>(&bytes[..bytes.len() - 1]).is_none());
    }
}
