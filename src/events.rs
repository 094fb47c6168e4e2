//! ## Events
//!
//! The vocabulary the nodes speak, and the static channel registry that carries it.
//!
//! Every event kind has exactly one [broadcast] channel in [EventBus]. Components call
//! `subscribe()` on the kinds they need when they are created, and publish by sending
//! on the kinds they produce. Five of the kinds also travel over the network, wrapped
//! in [NetMessage]; those carry the id of the node that originated them in `node`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config;
use crate::print;

/// Index of a node in the fleet, `0..config::MAX_NODES`
pub type NodeId = u8;

/// Per-floor `[up, down]` flags for one node
pub type HallTable = [[bool; 2]; config::NUM_FLOORS as usize];

/// Direction of a hall call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Towards the top floor
    Up,
    /// Towards the ground floor
    Down,
}

impl Direction {
    /// Both directions, in table order
    pub const ALL: [Direction; 2] = [Direction::Up, Direction::Down];

    /// Column of this direction in a [HallTable]
    pub fn index(self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
        }
    }
}

/// A request made from a floor panel, identified by floor and direction.
///
/// Decoding goes through [HallCall::new], so a frame naming a button the building does
/// not have fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawHallCall")]
pub struct HallCall {
    /// Floor the call was made from
    pub floor: u8,
    /// Requested travel direction
    pub direction: Direction,
}

impl HallCall {
    /// Returns `None` for floors outside the building, for `Up` on the top floor and
    /// for `Down` on the bottom floor.
    pub fn new(floor: u8, direction: Direction) -> Option<Self> {
        let valid = match direction {
            Direction::Up => floor < config::NUM_FLOORS - 1,
            Direction::Down => floor > 0 && floor < config::NUM_FLOORS,
        };
        valid.then_some(Self { floor, direction })
    }

    /// Every valid hall call, bottom floor first
    pub fn all() -> impl Iterator<Item = HallCall> {
        (0..config::NUM_FLOORS)
            .flat_map(|floor| Direction::ALL.into_iter().filter_map(move |d| HallCall::new(floor, d)))
    }

    /// Lists the calls marked in `table`
    pub fn from_table(table: &HallTable) -> Vec<HallCall> {
        HallCall::all()
            .filter(|call| table[call.floor as usize][call.direction.index()])
            .collect()
    }
}

#[derive(Deserialize)]
struct RawHallCall {
    floor: u8,
    direction: Direction,
}

impl TryFrom<RawHallCall> for HallCall {
    type Error = String;

    fn try_from(raw: RawHallCall) -> Result<Self, Self::Error> {
        HallCall::new(raw.floor, raw.direction)
            .ok_or_else(|| format!("no {:?} button at floor {}", raw.direction, raw.floor))
    }
}

/// Identifier of one assignment round.
///
/// High bits hold the originating node, low [config::ORDER_SEQ_BITS] bits a local counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u32);

impl OrderId {
    /// Packs `origin` and the low bits of `counter`
    pub fn new(origin: NodeId, counter: u32) -> Self {
        let mask = (1u32 << config::ORDER_SEQ_BITS) - 1;
        OrderId(((origin as u32) << config::ORDER_SEQ_BITS) | (counter & mask))
    }

    /// Node that created this id
    pub fn origin(self) -> NodeId {
        (self.0 >> config::ORDER_SEQ_BITS) as NodeId
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = (1u32 << config::ORDER_SEQ_BITS) - 1;
        write!(f, "{}#{}", self.origin(), self.0 & mask)
    }
}

/// A hall button was pressed on this node's panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HallButtonEvent {
    /// The button that was pressed
    pub call: HallCall,
}

/// A bidding round starts for `call`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderEvent {
    /// Originating node
    pub node: NodeId,
    /// Fresh id of the round
    pub order_id: OrderId,
    /// The call up for bidding
    pub call: HallCall,
}

/// `node` bids `cost` for an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostResultEvent {
    /// Bidding node
    pub node: NodeId,
    /// Round bid on
    pub order_id: OrderId,
    /// Estimated time to serve, lower wins
    pub cost: u32,
    /// The call bid for
    pub call: HallCall,
}

/// `node` became (un)available for service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityEvent {
    /// Node reporting
    pub node: NodeId,
    /// Can take calls
    pub available: bool,
}

/// `node` stopped at `floor`, serving every hall call there
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleteEvent {
    /// Node that stopped
    pub node: NodeId,
    /// Floor served
    pub floor: u8,
}

/// `node` announces the winner it computed for an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckAssignedEvent {
    /// Announcing node
    pub node: NodeId,
    /// Winner computed by `node`
    pub assigned: NodeId,
    /// Round announced for
    pub order_id: OrderId,
    /// The call bid for
    pub call: HallCall,
}

/// `assignee` must serve `call`. Local only.
///
/// `single_mode` is set when the issuing node was the only active node, which
/// suppresses hall lamps meant for multi-node coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignedEvent {
    /// Node that must serve the call
    pub assignee: NodeId,
    /// Settled round
    pub order_id: OrderId,
    /// The call to serve
    pub call: HallCall,
    /// Issued while alone
    pub single_mode: bool,
}

/// Connectivity to `node` changed. Produced by the liveness monitor.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub node: NodeId,
    pub connected: bool,
}

/// Asks the ledger for the hall calls owned by `node`
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveOrdersReqEvent {
    pub node: NodeId,
}

/// Ledger answer to [ActiveOrdersReqEvent]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveOrdersAnsEvent {
    pub node: NodeId,
    pub orders: HallTable,
}

/// The calls owned by `node` have been re-originated; its ledger row may be cleared
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphansHandledEvent {
    pub node: NodeId,
}

/// Payload of a data packet: one of the network-visible event kinds.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetMessage {
    NewOrder(NewOrderEvent),
    CostResult(CostResultEvent),
    Availability(AvailabilityEvent),
    OrderComplete(OrderCompleteEvent),
    CheckAssigned(CheckAssignedEvent),
}

impl NetMessage {
    /// Node that originated the wrapped event
    pub fn origin(&self) -> NodeId {
        match self {
            NetMessage::NewOrder(e) => e.node,
            NetMessage::CostResult(e) => e.node,
            NetMessage::Availability(e) => e.node,
            NetMessage::OrderComplete(e) => e.node,
            NetMessage::CheckAssigned(e) => e.node,
        }
    }
}


/// The static per-event-kind channel registry.
///
/// Cloning is cheap; every clone publishes to the same channels.
#[allow(missing_docs)]
#[derive(Clone)]
pub struct EventBus {
    pub hall_button: broadcast::Sender<HallButtonEvent>,
    pub new_order: broadcast::Sender<NewOrderEvent>,
    pub cost_result: broadcast::Sender<CostResultEvent>,
    pub availability: broadcast::Sender<AvailabilityEvent>,
    pub order_complete: broadcast::Sender<OrderCompleteEvent>,
    pub check_assigned: broadcast::Sender<CheckAssignedEvent>,
    pub assigned: broadcast::Sender<AssignedEvent>,
    pub connection: broadcast::Sender<ConnectionEvent>,
    pub active_orders_req: broadcast::Sender<ActiveOrdersReqEvent>,
    pub active_orders_ans: broadcast::Sender<ActiveOrdersAnsEvent>,
    pub orphans_handled: broadcast::Sender<OrphansHandledEvent>,
}

impl EventBus {
    /// Creates one channel per event kind
    pub fn new() -> Self {
        let cap = config::CHANNEL_CAPACITY;
        EventBus {
            hall_button: broadcast::channel(cap).0,
            new_order: broadcast::channel(cap).0,
            cost_result: broadcast::channel(cap).0,
            availability: broadcast::channel(cap).0,
            order_complete: broadcast::channel(cap).0,
            check_assigned: broadcast::channel(cap).0,
            assigned: broadcast::channel(cap).0,
            connection: broadcast::channel(cap).0,
            active_orders_req: broadcast::channel(cap).0,
            active_orders_ans: broadcast::channel(cap).0,
            orphans_handled: broadcast::channel(cap).0,
        }
    }

    /// Publishes an event received from the network on its local channel.
    ///
    /// A send only fails when nobody subscribes to that kind, which is not an error.
    pub fn publish_net(&self, msg: NetMessage) {
        match msg {
            NetMessage::NewOrder(e) => { let _ = self.new_order.send(e); }
            NetMessage::CostResult(e) => { let _ = self.cost_result.send(e); }
            NetMessage::Availability(e) => { let _ = self.availability.send(e); }
            NetMessage::OrderComplete(e) => { let _ = self.order_complete.send(e); }
            NetMessage::CheckAssigned(e) => { let _ = self.check_assigned.send(e); }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives the next event, skipping over lag.
///
/// Returns `None` once every sender is gone. A lagging subscriber loses the oldest
/// events; that is logged and the loop goes on, since every protocol step tolerates loss.
pub async fn recv<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Option<T> {
    loop {
        match rx.recv().await {
            Ok(evt) => return Some(evt),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                print::warn(format!("Event subscriber lagged, {} events dropped", n));
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
