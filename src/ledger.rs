//! ## Hall-order ledger
//!
//! This node's record of which node owns which hall call. Every node keeps its own copy,
//! kept in step by the same [AssignedEvent]s and [OrderCompleteEvent]s reaching all of them.
//!
//! The ledger task is also the recovery data source: it answers [ActiveOrdersReqEvent]s
//! with a node's row, and clears that row once [OrphansHandledEvent] says the calls in it
//! were handed out again.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::config::{self, NodeConfig};
use crate::events::{
    self, ActiveOrdersAnsEvent, ActiveOrdersReqEvent, AssignedEvent, AvailabilityEvent,
    EventBus, HallCall, HallTable, NodeId, OrderCompleteEvent, OrphansHandledEvent,
};
use crate::print;

/// Per-node table of owned hall calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HallOrderLedger {
    rows: [HallTable; config::MAX_NODES],
}

impl HallOrderLedger {
    /// An empty ledger
    pub fn new() -> Self {
        Self { rows: [[[false; 2]; config::NUM_FLOORS as usize]; config::MAX_NODES] }
    }

    /// Marks `call` as owned by `node`. Out-of-range ids are ignored.
    pub fn record_assignment(&mut self, node: NodeId, call: HallCall) {
        if let Some(row) = self.rows.get_mut(node as usize) {
            if let Some(floor) = row.get_mut(call.floor as usize) {
                floor[call.direction.index()] = true;
            }
        }
    }

    /// Clears both directions at `floor` for every node
    pub fn record_completion(&mut self, floor: u8) {
        for row in self.rows.iter_mut() {
            if let Some(f) = row.get_mut(floor as usize) {
                *f = [false; 2];
            }
        }
    }

    /// The calls owned by `node`. All false for out-of-range ids.
    pub fn owned_calls(&self, node: NodeId) -> HallTable {
        self.rows.get(node as usize).copied().unwrap_or_default()
    }

    /// Clears every call owned by `node`
    pub fn clear_all(&mut self, node: NodeId) {
        if let Some(row) = self.rows.get_mut(node as usize) {
            *row = Default::default();
        }
    }

    /// Per-floor lamp state: a hall lamp is lit while any node owns the call
    pub fn hall_lamps(&self) -> HallTable {
        let mut lamps: HallTable = Default::default();
        for row in self.rows.iter() {
            for (floor, dirs) in row.iter().enumerate() {
                lamps[floor][0] |= dirs[0];
                lamps[floor][1] |= dirs[1];
            }
        }
        lamps
    }
}

impl Default for HallOrderLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// The bus channels the ledger task listens on
pub struct Subscriptions {
    assigned: broadcast::Receiver<AssignedEvent>,
    order_complete: broadcast::Receiver<OrderCompleteEvent>,
    availability: broadcast::Receiver<AvailabilityEvent>,
    active_orders_req: broadcast::Receiver<ActiveOrdersReqEvent>,
    orphans_handled: broadcast::Receiver<OrphansHandledEvent>,
}

impl Subscriptions {
    /// Subscribes to every kind the ledger consumes
    pub fn new(bus: &EventBus) -> Self {
        Self {
            assigned: bus.assigned.subscribe(),
            order_complete: bus.order_complete.subscribe(),
            availability: bus.availability.subscribe(),
            active_orders_req: bus.active_orders_req.subscribe(),
            orphans_handled: bus.orphans_handled.subscribe(),
        }
    }
}

/// Runs the ledger task.
///
/// ## Parameters
/// `cfg`: This node's config
/// `subs`: Bus subscriptions, see [Subscriptions::new]
/// `bus`: Where recovery answers are published
/// `active_rx`: The coordinator's active set
/// `ledger_tx`: Receives a fresh copy of the ledger after every change
///
/// ## Behavior
/// - `AssignedEvent`: the assignee owns the call, also in single mode
/// - `OrderCompleteEvent`: the floor is cleared for every node
/// - Own `AvailabilityEvent` going false: own row is cleared, the surviving nodes
///   redistribute those calls. With no other node active the calls are kept.
/// - `ActiveOrdersReqEvent`: answers with the requested row
/// - `OrphansHandledEvent`: clears the row
///
/// ## Note
/// This function is permanently blocking, and should be called asynchronously
pub async fn run_ledger(
    cfg: NodeConfig,
    mut subs: Subscriptions,
    bus: EventBus,
    active_rx: watch::Receiver<[bool; config::MAX_NODES]>,
    ledger_tx: watch::Sender<HallOrderLedger>,
) {
    let mut ledger = HallOrderLedger::new();

    loop {
        let changed = tokio::select! {
            Some(evt) = events::recv(&mut subs.assigned) => {
                ledger.record_assignment(evt.assignee, evt.call);
                true
            }
            Some(evt) = events::recv(&mut subs.order_complete) => {
                ledger.record_completion(evt.floor);
                true
            }
            Some(evt) = events::recv(&mut subs.availability) => {
                let others_active = active_rx
                    .borrow()
                    .iter()
                    .enumerate()
                    .any(|(node, a)| *a && node != cfg.id as usize);
                if evt.node == cfg.id && !evt.available && others_active {
                    ledger.clear_all(cfg.id);
                    true
                } else {
                    false
                }
            }
            Some(evt) = events::recv(&mut subs.active_orders_req) => {
                let _ = bus.active_orders_ans.send(ActiveOrdersAnsEvent {
                    node: evt.node,
                    orders: ledger.owned_calls(evt.node),
                });
                false
            }
            Some(evt) = events::recv(&mut subs.orphans_handled) => {
                print::info(format!("Calls of node {} redistributed, clearing its row", evt.node));
                ledger.clear_all(evt.node);
                true
            }
            else => break,
        };

        if changed {
            let _ = ledger_tx.send(ledger.clone());
        }
    }
    print::warn("Event bus closed, ledger stopping".to_string());
}
