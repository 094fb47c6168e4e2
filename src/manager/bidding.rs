//! Bid collection for one order.
//!
//! A round is ready when the set of nodes that have bid equals the active set at the
//! moment of evaluation: every active node has bid, and no inactive one has.
//!
//! That match can be missed for good, e.g. when a node bids and then leaves the active
//! set before the last bid arrives, or when a bid is lost. Every order therefore gets a
//! deadline task ([run_bidding_deadline]) from the moment this node first hears of it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

use crate::config;
use crate::events::{HallCall, NodeId, OrderId};
use crate::print;
use super::cross_check::Resolution;
use super::OrderBook;

/// Bids received for one order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiddingRound {
    /// The call being bid for
    pub call: HallCall,
    costs: [Option<u32>; config::MAX_NODES],
}

impl BiddingRound {
    /// A round with no bids yet
    pub fn new(call: HallCall) -> Self {
        Self { call, costs: [None; config::MAX_NODES] }
    }

    /// Stores the bid of `node`. A repeated bid replaces the earlier one.
    pub fn register(&mut self, node: NodeId, cost: u32) {
        if let Some(slot) = self.costs.get_mut(node as usize) {
            *slot = Some(cost);
        }
    }

    /// True when exactly the nodes in `active` have bid
    pub fn is_ready(&self, active: &[bool; config::MAX_NODES]) -> bool {
        self.costs
            .iter()
            .zip(active.iter())
            .all(|(cost, a)| cost.is_some() == *a)
    }

    /// Lowest-cost active bidder. Ties go to the lowest id.
    pub fn winner(&self, active: &[bool; config::MAX_NODES]) -> Option<NodeId> {
        self.costs
            .iter()
            .enumerate()
            .filter(|(i, _)| active[*i])
            .filter_map(|(i, cost)| cost.map(|c| (c, i as NodeId)))
            .min()
            .map(|(_, node)| node)
    }
}

/// Expires `order_id` after `timeout` unless it moved on by then.
///
/// A round still bidding at the deadline fails open and the resolution is reported on
/// `done_tx`. Rounds already cross-checking are left to their own task.
///
/// ## Note
/// Ends itself after the deadline. Meant to be spawned once per order.
pub async fn run_bidding_deadline(
    order_id: OrderId,
    book: Arc<Mutex<OrderBook>>,
    timeout: Duration,
    done_tx: mpsc::Sender<Resolution>,
) {
    sleep(timeout).await;

    let expired = book.lock().await.expire(order_id);
    if let Some(res) = expired {
        print::warn(format!("Order {} still bidding after {:?}, failing open", order_id, timeout));
        let _ = done_tx.send(res).await;
    }
}
