//! ## Winner cross-check
//!
//! After bidding, every active node announces the winner it computed. The per-order
//! task in this module waits until every node in the active-set snapshot taken when
//! checking began has announced, then compares the announcements.
//!
//! Agreement confirms the winner. Disagreement, or no verdict before `decide_timeout`,
//! fails open: every node active at that moment gets the call. Serving a call twice is
//! acceptable, dropping it is not.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::{sleep_until, Instant};

use crate::config;
use crate::events::{HallCall, NodeId, OrderId};
use crate::print;
use super::OrderBook;

/// Verdict of a cross-check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every snapshot node announced the same winner
    Confirmed(NodeId),
    /// Announcements differed, or the deadline passed
    FailedOpen,
}

/// Winner announcements collected for one order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementRound {
    /// The call being checked
    pub call: HallCall,
    announced: [Option<NodeId>; config::MAX_NODES],
    snapshot: Option<[bool; config::MAX_NODES]>,
}

impl AnnouncementRound {
    /// A round with no announcements and no snapshot
    pub fn new(call: HallCall) -> Self {
        Self { call, announced: [None; config::MAX_NODES], snapshot: None }
    }

    /// Stores the winner announced by `node`
    pub fn record(&mut self, node: NodeId, winner: NodeId) {
        if let Some(slot) = self.announced.get_mut(node as usize) {
            *slot = Some(winner);
        }
    }

    /// Starts local checking against `active`
    pub fn begin(&mut self, active: [bool; config::MAX_NODES]) {
        self.snapshot = Some(active);
    }

    /// True once local checking has begun
    pub fn is_checking(&self) -> bool {
        self.snapshot.is_some()
    }

    /// The verdict, once every snapshot node has announced
    pub fn outcome(&self) -> Option<Outcome> {
        let snapshot = self.snapshot?;
        let mut winners = Vec::with_capacity(config::MAX_NODES);
        for (node, in_snapshot) in snapshot.iter().enumerate() {
            if *in_snapshot {
                winners.push(self.announced[node]?);
            }
        }
        match winners.split_first() {
            Some((first, rest)) if rest.iter().all(|w| w == first) => Some(Outcome::Confirmed(*first)),
            _ => Some(Outcome::FailedOpen),
        }
    }
}

/// A finished order, ready to be handed out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The settled order
    pub order_id: OrderId,
    /// The call to serve
    pub call: HallCall,
    /// How the order was settled
    pub outcome: Outcome,
    /// Nodes that must serve the call
    pub assignees: Vec<NodeId>,
    /// Exactly one node was active at resolution
    pub single_mode: bool,
}

/// Waits for the verdict on `order_id` and reports it on `done_tx`.
///
/// ## Parameters
/// `book`: Shared round tables, also written by the coordinator loop
/// `wakeup`: Notified by the coordinator loop after each recorded announcement
/// `timeout`: Time from now until the order is forced open
///
/// ## Note
/// Ends itself after reporting. Meant to be spawned once per order.
pub async fn run_cross_check(
    order_id: OrderId,
    book: Arc<Mutex<OrderBook>>,
    wakeup: Arc<Notify>,
    timeout: Duration,
    done_tx: mpsc::Sender<Resolution>,
) {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(res) = book.lock().await.try_resolve(order_id) {
            let _ = done_tx.send(res).await;
            return;
        }

        tokio::select! {
            _ = wakeup.notified() => {}
            _ = sleep_until(deadline) => {
                print::warn(format!("Order {} not settled within {:?}, failing open", order_id, timeout));
                if let Some(res) = book.lock().await.force_open(order_id) {
                    let _ = done_tx.send(res).await;
                }
                return;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Direction;

    fn round() -> AnnouncementRound {
        AnnouncementRound::new(HallCall::new(1, Direction::Up).unwrap())
    }

    #[test]
    fn no_verdict_before_checking_begins() {
        let mut r = round();
        r.record(0, 1);
        r.record(1, 1);
        r.record(2, 1);
        assert_eq!(r.outcome(), None);
        r.begin([true, true, true]);
        assert_eq!(r.outcome(), Some(Outcome::Confirmed(1)));
    }

    #[test]
    fn waits_for_every_snapshot_node() {
        let mut r = round();
        r.begin([true, true, false]);
        r.record(0, 2);
        assert_eq!(r.outcome(), None);
        r.record(1, 2);
        assert_eq!(r.outcome(), Some(Outcome::Confirmed(2)));
    }

    #[test]
    fn announcements_outside_snapshot_are_ignored() {
        let mut r = round();
        r.begin([true, false, true]);
        r.record(0, 0);
        r.record(1, 2);
        r.record(2, 0);
        assert_eq!(r.outcome(), Some(Outcome::Confirmed(0)));
    }

    #[test]
    fn disagreement_fails_open() {
        let mut r = round();
        r.begin([true, true, false]);
        r.record(0, 0);
        r.record(1, 1);
        assert_eq!(r.outcome(), Some(Outcome::FailedOpen));
    }
}
