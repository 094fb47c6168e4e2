//! Orphan-order recovery.
//!
//! When a peer is lost or goes unavailable, the calls it owned must be handed out again.
//! Only the lowest active node does this, so every orphan is re-originated once.

use crate::events::{ActiveOrdersAnsEvent, HallCall, NodeId};
use super::active_set::NodeStatus;

/// True if this node must recover the calls of `lost`
pub fn leads_recovery(status: &NodeStatus, self_id: NodeId, lost: NodeId) -> bool {
    lost != self_id && status.lowest_active() == Some(self_id)
}

/// The calls in a ledger answer that need a new owner
pub fn orphaned_calls(ans: &ActiveOrdersAnsEvent) -> Vec<HallCall> {
    HallCall::from_table(&ans.orders)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Direction, HallTable};

    #[test]
    fn lowest_active_node_leads() {
        let mut s = NodeStatus::new(0);
        s.set_connected(1, true);
        s.set_connected(2, true);
        s.set_connected(2, false);
        assert!(leads_recovery(&s, 0, 2));

        let mut s = NodeStatus::new(1);
        s.set_connected(0, true);
        s.set_connected(2, true);
        s.set_connected(2, false);
        assert!(!leads_recovery(&s, 1, 2));
    }

    #[test]
    fn unavailable_lowest_hands_over_the_lead() {
        let mut s = NodeStatus::new(1);
        s.set_connected(0, true);
        s.set_connected(2, true);
        s.set_available(0, false);
        s.set_connected(2, false);
        assert!(leads_recovery(&s, 1, 2));
    }

    #[test]
    fn answer_lists_every_owned_call() {
        let mut orders = HallTable::default();
        orders[0][Direction::Up.index()] = true;
        orders[3][Direction::Down.index()] = true;
        let calls = orphaned_calls(&ActiveOrdersAnsEvent { node: 2, orders });
        assert_eq!(calls.len(), 2);
    }
}
