//! Connectivity and availability flags per node, and the active set derived from them.
//!
//! A node is active when it is both connected and available. Self is always connected.

use crate::config;
use crate::events::NodeId;

/// Fleet status as seen by one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    self_id: NodeId,
    connected: [bool; config::MAX_NODES],
    available: [bool; config::MAX_NODES],
}

impl NodeStatus {
    /// Only self connected, everyone assumed available
    pub fn new(self_id: NodeId) -> Self {
        let mut connected = [false; config::MAX_NODES];
        if let Some(me) = connected.get_mut(self_id as usize) {
            *me = true;
        }
        Self { self_id, connected, available: [true; config::MAX_NODES] }
    }

    /// Updates connectivity of a peer.
    ///
    /// A peer coming back is assumed available until it says otherwise, since any
    /// availability change it broadcast while away was lost.
    pub fn set_connected(&mut self, node: NodeId, connected: bool) {
        if node == self.self_id {
            return;
        }
        if let Some(c) = self.connected.get_mut(node as usize) {
            *c = connected;
            if connected {
                self.available[node as usize] = true;
            }
        }
    }

    /// Updates availability of any node, self included
    pub fn set_available(&mut self, node: NodeId, available: bool) {
        if let Some(a) = self.available.get_mut(node as usize) {
            *a = available;
        }
    }

    /// `active[i]` is true when node `i` is connected and available
    pub fn active(&self) -> [bool; config::MAX_NODES] {
        std::array::from_fn(|i| self.connected[i] && self.available[i])
    }

    /// Active node ids in ascending order
    pub fn active_ids(&self) -> Vec<NodeId> {
        active_ids(&self.active())
    }

    /// Lowest active id, the node that leads recovery
    pub fn lowest_active(&self) -> Option<NodeId> {
        self.active_ids().first().copied()
    }

    /// True when exactly one node is active
    pub fn single_mode(&self) -> bool {
        self.active_ids().len() == 1
    }

    /// True when no node other than self is active. Self may or may not be.
    pub fn is_alone(&self) -> bool {
        self.active_ids().iter().all(|id| *id == self.self_id)
    }

    /// True if self is in the active set
    pub fn self_active(&self) -> bool {
        self.active().get(self.self_id as usize).copied().unwrap_or(false)
    }
}

/// Ids of the set flags in `active`
pub fn active_ids(active: &[bool; config::MAX_NODES]) -> Vec<NodeId> {
    active
        .iter()
        .enumerate()
        .filter(|(_, a)| **a)
        .map(|(i, _)| i as NodeId)
        .collect()
}
