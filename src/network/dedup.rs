//! Duplicate suppression for received packet ids.
//!
//! Ids are kept in [config::RX_PACKET_REGISTERS] rotating buckets. An id is a duplicate
//! if it sits in the current or the previous bucket. When the current bucket grows past
//! its length, the oldest bucket is emptied and becomes the new current one, so an id
//! is remembered for at least one full bucket of later traffic.

use std::collections::VecDeque;

use crate::config;
use super::packet::PacketId;

/// Rotating-bucket memory of recently seen packet ids
#[derive(Debug, Clone)]
pub struct PacketRegister {
    buckets: Vec<VecDeque<PacketId>>,
    current: usize,
    bucket_len: usize,
}

impl PacketRegister {
    /// Creates an empty register whose buckets rotate after `bucket_len` ids
    pub fn new(bucket_len: usize) -> Self {
        Self {
            buckets: vec![VecDeque::with_capacity(bucket_len + 1); config::RX_PACKET_REGISTERS],
            current: 0,
            bucket_len,
        }
    }

    fn previous(&self) -> usize {
        (self.current + config::RX_PACKET_REGISTERS - 1) % config::RX_PACKET_REGISTERS
    }

    /// Returns `true` if `id` is new, and remembers it. Returns `false` for duplicates.
    pub fn check_and_insert(&mut self, id: PacketId) -> bool {
        let prev = self.previous();
        if self.buckets[self.current].contains(&id) || self.buckets[prev].contains(&id) {
            return false;
        }

        self.buckets[self.current].push_back(id);
        if self.buckets[self.current].len() > self.bucket_len {
            // The oldest bucket follows the current one in rotation order
            let oldest = (self.current + 1) % config::RX_PACKET_REGISTERS;
            self.buckets[oldest].clear();
            self.current = oldest;
        }
        true
    }
}

impl Default for PacketRegister {
    fn default() -> Self {
        Self::new(config::RX_PACKET_REGISTER_LENGTH)
    }
}
