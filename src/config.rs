//! # config.rs – Centralized Parameter Store
//!
//! This module holds all static program parameters used throughout the system.
//! Keeping configuration in one place makes tuning, experimentation, and testing easier.
//!
//! Values that differ between nodes running in the same process (tests) live in
//! [NodeConfig], which is built from the constants below.

use std::sync::Mutex;
use std::time::Duration;
use once_cell::sync::Lazy;

//
// ──────────────────────────────────────────────────────────────
//   1. NETWORK SETTINGS
// ──────────────────────────────────────────────────────────────
//

/// UDP port used to broadcast data packets
pub const CONNECTION_DATA_PORT: u16 = 12067;

/// UDP port used to broadcast heartbeats
pub const CONNECTION_CHECK_PORT: u16 = 12068;

/// UDP port used to broadcast acknowledgements
pub const CONNECTION_ACK_PORT: u16 = 12069;

/// UDP broadcast listen address (bind address)
pub static BC_LISTEN_ADDR: &str = "0.0.0.0";

/// Broadcast address used for system-wide traffic
pub static BC_ADDR: &str = "255.255.255.255";

/// Size of UDP receive buffer in bytes
pub const UDP_BUFFER: usize = 1024;

/// Capacity of internal frame and event channels
pub const CHANNEL_CAPACITY: usize = 300;

//
// ──────────────────────────────────────────────────────────────
//   2. SYSTEM & ELEVATOR PARAMETERS
// ──────────────────────────────────────────────────────────────
//

/// Max number of nodes in the fleet. Node ids are `0..MAX_NODES`
pub const MAX_NODES: usize = 3;

/// Number of floors served by every car
pub const NUM_FLOORS: u8 = 4;

/// Special error ID used to mark invalid nodes
pub const ERROR_ID: u8 = 255;

/// Seconds a car needs between two floors (used by the reference cost function)
pub const TRAVEL_TIME: u32 = 3;

/// Seconds the door stays open on a stop (used by the reference cost function)
pub const DOOR_OPEN_TIME: u32 = 3;

//
// ──────────────────────────────────────────────────────────────
//   3. TIMING & TIMEOUTS & INTERVALS
// ──────────────────────────────────────────────────────────────
//

/// Interval between heartbeat broadcasts
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Consecutive missed heartbeats before a peer is considered lost.
/// Dropout latency = interval * threshold
pub const HEARTBEAT_MISS_THRESHOLD: u32 = 10;

/// How long a sender waits for acks before resending
pub const ACK_TIMEOUT: Duration = Duration::from_millis(15);

/// Number of resends before a packet is given up
pub const ACK_ATTEMPTS: u32 = 30;

/// Max time from start of cross-checking until an order is forced open
pub const MAX_DECIDE_TIME: Duration = Duration::from_millis(500);

/// Minimum spacing between two frames leaving the data socket
pub const TX_SPACING: Duration = Duration::from_millis(10);

//
// ──────────────────────────────────────────────────────────────
//   4. PACKET & ORDER IDENTIFIERS
// ──────────────────────────────────────────────────────────────
//

/// Low bits of a packet id holding the rolling sequence number
pub const PACKET_SEQ_BITS: u32 = 8;

/// Low bits of an order id holding the local order counter
pub const ORDER_SEQ_BITS: u32 = 16;

/// Number of rotating dedup buckets
pub const RX_PACKET_REGISTERS: usize = 3;

/// Number of packet ids per dedup bucket before it rotates
pub const RX_PACKET_REGISTER_LENGTH: usize = 36;

/// How many resolved order ids the coordinator remembers to drop stragglers
pub const RESOLVED_ORDER_MEMORY: usize = 64;

//
// ──────────────────────────────────────────────────────────────
//   5. LOGGING CONFIGURATION
// ──────────────────────────────────────────────────────────────
//

/// Enable/disable printing of the ledger table
pub static PRINT_LEDGER_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Print the ledger as JSON instead of a table
pub static PRINT_JSON_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

/// Enable/disable printing of errors
pub static PRINT_ERR_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of warnings
pub static PRINT_WARN_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of success messages
pub static PRINT_OK_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of general info
pub static PRINT_INFO_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable miscellaneous debug prints
pub static PRINT_ELSE_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));


/// Per-node runtime parameters.
///
/// Everything here defaults to the constants above. Tests running several nodes in one
/// process build one `NodeConfig` per node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's id, `0..MAX_NODES`
    pub id: u8,
    /// Data port. Heartbeat and ack ports follow at `+1` and `+2`
    pub base_port: u16,
    /// See [HEARTBEAT_INTERVAL]
    pub heartbeat_interval: Duration,
    /// See [HEARTBEAT_MISS_THRESHOLD]
    pub heartbeat_miss_threshold: u32,
    /// See [ACK_TIMEOUT]
    pub ack_timeout: Duration,
    /// See [ACK_ATTEMPTS]
    pub ack_attempts: u32,
    /// See [MAX_DECIDE_TIME]
    pub decide_timeout: Duration,
    /// See [RX_PACKET_REGISTER_LENGTH]
    pub dedup_register_length: usize,
    /// See [TX_SPACING]
    pub tx_spacing: Duration,
}

impl NodeConfig {
    /// Builds a config for node `id` with every tunable at its default.
    pub fn new(id: u8) -> Self {
        Self {
            id,
            base_port: CONNECTION_DATA_PORT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_miss_threshold: HEARTBEAT_MISS_THRESHOLD,
            ack_timeout: ACK_TIMEOUT,
            ack_attempts: ACK_ATTEMPTS,
            decide_timeout: MAX_DECIDE_TIME,
            dedup_register_length: RX_PACKET_REGISTER_LENGTH,
            tx_spacing: TX_SPACING,
        }
    }

    /// Port carrying data packets
    pub fn data_port(&self) -> u16 {
        self.base_port
    }

    /// Port carrying heartbeats
    pub fn check_port(&self) -> u16 {
        self.base_port.wrapping_add(CONNECTION_CHECK_PORT - CONNECTION_DATA_PORT)
    }

    /// Port carrying acknowledgements
    pub fn ack_port(&self) -> u16 {
        self.base_port.wrapping_add(CONNECTION_ACK_PORT - CONNECTION_DATA_PORT)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_match_wire_layout() {
        let cfg = NodeConfig::new(1);
        assert_eq!(cfg.data_port(), 12067);
        assert_eq!(cfg.check_port(), 12068);
        assert_eq!(cfg.ack_port(), 12069);
    }

    #[test]
    fn packet_sequence_space_exceeds_retry_window() {
        // A frame is alive for at most ACK_ATTEMPTS resends, and the tx spacing keeps
        // far fewer than 2^K frames in flight during that time.
        let window = (ACK_TIMEOUT * (ACK_ATTEMPTS + 1)).as_millis() / TX_SPACING.as_millis();
        assert!(window < (1u128 << PACKET_SEQ_BITS));
    }
}
