//! This module contains some help functions regarding the IP address
//!
//! Functions
//! - [ip2id]: Generates an ID for the node based on the IP-address.
//! - [id_from_local_ip]: The same, for this machine.

use std::net::IpAddr;

use anyhow::Context;
use local_ip_address::local_ip;

use crate::config;
use crate::events::NodeId;

/// Extracts a node id from the last octet of `ip`, wrapped into `0..MAX_NODES`
///
/// ## Example
/// ```
/// use elevatorfleet::ip_help_functions::ip2id;
/// use std::net::IpAddr;
/// use std::str::FromStr;
///
/// let ip = IpAddr::from_str("10.100.23.25").unwrap();
/// assert_eq!(ip2id(ip), Some(1));
/// ```
///
/// Returns `None` for IPv6 addresses.
pub fn ip2id(ip: IpAddr) -> Option<NodeId> {
    match ip {
        IpAddr::V4(addr) => Some(addr.octets()[3] % config::MAX_NODES as u8),
        IpAddr::V6(_) => None,
    }
}

/// Derives this node's id from its local IPv4 address
pub fn id_from_local_ip() -> anyhow::Result<NodeId> {
    let ip = local_ip().context("no local IP address, pass id::<n> instead")?;
    ip2id(ip).with_context(|| format!("cannot derive an id from {}", ip))
}
