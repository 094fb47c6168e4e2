#![warn(missing_docs)]
//! # This projects library
//!
//! This library assigns hall calls across a small fleet of elevators. Every node runs
//! the same code; there is no master. Calls are auctioned over UDP broadcast, the winner
//! is cross-checked between the nodes, and calls owned by a lost node are handed out again.
//!
//! ## Overview
//! - **Config**: Handles configuration settings.
//! - **Init**: Argument parsing and node assembly.
//! - **Events**: The event vocabulary and the bus carrying it.
//! - **Network**: Reliable broadcast and peer liveness.
//! - **Ledger**: Who owns which hall call.
//! - **Manager**: Bidding, cross-checking and recovery.
//! - **Elevator Logic**: Glue towards the local motion controller.

/// Global variables
pub mod config;

/// Help functions
pub mod ip_help_functions;

/// Initialize functions
pub mod init;

/// Print functions with color coding
pub mod print;

pub mod events;

pub mod network;

pub mod ledger;

pub mod manager;

pub mod elevator_logic;
