//! ## Startup
//!
//! Reads the command line and wires one node together.
//!
//! [start_node] takes its three broadcast ports as [NodeLinks], so the same assembly
//! runs on real sockets in `main` and on an in-memory hub in the tests.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use tokio::sync::{mpsc, watch};

use crate::config::{self, NodeConfig};
use crate::elevator_logic::{self, cost::CostFunction, ControllerCommand, ControllerEvent};
use crate::events::{EventBus, NodeId};
use crate::ip_help_functions;
use crate::ledger::{self, HallOrderLedger};
use crate::manager;
use crate::network::{self, NodeLinks};
use crate::print;

/// What the command line asked for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupArgs {
    /// `id::<n>`; derived from the local IP when absent
    pub id: Option<NodeId>,
    /// `port::<p>`; the data port, heartbeat and ack follow
    pub base_port: Option<u16>,
    /// `help` was given
    pub help: bool,
}

fn set_toggle(toggle: &Mutex<bool>, on: bool) {
    if let Ok(mut t) = toggle.lock() {
        *t = on;
    }
}

/// ### Reads arguments from `cargo run`
///
/// Available options:
///
/// `id::<n>` &rarr; Node id, `0..MAX_NODES`
/// `port::<p>` &rarr; Data port, heartbeat and ack use the next two
/// `print_ledger::(true/false)` &rarr; Prints the ledger on the `ledger` command
/// `print_json::(true/false)` &rarr; Prints the ledger as JSON
/// `print_err::(true/false)` &rarr; Prints error messages
/// `print_warn::(true/false)` &rarr; Prints warning messages
/// `print_ok::(true/false)` &rarr; Prints OK messages
/// `print_info::(true/false)` &rarr; Prints informational messages
/// `print_else::(true/false)` &rarr; Prints other messages, including coordinator messages
/// `debug` &rarr; Disables all prints except error messages
/// `help` &rarr; Displays all possible arguments without starting the program
///
/// Print toggles take effect immediately. `args` excludes the program name.
pub fn parse_args(args: &[String]) -> anyhow::Result<StartupArgs> {
    let mut parsed = StartupArgs::default();

    for arg in args {
        let lower = arg.to_lowercase();
        if let Some((key, value)) = lower.split_once("::") {
            let is_true = value == "true";
            match key {
                "id" => {
                    let id: NodeId = value.parse().with_context(|| format!("bad id '{}'", value))?;
                    if id as usize >= config::MAX_NODES {
                        bail!("id {} outside 0..{}", id, config::MAX_NODES);
                    }
                    parsed.id = Some(id);
                }
                "port" => {
                    parsed.base_port = Some(value.parse().with_context(|| format!("bad port '{}'", value))?);
                }
                "print_ledger" => set_toggle(&config::PRINT_LEDGER_ON, is_true),
                "print_json" => set_toggle(&config::PRINT_JSON_ON, is_true),
                "print_err" => set_toggle(&config::PRINT_ERR_ON, is_true),
                "print_warn" => set_toggle(&config::PRINT_WARN_ON, is_true),
                "print_ok" => set_toggle(&config::PRINT_OK_ON, is_true),
                "print_info" => set_toggle(&config::PRINT_INFO_ON, is_true),
                "print_else" => set_toggle(&config::PRINT_ELSE_ON, is_true),
                _ => print::warn(format!("Unknown argument '{}'", arg)),
            }
        } else if lower == "debug" {
            set_toggle(&config::PRINT_WARN_ON, false);
            set_toggle(&config::PRINT_OK_ON, false);
            set_toggle(&config::PRINT_INFO_ON, false);
            set_toggle(&config::PRINT_ELSE_ON, false);
        } else if lower == "help" {
            parsed.help = true;
        } else {
            print::warn(format!("Unknown argument '{}'", arg));
        }
    }
    Ok(parsed)
}

/// Prints the options [parse_args] understands
pub fn print_help() {
    println!("Available arguments:");
    println!("  id::<0..{}>", config::MAX_NODES);
    println!("  port::<data port>");
    println!("  print_ledger::true/false");
    println!("  print_json::true/false");
    println!("  print_err::true/false");
    println!("  print_warn::true/false");
    println!("  print_ok::true/false");
    println!("  print_info::true/false");
    println!("  print_else::true/false");
    println!("  debug (only errors are shown)");
}

/// Builds this node's config, falling back to the local IP for the id
pub fn node_config(args: &StartupArgs) -> anyhow::Result<NodeConfig> {
    let id = match args.id {
        Some(id) => id,
        None => ip_help_functions::id_from_local_ip()?,
    };
    let mut cfg = NodeConfig::new(id);
    if let Some(port) = args.base_port {
        cfg.base_port = port;
    }
    Ok(cfg)
}

/// Read-only views into a running node
pub struct NodeHandles {
    /// The node's event bus
    pub bus: EventBus,
    /// Latest ledger
    pub ledger_rx: watch::Receiver<HallOrderLedger>,
    /// Latest active set
    pub active_rx: watch::Receiver<[bool; config::MAX_NODES]>,
}

/// Spawns every task of one node.
///
/// ## Parameters
/// `cfg`: This node's config
/// `links`: The node's broadcast ports
/// `cost`: Bid estimator
/// `controller_rx`: Events from the motion controller
/// `controller_tx`: Commands for the motion controller
///
/// ## Behavior
/// Every component subscribes to the bus before the first task is spawned, so no
/// component misses an event published by another one during startup.
pub fn start_node(
    cfg: NodeConfig,
    links: NodeLinks,
    cost: Arc<dyn CostFunction>,
    controller_rx: mpsc::Receiver<ControllerEvent>,
    controller_tx: mpsc::Sender<ControllerCommand>,
) -> NodeHandles {
    let bus = EventBus::new();
    let (ledger_tx, ledger_rx) = watch::channel(HallOrderLedger::new());
    let mut initial_active = [false; config::MAX_NODES];
    if let Some(me) = initial_active.get_mut(cfg.id as usize) {
        *me = true;
    }
    let (active_tx, active_rx) = watch::channel(initial_active);

    let ledger_subs = ledger::Subscriptions::new(&bus);
    let manager_subs = manager::Subscriptions::new(&bus);
    let glue_subs = elevator_logic::Subscriptions::new(&bus);

    network::start_transport(&cfg, &bus, links);

    {
        let cfg = cfg.clone();
        let bus = bus.clone();
        let active_rx = active_rx.clone();
        tokio::spawn(async move {
            ledger::run_ledger(cfg, ledger_subs, bus, active_rx, ledger_tx).await;
        });
    }
    {
        let cfg = cfg.clone();
        let bus = bus.clone();
        tokio::spawn(async move {
            manager::start_manager(cfg, manager_subs, bus, active_tx).await;
        });
    }
    {
        let cfg = cfg.clone();
        let bus = bus.clone();
        tokio::spawn(async move {
            elevator_logic::run_local_glue(cfg, glue_subs, bus, cost, controller_rx, controller_tx).await;
        });
    }

    print::ok(format!("Node {} started", cfg.id));
    NodeHandles { bus, ledger_rx, active_rx }
}
