//! ## Console controller
//!
//! A stand-in for the motion controller, driven from stdin. Lets one run a fleet of
//! nodes in terminals and press buttons by hand.
//!
//! ## Commands
//! - `call <floor> <up|down>`: press a hall button
//! - `done <floor>`: the car served `floor`
//! - `floor <n>`: move the car, used by the cost estimate
//! - `avail <true|false>`: set availability
//! - `ledger`: print the ledger
//! - `help`

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use crate::config;
use crate::events::{Direction, HallCall};
use crate::ledger::HallOrderLedger;
use crate::print;
use super::cost::DistanceCost;
use super::{ControllerCommand, ControllerEvent};

/// One parsed console line
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Call(HallCall),
    Done(u8),
    Floor(u8),
    Avail(bool),
    Ledger,
    Help,
}

fn parse_floor(word: Option<&str>) -> anyhow::Result<u8> {
    let word = word.ok_or_else(|| anyhow!("missing floor"))?;
    let floor: u8 = word.parse().with_context(|| format!("'{}' is not a floor", word))?;
    if floor >= config::NUM_FLOORS {
        bail!("floor {} outside 0..{}", floor, config::NUM_FLOORS);
    }
    Ok(floor)
}

/// Parses one console line
pub fn parse_command(line: &str) -> anyhow::Result<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let cmd = words.next().ok_or_else(|| anyhow!("empty line"))?;

    match cmd {
        "call" => {
            let floor = parse_floor(words.next())?;
            let direction = match words.next() {
                Some("up") => Direction::Up,
                Some("down") => Direction::Down,
                other => bail!("expected up or down, got {:?}", other),
            };
            HallCall::new(floor, direction)
                .map(ConsoleCommand::Call)
                .ok_or_else(|| anyhow!("floor {} has no {:?} button", floor, direction))
        }
        "done" => Ok(ConsoleCommand::Done(parse_floor(words.next())?)),
        "floor" => Ok(ConsoleCommand::Floor(parse_floor(words.next())?)),
        "avail" => {
            let word = words.next().ok_or_else(|| anyhow!("missing true/false"))?;
            Ok(ConsoleCommand::Avail(word.parse().with_context(|| format!("'{}' is not a bool", word))?))
        }
        "ledger" => Ok(ConsoleCommand::Ledger),
        "help" => Ok(ConsoleCommand::Help),
        other => bail!("unknown command '{}'", other),
    }
}

fn print_help() {
    println!("call <floor> <up|down>  press a hall button");
    println!("done <floor>            the car served a floor");
    println!("floor <n>               move the car");
    println!("avail <true|false>      set availability");
    println!("ledger                  print the hall-order ledger");
}

/// Runs the console until stdin closes.
///
/// ## Parameters
/// `cost`: Shared with the glue, `floor` updates it
/// `controller_tx`: Events for the glue
/// `command_rx`: Commands from the glue, printed as they arrive
/// `ledger_rx`, `active_rx`: Printed by `ledger`
pub async fn run_console(
    cost: Arc<DistanceCost>,
    controller_tx: mpsc::Sender<ControllerEvent>,
    mut command_rx: mpsc::Receiver<ControllerCommand>,
    ledger_rx: watch::Receiver<HallOrderLedger>,
    active_rx: watch::Receiver<[bool; config::MAX_NODES]>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print::info("Console ready, type 'help' for commands".to_string());

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => return,
                    Err(e) => {
                        print::err(format!("Reading stdin failed: {}", e));
                        return;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let event = match parse_command(&line) {
                    Ok(ConsoleCommand::Call(call)) => Some(ControllerEvent::HallButton(call)),
                    Ok(ConsoleCommand::Done(floor)) => Some(ControllerEvent::ServiceCompleted(floor)),
                    Ok(ConsoleCommand::Avail(a)) => Some(ControllerEvent::Availability(a)),
                    Ok(ConsoleCommand::Floor(floor)) => {
                        cost.set_floor(floor);
                        None
                    }
                    Ok(ConsoleCommand::Ledger) => {
                        print::ledger(&ledger_rx.borrow(), &active_rx.borrow());
                        None
                    }
                    Ok(ConsoleCommand::Help) => {
                        print_help();
                        None
                    }
                    Err(e) => {
                        print::warn(format!("{:#}", e));
                        None
                    }
                };
                if let Some(event) = event {
                    if controller_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Some(cmd) = command_rx.recv() => match cmd {
                ControllerCommand::Grant { call, single_mode, .. } => {
                    print::ok(format!("Serve floor {} {:?}{}", call.floor, call.direction, if single_mode { " (alone)" } else { "" }));
                }
                ControllerCommand::HallLamp { call, on } => {
                    print::color(format!("Lamp {} {:?} {}", call.floor, call.direction, if on { "on" } else { "off" }), ansi_term::Colour::Yellow);
                }
                ControllerCommand::ClearFloor { floor, cab } => {
                    print::color(format!("Lamps off at floor {}{}", floor, if cab { " (cab too)" } else { "" }), ansi_term::Colour::Yellow);
                }
            },
        }
    }
}
