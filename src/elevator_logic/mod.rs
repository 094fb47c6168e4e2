//! ## Node-local glue
//!
//! Connects the coordinator to the motion controller of this node's car. The motion
//! state machine itself lives outside this crate; it talks to the glue through
//! [ControllerEvent]s in and [ControllerCommand]s out.
//!
//! ## Sub-modules
//! - [cost]: the bid estimator seam
//! - [console]: a stdin stand-in for the motion controller

pub mod cost;
pub mod console;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::NodeConfig;
use crate::events::{
    self, AssignedEvent, AvailabilityEvent, CostResultEvent, EventBus, HallButtonEvent, HallCall,
    NewOrderEvent, OrderCompleteEvent,
};
use crate::print;
use cost::CostFunction;

/// What the motion controller reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A hall button was pressed
    HallButton(HallCall),
    /// The car stopped and opened its doors at this floor
    ServiceCompleted(u8),
    /// The car can (not) take calls, e.g. obstruction or motor stop
    Availability(bool),
}

/// What the glue tells the motion controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerCommand {
    /// This car must serve `call`
    Grant {
        /// Call to serve
        call: HallCall,
        /// Always this node
        assignee: u8,
        /// Only this node was active when the call was granted
        single_mode: bool,
    },
    /// Switch a hall lamp
    HallLamp {
        /// Lamp of this call
        call: HallCall,
        /// Lit or dark
        on: bool,
    },
    /// Switch off every hall lamp at `floor`, and the cab lamp if `cab` is set
    ClearFloor {
        /// Floor served
        floor: u8,
        /// The completion was this node's
        cab: bool,
    },
}

/// The bus channels the glue listens on
pub struct Subscriptions {
    new_order: broadcast::Receiver<NewOrderEvent>,
    assigned: broadcast::Receiver<AssignedEvent>,
    order_complete: broadcast::Receiver<OrderCompleteEvent>,
}

impl Subscriptions {
    /// Subscribes to every kind the glue consumes
    pub fn new(bus: &EventBus) -> Self {
        Self {
            new_order: bus.new_order.subscribe(),
            assigned: bus.assigned.subscribe(),
            order_complete: bus.order_complete.subscribe(),
        }
    }
}

/// Runs the glue between the bus and the motion controller.
///
/// ## Parameters
/// `cfg`: This node's config
/// `subs`: Bus subscriptions, see [Subscriptions::new]
/// `bus`: Where bids, completions, availability and button presses are published
/// `cost`: Bid estimator
/// `controller_rx`: Events from the motion controller
/// `controller_tx`: Commands for the motion controller
///
/// ## Behavior
/// - Bids on every new order while this car is available, own orders included
/// - Lights the hall lamp of every multi-node assignment, grants own ones to the car
/// - Turns lamps off on completions from any node
///
/// ## Note
/// This function is permanently blocking, and should be called asynchronously
pub async fn run_local_glue(
    cfg: NodeConfig,
    mut subs: Subscriptions,
    bus: EventBus,
    cost: Arc<dyn CostFunction>,
    mut controller_rx: mpsc::Receiver<ControllerEvent>,
    controller_tx: mpsc::Sender<ControllerCommand>,
) {
    let mut available = true;

    loop {
        tokio::select! {
            Some(evt) = events::recv(&mut subs.new_order) => {
                if available {
                    let _ = bus.cost_result.send(CostResultEvent {
                        node: cfg.id,
                        order_id: evt.order_id,
                        cost: cost.time_to_serve(evt.call),
                        call: evt.call,
                    });
                }
            }
            Some(evt) = events::recv(&mut subs.assigned) => {
                if !evt.single_mode {
                    let _ = controller_tx.send(ControllerCommand::HallLamp { call: evt.call, on: true }).await;
                }
                if evt.assignee == cfg.id {
                    let _ = controller_tx.send(ControllerCommand::Grant {
                        call: evt.call,
                        assignee: evt.assignee,
                        single_mode: evt.single_mode,
                    }).await;
                }
            }
            Some(evt) = events::recv(&mut subs.order_complete) => {
                let _ = controller_tx.send(ControllerCommand::ClearFloor {
                    floor: evt.floor,
                    cab: evt.node == cfg.id,
                }).await;
            }
            Some(evt) = controller_rx.recv() => {
                match evt {
                    ControllerEvent::HallButton(call) => {
                        let _ = bus.hall_button.send(HallButtonEvent { call });
                    }
                    ControllerEvent::ServiceCompleted(floor) => {
                        let _ = bus.order_complete.send(OrderCompleteEvent { node: cfg.id, floor });
                    }
                    ControllerEvent::Availability(now) => {
                        if now != available {
                            available = now;
                            print::info(format!("Node {} is {}", cfg.id, if now { "available" } else { "unavailable" }));
                            let _ = bus.availability.send(AvailabilityEvent { node: cfg.id, available: now });
                        }
                    }
                }
            }
            else => break,
        }
    }
    print::warn("Controller gone, glue stopping".to_string());
}
