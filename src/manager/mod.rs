//! ## Assignment coordinator
//!
//! Turns hall calls into assignments. Every call becomes an order that moves through
//! bidding, winner selection and a cross-check with the peers, and ends in one
//! [AssignedEvent] per assignee.
//!
//! ## Sub-modules
//! - [active_set]: connectivity and availability flags
//! - [bidding]: bid collection and winner selection
//! - [cross_check]: winner announcements and the per-order verdict task
//! - [recovery]: re-origination of calls owned by lost nodes
//!
//! ## Shared state
//! [OrderBook] is the only state shared between tasks. The coordinator loop, the
//! per-order deadline tasks and the per-order cross-check tasks each hold its lock for
//! one read-modify-write at a time.
//!
//! ## Termination
//! Every order this node hears of is settled or dropped within two decide timeouts:
//! one for bidding ([bidding::run_bidding_deadline]), one for the cross-check.

pub mod active_set;
pub mod bidding;
pub mod cross_check;
pub mod recovery;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex, Notify};

use crate::config::{self, NodeConfig};
use crate::events::{
    self, ActiveOrdersAnsEvent, ActiveOrdersReqEvent, AssignedEvent, AvailabilityEvent,
    CheckAssignedEvent, ConnectionEvent, CostResultEvent, EventBus, HallButtonEvent, HallCall,
    NewOrderEvent, NodeId, OrderId, OrphansHandledEvent,
};
use crate::print;
use active_set::NodeStatus;
use bidding::BiddingRound;
use cross_check::{AnnouncementRound, Outcome, Resolution};

/// A bidding round that just became ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyRound {
    /// Order whose bidding closed
    pub order_id: OrderId,
    /// The call bid for
    pub call: HallCall,
    /// Winner computed by this node
    pub winner: NodeId,
    /// Whether this node is in the snapshot and must announce
    pub self_active: bool,
}

/// Round tables and fleet status of one node
#[derive(Debug)]
pub struct OrderBook {
    self_id: NodeId,
    /// Connectivity and availability per node
    pub status: NodeStatus,
    bids: HashMap<OrderId, BiddingRound>,
    announcements: HashMap<OrderId, AnnouncementRound>,
    /// Orders with a running bidding deadline
    deadlines: HashSet<OrderId>,
    /// Recently settled orders, resolved or expired
    resolved: VecDeque<OrderId>,
}

impl OrderBook {
    /// Empty tables, only self connected
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            status: NodeStatus::new(self_id),
            bids: HashMap::new(),
            announcements: HashMap::new(),
            deadlines: HashSet::new(),
            resolved: VecDeque::with_capacity(config::RESOLVED_ORDER_MEMORY + 1),
        }
    }

    /// True if `order_id` was resolved or expired recently
    pub fn is_resolved(&self, order_id: OrderId) -> bool {
        self.resolved.contains(&order_id)
    }

    fn mark_resolved(&mut self, order_id: OrderId) {
        debug_assert!(!self.is_resolved(order_id), "order {} resolved twice", order_id);
        self.resolved.push_back(order_id);
        if self.resolved.len() > config::RESOLVED_ORDER_MEMORY {
            self.resolved.pop_front();
        }
    }

    /// Stores a bid. Returns the round if it became ready.
    pub fn register_bid(&mut self, evt: &CostResultEvent) -> Option<ReadyRound> {
        if self.is_resolved(evt.order_id) || self.is_checking(evt.order_id) {
            return None;
        }
        self.bids
            .entry(evt.order_id)
            .or_insert_with(|| BiddingRound::new(evt.call))
            .register(evt.node, evt.cost);
        self.try_close_bidding(evt.order_id)
    }

    /// Re-evaluates every open bidding round, after the active set changed
    pub fn reevaluate_bids(&mut self) -> Vec<ReadyRound> {
        let open: Vec<OrderId> = self.bids.keys().copied().collect();
        open.into_iter().filter_map(|id| self.try_close_bidding(id)).collect()
    }

    fn is_checking(&self, order_id: OrderId) -> bool {
        self.announcements.get(&order_id).is_some_and(|a| a.is_checking())
    }

    /// Closes bidding and starts cross-checking if the round is ready
    fn try_close_bidding(&mut self, order_id: OrderId) -> Option<ReadyRound> {
        let active = self.status.active();
        let round = self.bids.get(&order_id)?;
        if !round.is_ready(&active) {
            return None;
        }
        let winner = round.winner(&active)?;
        let call = round.call;
        self.bids.remove(&order_id);

        self.announcements
            .entry(order_id)
            .or_insert_with(|| AnnouncementRound::new(call))
            .begin(active);

        Some(ReadyRound {
            order_id,
            call,
            winner,
            self_active: active.get(self.self_id as usize).copied().unwrap_or(false),
        })
    }

    /// Stores a winner announcement. Returns `false` for orders already resolved.
    pub fn record_announcement(&mut self, evt: &CheckAssignedEvent) -> bool {
        if self.is_resolved(evt.order_id) {
            return false;
        }
        self.announcements
            .entry(evt.order_id)
            .or_insert_with(|| AnnouncementRound::new(evt.call))
            .record(evt.node, evt.assigned);
        true
    }

    /// Claims the bidding deadline of `order_id`.
    ///
    /// Returns `true` exactly once per open order that is not cross-checking yet; the
    /// caller must then spawn [bidding::run_bidding_deadline] for it.
    pub fn arm_deadline(&mut self, order_id: OrderId) -> bool {
        let open = self.bids.contains_key(&order_id) || self.announcements.contains_key(&order_id);
        if !open || self.is_resolved(order_id) || self.is_checking(order_id) {
            return false;
        }
        self.deadlines.insert(order_id)
    }

    /// Ends `order_id` at its bidding deadline.
    ///
    /// A round still bidding fails open to the current active set. Announcements alone
    /// are dropped: this node never saw the bidding, and the nodes that announced settle
    /// the order themselves. Orders already cross-checking or resolved are left alone.
    pub fn expire(&mut self, order_id: OrderId) -> Option<Resolution> {
        self.deadlines.remove(&order_id);
        if self.is_resolved(order_id) || self.is_checking(order_id) {
            return None;
        }
        if let Some(call) = self.bids.get(&order_id).map(|round| round.call) {
            return Some(self.finish(order_id, call, Outcome::FailedOpen));
        }
        if self.announcements.remove(&order_id).is_some() {
            self.mark_resolved(order_id);
        }
        None
    }

    /// Orders with a bidding or announcement round in the tables
    pub fn open_orders(&self) -> usize {
        self.announcements
            .keys()
            .chain(self.bids.keys().filter(|id| !self.announcements.contains_key(id)))
            .count()
    }

    /// Resolves `order_id` if its cross-check has a verdict
    pub fn try_resolve(&mut self, order_id: OrderId) -> Option<Resolution> {
        let round = self.announcements.get(&order_id)?;
        let outcome = round.outcome()?;
        let call = round.call;
        Some(self.finish(order_id, call, outcome))
    }

    /// Resolves `order_id` as failed open, whatever was announced
    pub fn force_open(&mut self, order_id: OrderId) -> Option<Resolution> {
        let call = self.announcements.get(&order_id)?.call;
        Some(self.finish(order_id, call, Outcome::FailedOpen))
    }

    /// Grants a locally originated call to self without any rounds
    pub fn grant_locally(&mut self, order_id: OrderId, call: HallCall) -> Resolution {
        self.mark_resolved(order_id);
        Resolution {
            order_id,
            call,
            outcome: Outcome::Confirmed(self.self_id),
            assignees: vec![self.self_id],
            single_mode: true,
        }
    }

    fn finish(&mut self, order_id: OrderId, call: HallCall, outcome: Outcome) -> Resolution {
        self.announcements.remove(&order_id);
        self.bids.remove(&order_id);
        self.deadlines.remove(&order_id);
        self.mark_resolved(order_id);

        let assignees = match outcome {
            Outcome::Confirmed(winner) => vec![winner],
            Outcome::FailedOpen => self.status.active_ids(),
        };
        Resolution {
            order_id,
            call,
            outcome,
            assignees,
            single_mode: self.status.single_mode(),
        }
    }
}

/// The bus channels the coordinator listens on
pub struct Subscriptions {
    hall_button: broadcast::Receiver<HallButtonEvent>,
    cost_result: broadcast::Receiver<CostResultEvent>,
    check_assigned: broadcast::Receiver<CheckAssignedEvent>,
    availability: broadcast::Receiver<AvailabilityEvent>,
    connection: broadcast::Receiver<ConnectionEvent>,
    active_orders_ans: broadcast::Receiver<ActiveOrdersAnsEvent>,
}

impl Subscriptions {
    /// Subscribes to every kind the coordinator consumes
    pub fn new(bus: &EventBus) -> Self {
        Self {
            hall_button: bus.hall_button.subscribe(),
            cost_result: bus.cost_result.subscribe(),
            check_assigned: bus.check_assigned.subscribe(),
            availability: bus.availability.subscribe(),
            connection: bus.connection.subscribe(),
            active_orders_ans: bus.active_orders_ans.subscribe(),
        }
    }
}

struct Coordinator {
    cfg: NodeConfig,
    bus: EventBus,
    book: Arc<Mutex<OrderBook>>,
    wakeups: HashMap<OrderId, Arc<Notify>>,
    done_tx: mpsc::Sender<Resolution>,
    active_tx: watch::Sender<[bool; config::MAX_NODES]>,
    counter: u32,
}

impl Coordinator {
    async fn originate(&mut self, call: HallCall) {
        let order_id = OrderId::new(self.cfg.id, self.counter);
        self.counter = self.counter.wrapping_add(1);

        let mut book = self.book.lock().await;
        if book.status.is_alone() {
            let res = book.grant_locally(order_id, call);
            drop(book);
            print::manager(format!("Order {} {:?} granted locally", order_id, call));
            self.hand_out(res);
        } else {
            drop(book);
            print::manager(format!("Order {} {:?} open for bids", order_id, call));
            let _ = self.bus.new_order.send(NewOrderEvent { node: self.cfg.id, order_id, call });
        }
    }

    fn start_deadline(&self, order_id: OrderId) {
        let book = self.book.clone();
        let done_tx = self.done_tx.clone();
        let timeout = self.cfg.decide_timeout;
        tokio::spawn(async move {
            bidding::run_bidding_deadline(order_id, book, timeout, done_tx).await;
        });
    }

    fn start_cross_check(&mut self, ready: ReadyRound) {
        print::manager(format!("Order {}: node {} wins the bidding", ready.order_id, ready.winner));
        let wakeup = Arc::new(Notify::new());
        self.wakeups.insert(ready.order_id, wakeup.clone());

        {
            let book = self.book.clone();
            let done_tx = self.done_tx.clone();
            let timeout = self.cfg.decide_timeout;
            let order_id = ready.order_id;
            tokio::spawn(async move {
                cross_check::run_cross_check(order_id, book, wakeup, timeout, done_tx).await;
            });
        }

        if ready.self_active {
            let _ = self.bus.check_assigned.send(CheckAssignedEvent {
                node: self.cfg.id,
                assigned: ready.winner,
                order_id: ready.order_id,
                call: ready.call,
            });
        }
    }

    fn hand_out(&mut self, res: Resolution) {
        self.wakeups.remove(&res.order_id);
        match res.outcome {
            Outcome::Confirmed(winner) => {
                print::ok(format!("Order {} {:?} confirmed for node {}", res.order_id, res.call, winner))
            }
            Outcome::FailedOpen => print::warn(format!(
                "Order {} {:?} failed open, granted to {:?}",
                res.order_id, res.call, res.assignees
            )),
        }
        if res.assignees.is_empty() {
            print::err(format!("Order {} {:?} has no active node to serve it", res.order_id, res.call));
        }
        for assignee in res.assignees {
            let _ = self.bus.assigned.send(AssignedEvent {
                assignee,
                order_id: res.order_id,
                call: res.call,
                single_mode: res.single_mode,
            });
        }
    }

    /// Applies a status change, then does recovery and re-evaluates open bids
    async fn on_status_change(&mut self, lost: Option<NodeId>) {
        let mut book = self.book.lock().await;
        let lead = lost.filter(|node| recovery::leads_recovery(&book.status, self.cfg.id, *node));
        let ready = book.reevaluate_bids();
        let active = book.status.active();
        drop(book);

        let _ = self.active_tx.send(active);
        if let Some(node) = lead {
            print::info(format!("Recovering the calls of node {}", node));
            let _ = self.bus.active_orders_req.send(ActiveOrdersReqEvent { node });
        }
        for r in ready {
            self.start_cross_check(r);
        }
    }
}

/// Runs the coordinator.
///
/// ## Parameters
/// `cfg`: This node's config
/// `subs`: Bus subscriptions, see [Subscriptions::new]
/// `bus`: Where orders, announcements and assignments are published
/// `active_tx`: Receives the active set after every status change
///
/// ## Behavior
/// - `HallButtonEvent`: new order, granted locally if no other node is active
/// - `CostResultEvent`: bid; may close bidding and start a cross-check. The first
///   event of an order starts its bidding deadline.
/// - `CheckAssignedEvent`: announcement; wakes the order's cross-check task
/// - `AvailabilityEvent`/`ConnectionEvent`: status change; may start recovery
/// - `ActiveOrdersAnsEvent`: every listed call is originated anew, then
///   `OrphansHandledEvent` lets the ledger clear the row
///
/// ## Note
/// This function is permanently blocking, and should be called asynchronously
pub async fn start_manager(
    cfg: NodeConfig,
    mut subs: Subscriptions,
    bus: EventBus,
    active_tx: watch::Sender<[bool; config::MAX_NODES]>,
) {
    let (done_tx, mut done_rx) = mpsc::channel::<Resolution>(config::CHANNEL_CAPACITY);
    let mut co = Coordinator {
        book: Arc::new(Mutex::new(OrderBook::new(cfg.id))),
        cfg,
        bus,
        wakeups: HashMap::new(),
        done_tx,
        active_tx,
        counter: 0,
    };

    loop {
        tokio::select! {
            Some(evt) = events::recv(&mut subs.hall_button) => {
                co.originate(evt.call).await;
            }
            Some(evt) = events::recv(&mut subs.cost_result) => {
                let (ready, armed) = {
                    let mut book = co.book.lock().await;
                    let ready = book.register_bid(&evt);
                    (ready, book.arm_deadline(evt.order_id))
                };
                if armed {
                    co.start_deadline(evt.order_id);
                }
                if let Some(r) = ready {
                    co.start_cross_check(r);
                }
            }
            Some(evt) = events::recv(&mut subs.check_assigned) => {
                let (accepted, armed) = {
                    let mut book = co.book.lock().await;
                    let accepted = book.record_announcement(&evt);
                    (accepted, book.arm_deadline(evt.order_id))
                };
                if armed {
                    co.start_deadline(evt.order_id);
                }
                if accepted {
                    if let Some(wakeup) = co.wakeups.get(&evt.order_id) {
                        wakeup.notify_one();
                    }
                }
            }
            Some(evt) = events::recv(&mut subs.availability) => {
                co.book.lock().await.status.set_available(evt.node, evt.available);
                let lost = (!evt.available).then_some(evt.node);
                co.on_status_change(lost).await;
            }
            Some(evt) = events::recv(&mut subs.connection) => {
                co.book.lock().await.status.set_connected(evt.node, evt.connected);
                let lost = (!evt.connected).then_some(evt.node);
                co.on_status_change(lost).await;
            }
            Some(evt) = events::recv(&mut subs.active_orders_ans) => {
                for call in recovery::orphaned_calls(&evt) {
                    co.originate(call).await;
                }
                let _ = co.bus.orphans_handled.send(OrphansHandledEvent { node: evt.node });
            }
            Some(res) = done_rx.recv() => {
                co.hand_out(res);
            }
            else => break,
        }
    }
    print::warn("Event bus closed, coordinator stopping".to_string());
}
