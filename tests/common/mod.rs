//! In-process fleet: several nodes joined by an in-memory broadcast hub.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use elevatorfleet::config::{self, NodeConfig};
use elevatorfleet::elevator_logic::cost::CostFunction;
use elevatorfleet::elevator_logic::{ControllerCommand, ControllerEvent};
use elevatorfleet::events::{HallCall, NodeId};
use elevatorfleet::init::{self, NodeHandles};
use elevatorfleet::ledger::HallOrderLedger;
use elevatorfleet::network::{NodeLinks, PortLink};

/// Shared switches of the hub
#[derive(Clone, Default)]
pub struct Hub {
    cut: Arc<Mutex<[bool; config::MAX_NODES]>>,
    muted: Arc<Mutex<[bool; config::MAX_NODES]>>,
    delay: Arc<Mutex<[Duration; config::MAX_NODES]>>,
    duplicate_data: Arc<AtomicBool>,
    data_frames: Arc<AtomicUsize>,
}

impl Hub {
    /// Isolates `node`: nothing it sends arrives, nothing reaches it
    pub fn cut(&self, node: NodeId) {
        self.cut.lock().unwrap()[node as usize] = true;
    }

    /// Drops the data frames `node` sends, heartbeats and acks still pass
    pub fn mute_data(&self, node: NodeId) {
        self.muted.lock().unwrap()[node as usize] = true;
    }

    /// Holds back every data frame `node` sends by `delay`
    pub fn delay_data(&self, node: NodeId, delay: Duration) {
        self.delay.lock().unwrap()[node as usize] = delay;
    }

    /// Delivers every data frame twice
    pub fn duplicate_data(&self, on: bool) {
        self.duplicate_data.store(on, Ordering::SeqCst);
    }

    /// Data frames sent by any node so far
    pub fn data_frames(&self) -> usize {
        self.data_frames.load(Ordering::SeqCst)
    }

    fn is_cut(&self, node: usize) -> bool {
        self.cut.lock().unwrap()[node]
    }

    fn is_muted(&self, node: usize) -> bool {
        self.muted.lock().unwrap()[node]
    }

    fn delay_of(&self, node: usize) -> Duration {
        self.delay.lock().unwrap()[node]
    }

    /// Hands `frame` to every node that is not cut off
    fn deliver(&self, ins: &[mpsc::Sender<Vec<u8>>], frame: &[u8], copies: usize) {
        // Every node hears every broadcast, the sender included
        for (to, in_tx) in ins.iter().enumerate() {
            if self.is_cut(to) {
                continue;
            }
            for _ in 0..copies {
                let _ = in_tx.try_send(frame.to_vec());
            }
        }
    }
}

/// Builds one port for `n` nodes and spawns its forwarding tasks
fn port(hub: &Hub, n: usize, is_data: bool) -> Vec<PortLink> {
    let mut outs = Vec::new();
    let mut ins = Vec::new();
    let mut links = Vec::new();
    for _ in 0..n {
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(config::CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(config::CHANNEL_CAPACITY);
        outs.push(out_rx);
        ins.push(in_tx);
        links.push(PortLink { tx: out_tx, rx: in_rx });
    }

    for (from, mut out_rx) in outs.into_iter().enumerate() {
        let ins = ins.clone();
        let hub = hub.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if is_data {
                    hub.data_frames.fetch_add(1, Ordering::SeqCst);
                }
                if hub.is_cut(from) || (is_data && hub.is_muted(from)) {
                    continue;
                }
                let copies = if is_data && hub.duplicate_data.load(Ordering::SeqCst) { 2 } else { 1 };
                let delay = if is_data { hub.delay_of(from) } else { Duration::ZERO };
                if delay.is_zero() {
                    hub.deliver(&ins, &frame, copies);
                } else {
                    let hub = hub.clone();
                    let ins = ins.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        hub.deliver(&ins, &frame, copies);
                    });
                }
            }
        });
    }
    links
}

/// One running node and its controller ends
pub struct TestNode {
    pub handles: NodeHandles,
    pub controller_tx: mpsc::Sender<ControllerEvent>,
    pub command_rx: mpsc::Receiver<ControllerCommand>,
}

impl TestNode {
    /// Presses a hall button on this node's panel
    pub async fn press(&self, call: HallCall) {
        self.controller_tx.send(ControllerEvent::HallButton(call)).await.unwrap();
    }

    /// Next `Grant` sent to this node's controller, skipping lamp commands
    pub async fn next_grant(&mut self) -> (HallCall, NodeId, bool) {
        loop {
            match self.command_rx.recv().await.expect("glue stopped") {
                ControllerCommand::Grant { call, assignee, single_mode } => return (call, assignee, single_mode),
                _ => continue,
            }
        }
    }

    /// Waits until the ledger satisfies `pred`
    pub async fn ledger_until(&mut self, pred: impl FnMut(&HallOrderLedger) -> bool) -> HallOrderLedger {
        self.handles.ledger_rx.wait_for(pred).await.expect("ledger stopped").clone()
    }

    /// Waits until the active set equals `expected`
    pub async fn active_until(&mut self, expected: [bool; config::MAX_NODES]) {
        self.handles.active_rx.wait_for(|a| *a == expected).await.expect("coordinator stopped");
    }
}

/// Starts one node per entry in `costs`, node `i` bidding `costs[i]` on everything
pub fn start_fleet(costs: &[u32]) -> (Vec<TestNode>, Hub) {
    let hub = Hub::default();
    let n = costs.len();
    let mut data = port(&hub, n, true);
    let mut heartbeat = port(&hub, n, false);
    let mut ack = port(&hub, n, false);

    let mut nodes = Vec::new();
    for (id, cost) in costs.iter().copied().enumerate() {
        let links = NodeLinks {
            data: data.remove(0),
            heartbeat: heartbeat.remove(0),
            ack: ack.remove(0),
        };
        let (controller_tx, controller_rx) = mpsc::channel(config::CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(config::CHANNEL_CAPACITY);
        let cost: Arc<dyn CostFunction> = Arc::new(move |_: HallCall| cost);
        let handles = init::start_node(NodeConfig::new(id as NodeId), links, cost, controller_rx, command_tx);
        nodes.push(TestNode { handles, controller_tx, command_rx });
    }
    (nodes, hub)
}

/// Fails the test if `fut` takes longer than `secs` of (paused) time
pub async fn within<T>(secs: u64, fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .expect("timed out")
}
