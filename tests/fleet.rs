mod common;

use std::time::Duration;

use elevatorfleet::config;
use elevatorfleet::elevator_logic::ControllerEvent;
use elevatorfleet::events::{Direction, HallCall, HallTable};

use common::{start_fleet, within};

fn call(floor: u8, dir: Direction) -> HallCall {
    HallCall::new(floor, dir).unwrap()
}

fn owns(table: &HallTable, c: HallCall) -> bool {
    table[c.floor as usize][c.direction.index()]
}

#[tokio::test(start_paused = true)]
async fn lone_node_grants_without_network_traffic() {
    let (mut nodes, hub) = start_fleet(&[4]);
    tokio::time::sleep(Duration::from_millis(300)).await;

    nodes[0].press(call(1, Direction::Up)).await;
    let (granted, assignee, single_mode) = within(1, nodes[0].next_grant()).await;

    assert_eq!(granted, call(1, Direction::Up));
    assert_eq!(assignee, 0);
    assert!(single_mode);
    within(1, nodes[0].ledger_until(|l| owns(&l.owned_calls(0), call(1, Direction::Up)))).await;
    assert_eq!(hub.data_frames(), 0);
}

#[tokio::test(start_paused = true)]
async fn three_nodes_agree_on_the_cheapest_bid() {
    let (mut nodes, _hub) = start_fleet(&[9, 3, 5]);
    for node in nodes.iter_mut() {
        within(2, node.active_until([true; config::MAX_NODES])).await;
    }

    let mut assigned: Vec<_> = nodes.iter().map(|n| n.handles.bus.assigned.subscribe()).collect();
    nodes[2].press(call(2, Direction::Up)).await;

    let (granted, assignee, single_mode) = within(2, nodes[1].next_grant()).await;
    assert_eq!((granted, assignee, single_mode), (call(2, Direction::Up), 1, false));

    for node in nodes.iter_mut() {
        let ledger = within(2, node.ledger_until(|l| owns(&l.owned_calls(1), call(2, Direction::Up)))).await;
        assert_eq!(ledger.owned_calls(0), HallTable::default());
        assert_eq!(ledger.owned_calls(2), HallTable::default());
    }
    for rx in assigned.iter_mut() {
        let evt = rx.recv().await.unwrap();
        assert_eq!((evt.assignee, evt.call, evt.single_mode), (1, call(2, Direction::Up), false));
    }
}

#[tokio::test(start_paused = true)]
async fn duplicated_frames_resolve_each_order_once() {
    let (mut nodes, hub) = start_fleet(&[2, 7, 4]);
    hub.duplicate_data(true);
    for node in nodes.iter_mut() {
        within(2, node.active_until([true; config::MAX_NODES])).await;
    }

    let mut assigned: Vec<_> = nodes.iter().map(|n| n.handles.bus.assigned.subscribe()).collect();
    nodes[1].press(call(0, Direction::Up)).await;
    within(2, nodes[0].next_grant()).await;

    // Give stragglers and resends time to arrive
    tokio::time::sleep(Duration::from_secs(2)).await;
    for rx in assigned.iter_mut() {
        assert_eq!(rx.recv().await.unwrap().assignee, 0);
        assert!(rx.try_recv().is_err());
    }
}

#[tokio::test(start_paused = true)]
async fn lost_peer_calls_are_reclaimed_by_the_survivor() {
    let (mut nodes, hub) = start_fleet(&[10, 1]);
    let mut both = [false; config::MAX_NODES];
    both[0] = true;
    both[1] = true;
    for node in nodes.iter_mut() {
        within(2, node.active_until(both)).await;
    }

    let up = call(1, Direction::Up);
    let down = call(3, Direction::Down);
    for c in [up, down] {
        nodes[0].press(c).await;
        within(2, nodes[0].ledger_until(|l| owns(&l.owned_calls(1), c))).await;
    }

    hub.cut(1);
    let mut alone = [false; config::MAX_NODES];
    alone[0] = true;
    within(3, nodes[0].active_until(alone)).await;

    let ledger = within(2, nodes[0].ledger_until(|l| {
        l.owned_calls(1) == HallTable::default() && owns(&l.owned_calls(0), up) && owns(&l.owned_calls(0), down)
    }))
    .await;
    assert_eq!(HallCall::from_table(&ledger.owned_calls(0)).len(), 2);

    let mut grants = vec![within(1, nodes[0].next_grant()).await, within(1, nodes[0].next_grant()).await];
    grants.sort_by_key(|(c, _, _)| c.floor);
    assert_eq!(grants, vec![(up, 0, true), (down, 0, true)]);
}

#[tokio::test(start_paused = true)]
async fn unavailable_node_hands_its_calls_to_the_others() {
    let (mut nodes, _hub) = start_fleet(&[9, 3, 5]);
    for node in nodes.iter_mut() {
        within(2, node.active_until([true; config::MAX_NODES])).await;
    }

    let c = call(2, Direction::Down);
    nodes[0].press(c).await;
    within(2, nodes[0].ledger_until(|l| owns(&l.owned_calls(1), c))).await;

    nodes[1].controller_tx.send(ControllerEvent::Availability(false)).await.unwrap();

    // Node 0 leads the recovery; node 2 is the cheaper of the two left
    within(3, nodes[0].ledger_until(|l| {
        l.owned_calls(1) == HallTable::default() && owns(&l.owned_calls(2), c)
    }))
    .await;
    within(3, nodes[1].ledger_until(|l| {
        l.owned_calls(1) == HallTable::default() && owns(&l.owned_calls(2), c)
    }))
    .await;
    let (granted, assignee, single_mode) = within(2, nodes[2].next_grant()).await;
    assert_eq!((granted, assignee, single_mode), (c, 2, false));
}

#[tokio::test(start_paused = true)]
async fn completion_clears_the_floor_everywhere() {
    let (mut nodes, _hub) = start_fleet(&[1, 8, 8]);
    for node in nodes.iter_mut() {
        within(2, node.active_until([true; config::MAX_NODES])).await;
    }

    let c = call(1, Direction::Down);
    nodes[2].press(c).await;
    for node in nodes.iter_mut() {
        within(2, node.ledger_until(|l| owns(&l.owned_calls(0), c))).await;
    }

    nodes[0].controller_tx.send(ControllerEvent::ServiceCompleted(1)).await.unwrap();
    for node in nodes.iter_mut() {
        within(2, node.ledger_until(|l| l.hall_lamps() == HallTable::default())).await;
    }
}

#[tokio::test(start_paused = true)]
async fn lost_bid_still_gets_the_call_served() {
    let (mut nodes, hub) = start_fleet(&[5, 1, 9]);
    for node in nodes.iter_mut() {
        within(2, node.active_until([true; config::MAX_NODES])).await;
    }

    // Node 1 stays connected, but none of its bids or announcements get through
    hub.mute_data(1);
    let c = call(2, Direction::Down);
    nodes[0].press(c).await;

    // Nobody can agree, so every active node ends up serving the call
    for (id, node) in nodes.iter_mut().enumerate() {
        let (granted, assignee, single_mode) = within(2, node.next_grant()).await;
        assert_eq!((granted, assignee as usize, single_mode), (c, id, false));
    }
}

#[tokio::test(start_paused = true)]
async fn bidder_leaving_before_the_last_bid_does_not_stall_the_order() {
    let (mut nodes, hub) = start_fleet(&[5, 1, 9]);
    for node in nodes.iter_mut() {
        within(2, node.active_until([true; config::MAX_NODES])).await;
    }

    hub.delay_data(1, Duration::from_millis(300));
    let c = call(1, Direction::Up);
    nodes[0].press(c).await;

    // Node 2 has bid by now; it drops out before node 1's bid reaches anyone
    tokio::time::sleep(Duration::from_millis(50)).await;
    nodes[2].controller_tx.send(ControllerEvent::Availability(false)).await.unwrap();
    let mut survivors = [false; config::MAX_NODES];
    survivors[0] = true;
    survivors[1] = true;
    within(1, nodes[0].active_until(survivors)).await;

    let (granted, assignee, _) = within(2, nodes[0].next_grant()).await;
    assert_eq!((granted, assignee), (c, 0));
    let ledger = within(2, nodes[0].ledger_until(|l| owns(&l.owned_calls(0), c))).await;
    assert!(owns(&ledger.owned_calls(1), c));
    assert!(!owns(&ledger.owned_calls(2), c));
}
