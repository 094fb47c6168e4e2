use std::sync::Arc;

use tokio::sync::mpsc;

use elevatorfleet::config;
use elevatorfleet::elevator_logic::console;
use elevatorfleet::elevator_logic::cost::DistanceCost;
use elevatorfleet::init;
use elevatorfleet::network::udp_broadcast;
use elevatorfleet::print;


#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let startup = init::parse_args(&args)?;
    if startup.help {
        init::print_help();
        return Ok(());
    }

    let cfg = init::node_config(&startup)?;
    print::info(format!("Starting node {} of {}", cfg.id, config::MAX_NODES));

    /* START ----------- Broadcast ports ---------------------- */
    let links = udp_broadcast::open_links(&cfg).await?;
    /* SLUTT ----------- Broadcast ports ---------------------- */

    /* START ----------- Node tasks ---------------------- */
    let cost = Arc::new(DistanceCost::new(0));
    let (controller_tx, controller_rx) = mpsc::channel(config::CHANNEL_CAPACITY);
    let (command_tx, command_rx) = mpsc::channel(config::CHANNEL_CAPACITY);
    let handles = init::start_node(cfg, links, cost.clone(), controller_rx, command_tx);
    /* SLUTT ----------- Node tasks ---------------------- */

    console::run_console(cost, controller_tx, command_rx, handles.ledger_rx, handles.active_rx).await;

    // Without a console the node still bids, announces and recovers
    print::info("stdin closed, node keeps running".to_string());
    futures::future::pending::<()>().await;
    Ok(())
}
