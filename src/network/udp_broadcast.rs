//! ## UDP broadcast sockets
//!
//! Binds the three broadcast ports and bridges each of them to a pair of byte-frame
//! channels. Everything above this module deals in `Vec<u8>` frames only, which is what
//! lets tests replace the sockets with in-memory channels.

use std::net::SocketAddr;

use anyhow::Context;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::config::{self, NodeConfig};
use crate::print;
use super::{NodeLinks, PortLink};

/// Creates a non-blocking broadcast socket bound to `addr`.
///
/// Address reuse is enabled so several nodes on one host can share the listen ports.
fn broadcast_socket(addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("binding broadcast socket on {}", addr))?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Binds one port and spawns its sender and listener tasks.
async fn open_port(port: u16) -> anyhow::Result<PortLink> {
    let listen_addr: SocketAddr = format!("{}:{}", config::BC_LISTEN_ADDR, port).parse()?;
    let send_addr: SocketAddr = format!("{}:0", config::BC_LISTEN_ADDR).parse()?;
    let broadcast_addr: SocketAddr = format!("{}:{}", config::BC_ADDR, port).parse()?;

    let listener = broadcast_socket(listen_addr)?;
    let sender = broadcast_socket(send_addr)?;

    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(config::CHANNEL_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(config::CHANNEL_CAPACITY);

    tokio::spawn(async move {
        if let Err(e) = start_udp_sender(sender, broadcast_addr, out_rx).await {
            print::err(format!("UDP sender on port {} stopped: {}", port, e));
        }
    });
    tokio::spawn(async move {
        if let Err(e) = start_udp_listener(listener, in_tx).await {
            print::err(format!("UDP listener on port {} stopped: {}", port, e));
        }
    });

    Ok(PortLink { tx: out_tx, rx: in_rx })
}

/// Opens the data, heartbeat and ack ports of `cfg`.
///
/// ## Returns
/// The channel ends the transport tasks run on, or the first socket error.
pub async fn open_links(cfg: &NodeConfig) -> anyhow::Result<NodeLinks> {
    let data = open_port(cfg.data_port()).await?;
    let heartbeat = open_port(cfg.check_port()).await?;
    let ack = open_port(cfg.ack_port()).await?;
    print::info(format!(
        "Broadcasting on ports {}, {}, {}",
        cfg.data_port(),
        cfg.check_port(),
        cfg.ack_port()
    ));
    Ok(NodeLinks { data, heartbeat, ack })
}

/// Broadcasts every frame received on `out_rx`.
///
/// A failed send is logged and the frame dropped; the reliability layer resends.
///
/// ## Note
/// This function is permanently blocking, and should be called asynchronously
pub async fn start_udp_sender(
    socket: UdpSocket,
    broadcast_addr: SocketAddr,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
) -> anyhow::Result<()> {
    while let Some(frame) = out_rx.recv().await {
        if let Err(e) = socket.send_to(&frame, &broadcast_addr).await {
            print::warn(format!("UDP send to {} failed: {}", broadcast_addr, e));
        }
    }
    Ok(())
}

/// Forwards every datagram received on `socket` to `in_tx`.
///
/// ## Note
/// This function is permanently blocking, and should be called asynchronously
pub async fn start_udp_listener(socket: UdpSocket, in_tx: mpsc::Sender<Vec<u8>>) -> anyhow::Result<()> {
    let mut buf = [0u8; config::UDP_BUFFER];
    loop {
        let (len, _) = socket.recv_from(&mut buf).await?;
        if in_tx.send(buf[..len].to_vec()).await.is_err() {
            return Ok(());
        }
    }
}
