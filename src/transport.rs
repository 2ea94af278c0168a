use crate::message::{SendKind, SsdpMessage};
use crate::netif::InterfaceInfo;
use crate::node::Config;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// SSDP datagrams are small; the read buffer bounds what we accept
const MAX_PACKET_SIZE: usize = 2048;

/// IP multicast TTL for outgoing announcements (UPnP DA 1.0 suggests 4)
const MULTICAST_TTL: u32 = 4;

/// Where inbound datagrams go
///
/// Implemented by the node; the transport neither parses nor routes.
pub(crate) trait PacketHandler: Send + Sync + 'static {
    fn handle_packet(&self, from: SocketAddr, data: &[u8]);
}

struct Sender {
    iface: InterfaceInfo,
    socket: Arc<UdpSocket>,
}

/// The node's socket set
///
/// One receiver bound to the multicast port and joined to the group on
/// every interface, plus one sender per interface bound to that
/// interface's address on an ephemeral port. Every socket runs its own
/// receive task (unicast M-SEARCH replies come back to the senders'
/// ephemeral ports).
pub(crate) struct MulticastTransport {
    senders: Vec<Sender>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn bound_socket(addr: SocketAddrV4) -> std::io::Result<std::net::UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        None,
    )?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&socket2::SockAddr::from(addr))?;
    Ok(socket.into())
}

fn spawn_receive(
    socket: Arc<UdpSocket>,
    handler: Arc<dyn PacketHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, from)) => handler.handle_packet(from, &buf[..n]),
                Err(e) => warn!("receive error: {e}"),
            }
        }
    })
}

impl MulticastTransport {
    /// Open the socket set and start the receive tasks
    ///
    /// Joining the group on an interface can fail (interface down, no
    /// multicast route); such interfaces are logged and skipped for
    /// reception but still get a sender.
    pub(crate) fn open(
        group: Ipv4Addr,
        port: u16,
        interfaces: &[InterfaceInfo],
        handler: Arc<dyn PacketHandler>,
    ) -> std::io::Result<Self> {
        let receiver = bound_socket(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            port,
        ))?;
        let receiver = Arc::new(UdpSocket::from_std(receiver)?);
        for iface in interfaces {
            if let Err(e) = receiver.join_multicast_v4(group, iface.addr()) {
                warn!("join {group} on {}: {e}", iface.addr());
            }
        }

        let mut senders = Vec::with_capacity(interfaces.len());
        for iface in interfaces {
            let socket =
                match bound_socket(SocketAddrV4::new(iface.addr(), 0)) {
                    Ok(socket) => socket,
                    Err(e) => {
                        warn!("bind sender on {}: {e}", iface.addr());
                        continue;
                    }
                };
            let socket = Arc::new(UdpSocket::from_std(socket)?);
            if let Err(e) = socket.set_multicast_ttl_v4(MULTICAST_TTL) {
                debug!("multicast ttl on {}: {e}", iface.addr());
            }
            senders.push(Sender {
                iface: *iface,
                socket,
            });
        }

        let mut tasks = vec![spawn_receive(receiver, handler.clone())];
        for sender in &senders {
            tasks.push(spawn_receive(sender.socket.clone(), handler.clone()));
        }

        Ok(Self {
            senders,
            tasks: Mutex::new(tasks),
        })
    }

    /// Compose and send one message towards `to`
    ///
    /// Fans out over the interfaces that reach `to` (all of them for a
    /// multicast destination), rewriting the LOCATION URL for each
    /// interface's address. Per-interface failures are logged and do not
    /// stop the fan-out.
    pub(crate) async fn send(
        &self,
        config: &Config,
        to: SocketAddr,
        message: &SsdpMessage,
        kind: SendKind,
    ) {
        for sender in &self.senders {
            if !sender.iface.matches(to.ip()) {
                continue;
            }
            let body = match message.compose(kind, config, &sender.iface) {
                Ok(body) => body,
                Err(e) => {
                    warn!("compose {kind:?} for {}: {e}", sender.iface.addr());
                    continue;
                }
            };
            let mut bytes = body.into_bytes();
            bytes.extend_from_slice(b"\r\n");
            if let Err(e) = sender.socket.send_to(&bytes, to).await {
                warn!(
                    "send from {} to {to}: {e}",
                    sender.iface.addr()
                );
            }
        }
    }

    /// The interfaces this transport is bound to, in registry order
    pub(crate) fn interfaces(&self) -> Vec<InterfaceInfo> {
        self.senders.iter().map(|s| s.iface).collect()
    }

    /// Stop all receive tasks and release the sockets
    pub(crate) fn shutdown(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for MulticastTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
