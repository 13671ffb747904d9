//! IPv6 link-local multicast transport.
//!
//! Every daemon on a link joins ff02::1 on the same port, which makes the
//! link one broadcast origin. Multicast loopback stays on, so a daemon hears
//! its own frames like any other subscriber does.

use std::net::{Ipv6Addr, SocketAddrV6};

use anyhow::{Context, Result};
use bytes::Bytes;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use rally_services::{Transport, TransportError};

pub const MULTICAST_ADDR: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// Largest frame sent as a single datagram.
pub const MAX_DATAGRAM: usize = 65_000;

/// Send half of the transport.
pub struct MulticastTransport {
    socket: Socket,
    dest: SockAddr,
}

impl MulticastTransport {
    pub fn open(interface_index: u32, port: u16) -> Result<Self> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
            .context("socket()")?;
        socket.set_reuse_address(true).context("SO_REUSEADDR")?;
        socket
            .set_multicast_if_v6(interface_index)
            .context("IPV6_MULTICAST_IF")?;
        // TTL 1: link-local only, never routed.
        socket.set_multicast_hops_v6(1).context("IPV6_MULTICAST_HOPS")?;
        socket.set_multicast_loop_v6(true).context("IPV6_MULTICAST_LOOP")?;
        socket.set_nonblocking(true).context("set_nonblocking")?;

        let dest = SocketAddrV6::new(MULTICAST_ADDR, port, 0, interface_index);
        Ok(Self {
            socket,
            dest: dest.into(),
        })
    }
}

impl Transport for MulticastTransport {
    fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > MAX_DATAGRAM {
            return Err(TransportError::Oversized {
                size: frame.len(),
                limit: MAX_DATAGRAM,
            });
        }
        let sent = self.socket.send_to(&frame, &self.dest)?;
        tracing::trace!(bytes = sent, "datagram sent");
        Ok(())
    }

    fn max_message_bytes(&self) -> usize {
        MAX_DATAGRAM
    }
}

/// Receive datagrams from the group and hand them to the node.
pub async fn listener_loop(
    socket: UdpSocket,
    inbound: mpsc::Sender<Bytes>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut buf = vec![0u8; 65_536];
    tracing::info!(addr = %socket.local_addr()?, "multicast listener starting");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("multicast listener shutting down");
                return Ok(());
            }

            received = socket.recv_from(&mut buf) => {
                let (len, from) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                        continue;
                    }
                };
                tracing::trace!(bytes = len, %from, "datagram received");
                if inbound.send(Bytes::copy_from_slice(&buf[..len])).await.is_err() {
                    tracing::info!("node gone, multicast listener exiting");
                    return Ok(());
                }
            }
        }
    }
}

/// Create a UDP socket joined to the ff02::1 multicast group on `port`.
pub fn make_listener_socket(interface_index: u32, port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .set_recv_buffer_size(4 * 1024 * 1024)
        .context("SO_RCVBUF")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;
    socket
        .join_multicast_v6(&MULTICAST_ADDR, interface_index)
        .context("IPV6_JOIN_GROUP")?;

    UdpSocket::from_std(socket.into()).context("failed to convert to tokio UdpSocket")
}

/// OS interface index for a named interface. An empty name selects the
/// system default (index 0).
pub fn if_index(name: &str) -> Result<u32> {
    if name.is_empty() {
        return Ok(0);
    }
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}
