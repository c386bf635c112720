//! UDP transport (C2).
//!
//! Binds `0.0.0.0:6454` with broadcast enabled, the way the teacher's
//! `start_artnet_listener` binds its Art-Net socket, except this node also
//! needs to *send* broadcast and unicast datagrams rather than just receive.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::NodeError;
use crate::wire::ARTNET_PORT;

/// Owns the node's single UDP socket.
pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    /// Bind to `bind_addr:6454` with `SO_BROADCAST` and `SO_REUSEADDR` set,
    /// matching the teacher's socket2-based sACN setup but for a plain
    /// broadcast-capable IPv4 socket.
    pub async fn bind(bind_addr: Ipv4Addr) -> Result<Self, NodeError> {
        Self::bind_port(bind_addr, ARTNET_PORT).await
    }

    pub(crate) async fn bind_port(bind_addr: Ipv4Addr, port: u16) -> Result<Self, NodeError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(not(windows))]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;
        socket.bind(&SocketAddrV4::new(bind_addr, port).into())?;

        let socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(socket)?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    pub async fn send_to(&self, data: &[u8], dest: SocketAddr) -> std::io::Result<usize> {
        self.socket.send_to(data, dest).await
    }
}
