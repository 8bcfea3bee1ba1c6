use std::{
    io,
    net::{Ipv4Addr, SocketAddr, UdpSocket},
};

/// A non-blocking UDP socket bound for sending to a single remote address.
///
/// Sends never block: if the socket buffer is full, the send fails with `WouldBlock` and the caller drops the payload.
pub(crate) struct UdpTransport {
    socket: UdpSocket,
    remote_addr: SocketAddr,
}

impl UdpTransport {
    /// Opens a new non-blocking socket for sending to `remote_addr`.
    pub fn open(remote_addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_nonblocking(true)?;

        Ok(UdpTransport { socket, remote_addr })
    }

    /// Returns the remote address payloads are sent to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Sends a single datagram.
    pub fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, self.remote_addr)
    }
}
