//! Uplink transport to the network server.
//!
//! The forwarder only needs to send a datagram and wait, with a bound, for a
//! short reply. [`UdpTransport`] does this over a connected UDP socket.

use crate::error::LinkError;
use std::io;
use std::net::UdpSocket;
use std::time::Duration;

pub trait UplinkTransport {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Wait up to `timeout` for one datagram. `Ok(None)` on timeout.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;
}

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to `server` (`host:port`)
    pub fn connect(server: &str) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(server).map_err(|e| {
            LinkError::Config(format!("Cannot reach forwarder server {}: {}", server, e))
        })?;
        log::info!("Forwarding uplinks to {} from {}", server, socket.local_addr()?);
        Ok(Self { socket })
    }
}

impl UplinkTransport for UdpTransport {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send(datagram).map(|_| ())
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        // A zero read timeout is rejected by the socket API
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout))?;
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
