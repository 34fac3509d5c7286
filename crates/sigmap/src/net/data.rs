//! Per-map data plane transport: UDP fire-and-forget sends, plus lazily
//! established and reused TCP connections for maps configured with
//! [`crate::net::PROTO_TCP`].

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{trace, warn};

use crate::codec::{decode_packet, Bundle, Message};
use crate::error::Result;
use crate::net::PROTO_TCP;

/// Outbound and inbound data-plane transport for a device.
///
/// One UDP socket is shared across every UDP-protocol map; TCP connections
/// are dialed on first send to a given destination and kept open, mirroring
/// how libmapper reuses a single stream per peer instead of reconnecting
/// per message.
pub struct DataTransport {
    udp: UdpSocket,
    tcp_conns: HashMap<SocketAddr, TcpStream>,
}

impl DataTransport {
    /// Bind the shared UDP data socket on an ephemeral port.
    pub async fn bind(interface: Option<&str>) -> Result<Self> {
        let _ = interface;
        let udp = UdpSocket::bind(("0.0.0.0", 0)).await?;
        trace!(port = udp.local_addr()?.port(), "data transport bound");
        Ok(Self {
            udp,
            tcp_conns: HashMap::new(),
        })
    }

    /// The locally bound data port, advertised to peers in `/signal` and
    /// `/mapped` messages.
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.udp.local_addr()?.port())
    }

    /// Send one message to `dest` over the given protocol.
    pub async fn send(&mut self, dest: SocketAddr, protocol: u8, msg: &Message) -> Result<()> {
        let data = msg.encode();
        if protocol == PROTO_TCP {
            self.send_tcp(dest, &data).await
        } else {
            self.udp.send_to(&data, dest).await?;
            Ok(())
        }
    }

    /// Send a bundle of messages to `dest` over the given protocol.
    pub async fn send_bundle(&mut self, dest: SocketAddr, protocol: u8, bundle: &Bundle) -> Result<()> {
        let data = bundle.encode();
        if protocol == PROTO_TCP {
            self.send_tcp(dest, &data).await
        } else {
            self.udp.send_to(&data, dest).await?;
            Ok(())
        }
    }

    async fn send_tcp(&mut self, dest: SocketAddr, data: &[u8]) -> Result<()> {
        if let Some(stream) = self.tcp_conns.get_mut(&dest) {
            if stream.write_all(data).await.is_ok() {
                return Ok(());
            }
            self.tcp_conns.remove(&dest);
        }
        let mut stream = TcpStream::connect(dest).await?;
        stream.write_all(data).await?;
        self.tcp_conns.insert(dest, stream);
        Ok(())
    }

    /// Drain every UDP packet currently queued, decoding each into a bundle.
    /// Malformed packets are logged and dropped, never propagated.
    pub async fn try_recv_all(&self) -> Vec<Bundle> {
        let mut out = Vec::new();
        let mut buf = [0u8; 65_536];
        loop {
            match self.udp.try_recv_from(&mut buf) {
                Ok((n, _from)) => match decode_packet(&buf[..n]) {
                    Ok(bundle) => out.push(bundle),
                    Err(e) => warn!(error = %e, "dropping malformed data packet"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "data socket recv error");
                    break;
                }
            }
        }
        out
    }

    /// Wait up to `budget` for at least one packet, then drain everything
    /// else that's immediately available. Returns an empty vec on timeout.
    pub async fn recv_with_budget(&self, budget: std::time::Duration) -> Vec<Bundle> {
        let mut buf = [0u8; 65_536];
        match tokio::time::timeout(budget, self.udp.recv_from(&mut buf)).await {
            Ok(Ok((n, _from))) => {
                let mut out = Vec::new();
                match decode_packet(&buf[..n]) {
                    Ok(bundle) => out.push(bundle),
                    Err(e) => warn!(error = %e, "dropping malformed data packet"),
                }
                out.extend(self.try_recv_all().await);
                out
            }
            Ok(Err(e)) => {
                warn!(error = %e, "data socket recv error");
                Vec::new()
            }
            Err(_timeout) => Vec::new(),
        }
    }

    /// Drop a TCP connection to `dest`, e.g. after a map using it is removed.
    pub fn close(&mut self, dest: SocketAddr) {
        self.tcp_conns.remove(&dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_reports_local_port() {
        let t = DataTransport::bind(None).await.unwrap();
        assert!(t.local_port().unwrap() > 0);
    }
}
