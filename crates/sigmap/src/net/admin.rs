//! The multicast admin bus: a single well-known multicast address/port that
//! every device reads and writes for discovery and control messages.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{trace, warn};

use crate::codec::{decode_packet, Bundle, Message};
use crate::error::Result;

/// Multicast admin bus socket.
///
/// Sending is fire-and-forget UDP; receiving tolerates malformed packets
/// by logging and dropping them (spec §7 propagation policy), never
/// surfacing a decode error to the poll loop.
pub struct AdminBus {
    socket: UdpSocket,
    group: Ipv4Addr,
    port: u16,
}

impl AdminBus {
    /// Bind a new admin bus socket and join the multicast group.
    pub async fn bind(group: Ipv4Addr, port: u16, interface: Option<&str>) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        socket.set_multicast_loop_v4(true)?;
        let local_iface = interface_addr(interface);
        socket.join_multicast_v4(group, local_iface)?;
        trace!(%group, port, "admin bus bound");
        Ok(Self {
            socket,
            group,
            port,
        })
    }

    /// The multicast group this bus is joined to.
    pub fn group(&self) -> Ipv4Addr {
        self.group
    }

    /// The locally-bound port (normally the well-known admin port).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send a single message on the admin bus.
    pub async fn send_message(&self, msg: &Message) -> Result<()> {
        self.send_bytes(&msg.encode()).await
    }

    /// Send a bundle of messages sharing one timestamp on the admin bus.
    pub async fn send_bundle(&self, bundle: &Bundle) -> Result<()> {
        self.send_bytes(&bundle.encode()).await
    }

    async fn send_bytes(&self, data: &[u8]) -> Result<()> {
        let dest = SocketAddr::from((self.group, self.port));
        self.socket.send_to(data, dest).await?;
        Ok(())
    }

    /// Drain every packet currently queued on the socket, decoding each
    /// into a bundle of one or more messages. Malformed packets are logged
    /// and skipped rather than propagated.
    pub async fn try_recv_all(&self) -> Vec<Bundle> {
        let mut out = Vec::new();
        let mut buf = [0u8; 65_536];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((n, _from)) => match decode_packet(&buf[..n]) {
                    Ok(bundle) => out.push(bundle),
                    Err(e) => warn!(error = %e, "dropping malformed admin packet"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "admin bus recv error");
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
        match tokio::time::timeout(budget, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((n, _from))) => {
                let mut out = Vec::new();
                match decode_packet(&buf[..n]) {
                    Ok(bundle) => out.push(bundle),
                    Err(e) => warn!(error = %e, "dropping malformed admin packet"),
                }
                out.extend(self.try_recv_all().await);
                out
            }
            Ok(Err(e)) => {
                warn!(error = %e, "admin bus recv error");
                Vec::new()
            }
            Err(_timeout) => Vec::new(),
        }
    }
}

fn interface_addr(interface: Option<&str>) -> Ipv4Addr {
    // A named interface would be resolved via the platform's interface
    // table; without one, join on the unspecified (any) local interface.
    let _ = interface;
    Ipv4Addr::UNSPECIFIED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_joins_group() {
        let bus = AdminBus::bind(Ipv4Addr::new(224, 0, 1, 3), 0, None)
            .await
            .expect("bind should succeed on an ephemeral port");
        assert_eq!(bus.group(), Ipv4Addr::new(224, 0, 1, 3));
    }
}
