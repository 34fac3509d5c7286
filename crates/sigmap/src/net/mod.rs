//! Network transport: the multicast admin bus plus per-map UDP/TCP data
//! sockets.
//!
//! Modeled on `nlink::netlink::socket::NetlinkSocket`'s wrap of an async
//! file descriptor with explicit `send`/`recv` methods, generalized here to
//! `tokio::net::UdpSocket`/`TcpStream` since the transport is plain
//! multicast/unicast IP rather than a Linux-specific socket family.

mod admin;
mod data;
mod queue;

pub use admin::AdminBus;
pub use data::DataTransport;
pub use queue::{Queue, QueueHandle};

/// Map data is sent over UDP.
pub const PROTO_UDP: u8 = 0;
/// Map data is sent over TCP.
pub const PROTO_TCP: u8 = 1;

/// One poll cycle's worth of work: how many admin packets and how many
/// data packets were handled. Returned by `Device::poll`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollEvents {
    /// Admin-bus packets processed this cycle.
    pub admin: usize,
    /// Data-plane packets processed this cycle.
    pub data: usize,
    /// Expiry timers that fired this cycle.
    pub expired: usize,
}

impl PollEvents {
    /// Total events handled, the value returned by `poll()` per spec §6.
    pub fn total(&self) -> usize {
        self.admin + self.data + self.expired
    }
}
