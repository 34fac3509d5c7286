//! Construction-time configuration for devices, graphs, and maps.
//!
//! Chainable builders in the style of [`crate::expr`]'s own configuration
//! and `EventStreamBuilder` patterns elsewhere in the async-networking
//! ecosystem this crate is part of: every option has a sane default so the
//! zero-config path (`DeviceConfig::default()`) just works.

use std::net::Ipv4Addr;

use crate::net::PROTO_UDP;
use crate::signal::instance::StealMode;

/// Which dialect of the expression DSL a device or map should parse with.
///
/// The legacy single-source DSL (history depth capped at
/// [`crate::expr::LEGACY_MAX_HISTORY`]) is a strict subset of the extended
/// DSL; `Extended` is the default per spec §9 Open Question (i).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DslDialect {
    /// Multi-source, vector/reduction/timestamp-aware DSL (default).
    #[default]
    Extended,
    /// Single-source DSL with history depth bounded to 5.
    Legacy,
}

/// The well-known multicast admin bus address and port.
pub const DEFAULT_ADMIN_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 3);
/// The well-known multicast admin bus port.
pub const DEFAULT_ADMIN_PORT: u16 = 7570;

/// Configuration recognized on device construction.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Preferred UDP data port (subject to collision-based reallocation).
    pub port: Option<u16>,
    /// Network interface name to bind on, if not the system default.
    pub interface: Option<String>,
    /// Multicast admin bus address.
    pub admin_addr: Ipv4Addr,
    /// Multicast admin bus port.
    pub admin_port: u16,
    /// Which DSL dialect this device compiles expressions with.
    pub dsl: DslDialect,
    /// How often `/device` and `/sync` announcements are repeated.
    pub announce_interval_ms: u64,
    /// How long a peer may go unheard before its graph entries expire.
    pub liveness_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            interface: None,
            admin_addr: DEFAULT_ADMIN_ADDR,
            admin_port: DEFAULT_ADMIN_PORT,
            dsl: DslDialect::default(),
            announce_interval_ms: 5_000,
            liveness_timeout_ms: 10_000,
        }
    }
}

impl DeviceConfig {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a specific UDP port be tried first.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Bind to a specific network interface.
    pub fn interface(mut self, iface: impl Into<String>) -> Self {
        self.interface = Some(iface.into());
        self
    }

    /// Override the admin bus multicast group/port.
    pub fn admin_bus(mut self, addr: Ipv4Addr, port: u16) -> Self {
        self.admin_addr = addr;
        self.admin_port = port;
        self
    }

    /// Select the expression DSL dialect.
    pub fn dsl(mut self, dialect: DslDialect) -> Self {
        self.dsl = dialect;
        self
    }
}

/// Configuration recognized on graph construction.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Network interface to bind on, if not the system default.
    pub interface: Option<String>,
    /// Bitmask of entity kinds this graph subscribes to (devices|signals|maps).
    pub subscription_mask: u8,
    /// Multicast admin bus address.
    pub admin_addr: Ipv4Addr,
    /// Multicast admin bus port.
    pub admin_port: u16,
}

/// Subscribe to device announcements.
pub const SUBSCRIBE_DEVICES: u8 = 0x01;
/// Subscribe to signal announcements.
pub const SUBSCRIBE_SIGNALS: u8 = 0x02;
/// Subscribe to map announcements.
pub const SUBSCRIBE_MAPS: u8 = 0x04;
/// Subscribe to everything.
pub const SUBSCRIBE_ALL: u8 = SUBSCRIBE_DEVICES | SUBSCRIBE_SIGNALS | SUBSCRIBE_MAPS;

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            interface: None,
            subscription_mask: SUBSCRIBE_ALL,
            admin_addr: DEFAULT_ADMIN_ADDR,
            admin_port: DEFAULT_ADMIN_PORT,
        }
    }
}

impl GraphConfig {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the subscription mask.
    pub fn subscribe(mut self, mask: u8) -> Self {
        self.subscription_mask = mask;
        self
    }
}

/// Configuration recognized on map construction/properties.
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// DSL expression text.
    pub expression: String,
    /// Transport protocol for this map's data traffic.
    pub protocol: u8,
    /// Where the expression is evaluated.
    pub process_location: ProcessLocation,
    /// Whether updates are currently suppressed.
    pub muted: bool,
    /// Instance eviction policy when the instance table overflows.
    pub steal_mode: StealMode,
    /// Whether this map is instance-aware (propagates instance ids).
    pub use_instances: bool,
}

/// Where a map's expression is evaluated: at the source or the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessLocation {
    /// Evaluate at the source device and send the transformed value.
    #[default]
    Src,
    /// Send raw source values to the destination and evaluate there.
    Dst,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            expression: String::new(),
            protocol: PROTO_UDP,
            process_location: ProcessLocation::default(),
            muted: false,
            steal_mode: StealMode::None,
            use_instances: false,
        }
    }
}

impl MapConfig {
    /// Start a builder with the given expression text.
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            ..Self::default()
        }
    }

    /// Select the transport protocol.
    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    /// Select where the expression evaluates.
    pub fn process_location(mut self, loc: ProcessLocation) -> Self {
        self.process_location = loc;
        self
    }

    /// Start muted.
    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    /// Select the instance-stealing policy.
    pub fn steal_mode(mut self, mode: StealMode) -> Self {
        self.steal_mode = mode;
        self
    }

    /// Enable instance propagation.
    pub fn use_instances(mut self, enabled: bool) -> Self {
        self.use_instances = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_config_defaults() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.admin_addr, DEFAULT_ADMIN_ADDR);
        assert_eq!(cfg.admin_port, DEFAULT_ADMIN_PORT);
        assert_eq!(cfg.dsl, DslDialect::Extended);
    }

    #[test]
    fn map_config_builder_chains() {
        let cfg = MapConfig::new("y=x+1")
            .protocol(crate::net::PROTO_TCP)
            .muted(true)
            .steal_mode(StealMode::Oldest);
        assert_eq!(cfg.expression, "y=x+1");
        assert_eq!(cfg.protocol, crate::net::PROTO_TCP);
        assert!(cfg.muted);
        assert_eq!(cfg.steal_mode, StealMode::Oldest);
    }
}
