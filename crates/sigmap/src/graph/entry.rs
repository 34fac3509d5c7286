//! Graph entry types: the cached metadata the graph stores for each known
//! device, signal, and map (spec §3 Data Model).

use std::net::IpAddr;
use std::time::Instant;

use crate::graph::query::PropertyValue;
use crate::graph::{DeviceId, MapId, SignalId};
use crate::signal::{Direction, ValueType};

/// A device's lifecycle state as seen by the graph (spec §3 "Device").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Announcing,
    Ready,
}

/// Cached metadata for one device, local or remote.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub id: DeviceId,
    /// `name.ordinal` identity, name component only.
    pub name: String,
    /// Collision-allocated ordinal disambiguating same-named devices.
    pub ordinal: u32,
    pub host: IpAddr,
    /// Allocated UDP data port.
    pub port: u16,
    /// Monotonic counter bumped on every `/sync` heartbeat.
    pub version: u32,
    pub last_heard: Instant,
    pub status: DeviceStatus,
}

/// Cached metadata for one signal.
#[derive(Debug, Clone)]
pub struct SignalEntry {
    pub id: SignalId,
    pub device: DeviceId,
    pub name: String,
    pub direction: Direction,
    pub value_type: ValueType,
    pub length: usize,
    pub last_heard: Instant,
}

impl DeviceEntry {
    /// Look up a named property for use with [`crate::graph::query`]
    /// filters (spec §4.D "Queries"). Unknown names return `None`.
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "name" => Some(PropertyValue::Str(self.name.clone())),
            "ordinal" => Some(PropertyValue::Int(self.ordinal as i64)),
            "port" => Some(PropertyValue::Int(self.port as i64)),
            "version" => Some(PropertyValue::Int(self.version as i64)),
            "ready" => Some(PropertyValue::Bool(self.status == DeviceStatus::Ready)),
            _ => None,
        }
    }
}

impl SignalEntry {
    /// Look up a named property for use with [`crate::graph::query`]
    /// filters (spec §4.D "Queries"). Unknown names return `None`.
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "name" => Some(PropertyValue::Str(self.name.clone())),
            "device" => Some(PropertyValue::Int(self.device as i64)),
            "direction" => Some(PropertyValue::Str(
                match self.direction {
                    Direction::Input => "input",
                    Direction::Output => "output",
                }
                .to_string(),
            )),
            "value_type" => Some(PropertyValue::Str(format!("{:?}", self.value_type))),
            "length" => Some(PropertyValue::Int(self.length as i64)),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn test_entry(id: SignalId, device: DeviceId) -> Self {
        Self {
            id,
            device,
            name: format!("sig{id}"),
            direction: Direction::Output,
            value_type: ValueType::Float32,
            length: 1,
            last_heard: Instant::now(),
        }
    }
}

/// A map's negotiation/lifecycle state (spec §4.E "Map state machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapStatus {
    Staged,
    Ready,
    Active,
    Expired,
}

/// Cached metadata for one map.
#[derive(Debug, Clone)]
pub struct MapEntry {
    pub id: MapId,
    pub sources: Vec<SignalId>,
    pub dst: SignalId,
    pub expression: String,
    pub protocol: u8,
    pub status: MapStatus,
    pub scope: Vec<DeviceId>,
    pub last_heard: Instant,
}

impl MapEntry {
    /// Look up a named property for use with [`crate::graph::query`]
    /// filters (spec §4.D "Queries"). Unknown names return `None`.
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "expression" => Some(PropertyValue::Str(self.expression.clone())),
            "protocol" => Some(PropertyValue::Int(self.protocol as i64)),
            "status" => Some(PropertyValue::Str(format!("{:?}", self.status))),
            "num_sources" => Some(PropertyValue::Int(self.sources.len() as i64)),
            "dst" => Some(PropertyValue::Int(self.dst as i64)),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn test_entry(id: MapId, sources: Vec<SignalId>, dst: SignalId) -> Self {
        Self {
            id,
            sources,
            dst,
            expression: "y=x".into(),
            protocol: crate::net::PROTO_UDP,
            status: MapStatus::Staged,
            scope: Vec::new(),
            last_heard: Instant::now(),
        }
    }
}
