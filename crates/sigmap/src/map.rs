//! The map handle: a thin, `Copy`-able reference to one negotiated map,
//! returned by [`crate::device::Device::map`] and looked back up through
//! the device's graph rather than holding its own state (spec §4.E "Map").

use crate::admin_proto::MapState;
use crate::device::Device;
use crate::graph::MapId;

/// A lightweight reference to a map. Cheap to copy and pass around; all
/// accessors go back through the owning [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapHandle {
    id: MapId,
}

impl MapHandle {
    /// Wrap a raw map id, e.g. one returned by [`Device::map`].
    pub fn new(id: MapId) -> Self {
        Self { id }
    }

    /// The underlying map id, as carried on the wire.
    pub fn id(&self) -> MapId {
        self.id
    }

    /// The expression text this map was negotiated with, if still present
    /// on `device`'s graph.
    pub fn expression(&self, device: &Device) -> Option<String> {
        device.graph().map(self.id).map(|m| m.expression.clone())
    }

    /// Whether this map is currently evaluating and forwarding data.
    pub fn is_live(&self, device: &Device) -> bool {
        device.map_state(self.id).map(|s| s != MapState::Removed && s != MapState::Expired).unwrap_or(false)
    }

    /// Diagnostic count of ticks that produced no output sample, e.g. from
    /// runtime division by zero or history underflow.
    pub fn drop_count(&self, device: &Device) -> u64 {
        device.map_drop_count(self.id).unwrap_or(0)
    }

    /// Request this map be torn down.
    pub async fn unmap(&self, device: &mut Device) -> crate::error::Result<()> {
        device.unmap(self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_carries_its_id() {
        let h = MapHandle::new(42);
        assert_eq!(h.id(), 42);
    }
}
