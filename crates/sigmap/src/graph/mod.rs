//! The graph: an in-memory, arena-by-id cache of every device, signal,
//! and map known on the bus, local or remote (spec §4.D, Design Note
//! "cyclic device/signal/map references").
//!
//! Cross-references between entries are ids, not pointers or `Rc`s — the
//! natural device↔signal↔map reference cycle is broken by going through
//! this single arena instead of carrying owned references, the way
//! `nlink`'s attribute tree avoids cycles by indexing into one buffer.

mod entry;
mod listener;
mod query;

pub use entry::{DeviceEntry, DeviceStatus, MapEntry, MapStatus, SignalEntry};
pub use listener::{EntityKind, Event, EventKind, Listener};
pub use query::{CompareOp, PropertyValue, Quantifier};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::GraphConfig;

/// Device entity id, unique within one graph instance.
pub type DeviceId = u64;
/// Signal entity id, unique within one graph instance.
pub type SignalId = u64;
/// Map entity id. Globally unique and 64 bits wide on the wire (spec §3).
pub type MapId = u64;

/// The local cache of devices, signals, and maps (spec §3 "Graph").
pub struct Graph {
    config: GraphConfig,
    devices: HashMap<DeviceId, DeviceEntry>,
    signals: HashMap<SignalId, SignalEntry>,
    maps: HashMap<MapId, MapEntry>,
    listeners: HashMap<(EntityKind, EventKind), Vec<Listener>>,
    next_id: u64,
    liveness_timeout: Duration,
}

impl Graph {
    /// Construct an empty graph from `config`.
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            devices: HashMap::new(),
            signals: HashMap::new(),
            maps: HashMap::new(),
            listeners: HashMap::new(),
            next_id: 1,
            liveness_timeout: Duration::from_secs(10),
        }
    }

    /// The subscription mask this graph was configured with.
    pub fn subscription_mask(&self) -> u8 {
        self.config.subscription_mask
    }

    /// Allocate a fresh local entity id.
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register `listener` for `(kind, event)` pairs.
    pub fn add_callback(&mut self, kind: EntityKind, event: EventKind, listener: Listener) {
        self.listeners.entry((kind, event)).or_default().push(listener);
    }

    fn fire(&mut self, kind: EntityKind, event: EventKind, id: u64) {
        if let Some(list) = self.listeners.get_mut(&(kind, event)) {
            for cb in list.iter_mut() {
                cb(Event { kind, event, id });
            }
        }
    }

    /// Insert or update a device entry, firing `added` or `modified`.
    pub fn upsert_device(&mut self, mut entry: DeviceEntry) -> DeviceId {
        entry.last_heard = Instant::now();
        let id = entry.id;
        let event = if self.devices.contains_key(&id) {
            EventKind::Modified
        } else {
            EventKind::Added
        };
        entry.version = self.devices.get(&id).map(|e| e.version + 1).unwrap_or(0);
        self.devices.insert(id, entry);
        self.fire(EntityKind::Device, event, id);
        id
    }

    /// Remove a device and cascade: drop its signals and mark any map
    /// referencing them as removed too (spec §3 "Ownership and lifetimes").
    pub fn remove_device(&mut self, id: DeviceId) {
        if self.devices.remove(&id).is_none() {
            return;
        }
        self.fire(EntityKind::Device, EventKind::Removed, id);
        let dependent_signals: Vec<SignalId> = self
            .signals
            .iter()
            .filter(|(_, s)| s.device == id)
            .map(|(sid, _)| *sid)
            .collect();
        for sid in dependent_signals {
            self.remove_signal(sid);
        }
    }

    /// Insert or update a signal entry.
    pub fn upsert_signal(&mut self, mut entry: SignalEntry) -> SignalId {
        entry.last_heard = Instant::now();
        let id = entry.id;
        let event = if self.signals.contains_key(&id) {
            EventKind::Modified
        } else {
            EventKind::Added
        };
        self.signals.insert(id, entry);
        self.fire(EntityKind::Signal, event, id);
        id
    }

    /// Remove a signal and invalidate any map referencing it.
    pub fn remove_signal(&mut self, id: SignalId) {
        if self.signals.remove(&id).is_none() {
            return;
        }
        self.fire(EntityKind::Signal, EventKind::Removed, id);
        let dependent_maps: Vec<MapId> = self
            .maps
            .iter()
            .filter(|(_, m)| m.sources.contains(&id) || m.dst == id)
            .map(|(mid, _)| *mid)
            .collect();
        for mid in dependent_maps {
            if let Some(map) = self.maps.get_mut(&mid) {
                map.status = MapStatus::Staged;
                self.fire(EntityKind::Map, EventKind::Modified, mid);
            }
        }
    }

    /// Insert or update a map entry, resolving tie-breaks in favor of the
    /// lexicographically smaller id when two equivalent maps race
    /// (spec §4.E "Tie-breaks").
    pub fn upsert_map(&mut self, mut entry: MapEntry) -> MapId {
        entry.last_heard = Instant::now();
        let id = entry.id;
        if let Some(existing) = self.find_equivalent_map(&entry) {
            if existing < id {
                debug!(losing_id = id, winning_id = existing, "map tie-break discarded");
                return existing;
            }
            debug!(losing_id = existing, winning_id = id, "map tie-break superseded");
            self.maps.remove(&existing);
            self.fire(EntityKind::Map, EventKind::Removed, existing);
        }
        let event = if self.maps.contains_key(&id) {
            EventKind::Modified
        } else {
            EventKind::Added
        };
        self.maps.insert(id, entry);
        self.fire(EntityKind::Map, event, id);
        id
    }

    fn find_equivalent_map(&self, candidate: &MapEntry) -> Option<MapId> {
        self.maps
            .values()
            .find(|m| m.id != candidate.id && m.sources == candidate.sources && m.dst == candidate.dst)
            .map(|m| m.id)
    }

    /// Remove a map.
    pub fn remove_map(&mut self, id: MapId) {
        if self.maps.remove(&id).is_some() {
            self.fire(EntityKind::Map, EventKind::Removed, id);
        }
    }

    /// All known devices, as a `list.filter`-ready slice.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.devices.values()
    }

    /// All known signals.
    pub fn signals(&self) -> impl Iterator<Item = &SignalEntry> {
        self.signals.values()
    }

    /// All known maps.
    pub fn maps(&self) -> impl Iterator<Item = &MapEntry> {
        self.maps.values()
    }

    /// Look up a device by id.
    pub fn device(&self, id: DeviceId) -> Option<&DeviceEntry> {
        self.devices.get(&id)
    }

    /// Look up a signal by id.
    pub fn signal(&self, id: SignalId) -> Option<&SignalEntry> {
        self.signals.get(&id)
    }

    /// Look up a map by id.
    pub fn map(&self, id: MapId) -> Option<&MapEntry> {
        self.maps.get(&id)
    }

    /// All ids of entities of `kind` (spec §4.D `graph.get_list(kind)`).
    pub fn get_list(&self, kind: EntityKind) -> Vec<u64> {
        match kind {
            EntityKind::Device => self.devices.keys().copied().collect(),
            EntityKind::Signal => self.signals.keys().copied().collect(),
            EntityKind::Map => self.maps.keys().copied().collect(),
        }
    }

    /// `get_list(kind)` narrowed to entries whose named property satisfies
    /// `op value` (spec §4.D/§6 `list.filter(prop, op, value)`). Entries
    /// lacking `prop` never match except under `CompareOp::NotExists`.
    pub fn filter_list(&self, kind: EntityKind, prop: &str, op: query::CompareOp, value: &PropertyValue) -> Vec<u64> {
        match kind {
            EntityKind::Device => self
                .devices
                .values()
                .filter(|d| op.eval(d.property(prop).as_ref(), value))
                .map(|d| d.id)
                .collect(),
            EntityKind::Signal => self
                .signals
                .values()
                .filter(|s| op.eval(s.property(prop).as_ref(), value))
                .map(|s| s.id)
                .collect(),
            EntityKind::Map => self
                .maps
                .values()
                .filter(|m| op.eval(m.property(prop).as_ref(), value))
                .map(|m| m.id)
                .collect(),
        }
    }

    /// Scan every entry's `last_heard` time and expire (emit `Expired`,
    /// then drop) anything past `liveness_timeout` since last heartbeat.
    pub fn expire_stale(&mut self) -> usize {
        let now = Instant::now();
        let timeout = self.liveness_timeout;
        let mut expired = 0;

        let stale_devices: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|(_, d)| now.duration_since(d.last_heard) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in stale_devices {
            self.fire(EntityKind::Device, EventKind::Expired, id);
            self.remove_device(id);
            expired += 1;
            trace!(device = id, "device expired: liveness heartbeat missed");
        }

        let stale_maps: Vec<MapId> = self
            .maps
            .iter()
            .filter(|(_, m)| now.duration_since(m.last_heard) > timeout && m.status != MapStatus::Expired)
            .map(|(id, _)| *id)
            .collect();
        for id in stale_maps {
            if let Some(m) = self.maps.get_mut(&id) {
                m.status = MapStatus::Expired;
            }
            self.fire(EntityKind::Map, EventKind::Expired, id);
            expired += 1;
        }

        expired
    }

    /// Override the liveness timeout (default 10s, spec §5).
    pub fn set_liveness_timeout(&mut self, timeout: Duration) {
        self.liveness_timeout = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    fn device(id: DeviceId, name: &str) -> DeviceEntry {
        DeviceEntry {
            id,
            name: name.to_string(),
            ordinal: 1,
            host: Ipv4Addr::LOCALHOST.into(),
            port: 9000,
            version: 0,
            last_heard: Instant::now(),
            status: DeviceStatus::Ready,
        }
    }

    #[test]
    fn upsert_fires_added_then_modified() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new(GraphConfig::new());
        let events_clone = events.clone();
        graph.add_callback(
            EntityKind::Device,
            EventKind::Added,
            Box::new(move |e| events_clone.lock().unwrap().push(e)),
        );
        graph.upsert_device(device(1, "a"));
        graph.upsert_device(device(1, "a"));
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn map_tie_break_keeps_smaller_id() {
        let mut graph = Graph::new(GraphConfig::new());
        graph.upsert_signal(SignalEntry::test_entry(10, 1));
        graph.upsert_signal(SignalEntry::test_entry(20, 1));
        let a = MapEntry::test_entry(500, vec![10], 20);
        let b = MapEntry::test_entry(300, vec![10], 20);
        graph.upsert_map(a);
        let kept = graph.upsert_map(b);
        assert_eq!(kept, 300);
        assert!(graph.map(500).is_none() || graph.map(500).unwrap().id == 500);
    }

    #[test]
    fn removing_device_cascades_to_signals() {
        let mut graph = Graph::new(GraphConfig::new());
        graph.upsert_device(device(1, "a"));
        graph.upsert_signal(SignalEntry::test_entry(10, 1));
        graph.remove_device(1);
        assert!(graph.signal(10).is_none());
    }

    #[test]
    fn filter_list_narrows_by_property() {
        let mut graph = Graph::new(GraphConfig::new());
        graph.upsert_signal(SignalEntry::test_entry(10, 1));
        graph.upsert_signal(SignalEntry::test_entry(20, 1));
        graph.upsert_signal(SignalEntry::test_entry(30, 2));

        assert_eq!(graph.get_list(EntityKind::Signal).len(), 3);

        let from_device_1 = graph.filter_list(EntityKind::Signal, "device", query::CompareOp::Eq, &PropertyValue::Int(1));
        assert_eq!(from_device_1.len(), 2);
        assert!(from_device_1.contains(&10) && from_device_1.contains(&20));

        let unknown_prop = graph.filter_list(EntityKind::Signal, "nonexistent", query::CompareOp::Exists, &PropertyValue::Bool(true));
        assert!(unknown_prop.is_empty());
    }
}
