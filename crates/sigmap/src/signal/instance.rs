//! Signal instances: parallel "voices" of a signal, each addressed by a
//! 64-bit id, with configurable eviction when the instance table is full.

use std::collections::VecDeque;

use tracing::debug;

use crate::signal::value::Sample;

/// Eviction policy applied when a new instance id arrives with no free
/// local slot. Ported from libmapper's `mpr_steal_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StealMode {
    /// Drop the new instance; the table is unchanged.
    #[default]
    None,
    /// Evict the least-recently-updated instance.
    Oldest,
    /// Evict the most-recently-updated instance.
    Newest,
}

/// Lifecycle state of one instance slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Slot is allocated but has not yet received a value.
    Reserved,
    /// Slot holds a live value.
    Active,
    /// Slot's owner released it; pending cleanup.
    Expired,
}

/// Where an instance's lifecycle is driven from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceOwner {
    /// Originated locally on this device.
    Local,
    /// Originated from a named remote peer.
    Remote(String),
}

/// One instance slot: an id, status, current value, and owner.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Globally-unique instance id as seen on the wire.
    pub id: u64,
    /// Lifecycle state.
    pub status: InstanceStatus,
    /// Most recent value, if any has been received.
    pub value: Option<Sample>,
    /// Who originated this instance.
    pub owner: InstanceOwner,
    /// Monotonic sequence number bumped on every update, used to find the
    /// oldest/newest instance for stealing without relying on wall time.
    sequence: u64,
}

/// A signal's full set of instance slots, bounded to `capacity` concurrent
/// live instances.
#[derive(Debug)]
pub struct InstanceTable {
    capacity: usize,
    steal_mode: StealMode,
    slots: Vec<Instance>,
    order: VecDeque<usize>,
    next_sequence: u64,
}

impl InstanceTable {
    /// Create a table with room for `capacity` concurrent instances.
    pub fn new(capacity: usize, steal_mode: StealMode) -> Self {
        Self {
            capacity: capacity.max(1),
            steal_mode,
            slots: Vec::new(),
            order: VecDeque::new(),
            next_sequence: 0,
        }
    }

    /// Number of instances currently tracked (any status).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if no instances are tracked.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Look up an instance by id.
    pub fn get(&self, id: u64) -> Option<&Instance> {
        self.slots.iter().find(|i| i.id == id)
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.slots.iter().position(|i| i.id == id)
    }

    /// Handle an incoming update for `id`. If the instance already exists,
    /// its value is updated in place. Otherwise a new slot is reserved; if
    /// the table is at capacity, the configured steal mode decides whether
    /// an existing slot is evicted to make room.
    ///
    /// Returns the id of any instance evicted as a side effect, so the
    /// caller can fire an instance-release callback (spec §4.I).
    pub fn update(&mut self, id: u64, owner: InstanceOwner, value: Sample) -> Option<u64> {
        let seq = self.next_sequence;
        self.next_sequence += 1;

        if let Some(idx) = self.position(id) {
            self.slots[idx].value = Some(value);
            self.slots[idx].status = InstanceStatus::Active;
            self.slots[idx].sequence = seq;
            self.touch(idx);
            return None;
        }

        let evicted = if self.slots.len() >= self.capacity {
            self.steal()
        } else {
            None
        };

        if self.slots.len() < self.capacity {
            self.slots.push(Instance {
                id,
                status: InstanceStatus::Active,
                value: Some(value),
                owner,
                sequence: seq,
            });
            self.order.push_back(self.slots.len() - 1);
        }

        evicted
    }

    fn touch(&mut self, idx: usize) {
        self.order.retain(|&i| i != idx);
        self.order.push_back(idx);
    }

    /// Apply the configured steal mode to free one slot, returning the
    /// evicted instance's id, or `None` if mode is `None` (table stays
    /// full and the new id is simply not admitted).
    fn steal(&mut self) -> Option<u64> {
        match self.steal_mode {
            StealMode::None => None,
            StealMode::Oldest => self.evict_front(),
            StealMode::Newest => self.evict_back(),
        }
    }

    fn evict_front(&mut self) -> Option<u64> {
        let idx = *self.order.front()?;
        self.remove_at(idx)
    }

    fn evict_back(&mut self) -> Option<u64> {
        let idx = *self.order.back()?;
        self.remove_at(idx)
    }

    fn remove_at(&mut self, idx: usize) -> Option<u64> {
        if idx >= self.slots.len() {
            return None;
        }
        let removed = self.slots.remove(idx);
        self.order.retain(|&i| i != idx);
        // Every index after `idx` shifted down by one.
        for i in self.order.iter_mut() {
            if *i > idx {
                *i -= 1;
            }
        }
        debug!(instance = removed.id, "instance evicted by steal policy");
        Some(removed.id)
    }

    /// Explicitly release (expire) an instance, e.g. on source release or
    /// ephemeral auto-release.
    pub fn release(&mut self, id: u64) -> bool {
        if let Some(idx) = self.position(id) {
            self.slots[idx].status = InstanceStatus::Expired;
            true
        } else {
            false
        }
    }

    /// Drop every instance marked `Expired`, returning their ids.
    pub fn reap_expired(&mut self) -> Vec<u64> {
        let mut reaped = Vec::new();
        let mut idx = 0;
        while idx < self.slots.len() {
            if self.slots[idx].status == InstanceStatus::Expired {
                if let Some(id) = self.remove_at(idx) {
                    reaped.push(id);
                }
            } else {
                idx += 1;
            }
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::value::ValueType;
    use crate::time::TimeTag;

    fn sample(v: f64) -> Sample {
        Sample::new(ValueType::Float32, vec![v], TimeTag::now())
    }

    #[test]
    fn stealing_oldest_evicts_first_inserted() {
        // Spec §8 scenario 5: 10-instance table, steal=oldest, 11 ids.
        let mut table = InstanceTable::new(10, StealMode::Oldest);
        for id in 0..10 {
            assert!(table.update(id, InstanceOwner::Local, sample(id as f64)).is_none());
        }
        assert_eq!(table.len(), 10);
        let evicted = table.update(10, InstanceOwner::Local, sample(10.0));
        assert_eq!(evicted, Some(0));
        assert_eq!(table.len(), 10);
        assert!(table.get(10).is_some());
        assert!(table.get(0).is_none());
    }

    #[test]
    fn steal_none_drops_new_instance_when_full() {
        let mut table = InstanceTable::new(1, StealMode::None);
        table.update(1, InstanceOwner::Local, sample(1.0));
        let evicted = table.update(2, InstanceOwner::Local, sample(2.0));
        assert_eq!(evicted, None);
        assert_eq!(table.len(), 1);
        assert!(table.get(2).is_none());
    }

    #[test]
    fn release_then_reap_removes_slot() {
        let mut table = InstanceTable::new(4, StealMode::None);
        table.update(1, InstanceOwner::Local, sample(1.0));
        assert!(table.release(1));
        let reaped = table.reap_expired();
        assert_eq!(reaped, vec![1]);
        assert!(table.is_empty());
    }
}
