//! Map negotiation state machine (spec §4.E "Map state machine"):
//! `Staged → Ready → Active`, `Expired` reachable on a missed heartbeat,
//! `Removed` reachable from any state.

/// A map's negotiation/lifecycle state, mirrored in
/// [`crate::graph::MapStatus`] for cached entries on the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    /// `/map` proposed, not yet acknowledged by every source and the
    /// destination.
    Staged,
    /// Every participant has acknowledged; no data has flowed yet.
    Ready,
    /// At least one data update has been evaluated and sent.
    Active,
    /// A participant missed its liveness deadline.
    Expired,
    /// `/unmap` completed. Terminal.
    Removed,
}

/// Drives a single map through [`MapState`] transitions as `/map`,
/// `/mapped`, data, and `/unmap` events arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFsm {
    state: MapState,
    /// Participants (source devices plus the destination) that have
    /// acknowledged the proposal so far.
    acked: u32,
    /// Total participants required to ack before the map is `Ready`.
    required: u32,
}

impl MapFsm {
    /// A freshly proposed map awaiting `required` acknowledgements.
    pub fn new(required: u32) -> Self {
        Self {
            state: MapState::Staged,
            acked: 0,
            required,
        }
    }

    /// Current state.
    pub fn state(&self) -> MapState {
        self.state
    }

    /// Record one participant's `/mapped` acknowledgement. Transitions to
    /// `Ready` once every participant has acked.
    pub fn on_ack(&mut self) {
        if self.state != MapState::Staged {
            return;
        }
        self.acked += 1;
        if self.acked >= self.required {
            self.state = MapState::Ready;
        }
    }

    /// Record that a data update was evaluated and sent.
    pub fn on_data(&mut self) {
        if self.state == MapState::Ready {
            self.state = MapState::Active;
        }
    }

    /// Record a missed liveness deadline for any participant.
    pub fn on_expire(&mut self) {
        if !matches!(self.state, MapState::Removed) {
            self.state = MapState::Expired;
        }
    }

    /// Record `/unmap` completion. Always succeeds; idempotent.
    pub fn on_unmap(&mut self) {
        self.state = MapState::Removed;
    }

    /// Whether this map should currently evaluate and forward data.
    pub fn is_live(&self) -> bool {
        matches!(self.state, MapState::Ready | MapState::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn becomes_ready_only_after_every_participant_acks() {
        let mut fsm = MapFsm::new(2);
        fsm.on_ack();
        assert_eq!(fsm.state(), MapState::Staged);
        fsm.on_ack();
        assert_eq!(fsm.state(), MapState::Ready);
    }

    #[test]
    fn first_data_update_activates() {
        let mut fsm = MapFsm::new(1);
        fsm.on_ack();
        assert!(fsm.is_live());
        fsm.on_data();
        assert_eq!(fsm.state(), MapState::Active);
    }

    #[test]
    fn expire_then_unmap_terminates() {
        let mut fsm = MapFsm::new(1);
        fsm.on_ack();
        fsm.on_expire();
        assert_eq!(fsm.state(), MapState::Expired);
        assert!(!fsm.is_live());
        fsm.on_unmap();
        assert_eq!(fsm.state(), MapState::Removed);
    }
}
