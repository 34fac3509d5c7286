//! Collision-based resource allocation for device ordinals and data ports.
//!
//! Every device on the admin bus independently picks a candidate value,
//! announces it, and backs off if it overhears another device claim the
//! same value before a probation window elapses. This mirrors libmapper's
//! `mapper_admin_allocated_t` (`value`, `collision`, `count_time`, `locked`)
//! rather than a central authority, since there is no single process that
//! could hand out ordinals across independent devices on a multicast LAN.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Base probation window before any collision has been seen.
const BASE_PROBATION: Duration = Duration::from_millis(500);

/// Ceiling on the escalated probation window (spec §7 "exponential backoff
/// bounded to a ceiling").
const MAX_PROBATION: Duration = Duration::from_secs(8);

/// How many collisions before giving up and reporting a timeout.
const MAX_COLLISIONS: u32 = 16;

/// One allocator instance: either a device ordinal or a data-plane port.
#[derive(Debug)]
pub struct Allocator {
    kind: &'static str,
    value: u32,
    min: u32,
    max: u32,
    collision_count: u32,
    count_time: Instant,
    locked: bool,
}

impl Allocator {
    /// Start a new allocation attempt for `kind` ("ordinal" or "port"),
    /// picking a uniformly random starting candidate in `[min, max]`.
    pub fn new(kind: &'static str, min: u32, max: u32) -> Self {
        let value = rand::thread_rng().gen_range(min..=max);
        trace!(kind, value, "allocator starting candidate");
        Self {
            kind,
            value,
            min,
            max,
            collision_count: 0,
            count_time: Instant::now(),
            locked: false,
        }
    }

    /// The candidate value currently being probed or already locked.
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Whether the probation window has elapsed without a collision and the
    /// value can be treated as final.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Record that a peer announced the same candidate value. The candidate
    /// is incremented by `collisions+1` (wrapped back into range) and the
    /// probation timer restarts, per the collision resolution rule (spec
    /// §4.C). Returns `AllocationTimeout` once `MAX_COLLISIONS` is exceeded
    /// without ever deconflicting; the caller decides whether to retry.
    pub fn collide(&mut self) -> Result<()> {
        if self.locked {
            return Ok(());
        }
        self.collision_count += 1;
        if self.collision_count > MAX_COLLISIONS {
            return Err(Error::AllocationTimeout { resource: self.kind });
        }
        let span = self.max - self.min + 1;
        let offset = (self.value - self.min + self.collision_count) % span;
        let new_value = self.min + offset;
        debug!(
            kind = self.kind,
            old = self.value,
            new = new_value,
            collisions = self.collision_count,
            "allocation collision, retrying"
        );
        self.value = new_value;
        self.count_time = Instant::now();
        Ok(())
    }

    /// Abandon the current attempt and restart from a fresh random
    /// candidate with the collision count cleared. Called after
    /// [`Allocator::collide`] reports `AllocationTimeout`.
    pub fn restart(&mut self) {
        self.value = rand::thread_rng().gen_range(self.min..=self.max);
        self.collision_count = 0;
        self.count_time = Instant::now();
        trace!(kind = self.kind, value = self.value, "allocation attempt restarted after timeout");
    }

    /// The probation window for the current collision count: grows
    /// exponentially with every collision, bounded at [`MAX_PROBATION`]
    /// (spec §7 "exponential backoff bounded to a ceiling").
    fn probation(&self) -> Duration {
        let scale = 1u32 << self.collision_count.min(4);
        (BASE_PROBATION * scale).min(MAX_PROBATION)
    }

    /// Check the probation timer and lock the value in if it has elapsed
    /// without a collision. Returns `true` if this call is what locked it.
    pub fn tick(&mut self) -> bool {
        if self.locked {
            return false;
        }
        if self.count_time.elapsed() >= self.probation() {
            self.locked = true;
            trace!(kind = self.kind, value = self.value, "allocation locked");
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_allocator_is_not_locked() {
        let a = Allocator::new("ordinal", 0, 9);
        assert!(!a.is_locked());
        assert!(a.value() <= 9);
    }

    #[test]
    fn collision_increments_by_collisions_plus_one() {
        // spec §4.C: on collision the candidate is incremented by
        // `collisions+1`, wrapped back into range.
        let mut a = Allocator::new("ordinal", 0, 9);
        a.value = 3;
        a.collide().unwrap();
        assert_eq!(a.collision_count, 1);
        assert_eq!(a.value(), 5); // 3 + (0 + 1)

        a.collide().unwrap();
        assert_eq!(a.collision_count, 2);
        assert_eq!(a.value(), 8); // 5 + (1 + 1)
    }

    #[test]
    fn collision_wraps_within_range() {
        let mut a = Allocator::new("ordinal", 0, 9);
        a.value = 9;
        a.collide().unwrap();
        assert_eq!(a.value(), 0); // 9 + 1, wrapped mod 10
    }

    #[test]
    fn probation_grows_with_collision_count_and_is_capped() {
        let mut a = Allocator::new("ordinal", 0, 9);
        let base = a.probation();
        a.collide().unwrap();
        assert!(a.probation() > base);
        for _ in 0..MAX_COLLISIONS {
            let _ = a.collide();
        }
        assert!(a.probation() <= MAX_PROBATION);
    }

    #[test]
    fn too_many_collisions_times_out_then_restarts() {
        let mut a = Allocator::new("port", 0, 1);
        for _ in 0..MAX_COLLISIONS {
            a.collide().unwrap();
        }
        assert!(a.collide().is_err());
        a.restart();
        assert_eq!(a.collision_count, 0);
        assert!(a.value() <= 1);
    }

    #[test]
    fn locked_allocator_ignores_further_collisions() {
        let mut a = Allocator::new("ordinal", 0, 9);
        a.locked = true;
        let value = a.value();
        a.collide().unwrap();
        assert_eq!(a.value(), value);
    }
}
