//! Signals: typed, vector-valued, instance-capable data points owned by a
//! device (spec §3 Data Model, "Signal").

pub mod instance;
pub mod runtime;
pub mod value;

pub use instance::{Instance, InstanceOwner, InstanceStatus, InstanceTable, StealMode};
pub use value::{Sample, ValueType};

/// Direction of data flow for a signal relative to its owning device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepts incoming map updates.
    Input,
    /// Produces values that may feed outgoing maps.
    Output,
}

/// Optional numeric bounds on a signal's scalar elements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
}

/// A signal declaration: the shape and metadata a device advertises on the
/// admin bus, independent of any particular instance's data.
#[derive(Debug, Clone)]
pub struct SignalDecl {
    /// Hierarchical slash-delimited path, unique within the owning device.
    pub name: String,
    /// Input or output.
    pub direction: Direction,
    /// Element type.
    pub value_type: ValueType,
    /// Vector length (≥1).
    pub length: usize,
    /// Optional unit string (e.g. "Hz", "dB").
    pub unit: Option<String>,
    /// Optional value bounds.
    pub range: Option<Range>,
    /// Maximum concurrent instances; `None` means the signal is singular
    /// (exactly one implicit instance).
    pub instances: Option<usize>,
    /// Whether instances auto-release on source release (vs. persisting).
    pub ephemeral: bool,
}

impl SignalDecl {
    /// Build a singular (non-instanced), non-ephemeral signal declaration.
    pub fn new(name: impl Into<String>, direction: Direction, value_type: ValueType, length: usize) -> Self {
        Self {
            name: name.into(),
            direction,
            value_type,
            length: length.max(1),
            unit: None,
            range: None,
            instances: None,
            ephemeral: false,
        }
    }

    /// Enable instances with the given capacity and ephemerality.
    pub fn with_instances(mut self, capacity: usize, ephemeral: bool) -> Self {
        self.instances = Some(capacity);
        self.ephemeral = ephemeral;
        self
    }

    /// Set a unit string.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set value bounds.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some(Range { min, max });
        self
    }

    /// Instance table capacity, defaulting to 1 for non-instanced signals
    /// (the implicit singleton instance).
    pub fn capacity(&self) -> usize {
        self.instances.unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_instances_and_range() {
        let decl = SignalDecl::new("foo/bar", Direction::Output, ValueType::Float32, 3)
            .with_instances(10, true)
            .with_range(0.0, 1.0);
        assert_eq!(decl.capacity(), 10);
        assert!(decl.ephemeral);
        assert_eq!(decl.range.unwrap().max, 1.0);
    }

    #[test]
    fn default_capacity_is_one() {
        let decl = SignalDecl::new("x", Direction::Input, ValueType::Int32, 1);
        assert_eq!(decl.capacity(), 1);
    }
}
