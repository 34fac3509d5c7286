//! Signal value types and typed vector samples.

use crate::codec::Value as WireValue;
use crate::time::TimeTag;

/// The closed set of scalar types a signal's vector elements may hold.
///
/// Narrower than the wire codec's open OSC type-tag space (§3 Data Model):
/// signals never carry strings, blobs, or bare time tags as values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 32-bit signed integer.
    Int32,
    /// 32-bit IEEE-754 float.
    Float32,
    /// 64-bit IEEE-754 float.
    Float64,
}

impl ValueType {
    /// The OSC type tag character this value type encodes as on the wire.
    pub fn wire_tag(self) -> char {
        match self {
            ValueType::Int32 => 'i',
            ValueType::Float32 => 'f',
            ValueType::Float64 => 'd',
        }
    }

    /// Type promotion order used by the expression compiler: double wins
    /// over float wins over int (spec §4.G rule 1).
    pub fn promotion_rank(self) -> u8 {
        match self {
            ValueType::Int32 => 0,
            ValueType::Float32 => 1,
            ValueType::Float64 => 2,
        }
    }

    /// The wider of `self` and `other`.
    pub fn widen(self, other: ValueType) -> ValueType {
        if self.promotion_rank() >= other.promotion_rank() {
            self
        } else {
            other
        }
    }
}

/// A single timestamped, typed vector sample: one entry in a history ring
/// buffer or the current value of a signal instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Element type.
    pub value_type: ValueType,
    /// Vector elements, always stored widened to `f64` internally; the
    /// declared `value_type` governs wire encoding and cast-token behavior
    /// in the evaluator, not in-memory representation.
    pub data: Vec<f64>,
    /// When this sample was produced.
    pub time: TimeTag,
}

impl Sample {
    /// Build a sample from floating-point data at the given type/time.
    pub fn new(value_type: ValueType, data: Vec<f64>, time: TimeTag) -> Self {
        Self {
            value_type,
            data,
            time,
        }
    }

    /// Vector length of this sample.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if this sample carries no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encode this sample's elements as wire arguments for `address`,
    /// i.e. one OSC message with one argument per vector element.
    pub fn to_wire_args(&self) -> Vec<WireValue> {
        self.data
            .iter()
            .map(|&v| match self.value_type {
                ValueType::Int32 => WireValue::Int32(v as i32),
                ValueType::Float32 => WireValue::Float32(v as f32),
                ValueType::Float64 => WireValue::Float64(v),
            })
            .collect()
    }

    /// Decode a sample from wire arguments plus an externally-known type
    /// and timestamp (the wire format carries the type tag per-argument,
    /// but a signal's declared type is the source of truth per §6).
    pub fn from_wire_args(value_type: ValueType, args: &[WireValue], time: TimeTag) -> Self {
        let data = args.iter().filter_map(WireValue::as_f64).collect();
        Self {
            value_type,
            data,
            time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_picks_double_over_float_over_int() {
        assert_eq!(ValueType::Int32.widen(ValueType::Float32), ValueType::Float32);
        assert_eq!(ValueType::Float32.widen(ValueType::Float64), ValueType::Float64);
        assert_eq!(ValueType::Int32.widen(ValueType::Int32), ValueType::Int32);
    }

    #[test]
    fn sample_round_trips_through_wire_args() {
        let sample = Sample::new(ValueType::Float32, vec![1.0, 2.5, -3.0], TimeTag::new(1, 0));
        let args = sample.to_wire_args();
        let back = Sample::from_wire_args(ValueType::Float32, &args, TimeTag::new(1, 0));
        assert_eq!(back.data, sample.data);
    }
}
