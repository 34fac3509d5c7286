//! Error types for the signal mapping runtime.

use std::io;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a device, compiling an expression,
/// or operating on the graph.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Wire decode failure: length, alignment, or type-tag inconsistency.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// Expression text rejected before compilation.
    #[error("parse error at offset {offset}: {message}")]
    Parse {
        /// Byte offset into the source expression where parsing failed.
        offset: usize,
        /// Human-readable description of the failure.
        message: String,
    },

    /// Type/length/history check failure during compilation.
    #[error("compile error: {0}")]
    Compile(String),

    /// A map references a signal with a different length/type than recorded.
    #[error("schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch {
        /// What the compiled program expects.
        expected: String,
        /// What the current signal schema declares.
        found: String,
    },

    /// Resource allocation failed to converge within the retry ceiling.
    #[error("allocation timeout for {resource}")]
    AllocationTimeout {
        /// Which resource failed to converge ("ordinal" or "port").
        resource: &'static str,
    },

    /// Transport-level send failed.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Referenced entity (device, signal, map) is not present in the graph.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller passed arguments that don't satisfy an API precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// True for errors that are recoverable by dropping the packet/update
    /// and continuing, per the propagation policy in the spec (wire and
    /// evaluation errors never tear anything down).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MalformedPacket(_) | Error::SchemaMismatch { .. } | Error::Unreachable(_)
        )
    }

    /// True for errors that should be surfaced synchronously to the caller
    /// that authored the expression or requested the map, rather than
    /// logged and swallowed.
    pub fn is_authoring_error(&self) -> bool {
        matches!(self, Error::Parse { .. } | Error::Compile(_))
    }
}

/// Outcome of one evaluator tick. Computation errors (history overflow,
/// runtime division by zero) are *not* represented as `Err` here: per the
/// spec, evaluation errors are silent at the data path and the caller only
/// ever needs to know whether a new destination value was produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome<T> {
    /// Evaluation succeeded and produced a new destination sample.
    Produced(T),
    /// Evaluation ran but the tick yielded no destination fire (muted,
    /// stale convergent sources, or a recoverable computation error).
    Dropped(DropReason),
}

/// Why a tick produced no output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// History index referenced a sample that doesn't exist yet.
    HistoryUnderflow,
    /// Runtime division by zero or similarly undefined arithmetic.
    Computation,
    /// The map's mute predicate evaluated to true.
    Muted,
    /// An instance predicate rejected the update.
    InstanceFiltered,
    /// A convergent map is still waiting on other sources to report.
    AwaitingSources,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_errors() {
        assert!(Error::MalformedPacket("bad".into()).is_recoverable());
        assert!(
            Error::SchemaMismatch {
                expected: "f32x1".into(),
                found: "i32x1".into()
            }
            .is_recoverable()
        );
        assert!(!Error::Compile("bad expr".into()).is_recoverable());
    }

    #[test]
    fn authoring_errors() {
        assert!(
            Error::Parse {
                offset: 3,
                message: "unexpected token".into()
            }
            .is_authoring_error()
        );
        assert!(Error::Compile("type mismatch".into()).is_authoring_error());
        assert!(!Error::Unreachable("peer gone".into()).is_authoring_error());
    }
}
