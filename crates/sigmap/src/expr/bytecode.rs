//! Compiled stack bytecode (spec §4.G), represented as a tagged Rust enum
//! rather than a C-style union or function-pointer table (Design Note:
//! "dynamic dispatch over datatype").

use crate::expr::ast::{BinOp, UnOp};
use crate::signal::value::ValueType;

/// Where a value slot lives: an indexed source, the destination output, or
/// a slot in the program's user-variable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRef {
    /// `x`/`x0`/`x1`/… — the `n`th source signal.
    Source(usize),
    /// `y` — the destination signal.
    Output,
    /// A user-declared (or hidden, e.g. `ema`/`schmitt` state) variable,
    /// indexed into [`Program::user_vars`].
    User(usize),
}

/// Reduction operator for `LOOP_START`/`REDUCING`/`LOOP_END` sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Min,
    Max,
    Any,
    All,
}

/// What a `LOOP_START` iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// Each element of a vector-valued source/output.
    VectorElements,
    /// Each sample in a source's history ring, most recent first.
    History,
}

/// One compiled instruction. The evaluator executes a flat `Vec<BTok>` as
/// a stack machine: operators pop their operands and push one result.
#[derive(Debug, Clone, PartialEq)]
pub enum BTok {
    /// Push a scalar (possibly broadcast) literal.
    Literal(f64),
    /// Load the current-tick value of `var`, optionally `history` samples
    /// back (0 = current).
    Load { var: VarRef, history: usize },
    /// Load the timestamp of `var`, `history` samples back (0 = current),
    /// as a one-element vector of seconds since the NTP epoch.
    LoadTime { var: VarRef, history: usize },
    /// Slice the top-of-stack vector to `[from, to]` inclusive.
    Slice { from: usize, to: usize },
    /// Build a vector literal from the top `n` stack values (each must be
    /// a scalar), in source order.
    BuildVector(usize),
    /// Insert an explicit widening cast on the top-of-stack value.
    Cast(ValueType),
    Unary(UnOp),
    Binary(BinOp),
    /// `cond ? a : b`: pops `b`, `a`, `cond` and pushes the selected value,
    /// broadcasting condition length 1 against vector branches.
    Ternary,
    /// Call a named pure function (`sin`, `linear`, `ema`, `schmitt`, …)
    /// with `arity` arguments popped from the stack.
    Call { name: &'static str, arity: usize },
    /// Begin a reduction loop over `len` elements of `kind`.
    LoopStart { kind: LoopKind, len: usize },
    /// Fold the value just computed in the loop body into the running
    /// accumulator using `op`.
    Reducing(ReduceOp),
    /// End the innermost loop, pushing the final (possibly mean-divided)
    /// accumulator as a scalar.
    LoopEnd,
    /// Store the top-of-stack value to `var`. `history` is set only for a
    /// `y{-k}=` history initializer; `slice` only for `y[i:j]=`.
    Store {
        var: VarRef,
        history_init: Option<usize>,
        slice: Option<(usize, usize)>,
    },
    /// Set the next output timestamp from the top-of-stack scalar
    /// (`t_y=...`). Per spec §9 Open Question (ii), delivery remains
    /// immediate; this does not yet schedule future delivery.
    StoreTime,
    /// Initialize a past output timestamp slot (`t_y{-k}=...`) from the
    /// top-of-stack scalar. Only takes effect the first time the slot is
    /// read before a real tick has populated it, mirroring `Store`'s
    /// `history_init` semantics for output data.
    StoreTimeHistory { depth: usize },
}

/// A compiled user variable slot.
#[derive(Debug, Clone)]
pub struct UserVarSlot {
    /// Declared or synthesized (hidden) name.
    pub name: String,
    /// Vector length.
    pub length: usize,
    /// Element type.
    pub value_type: ValueType,
    /// True for compiler-synthesized state (`ema`/`schmitt` filters), which
    /// the DSL author did not name explicitly.
    pub hidden: bool,
}

/// A fully compiled expression program (spec §3 "Expression program").
#[derive(Debug, Clone)]
pub struct Program {
    /// Flat instruction sequence for each statement, in source order.
    pub statements: Vec<Vec<BTok>>,
    /// Required ring-buffer depth per source index.
    pub input_history: Vec<usize>,
    /// Required ring-buffer depth for the destination's own history.
    pub output_history: usize,
    /// User (including hidden) variable table.
    pub user_vars: Vec<UserVarSlot>,
    /// Destination vector length and type, after promotion.
    pub output_type: ValueType,
    /// Destination vector length.
    pub output_length: usize,
}

impl Program {
    /// Total instruction count across all statements, used by the
    /// constant-folding test bound in spec §8.
    pub fn token_count(&self) -> usize {
        self.statements.iter().map(Vec::len).sum()
    }
}
