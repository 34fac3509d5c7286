//! Bytecode evaluator: executes a compiled [`Program`] against ring
//! buffers of past samples (spec §4.H).
//!
//! Runtime failures (`Computation`, history underflow) are represented as
//! [`EvalOutcome::Dropped`], never as `Err`, per the "exception-style
//! control flow" design note: a bad tick simply produces no destination
//! sample.

use std::collections::VecDeque;

use crate::error::{DropReason, EvalOutcome};
use crate::expr::ast::{BinOp, UnOp};
use crate::expr::bytecode::{BTok, Program, ReduceOp, VarRef};
use crate::signal::value::{Sample, ValueType};
use crate::time::TimeTag;

/// Ring buffers and variable storage an [`Evaluator`] reads and writes
/// across ticks. One `Inputs` instance per active map.
#[derive(Debug)]
pub struct Inputs {
    sources: Vec<VecDeque<Sample>>,
    output_ring: VecDeque<Option<Sample>>,
    user_vars: Vec<Sample>,
}

impl Inputs {
    /// Allocate ring buffers sized from a freshly compiled `program`.
    pub fn for_program(program: &Program) -> Self {
        Self {
            sources: program
                .input_history
                .iter()
                .map(|&depth| VecDeque::with_capacity(depth + 1))
                .collect(),
            output_ring: VecDeque::from(vec![None; program.output_history + 1]),
            user_vars: program
                .user_vars
                .iter()
                .map(|slot| Sample::new(slot.value_type, vec![0.0; slot.length], TimeTag::IMMEDIATE))
                .collect(),
        }
    }

    /// Record a freshly received sample for source `idx`, evicting the
    /// oldest entry beyond the program's required history depth.
    pub fn push_source(&mut self, idx: usize, sample: Sample, max_depth: usize) {
        if idx >= self.sources.len() {
            return;
        }
        let ring = &mut self.sources[idx];
        ring.push_front(sample);
        ring.truncate(max_depth + 1);
    }

    /// Whether every source has received at least one sample, the
    /// readiness gate for convergent maps (spec §4.I).
    pub fn all_sources_ready(&self) -> bool {
        self.sources.iter().all(|r| !r.is_empty())
    }
}

/// Executes compiled programs. Stateless across programs; all per-map
/// state lives in [`Inputs`].
#[derive(Debug, Default)]
pub struct Evaluator {
    /// Ticks that produced no destination sample, for per-map diagnostics
    /// (spec §7 "Evaluation errors ... counted in per-map diagnostics").
    pub drop_count: u64,
}

impl Evaluator {
    /// Create an evaluator with a zeroed diagnostic counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every statement of `program` once, in order, sharing `inputs`'
    /// user-variable state across statements within the tick.
    pub fn evaluate(&mut self, program: &Program, inputs: &mut Inputs, now: TimeTag) -> EvalOutcome<Sample> {
        let mut tick_output: Option<Vec<f64>> = None;
        let mut next_output_time: Option<TimeTag> = None;

        for tokens in &program.statements {
            match run_statement(tokens, inputs, now, &mut tick_output, &mut next_output_time) {
                Ok(()) => {}
                Err(reason) => {
                    self.drop_count += 1;
                    return EvalOutcome::Dropped(reason);
                }
            }
        }

        let Some(data) = tick_output else {
            self.drop_count += 1;
            return EvalOutcome::Dropped(DropReason::Computation);
        };

        let time = next_output_time.unwrap_or(now);
        let sample = Sample::new(program.output_type, data, time);
        inputs.output_ring.push_front(Some(sample.clone()));
        inputs.output_ring.truncate(program.output_history + 1);
        EvalOutcome::Produced(sample)
    }
}

fn run_statement(
    tokens: &[BTok],
    inputs: &mut Inputs,
    now: TimeTag,
    tick_output: &mut Option<Vec<f64>>,
    next_output_time: &mut Option<TimeTag>,
) -> Result<(), DropReason> {
    let mut stack: Vec<Vec<f64>> = Vec::new();

    for tok in tokens {
        match tok {
            BTok::Literal(n) => stack.push(vec![*n]),
            BTok::Load { var, history } => {
                let v = load(inputs, *var, *history).ok_or(DropReason::HistoryUnderflow)?;
                stack.push(v);
            }
            BTok::LoadTime { var, history } => {
                let t = load_time(inputs, *var, *history, now);
                stack.push(vec![t]);
            }
            BTok::Slice { from, to } => {
                let v = stack.pop().ok_or(DropReason::Computation)?;
                if *to >= v.len() || from > to {
                    return Err(DropReason::Computation);
                }
                stack.push(v[*from..=*to].to_vec());
            }
            BTok::BuildVector(n) => {
                let mut elems = Vec::with_capacity(*n);
                for _ in 0..*n {
                    let v = stack.pop().ok_or(DropReason::Computation)?;
                    elems.push(v.into_iter().next().unwrap_or(0.0));
                }
                elems.reverse();
                stack.push(elems);
            }
            BTok::Cast(_) => {}
            BTok::Unary(op) => {
                let v = stack.pop().ok_or(DropReason::Computation)?;
                stack.push(v.into_iter().map(|x| apply_unary(*op, x)).collect());
            }
            BTok::Binary(op) => {
                let rhs = stack.pop().ok_or(DropReason::Computation)?;
                let lhs = stack.pop().ok_or(DropReason::Computation)?;
                stack.push(apply_binary(*op, &lhs, &rhs)?);
            }
            BTok::Ternary => {
                let b = stack.pop().ok_or(DropReason::Computation)?;
                let a = stack.pop().ok_or(DropReason::Computation)?;
                let cond = stack.pop().ok_or(DropReason::Computation)?;
                let len = a.len().max(b.len()).max(cond.len());
                let mut out = Vec::with_capacity(len);
                for i in 0..len {
                    let c = cond[i % cond.len()];
                    out.push(if c != 0.0 { a[i % a.len()] } else { b[i % b.len()] });
                }
                stack.push(out);
            }
            BTok::Call { name, arity } => {
                let mut args = Vec::with_capacity(*arity);
                for _ in 0..*arity {
                    args.push(stack.pop().ok_or(DropReason::Computation)?);
                }
                args.reverse();
                stack.push(apply_call(name, &args)?);
            }
            BTok::LoopStart { len, .. } => {
                let top = stack.last().ok_or(DropReason::Computation)?;
                if top.len() != *len {
                    return Err(DropReason::Computation);
                }
            }
            BTok::Reducing(op) => {
                let v = stack.pop().ok_or(DropReason::Computation)?;
                stack.push(vec![reduce(*op, &v)]);
            }
            BTok::LoopEnd => {}
            BTok::Store {
                var,
                history_init,
                slice,
            } => {
                let v = stack.pop().ok_or(DropReason::Computation)?;
                store(inputs, *var, history_init.as_ref().copied(), *slice, v, tick_output, now)?;
            }
            BTok::StoreTime => {
                let v = stack.pop().ok_or(DropReason::Computation)?;
                let seconds = v.first().copied().unwrap_or(0.0);
                *next_output_time = Some(TimeTag::from_unix_duration(std::time::Duration::from_secs_f64(
                    seconds.max(0.0),
                )));
            }
            BTok::StoreTimeHistory { depth } => {
                let v = stack.pop().ok_or(DropReason::Computation)?;
                let seconds = v.first().copied().unwrap_or(0.0);
                let time = TimeTag::from_unix_duration(std::time::Duration::from_secs_f64(seconds.max(0.0)));
                store_time_history(inputs, *depth, time);
            }
        }
    }
    Ok(())
}

fn load(inputs: &Inputs, var: VarRef, history: usize) -> Option<Vec<f64>> {
    match var {
        VarRef::Source(idx) => inputs.sources.get(idx)?.get(history).map(|s| s.data.clone()),
        VarRef::Output => inputs
            .output_ring
            .get(history)
            .and_then(|o| o.as_ref())
            .map(|s| s.data.clone()),
        VarRef::User(idx) => inputs.user_vars.get(idx).map(|s| s.data.clone()),
    }
}

fn load_time(inputs: &Inputs, var: VarRef, history: usize, now: TimeTag) -> f64 {
    let time = match var {
        VarRef::Source(idx) => inputs.sources.get(idx).and_then(|r| r.get(history)).map(|s| s.time),
        VarRef::Output => inputs.output_ring.get(history).and_then(|o| o.as_ref()).map(|s| s.time),
        VarRef::User(_) => None,
    };
    time.unwrap_or(now).seconds() as f64 + time.unwrap_or(now).fraction() as f64 / u32::MAX as f64
}

/// Seed a past output timestamp slot (`t_y{-k}=...`), touching only the
/// time component. Leaves an already-populated slot alone, same as a
/// `y{-k}=` data initializer leaves real history in place once a tick has
/// actually run.
fn store_time_history(inputs: &mut Inputs, depth: usize, time: TimeTag) {
    if depth >= inputs.output_ring.len() {
        inputs.output_ring.resize(depth + 1, None);
    }
    if inputs.output_ring[depth].is_none() {
        inputs.output_ring[depth] = Some(Sample::new(ValueType::Float64, Vec::new(), time));
    }
}

#[allow(clippy::too_many_arguments)]
fn store(
    inputs: &mut Inputs,
    var: VarRef,
    history_init: Option<usize>,
    slice: Option<(usize, usize)>,
    value: Vec<f64>,
    tick_output: &mut Option<Vec<f64>>,
    now: TimeTag,
) -> Result<(), DropReason> {
    match var {
        VarRef::Output => {
            if let Some(depth) = history_init {
                if depth >= inputs.output_ring.len() {
                    inputs.output_ring.resize(depth + 1, None);
                }
                if inputs.output_ring[depth].is_none() {
                    inputs.output_ring[depth] = Some(Sample::new(ValueType::Float64, value, now));
                }
            } else if let Some((from, to)) = slice {
                let buf = tick_output.get_or_insert_with(Vec::new);
                if to >= buf.len() {
                    buf.resize(to + 1, 0.0);
                }
                for (i, v) in value.into_iter().enumerate() {
                    if from + i <= to {
                        buf[from + i] = v;
                    }
                }
            } else {
                *tick_output = Some(value);
            }
        }
        VarRef::User(idx) => {
            if let Some(slot) = inputs.user_vars.get_mut(idx) {
                slot.data = value;
                slot.time = now;
            }
        }
        VarRef::Source(_) => return Err(DropReason::Computation),
    }
    Ok(())
}

fn apply_unary(op: UnOp, x: f64) -> f64 {
    match op {
        UnOp::Neg => -x,
        UnOp::Not => {
            if x == 0.0 {
                1.0
            } else {
                0.0
            }
        }
    }
}

fn apply_binary(op: BinOp, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, DropReason> {
    let len = lhs.len().max(rhs.len());
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let a = lhs[i % lhs.len()];
        let b = rhs[i % rhs.len()];
        out.push(match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => {
                if b == 0.0 {
                    return Err(DropReason::Computation);
                }
                a / b
            }
            BinOp::Mod => {
                if b == 0.0 {
                    return Err(DropReason::Computation);
                }
                a % b
            }
            BinOp::Pow => a.powf(b),
            BinOp::Eq => bool_f(a == b),
            BinOp::Ne => bool_f(a != b),
            BinOp::Lt => bool_f(a < b),
            BinOp::Le => bool_f(a <= b),
            BinOp::Gt => bool_f(a > b),
            BinOp::Ge => bool_f(a >= b),
            BinOp::And => bool_f(a != 0.0 && b != 0.0),
            BinOp::Or => bool_f(a != 0.0 || b != 0.0),
        });
    }
    Ok(out)
}

fn bool_f(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn reduce(op: ReduceOp, v: &[f64]) -> f64 {
    match op {
        ReduceOp::Sum => v.iter().sum(),
        ReduceOp::Mean => {
            if v.is_empty() {
                0.0
            } else {
                v.iter().sum::<f64>() / v.len() as f64
            }
        }
        ReduceOp::Min => v.iter().cloned().fold(f64::INFINITY, f64::min),
        ReduceOp::Max => v.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        ReduceOp::Any => bool_f(v.iter().any(|&x| x != 0.0)),
        ReduceOp::All => bool_f(v.iter().all(|&x| x != 0.0)),
    }
}

fn apply_call(name: &str, args: &[Vec<f64>]) -> Result<Vec<f64>, DropReason> {
    let len = args.iter().map(Vec::len).max().unwrap_or(1);
    let at = |i: usize, arg: &[f64]| arg[i % arg.len()];

    match name {
        "sin" | "cos" | "tan" | "abs" | "sqrt" | "log" | "log10" | "exp" | "floor" | "round" | "ceil" => {
            let x = &args[0];
            Ok(x.iter()
                .map(|&v| match name {
                    "sin" => v.sin(),
                    "cos" => v.cos(),
                    "tan" => v.tan(),
                    "abs" => v.abs(),
                    "sqrt" => v.sqrt(),
                    "log" => v.ln(),
                    "log10" => v.log10(),
                    "exp" => v.exp(),
                    "floor" => v.floor(),
                    "round" => v.round(),
                    "ceil" => v.ceil(),
                    _ => unreachable!(),
                })
                .collect())
        }
        "pow" => {
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                out.push(at(i, &args[0]).powf(at(i, &args[1])));
            }
            Ok(out)
        }
        "min" => {
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                out.push(at(i, &args[0]).min(at(i, &args[1])));
            }
            Ok(out)
        }
        "max" => {
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                out.push(at(i, &args[0]).max(at(i, &args[1])));
            }
            Ok(out)
        }
        "linear" => {
            let (x, a, b, c, d) = (&args[0], &args[1], &args[2], &args[3], &args[4]);
            let mut out = Vec::with_capacity(x.len());
            for i in 0..x.len() {
                let (av, bv, cv, dv) = (at(i, a), at(i, b), at(i, c), at(i, d));
                if bv == av {
                    return Err(DropReason::Computation);
                }
                out.push((at(i, x) - av) / (bv - av) * (dv - cv) + cv);
            }
            Ok(out)
        }
        "ema" => {
            let (x, a, state) = (args[0][0], args[1][0], args[2][0]);
            Ok(vec![a * x + (1.0 - a) * state])
        }
        "schmitt" => {
            let (x, lo, hi, state) = (args[0][0], args[1][0], args[2][0], args[3][0]);
            let new_state = if state == 0.0 && x > hi {
                1.0
            } else if state != 0.0 && x < lo {
                0.0
            } else {
                state
            };
            Ok(vec![new_state])
        }
        _ => Err(DropReason::Computation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DslDialect;
    use crate::expr::compiler::{compile, InputSchema, SourceSchema};

    fn scalar_schema() -> InputSchema {
        InputSchema {
            sources: vec![SourceSchema {
                value_type: ValueType::Int32,
                length: 1,
            }],
            output: SourceSchema {
                value_type: ValueType::Float32,
                length: 1,
            },
        }
    }

    fn push_x(inputs: &mut Inputs, program: &Program, v: f64, t: TimeTag) {
        inputs.push_source(0, Sample::new(ValueType::Int32, vec![v], t), program.input_history[0]);
    }

    #[test]
    fn linear_map_matches_scenario_one() {
        let schema = scalar_schema();
        let program = compile("y=linear(x,0,100,0,1)", DslDialect::Extended, &schema).unwrap();
        let mut inputs = Inputs::for_program(&program);
        let mut evaluator = Evaluator::new();
        let mut results = Vec::new();
        for v in [0.0, 50.0, 100.0] {
            push_x(&mut inputs, &program, v, TimeTag::now());
            match evaluator.evaluate(&program, &mut inputs, TimeTag::now()) {
                EvalOutcome::Produced(s) => results.push(s.data[0]),
                EvalOutcome::Dropped(r) => panic!("unexpected drop: {r:?}"),
            }
        }
        assert_eq!(results, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn history_init_law_accumulates() {
        let schema = scalar_schema();
        let program = compile("y=x+y{-1}; y{-1}=100", DslDialect::Extended, &schema).unwrap();
        let mut inputs = Inputs::for_program(&program);
        let mut evaluator = Evaluator::new();
        let mut last = 0.0;
        for _ in 0..10 {
            push_x(&mut inputs, &program, 1.0, TimeTag::now());
            match evaluator.evaluate(&program, &mut inputs, TimeTag::now()) {
                EvalOutcome::Produced(s) => last = s.data[0],
                EvalOutcome::Dropped(r) => panic!("unexpected drop: {r:?}"),
            }
        }
        assert_eq!(last, 110.0);
    }

    #[test]
    fn timestamp_history_initializer_tracks_prior_tick_time() {
        // spec §8 scenario 6: `y=t_x-t_y{-1}` with `t_y{-1}=t_x` initializer
        // reads ≈0 on the first tick (seeded from its own tick's input
        // time) and ≈0.1 after a 100ms delay to the next tick.
        let schema = scalar_schema();
        let program = compile("y=t_x-t_y{-1}; t_y{-1}=t_x", DslDialect::Extended, &schema).unwrap();
        let mut inputs = Inputs::for_program(&program);
        let mut evaluator = Evaluator::new();

        let t0 = TimeTag::from_unix_duration(std::time::Duration::from_secs_f64(1_700_000_000.0));
        let t1 = TimeTag::from_unix_duration(std::time::Duration::from_secs_f64(1_700_000_000.1));

        push_x(&mut inputs, &program, 1.0, t0);
        match evaluator.evaluate(&program, &mut inputs, t0) {
            EvalOutcome::Produced(s) => assert!((s.data[0]).abs() < 1e-3, "first tick should read ~0, got {}", s.data[0]),
            EvalOutcome::Dropped(r) => panic!("unexpected drop: {r:?}"),
        }

        push_x(&mut inputs, &program, 2.0, t1);
        match evaluator.evaluate(&program, &mut inputs, t1) {
            EvalOutcome::Produced(s) => assert!((s.data[0] - 0.1).abs() < 1e-3, "expected ~0.1, got {}", s.data[0]),
            EvalOutcome::Dropped(r) => panic!("unexpected drop: {r:?}"),
        }
    }

    #[test]
    fn broadcast_scalar_against_vector() {
        let schema = InputSchema {
            sources: vec![
                SourceSchema {
                    value_type: ValueType::Float32,
                    length: 1,
                },
                SourceSchema {
                    value_type: ValueType::Float32,
                    length: 3,
                },
            ],
            output: SourceSchema {
                value_type: ValueType::Float32,
                length: 3,
            },
        };
        let program = compile("y=x0+x1", DslDialect::Extended, &schema).unwrap();
        let mut inputs = Inputs::for_program(&program);
        inputs.push_source(0, Sample::new(ValueType::Float32, vec![10.0], TimeTag::now()), 0);
        inputs.push_source(
            1,
            Sample::new(ValueType::Float32, vec![1.0, 2.0, 3.0], TimeTag::now()),
            0,
        );
        let mut evaluator = Evaluator::new();
        match evaluator.evaluate(&program, &mut inputs, TimeTag::now()) {
            EvalOutcome::Produced(s) => assert_eq!(s.data, vec![11.0, 12.0, 13.0]),
            EvalOutcome::Dropped(r) => panic!("unexpected drop: {r:?}"),
        }
    }

    #[test]
    fn division_by_runtime_zero_drops_sample() {
        let schema = scalar_schema();
        let program = compile("y=1/x", DslDialect::Extended, &schema).unwrap();
        let mut inputs = Inputs::for_program(&program);
        push_x(&mut inputs, &program, 0.0, TimeTag::now());
        let mut evaluator = Evaluator::new();
        match evaluator.evaluate(&program, &mut inputs, TimeTag::now()) {
            EvalOutcome::Dropped(DropReason::Computation) => {}
            other => panic!("expected computation drop, got {other:?}"),
        }
        assert_eq!(evaluator.drop_count, 1);
    }
}
