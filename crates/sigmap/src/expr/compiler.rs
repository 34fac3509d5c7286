//! Compiles a parsed [`Ast`] into a [`Program`] (spec §4.G).

use std::collections::HashMap;

use crate::config::DslDialect;
use crate::error::{Error, Result};
use crate::expr::ast::{Ast, BinOp, Expr, LValue, Statement, UnOp};
use crate::expr::bytecode::{BTok, LoopKind, Program, ReduceOp, UserVarSlot, VarRef};
use crate::expr::{parser, EXTENDED_MAX_HISTORY, LEGACY_MAX_HISTORY};
use crate::signal::value::ValueType;

/// Declared type/length of one source or the destination signal.
#[derive(Debug, Clone, Copy)]
pub struct SourceSchema {
    pub value_type: ValueType,
    pub length: usize,
}

/// What the compiler needs to know about the signals an expression will
/// run against, so it can promote types/lengths and size history rings.
#[derive(Debug, Clone)]
pub struct InputSchema {
    /// One entry per source, in `x0, x1, …` order.
    pub sources: Vec<SourceSchema>,
    /// The destination signal's declared type/length.
    pub output: SourceSchema,
}

const BUILTIN_FNS: &[&str] = &[
    "sin", "cos", "tan", "abs", "sqrt", "log", "log10", "exp", "floor", "round", "ceil", "linear",
    "pow",
];
const REDUCE_ONLY: &[&str] = &["sum", "mean", "any", "all"];
const REDUCE_OR_BINARY: &[&str] = &["min", "max"];

struct Builder<'a> {
    schema: &'a InputSchema,
    dialect: DslDialect,
    user_vars: Vec<UserVarSlot>,
    user_index: HashMap<String, usize>,
    input_history: Vec<usize>,
    output_history: usize,
}

impl<'a> Builder<'a> {
    fn max_history(&self) -> usize {
        match self.dialect {
            DslDialect::Legacy => LEGACY_MAX_HISTORY,
            DslDialect::Extended => EXTENDED_MAX_HISTORY,
        }
    }

    fn source_ref(&self, name: &str) -> Option<(VarRef, SourceSchema)> {
        if name == "x" {
            return self.schema.sources.first().map(|s| (VarRef::Source(0), *s));
        }
        if let Some(digits) = name.strip_prefix('x') {
            if let Ok(idx) = digits.parse::<usize>() {
                return self
                    .schema
                    .sources
                    .get(idx)
                    .map(|s| (VarRef::Source(idx), *s));
            }
        }
        if name == "y" {
            return Some((VarRef::Output, self.schema.output));
        }
        None
    }

    fn user_var(&mut self, name: &str, length: usize, value_type: ValueType) -> usize {
        if let Some(&idx) = self.user_index.get(name) {
            return idx;
        }
        let idx = self.user_vars.len();
        self.user_vars.push(UserVarSlot {
            name: name.to_string(),
            length,
            value_type,
            hidden: false,
        });
        self.user_index.insert(name.to_string(), idx);
        idx
    }

    fn hidden_var(&mut self, hint: &str, length: usize, value_type: ValueType) -> usize {
        let name = format!("__{hint}_{}", self.user_vars.len());
        let idx = self.user_vars.len();
        self.user_vars.push(UserVarSlot {
            name,
            length,
            value_type,
            hidden: true,
        });
        idx
    }

    fn record_source_history(&mut self, idx: usize, depth: usize) -> Result<()> {
        if depth > self.max_history() {
            return Err(Error::Compile(format!(
                "history depth {depth} exceeds dialect maximum {}",
                self.max_history()
            )));
        }
        if self.input_history.len() <= idx {
            self.input_history.resize(idx + 1, 0);
        }
        self.input_history[idx] = self.input_history[idx].max(depth);
        Ok(())
    }

    fn record_output_history(&mut self, depth: usize) -> Result<()> {
        if depth > self.max_history() {
            return Err(Error::Compile(format!(
                "history depth {depth} exceeds dialect maximum {}",
                self.max_history()
            )));
        }
        self.output_history = self.output_history.max(depth);
        Ok(())
    }
}

/// Compile `source` under `dialect` against `schema`.
pub fn compile(source: &str, dialect: DslDialect, schema: &InputSchema) -> Result<Program> {
    let ast = parser::parse(source)?;
    let ast = fold_ast(ast);

    let mut builder = Builder {
        schema,
        dialect,
        user_vars: Vec::new(),
        user_index: HashMap::new(),
        input_history: vec![0; schema.sources.len()],
        output_history: 0,
    };

    let mut statements = Vec::new();
    for stmt in &ast.statements {
        statements.push(emit_statement(&mut builder, stmt)?);
    }
    // History initializers (`y{-k}=`, `t_y{-k}=`) seed a ring slot that a
    // same-tick statement may read, regardless of where the initializer
    // appears in source order; run them first. Stable sort preserves
    // relative order within each group.
    statements.sort_by_key(|toks| !is_history_init(toks));

    Ok(Program {
        statements,
        input_history: builder.input_history,
        output_history: builder.output_history,
        user_vars: builder.user_vars,
        output_type: schema.output.value_type,
        output_length: schema.output.length,
    })
}

/// Whether `tokens` is a history initializer (`y{-k}=...` or
/// `t_y{-k}=...`), identified by its trailing store instruction.
fn is_history_init(tokens: &[BTok]) -> bool {
    matches!(
        tokens.last(),
        Some(BTok::Store {
            history_init: Some(_),
            ..
        }) | Some(BTok::StoreTimeHistory { .. })
    )
}

fn emit_statement(builder: &mut Builder, stmt: &Statement) -> Result<Vec<BTok>> {
    let (_, rhs_len) = infer(builder, &stmt.rhs)?;
    let mut toks = emit_expr(builder, &stmt.rhs)?;

    match &stmt.lhs {
        LValue::Output { history, slice } => {
            if let Some(k) = history {
                let depth = (-*k) as usize;
                builder.record_output_history(depth)?;
                // A `y{-k}` reference is only ever meaningful relative to
                // ticks that have already completed, so it indexes the
                // output ring one position earlier than a source's own
                // `x{-k}` (whose "current" sample is already on the ring
                // before evaluation starts).
                toks.push(BTok::Store {
                    var: VarRef::Output,
                    history_init: Some(depth.saturating_sub(1)),
                    slice: None,
                });
            } else if let Some((from, to)) = slice {
                let _ = rhs_len;
                toks.push(BTok::Store {
                    var: VarRef::Output,
                    history_init: None,
                    slice: Some((*from, *to)),
                });
            } else {
                toks.push(BTok::Store {
                    var: VarRef::Output,
                    history_init: None,
                    slice: None,
                });
            }
        }
        LValue::OutputTime { history } => {
            if let Some(k) = history {
                let depth = (-*k) as usize;
                builder.record_output_history(depth)?;
                toks.push(BTok::StoreTimeHistory {
                    depth: depth.saturating_sub(1),
                });
            } else {
                toks.push(BTok::StoreTime);
            }
        }
        LValue::UserVar(name) => {
            let idx = builder.user_var(name, rhs_len, ValueType::Float64);
            toks.push(BTok::Store {
                var: VarRef::User(idx),
                history_init: None,
                slice: None,
            });
        }
    }
    Ok(toks)
}


/// Infer `(type, vector length)` for `expr` without emitting code, used to
/// size broadcasts and validate non-broadcastable mismatches up front.
fn infer(builder: &mut Builder, expr: &Expr) -> Result<(ValueType, usize)> {
    match expr {
        Expr::Number(n) => {
            let ty = if n.fract() == 0.0 {
                ValueType::Int32
            } else {
                ValueType::Float64
            };
            Ok((ty, 1))
        }
        Expr::Vector(elems) => {
            let mut ty = ValueType::Int32;
            for e in elems {
                let (t, _) = infer(builder, e)?;
                ty = ty.widen(t);
            }
            Ok((ty, elems.len()))
        }
        Expr::Var { name, .. } => {
            if let Some((var, sch)) = builder.source_ref(name) {
                let _ = var;
                Ok((sch.value_type, sch.length))
            } else {
                let idx = builder.user_var(name, 1, ValueType::Float64);
                let slot = &builder.user_vars[idx];
                Ok((slot.value_type, slot.length))
            }
        }
        Expr::TimeOf { .. } => Ok((ValueType::Float64, 1)),
        Expr::Unary(_, inner) => infer(builder, inner),
        Expr::Binary(_, lhs, rhs) => {
            let (lt, ll) = infer(builder, lhs)?;
            let (rt, rl) = infer(builder, rhs)?;
            let len = broadcast_len(ll, rl)?;
            Ok((lt.widen(rt), len))
        }
        Expr::Ternary(_, a, b) | Expr::ShortTernary(a, b) => {
            let (at, al) = infer(builder, a)?;
            let (bt, bl) = infer(builder, b)?;
            let len = broadcast_len(al, bl)?;
            Ok((at.widen(bt), len))
        }
        Expr::Call(name, args) => infer_call(builder, name, args),
    }
}

fn broadcast_len(a: usize, b: usize) -> Result<usize> {
    if a == b || a == 1 || b == 1 {
        Ok(a.max(b))
    } else {
        Err(Error::Compile(format!(
            "non-broadcastable vector lengths {a} and {b}"
        )))
    }
}

fn infer_call(builder: &mut Builder, name: &str, args: &[Expr]) -> Result<(ValueType, usize)> {
    if REDUCE_ONLY.contains(&name) || (REDUCE_OR_BINARY.contains(&name) && args.len() == 1) {
        if args.len() != 1 {
            return Err(Error::Compile(format!("{name} takes exactly one argument")));
        }
        let _ = infer(builder, &args[0])?;
        return Ok((ValueType::Float64, 1));
    }
    if name == "ema" {
        return infer(builder, &args[0]);
    }
    if name == "schmitt" {
        return Ok((ValueType::Float64, 1));
    }
    if BUILTIN_FNS.contains(&name) || REDUCE_OR_BINARY.contains(&name) {
        let mut ty = ValueType::Int32;
        let mut len = 1;
        for a in args {
            let (t, l) = infer(builder, a)?;
            ty = ty.widen(t);
            len = broadcast_len(len, l)?;
        }
        return Ok((ty, len));
    }
    Err(Error::Compile(format!("unknown function '{name}'")))
}

fn emit_expr(builder: &mut Builder, expr: &Expr) -> Result<Vec<BTok>> {
    let mut out = Vec::new();
    match expr {
        Expr::Number(n) => out.push(BTok::Literal(*n)),
        Expr::Vector(elems) => {
            for e in elems {
                out.extend(emit_expr(builder, e)?);
            }
            out.push(BTok::BuildVector(elems.len()));
        }
        Expr::Var {
            name,
            history,
            slice,
        } => {
            let depth = history.map(|k| (-k) as usize).unwrap_or(0);
            if let Some((var, _)) = builder.source_ref(name) {
                let ring_index = if let VarRef::Source(idx) = var {
                    builder.record_source_history(idx, depth)?;
                    depth
                } else {
                    builder.record_output_history(depth)?;
                    depth.saturating_sub(1)
                };
                out.push(BTok::Load { var, history: ring_index });
            } else {
                let idx = builder.user_var(name, 1, ValueType::Float64);
                out.push(BTok::Load {
                    var: VarRef::User(idx),
                    history: depth,
                });
            }
            if let Some((from, to)) = slice {
                let from_v = const_usize(from)?;
                let to_v = const_usize(to)?;
                out.push(BTok::Slice { from: from_v, to: to_v });
            }
        }
        Expr::TimeOf { name, history } => {
            let var = builder
                .source_ref(name)
                .map(|(v, _)| v)
                .or_else(|| if name == "y" { Some(VarRef::Output) } else { None })
                .ok_or_else(|| Error::Compile(format!("unknown timestamp source 't_{name}'")))?;
            let depth = history.map(|k| (-k) as usize).unwrap_or(0);
            let ring_index = match var {
                VarRef::Source(idx) => {
                    builder.record_source_history(idx, depth)?;
                    depth
                }
                VarRef::Output => {
                    builder.record_output_history(depth)?;
                    depth.saturating_sub(1)
                }
                VarRef::User(_) => depth,
            };
            out.push(BTok::LoadTime { var, history: ring_index });
        }
        Expr::Unary(op, inner) => {
            out.extend(emit_expr(builder, inner)?);
            out.push(BTok::Unary(*op));
        }
        Expr::Binary(op, lhs, rhs) => {
            out.extend(emit_expr(builder, lhs)?);
            out.extend(emit_expr(builder, rhs)?);
            out.push(BTok::Binary(*op));
        }
        Expr::Ternary(cond, a, b) => {
            out.extend(emit_expr(builder, cond)?);
            out.extend(emit_expr(builder, a)?);
            out.extend(emit_expr(builder, b)?);
            out.push(BTok::Ternary);
        }
        Expr::ShortTernary(cond, b) => {
            out.extend(emit_expr(builder, cond)?);
            out.extend(emit_expr(builder, cond)?);
            out.extend(emit_expr(builder, b)?);
            out.push(BTok::Ternary);
        }
        Expr::Call(name, args) => emit_call(builder, &mut out, name, args)?,
    }
    Ok(out)
}

fn const_usize(expr: &Expr) -> Result<usize> {
    match expr {
        Expr::Number(n) => Ok(*n as usize),
        Expr::Unary(UnOp::Neg, inner) => Ok(const_usize(inner)?.wrapping_neg()),
        _ => Err(Error::Compile("slice bounds must be literal".into())),
    }
}

fn emit_call(builder: &mut Builder, out: &mut Vec<BTok>, name: &str, args: &[Expr]) -> Result<()> {
    let is_reduction =
        REDUCE_ONLY.contains(&name) || (REDUCE_OR_BINARY.contains(&name) && args.len() == 1);
    if is_reduction {
        let (_, len) = infer(builder, &args[0])?;
        let op = match name {
            "sum" => ReduceOp::Sum,
            "mean" => ReduceOp::Mean,
            "min" => ReduceOp::Min,
            "max" => ReduceOp::Max,
            "any" => ReduceOp::Any,
            "all" => ReduceOp::All,
            _ => unreachable!(),
        };
        out.extend(emit_expr(builder, &args[0])?);
        out.push(BTok::LoopStart {
            kind: LoopKind::VectorElements,
            len,
        });
        out.push(BTok::Reducing(op));
        out.push(BTok::LoopEnd);
        return Ok(());
    }

    if name == "ema" {
        let state = builder.hidden_var("ema", 1, ValueType::Float64);
        out.extend(emit_expr(builder, &args[0])?);
        out.extend(emit_expr(builder, &args[1])?);
        out.push(BTok::Load {
            var: VarRef::User(state),
            history: 0,
        });
        out.push(BTok::Call {
            name: "ema",
            arity: 3,
        });
        out.push(BTok::Store {
            var: VarRef::User(state),
            history_init: None,
            slice: None,
        });
        out.push(BTok::Load {
            var: VarRef::User(state),
            history: 0,
        });
        return Ok(());
    }

    if name == "schmitt" {
        let state = builder.hidden_var("schmitt", 1, ValueType::Float64);
        out.extend(emit_expr(builder, &args[0])?);
        out.extend(emit_expr(builder, &args[1])?);
        out.extend(emit_expr(builder, &args[2])?);
        out.push(BTok::Load {
            var: VarRef::User(state),
            history: 0,
        });
        out.push(BTok::Call {
            name: "schmitt",
            arity: 4,
        });
        out.push(BTok::Store {
            var: VarRef::User(state),
            history_init: None,
            slice: None,
        });
        out.push(BTok::Load {
            var: VarRef::User(state),
            history: 0,
        });
        return Ok(());
    }

    if BUILTIN_FNS.contains(&name) || REDUCE_OR_BINARY.contains(&name) {
        for a in args {
            out.extend(emit_expr(builder, a)?);
        }
        out.push(BTok::Call {
            name: static_name(name),
            arity: args.len(),
        });
        return Ok(());
    }

    Err(Error::Compile(format!("unknown function '{name}'")))
}

fn static_name(name: &str) -> &'static str {
    const ALL: &[&str] = &[
        "sin", "cos", "tan", "abs", "sqrt", "log", "log10", "exp", "floor", "round", "ceil",
        "linear", "pow", "min", "max",
    ];
    ALL.iter().copied().find(|n| *n == name).unwrap_or("unknown")
}

/// Fold pure-literal subtrees and algebraic identities (spec §4.G rule 4 /
/// §8 "Constant folding" law).
fn fold_ast(ast: Ast) -> Ast {
    Ast {
        statements: ast
            .statements
            .into_iter()
            .map(|s| Statement {
                lhs: s.lhs,
                rhs: fold_expr(s.rhs),
            })
            .collect(),
    }
}

fn fold_expr(expr: Expr) -> Expr {
    match expr {
        Expr::Unary(op, inner) => {
            let inner = fold_expr(*inner);
            if let Expr::Number(n) = inner {
                let v = match op {
                    UnOp::Neg => -n,
                    UnOp::Not => {
                        if n == 0.0 {
                            1.0
                        } else {
                            0.0
                        }
                    }
                };
                return Expr::Number(v);
            }
            Expr::Unary(op, Box::new(inner))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = fold_expr(*lhs);
            let rhs = fold_expr(*rhs);
            if let (Expr::Number(a), Expr::Number(b)) = (&lhs, &rhs) {
                if let Some(v) = fold_const_binop(op, *a, *b) {
                    return Expr::Number(v);
                }
            }
            match (op, &lhs, &rhs) {
                (BinOp::Mul, Expr::Number(n), _) if *n == 0.0 => Expr::Number(0.0),
                (BinOp::Mul, _, Expr::Number(n)) if *n == 0.0 => Expr::Number(0.0),
                (BinOp::Mul, Expr::Number(n), other) if *n == 1.0 => other.clone(),
                (BinOp::Mul, other, Expr::Number(n)) if *n == 1.0 => other.clone(),
                (BinOp::Add, Expr::Number(n), other) if *n == 0.0 => other.clone(),
                (BinOp::Add, other, Expr::Number(n)) if *n == 0.0 => other.clone(),
                (BinOp::Sub, other, Expr::Number(n)) if *n == 0.0 => other.clone(),
                _ => Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
            }
        }
        Expr::Call(name, args) => Expr::Call(name, args.into_iter().map(fold_expr).collect()),
        Expr::Vector(elems) => Expr::Vector(elems.into_iter().map(fold_expr).collect()),
        Expr::Ternary(c, a, b) => Expr::Ternary(
            Box::new(fold_expr(*c)),
            Box::new(fold_expr(*a)),
            Box::new(fold_expr(*b)),
        ),
        Expr::ShortTernary(c, b) => {
            Expr::ShortTernary(Box::new(fold_expr(*c)), Box::new(fold_expr(*b)))
        }
        other => other,
    }
}

fn fold_const_binop(op: BinOp, a: f64, b: f64) -> Option<f64> {
    Some(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return None;
            }
            a / b
        }
        BinOp::Mod => {
            if b == 0.0 {
                return None;
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
    })
}

fn bool_f(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_schema() -> InputSchema {
        InputSchema {
            sources: vec![SourceSchema {
                value_type: ValueType::Float32,
                length: 1,
            }],
            output: SourceSchema {
                value_type: ValueType::Float32,
                length: 1,
            },
        }
    }

    #[test]
    fn constant_folding_collapses_to_literal() {
        // spec §8 law: eval("y=0*sin(x)*200+1.1", x) = 1.1, token count <= 2
        let schema = scalar_schema();
        let program = compile("y=0*sin(x)*200+1.1", DslDialect::Extended, &schema).unwrap();
        assert_eq!(program.statements.len(), 1);
        assert!(program.token_count() <= 2, "tokens: {:?}", program.statements[0]);
        assert!(matches!(program.statements[0][0], BTok::Literal(v) if (v - 1.1).abs() < 1e-9));
    }

    #[test]
    fn broadcast_length_resolves_to_vector_len() {
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
        assert_eq!(program.output_length, 3);
    }

    #[test]
    fn history_reference_sizes_input_ring() {
        let schema = scalar_schema();
        let program = compile("y=x+y{-1}; y{-1}=100", DslDialect::Extended, &schema).unwrap();
        assert_eq!(program.output_history, 1);
    }

    #[test]
    fn legacy_dialect_rejects_deep_history() {
        let schema = scalar_schema();
        let source = "y=x{-6}";
        let err = compile(source, DslDialect::Legacy, &schema).unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    #[test]
    fn mismatched_vector_lengths_fail() {
        let schema = InputSchema {
            sources: vec![
                SourceSchema {
                    value_type: ValueType::Float32,
                    length: 2,
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
        let err = compile("y=x0+x1", DslDialect::Extended, &schema).unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }
}
