//! Property filters over graph entries (spec §4.D "Queries"), modeled on
//! libmapper's `mpr_list` filter predicates.

use std::cmp::Ordering;

/// A typed property value, for comparing against an entry's field.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl PropertyValue {
    fn partial_cmp(&self, other: &PropertyValue) -> Option<Ordering> {
        match (self, other) {
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a.partial_cmp(b),
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.partial_cmp(b),
            (PropertyValue::Int(a), PropertyValue::Float(b)) => (*a as f64).partial_cmp(b),
            (PropertyValue::Float(a), PropertyValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (PropertyValue::Str(a), PropertyValue::Str(b)) => a.partial_cmp(b),
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Comparison operators a query predicate can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// True if the named property is present at all.
    Exists,
    NotExists,
}

impl CompareOp {
    /// Evaluate `lhs OP rhs`. `lhs` is `None` when the property is absent;
    /// only `Exists`/`NotExists` are meaningful in that case.
    pub fn eval(self, lhs: Option<&PropertyValue>, rhs: &PropertyValue) -> bool {
        match self {
            CompareOp::Exists => lhs.is_some(),
            CompareOp::NotExists => lhs.is_none(),
            _ => {
                let Some(lhs) = lhs else { return false };
                match lhs.partial_cmp(rhs) {
                    Some(ord) => match self {
                        CompareOp::Eq => ord == Ordering::Equal,
                        CompareOp::Ne => ord != Ordering::Equal,
                        CompareOp::Lt => ord == Ordering::Less,
                        CompareOp::Le => ord != Ordering::Greater,
                        CompareOp::Gt => ord == Ordering::Greater,
                        CompareOp::Ge => ord != Ordering::Less,
                        CompareOp::Exists | CompareOp::NotExists => unreachable!(),
                    },
                    None => false,
                }
            }
        }
    }
}

/// How a multi-valued property (e.g. a vector-valued signal range) is
/// reduced to a single boolean for a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    All,
    Any,
}

/// Apply `op`/`rhs` to every element of a multi-valued property under
/// `quantifier`. An empty slice is vacuously true for `All`, false for `Any`.
pub fn eval_quantified(quantifier: Quantifier, values: &[PropertyValue], op: CompareOp, rhs: &PropertyValue) -> bool {
    match quantifier {
        Quantifier::All => values.iter().all(|v| op.eval(Some(v), rhs)),
        Quantifier::Any => values.iter().any(|v| op.eval(Some(v), rhs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_compare_crosses_int_and_float() {
        assert!(CompareOp::Lt.eval(Some(&PropertyValue::Int(2)), &PropertyValue::Float(2.5)));
        assert!(!CompareOp::Gt.eval(Some(&PropertyValue::Int(2)), &PropertyValue::Float(2.5)));
    }

    #[test]
    fn exists_ignores_rhs() {
        assert!(CompareOp::Exists.eval(Some(&PropertyValue::Bool(false)), &PropertyValue::Bool(true)));
        assert!(CompareOp::NotExists.eval(None, &PropertyValue::Bool(true)));
    }

    #[test]
    fn quantifiers_reduce_as_expected() {
        let values = vec![PropertyValue::Int(1), PropertyValue::Int(2), PropertyValue::Int(3)];
        assert!(eval_quantified(Quantifier::Any, &values, CompareOp::Eq, &PropertyValue::Int(2)));
        assert!(!eval_quantified(Quantifier::All, &values, CompareOp::Eq, &PropertyValue::Int(2)));
        assert!(eval_quantified(Quantifier::All, &values, CompareOp::Gt, &PropertyValue::Int(0)));
    }
}
