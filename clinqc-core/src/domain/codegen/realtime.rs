// clinqc-core/src/domain/codegen/realtime.rs
//
// Lowers an AST into a composed closure tree, once, at rule-load time.
// Every later invocation only walks the pre-built closures: no parsing, no
// string processing, no I/O. That is what keeps interactive validation well
// under the latency budget.

use crate::domain::dsl::ast::{BinaryOp, Expr, ToleranceKind, UnaryOp};
use crate::domain::error::DomainError;
use crate::domain::value::Value;
use chrono::Local;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Record values as submitted by the data-entry layer.
/// Cross-visit baselines, when the caller has them, use the `field@VISIT`
/// composite key.
pub type FieldValues = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "message")]
pub enum ValidationResult {
    Pass,
    Fail(String),
    /// A referenced field has not been entered yet: the rule cannot be
    /// evaluated. An untouched field is not a violation.
    Indeterminate,
}

impl ValidationResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, ValidationResult::Pass)
    }
}

/// A compiled real-time validator: pure, shareable, never panics, never
/// touches the network or the database.
pub type Validator = Arc<dyn Fn(&FieldValues) -> ValidationResult + Send + Sync>;

/// Three-valued logic result of a boolean sub-closure (Kleene).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Truth {
    True,
    False,
    Unknown,
}

/// Result of a value sub-closure. `Missing` propagates upward and surfaces
/// as `Indeterminate` at the root.
enum Evaluated {
    Value(Value),
    Missing,
}

type BoolFn = Arc<dyn Fn(&FieldValues) -> Truth + Send + Sync>;
type ValueFn = Arc<dyn Fn(&FieldValues) -> Evaluated + Send + Sync>;

/// Compile an AST into a real-time validator.
///
/// `target_field` resolves the bare `required` keyword; `fail_message` is
/// attached to every Fail outcome (typically the rule id + raw text).
pub fn compile_realtime(
    expr: &Expr,
    target_field: &str,
    fail_message: &str,
) -> Result<Validator, DomainError> {
    let root = lower_bool(expr, target_field)?;
    let message = fail_message.to_string();
    Ok(Arc::new(move |values: &FieldValues| match root(values) {
        Truth::True => ValidationResult::Pass,
        Truth::False => ValidationResult::Fail(message.clone()),
        Truth::Unknown => ValidationResult::Indeterminate,
    }))
}

// --- BOOLEAN LOWERING ---

fn lower_bool(expr: &Expr, target: &str) -> Result<BoolFn, DomainError> {
    match expr {
        Expr::UnaryOp {
            op: UnaryOp::Not,
            expr,
        } => {
            let inner = lower_bool(expr, target)?;
            Ok(Arc::new(move |v| match inner(v) {
                Truth::True => Truth::False,
                Truth::False => Truth::True,
                Truth::Unknown => Truth::Unknown,
            }))
        }

        Expr::BinaryOp {
            op: BinaryOp::And,
            lhs,
            rhs,
        } => {
            let l = lower_bool(lhs, target)?;
            let r = lower_bool(rhs, target)?;
            Ok(Arc::new(move |v| match (l(v), r(v)) {
                (Truth::False, _) | (_, Truth::False) => Truth::False,
                (Truth::True, Truth::True) => Truth::True,
                _ => Truth::Unknown,
            }))
        }

        Expr::BinaryOp {
            op: BinaryOp::Or,
            lhs,
            rhs,
        } => {
            let l = lower_bool(lhs, target)?;
            let r = lower_bool(rhs, target)?;
            Ok(Arc::new(move |v| match (l(v), r(v)) {
                (Truth::True, _) | (_, Truth::True) => Truth::True,
                (Truth::False, Truth::False) => Truth::False,
                _ => Truth::Unknown,
            }))
        }

        Expr::BinaryOp { op, lhs, rhs } if op.is_comparison() => {
            let op = *op;
            let l = lower_value(lhs, target)?;
            let r = lower_value(rhs, target)?;
            Ok(Arc::new(move |v| {
                let (a, b) = match (l(v), r(v)) {
                    (Evaluated::Value(a), Evaluated::Value(b)) => (a, b),
                    _ => return Truth::Unknown,
                };
                compare(&a, op, &b)
            }))
        }

        Expr::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            let cond = lower_bool(condition, target)?;
            let then_fn = lower_bool(then_branch, target)?;
            let else_fn = match else_branch {
                Some(e) => Some(lower_bool(e, target)?),
                None => None,
            };
            Ok(Arc::new(move |v| match cond(v) {
                Truth::True => then_fn(v),
                // Condition not triggered: the rule does not apply -> Pass
                Truth::False => else_fn.as_ref().map_or(Truth::True, |f| f(v)),
                Truth::Unknown => Truth::Unknown,
            }))
        }

        Expr::ListMembership { expr, list } => {
            let inner = lower_value(expr, target)?;
            let list = list.clone();
            Ok(Arc::new(move |v| match inner(v) {
                Evaluated::Value(val) => {
                    if list.iter().any(|item| val.loose_eq(item)) {
                        Truth::True
                    } else {
                        Truth::False
                    }
                }
                Evaluated::Missing => Truth::Unknown,
            }))
        }

        Expr::Range { expr, low, high } => {
            let inner = lower_value(expr, target)?;
            let low_fn = lower_value(low, target)?;
            let high_fn = lower_value(high, target)?;
            Ok(Arc::new(move |v| {
                let (val, lo, hi) = match (inner(v), low_fn(v), high_fn(v)) {
                    (Evaluated::Value(a), Evaluated::Value(b), Evaluated::Value(c)) => (a, b, c),
                    _ => return Truth::Unknown,
                };
                // Inclusive on both bounds
                match (val.partial_cmp_ordered(&lo), val.partial_cmp_ordered(&hi)) {
                    (Some(a), Some(b)) => {
                        if a != Ordering::Less && b != Ordering::Greater {
                            Truth::True
                        } else {
                            Truth::False
                        }
                    }
                    _ => Truth::Unknown,
                }
            }))
        }

        Expr::Required => {
            let field = target.to_string();
            Ok(Arc::new(move |v| {
                match v.get(&field) {
                    // Absent or explicitly blank: that IS the failure this
                    // rule checks for, so Fail rather than Indeterminate.
                    None | Some(Value::Null) => Truth::False,
                    Some(_) => Truth::True,
                }
            }))
        }

        Expr::Tolerance {
            kind,
            current,
            amount,
            baseline,
        } => {
            let kind = *kind;
            let amount = *amount;
            let cur = lower_value(current, target)?;
            let base = lower_value(baseline, target)?;
            Ok(Arc::new(move |v| {
                let (c, b) = match (cur(v), base(v)) {
                    (Evaluated::Value(c), Evaluated::Value(b)) => (c, b),
                    _ => return Truth::Unknown,
                };
                match kind {
                    ToleranceKind::Percent => {
                        let (c, b) = match (c.as_number(), b.as_number()) {
                            (Some(c), Some(b)) => (c, b),
                            _ => return Truth::Unknown,
                        };
                        // Undefined when the baseline is zero: Indeterminate
                        if b == 0.0 {
                            return Truth::Unknown;
                        }
                        if ((c - b) / b).abs() <= amount / 100.0 {
                            Truth::True
                        } else {
                            Truth::False
                        }
                    }
                    ToleranceKind::Days => {
                        let (c, b) = match (c.as_date(), b.as_date()) {
                            (Some(c), Some(b)) => (c, b),
                            _ => return Truth::Unknown,
                        };
                        let delta = (c - b).num_days().abs();
                        if delta as f64 <= amount {
                            Truth::True
                        } else {
                            Truth::False
                        }
                    }
                }
            }))
        }

        // matches() is boolean; the pattern is compiled once, here.
        Expr::FunctionCall { name, args } if name == "matches" => {
            let value_fn = match args.first() {
                Some(a) => lower_value(a, target)?,
                None => return Err(DomainError::Compilation("matches() without operand".into())),
            };
            let pattern = match args.get(1) {
                Some(Expr::Literal(Value::Text(p))) => p.clone(),
                _ => {
                    return Err(DomainError::Compilation(
                        "matches() requires a literal pattern".into(),
                    ));
                }
            };
            let re = regex::Regex::new(&pattern)
                .map_err(|e| DomainError::Compilation(format!("invalid pattern: {}", e)))?;
            Ok(Arc::new(move |v| match value_fn(v) {
                Evaluated::Value(Value::Text(s)) => {
                    if re.is_match(&s) {
                        Truth::True
                    } else {
                        Truth::False
                    }
                }
                Evaluated::Value(_) => Truth::Unknown,
                Evaluated::Missing => Truth::Unknown,
            }))
        }

        // A bare value in boolean position: only booleans are truthy.
        Expr::Literal(Value::Bool(b)) => {
            let truth = if *b { Truth::True } else { Truth::False };
            Ok(Arc::new(move |_| truth))
        }

        other => {
            let value_fn = lower_value(other, target)?;
            Ok(Arc::new(move |v| match value_fn(v) {
                Evaluated::Value(Value::Bool(true)) => Truth::True,
                Evaluated::Value(Value::Bool(false)) => Truth::False,
                _ => Truth::Unknown,
            }))
        }
    }
}

// --- VALUE LOWERING ---

fn lower_value(expr: &Expr, target: &str) -> Result<ValueFn, DomainError> {
    match expr {
        Expr::Literal(v) => {
            let v = v.clone();
            Ok(Arc::new(move |_| Evaluated::Value(v.clone())))
        }

        Expr::FieldRef(name) | Expr::CrossFieldRef(name) => {
            let key = name.clone();
            Ok(Arc::new(move |values| lookup(values, &key)))
        }

        Expr::CrossVisitRef { field, visit } => {
            // Real-time callers that have the other visit's value pass it
            // under the composite key; otherwise the rule stays Indeterminate
            // interactively and the batch path owns the check.
            let key = format!("{}@{}", field, visit);
            Ok(Arc::new(move |values| lookup(values, &key)))
        }

        Expr::UnaryOp {
            op: UnaryOp::Neg,
            expr,
        } => {
            let inner = lower_value(expr, target)?;
            Ok(Arc::new(move |v| match inner(v) {
                Evaluated::Value(val) => match val.as_number() {
                    Some(n) => Evaluated::Value(Value::Number(-n)),
                    None => Evaluated::Missing,
                },
                Evaluated::Missing => Evaluated::Missing,
            }))
        }

        Expr::BinaryOp { op, lhs, rhs } if op.is_arithmetic() => {
            let op = *op;
            let l = lower_value(lhs, target)?;
            let r = lower_value(rhs, target)?;
            Ok(Arc::new(move |v| {
                let (a, b) = match (l(v), r(v)) {
                    (Evaluated::Value(a), Evaluated::Value(b)) => (a, b),
                    _ => return Evaluated::Missing,
                };
                let (a, b) = match (a.as_number(), b.as_number()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return Evaluated::Missing,
                };
                let out = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => {
                        if b == 0.0 {
                            return Evaluated::Missing;
                        }
                        a / b
                    }
                    _ => return Evaluated::Missing,
                };
                Evaluated::Value(Value::Number(out))
            }))
        }

        Expr::FunctionCall { name, args } => lower_function(name, args, target),

        other => Err(DomainError::Compilation(format!(
            "expression cannot be lowered as a value: {:?}",
            other
        ))),
    }
}

fn lower_function(name: &str, args: &[Expr], target: &str) -> Result<ValueFn, DomainError> {
    match name {
        "today" => Ok(Arc::new(|_| {
            Evaluated::Value(Value::Date(Local::now().date_naive()))
        })),
        "length" => {
            let inner = arg_fn(name, args, 0, target)?;
            Ok(Arc::new(move |v| match inner(v) {
                Evaluated::Value(Value::Text(s)) => {
                    Evaluated::Value(Value::Number(s.chars().count() as f64))
                }
                _ => Evaluated::Missing,
            }))
        }
        "abs" => {
            let inner = arg_fn(name, args, 0, target)?;
            Ok(Arc::new(move |v| match inner(v) {
                Evaluated::Value(val) => match val.as_number() {
                    Some(n) => Evaluated::Value(Value::Number(n.abs())),
                    None => Evaluated::Missing,
                },
                Evaluated::Missing => Evaluated::Missing,
            }))
        }
        // Aggregates scan the whole dataset: they have no real-time lowering.
        // The semantic validator rejects them for real-time rules, so hitting
        // this arm means a grammar/codegen mismatch.
        "mean" | "stddev" => Err(DomainError::Compilation(format!(
            "aggregate '{}' reached the real-time backend",
            name
        ))),
        other => Err(DomainError::Compilation(format!(
            "unknown function '{}' reached codegen",
            other
        ))),
    }
}

fn arg_fn(name: &str, args: &[Expr], idx: usize, target: &str) -> Result<ValueFn, DomainError> {
    match args.get(idx) {
        Some(a) => lower_value(a, target),
        None => Err(DomainError::Compilation(format!(
            "{}() missing argument {}",
            name,
            idx + 1
        ))),
    }
}

fn lookup(values: &FieldValues, key: &str) -> Evaluated {
    match values.get(key) {
        None | Some(Value::Null) => Evaluated::Missing,
        Some(v) => Evaluated::Value(v.clone()),
    }
}

fn compare(a: &Value, op: BinaryOp, b: &Value) -> Truth {
    match op {
        BinaryOp::Eq => bool_truth(a.loose_eq(b)),
        BinaryOp::Ne => bool_truth(!a.loose_eq(b)),
        _ => match a.partial_cmp_ordered(b) {
            None => Truth::Unknown,
            Some(ord) => {
                let pass = match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    BinaryOp::Ge => ord != Ordering::Less,
                    _ => return Truth::Unknown,
                };
                bool_truth(pass)
            }
        },
    }
}

fn bool_truth(b: bool) -> Truth {
    if b { Truth::True } else { Truth::False }
}
