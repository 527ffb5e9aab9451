// clinqc-core/src/domain/codegen/batch.rs
//
// Lowers the same AST the real-time backend consumes into a declarative
// query plan: a description of one pass over the whole dataset that selects
// every violating record. The plan is storage-agnostic; adapters either
// interpret it directly (in-memory tables) or render it to SQL.

use crate::domain::dsl::ast::{BinaryOp, Expr, ToleranceKind, UnaryOp};
use crate::domain::error::DomainError;
use crate::domain::schema::DatasetSchema;
use crate::domain::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Mean,
    StdDev,
}

/// A scalar term inside a plan predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// Column of the current row.
    Column(String),
    /// Column of the joined baseline-visit row (self-join plans only).
    JoinColumn(String),
    Const(Value),
    Arith {
        op: ArithOp,
        lhs: Box<Operand>,
        rhs: Box<Operand>,
    },
    Neg(Box<Operand>),
    Length(Box<Operand>),
    Abs(Box<Operand>),
    Today,
    /// Dataset-wide aggregate, computed by the first pass of outlier plans.
    Agg { func: AggFunc, column: String },
}

/// The rule's truth condition over one (possibly joined) row. Violating rows
/// are those where the predicate is definitively false; rows the predicate
/// cannot decide (missing inputs, zero baseline) are never flagged, mirroring
/// the real-time `Indeterminate` outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Cmp {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Between {
        operand: Operand,
        low: Operand,
        high: Operand,
    },
    InList {
        operand: Operand,
        list: Vec<Value>,
    },
    IsNotNull(Operand),
    Matches {
        operand: Operand,
        pattern: String,
    },
    /// abs(current - baseline) / baseline <= tolerance/100,
    /// vacuously true (never a violation) when baseline is zero.
    PercentWithin {
        current: Operand,
        baseline: Operand,
        tolerance: f64,
    },
    /// abs(days between current and baseline) <= tolerance.
    DaysWithin {
        current: Operand,
        baseline: Operand,
        tolerance: f64,
    },
    True,
}

/// How the dataset is traversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanShape {
    /// One filtering pass over the table.
    Filter { predicate: Predicate },

    /// Self-join on the subject key against the named baseline visit.
    /// Chosen over a correlated subquery for predictable cost scaling.
    SelfJoin {
        baseline_visit: String,
        predicate: Predicate,
    },

    /// Two passes: aggregate (mean/stddev) first, then filter with the
    /// aggregates bound. Correctness does not depend on pass-1 results
    /// being indexed or cached.
    Outlier { predicate: Predicate },

    /// Missing-data rule: population rows with no row carrying the required
    /// field (an anti-join; on a wide table the probe side is the non-null
    /// subset of the same table).
    AntiJoin { population: Option<Predicate> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHint {
    pub table: String,
    pub columns: Vec<String>,
    pub reason: String,
}

/// A compiled batch query plan. Persisted next to the rule it was derived
/// from and recompiled whenever the rule changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub table: String,
    pub subject_column: String,
    pub visit_column: String,
    pub target_field: String,
    /// Columns that must be non-null for the rule to be decidable;
    /// rows failing a guard are skipped, not flagged.
    pub null_guards: Vec<String>,
    pub shape: PlanShape,
    /// Advisory only: which columns an index would help. The plan is
    /// correct with or without them.
    pub index_hints: Vec<IndexHint>,
}

/// Compile an AST into a batch query plan against the declared dataset.
pub fn compile_batch(
    expr: &Expr,
    target_field: &str,
    schema: &DatasetSchema,
) -> Result<QueryPlan, DomainError> {
    let baseline_visit = single_cross_visit(expr)?;

    // Shape selection: aggregates force the two-pass outlier plan,
    // cross-visit refs force the self-join, a required-shaped rule becomes
    // an anti-join, anything else is a plain filter.
    let (shape, null_guards) = if expr.contains_aggregate() {
        if baseline_visit.is_some() {
            return Err(DomainError::Compilation(
                "aggregates and cross-visit references cannot be combined".into(),
            ));
        }
        let predicate = lower_predicate(expr, target_field)?;
        (PlanShape::Outlier { predicate }, guards_of(expr))
    } else if let Some(visit) = baseline_visit {
        let predicate = lower_predicate(expr, target_field)?;
        (
            PlanShape::SelfJoin {
                baseline_visit: visit,
                predicate,
            },
            guards_of(expr),
        )
    } else if let Some(population) = as_required_rule(expr, target_field)? {
        (PlanShape::AntiJoin { population }, Vec::new())
    } else {
        let predicate = lower_predicate(expr, target_field)?;
        (PlanShape::Filter { predicate }, guards_of(expr))
    };

    let index_hints = recommend_indexes(&shape, schema, &null_guards);

    Ok(QueryPlan {
        table: schema.table.clone(),
        subject_column: schema.subject_column.clone(),
        visit_column: schema.visit_column.clone(),
        target_field: target_field.to_string(),
        null_guards,
        shape,
        index_hints,
    })
}

/// `required`, alone or as `if <population> then required endif`,
/// compiles to the anti-join shape.
fn as_required_rule(
    expr: &Expr,
    target: &str,
) -> Result<Option<Option<Predicate>>, DomainError> {
    match expr {
        Expr::Required => Ok(Some(None)),
        Expr::Conditional {
            condition,
            then_branch,
            else_branch: None,
        } if matches!(**then_branch, Expr::Required) => {
            let population = lower_predicate(condition, target)?;
            Ok(Some(Some(population)))
        }
        _ => Ok(None),
    }
}

/// At most one distinct baseline visit per rule.
fn single_cross_visit(expr: &Expr) -> Result<Option<String>, DomainError> {
    let mut visits = BTreeSet::new();
    collect_visits(expr, &mut visits);
    match visits.len() {
        0 => Ok(None),
        1 => Ok(visits.into_iter().next()),
        _ => Err(DomainError::Compilation(
            "a rule may reference at most one baseline visit".into(),
        )),
    }
}

fn collect_visits(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::CrossVisitRef { visit, .. } => {
            out.insert(visit.clone());
        }
        Expr::UnaryOp { expr, .. } => collect_visits(expr, out),
        Expr::BinaryOp { lhs, rhs, .. } => {
            collect_visits(lhs, out);
            collect_visits(rhs, out);
        }
        Expr::FunctionCall { args, .. } => {
            for a in args {
                collect_visits(a, out);
            }
        }
        Expr::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_visits(condition, out);
            collect_visits(then_branch, out);
            if let Some(e) = else_branch {
                collect_visits(e, out);
            }
        }
        Expr::ListMembership { expr, .. } => collect_visits(expr, out),
        Expr::Range { expr, low, high } => {
            collect_visits(expr, out);
            collect_visits(low, out);
            collect_visits(high, out);
        }
        Expr::Tolerance {
            current, baseline, ..
        } => {
            collect_visits(current, out);
            collect_visits(baseline, out);
        }
        _ => {}
    }
}

/// Columns whose NULL-ness makes the rule undecidable (everything read by
/// the expression except fields only touched through `required`).
fn guards_of(expr: &Expr) -> Vec<String> {
    expr.referenced_fields().into_iter().collect()
}

// --- PREDICATE LOWERING (same structural recursion as the realtime path) ---

fn lower_predicate(expr: &Expr, target: &str) -> Result<Predicate, DomainError> {
    match expr {
        Expr::UnaryOp {
            op: UnaryOp::Not,
            expr,
        } => Ok(Predicate::Not(Box::new(lower_predicate(expr, target)?))),

        Expr::BinaryOp {
            op: BinaryOp::And,
            lhs,
            rhs,
        } => Ok(Predicate::And(
            Box::new(lower_predicate(lhs, target)?),
            Box::new(lower_predicate(rhs, target)?),
        )),

        Expr::BinaryOp {
            op: BinaryOp::Or,
            lhs,
            rhs,
        } => Ok(Predicate::Or(
            Box::new(lower_predicate(lhs, target)?),
            Box::new(lower_predicate(rhs, target)?),
        )),

        Expr::BinaryOp { op, lhs, rhs } if op.is_comparison() => Ok(Predicate::Cmp {
            lhs: lower_operand(lhs, target)?,
            op: cmp_of(*op)?,
            rhs: lower_operand(rhs, target)?,
        }),

        // if C then T else E  ==  (C and T) or (not C and E);  absent else
        // branch means the rule does not apply outside the population.
        Expr::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            let c = lower_predicate(condition, target)?;
            let t = lower_predicate(then_branch, target)?;
            let e = match else_branch {
                Some(e) => lower_predicate(e, target)?,
                None => Predicate::True,
            };
            Ok(Predicate::Or(
                Box::new(Predicate::And(Box::new(c.clone()), Box::new(t))),
                Box::new(Predicate::And(
                    Box::new(Predicate::Not(Box::new(c))),
                    Box::new(e),
                )),
            ))
        }

        Expr::ListMembership { expr, list } => Ok(Predicate::InList {
            operand: lower_operand(expr, target)?,
            list: list.clone(),
        }),

        Expr::Range { expr, low, high } => Ok(Predicate::Between {
            operand: lower_operand(expr, target)?,
            low: lower_operand(low, target)?,
            high: lower_operand(high, target)?,
        }),

        // Inside a larger expression, `required` is simply "target is
        // entered" (top-level required rules take the anti-join shape).
        Expr::Required => Ok(Predicate::IsNotNull(Operand::Column(target.to_string()))),

        Expr::Tolerance {
            kind,
            current,
            amount,
            baseline,
        } => {
            let current = lower_operand(current, target)?;
            let baseline = lower_operand(baseline, target)?;
            Ok(match kind {
                ToleranceKind::Percent => Predicate::PercentWithin {
                    current,
                    baseline,
                    tolerance: *amount,
                },
                ToleranceKind::Days => Predicate::DaysWithin {
                    current,
                    baseline,
                    tolerance: *amount,
                },
            })
        }

        Expr::FunctionCall { name, args } if name == "matches" => {
            let operand = match args.first() {
                Some(a) => lower_operand(a, target)?,
                None => {
                    return Err(DomainError::Compilation(
                        "matches() without operand".into(),
                    ));
                }
            };
            let pattern = match args.get(1) {
                Some(Expr::Literal(Value::Text(p))) => p.clone(),
                _ => {
                    return Err(DomainError::Compilation(
                        "matches() requires a literal pattern".into(),
                    ));
                }
            };
            Ok(Predicate::Matches { operand, pattern })
        }

        Expr::Literal(Value::Bool(true)) => Ok(Predicate::True),
        Expr::Literal(Value::Bool(false)) => {
            Ok(Predicate::Not(Box::new(Predicate::True)))
        }

        other => Err(DomainError::Compilation(format!(
            "expression cannot be lowered as a predicate: {:?}",
            other
        ))),
    }
}

fn lower_operand(expr: &Expr, target: &str) -> Result<Operand, DomainError> {
    match expr {
        Expr::Literal(v) => Ok(Operand::Const(v.clone())),
        Expr::FieldRef(name) | Expr::CrossFieldRef(name) => Ok(Operand::Column(name.clone())),
        Expr::CrossVisitRef { field, .. } => Ok(Operand::JoinColumn(field.clone())),
        Expr::UnaryOp {
            op: UnaryOp::Neg,
            expr,
        } => Ok(Operand::Neg(Box::new(lower_operand(expr, target)?))),
        Expr::BinaryOp { op, lhs, rhs } if op.is_arithmetic() => Ok(Operand::Arith {
            op: arith_of(*op)?,
            lhs: Box::new(lower_operand(lhs, target)?),
            rhs: Box::new(lower_operand(rhs, target)?),
        }),
        Expr::FunctionCall { name, args } => match name.as_str() {
            "today" => Ok(Operand::Today),
            "length" => Ok(Operand::Length(Box::new(first_operand(name, args, target)?))),
            "abs" => Ok(Operand::Abs(Box::new(first_operand(name, args, target)?))),
            "mean" | "stddev" => {
                let column = match args.first() {
                    Some(Expr::FieldRef(f)) | Some(Expr::CrossFieldRef(f)) => f.clone(),
                    _ => {
                        return Err(DomainError::Compilation(format!(
                            "{}() requires a field argument",
                            name
                        )));
                    }
                };
                let func = if name == "mean" {
                    AggFunc::Mean
                } else {
                    AggFunc::StdDev
                };
                Ok(Operand::Agg { func, column })
            }
            other => Err(DomainError::Compilation(format!(
                "unknown function '{}' reached codegen",
                other
            ))),
        },
        other => Err(DomainError::Compilation(format!(
            "expression cannot be lowered as an operand: {:?}",
            other
        ))),
    }
}

fn first_operand(name: &str, args: &[Expr], target: &str) -> Result<Operand, DomainError> {
    match args.first() {
        Some(a) => lower_operand(a, target),
        None => Err(DomainError::Compilation(format!(
            "{}() missing argument",
            name
        ))),
    }
}

fn cmp_of(op: BinaryOp) -> Result<CmpOp, DomainError> {
    Ok(match op {
        BinaryOp::Eq => CmpOp::Eq,
        BinaryOp::Ne => CmpOp::Ne,
        BinaryOp::Lt => CmpOp::Lt,
        BinaryOp::Le => CmpOp::Le,
        BinaryOp::Gt => CmpOp::Gt,
        BinaryOp::Ge => CmpOp::Ge,
        other => {
            return Err(DomainError::Compilation(format!(
                "'{}' is not a comparison",
                other
            )));
        }
    })
}

fn arith_of(op: BinaryOp) -> Result<ArithOp, DomainError> {
    Ok(match op {
        BinaryOp::Add => ArithOp::Add,
        BinaryOp::Sub => ArithOp::Sub,
        BinaryOp::Mul => ArithOp::Mul,
        BinaryOp::Div => ArithOp::Div,
        other => {
            return Err(DomainError::Compilation(format!(
                "'{}' is not arithmetic",
                other
            )));
        }
    })
}

// --- INDEX RECOMMENDATIONS (advisory metadata only) ---

fn recommend_indexes(
    shape: &PlanShape,
    schema: &DatasetSchema,
    guards: &[String],
) -> Vec<IndexHint> {
    let mut hints = Vec::new();
    match shape {
        PlanShape::Filter { .. } | PlanShape::Outlier { .. } => {
            if !guards.is_empty() {
                hints.push(IndexHint {
                    table: schema.table.clone(),
                    columns: guards.to_vec(),
                    reason: "filtered columns".into(),
                });
            }
        }
        PlanShape::SelfJoin { .. } => {
            hints.push(IndexHint {
                table: schema.table.clone(),
                columns: vec![schema.subject_column.clone(), schema.visit_column.clone()],
                reason: "self-join keys".into(),
            });
        }
        PlanShape::AntiJoin { .. } => {
            hints.push(IndexHint {
                table: schema.table.clone(),
                columns: vec![schema.subject_column.clone(), schema.visit_column.clone()],
                reason: "anti-join keys".into(),
            });
        }
    }
    hints
}
