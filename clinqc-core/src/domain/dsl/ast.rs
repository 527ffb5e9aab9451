// clinqc-core/src/domain/dsl/ast.rs

use crate::domain::value::Value;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToleranceKind {
    /// `X within N% of Y` : abs(X - Y) / Y <= N/100
    Percent,
    /// `X within N days of Y` : abs(date(X) - date(Y)) <= N days
    Days,
}

/// The abstract syntax tree of one rule. Immutable once parsed; both codegen
/// backends consume the same tree so the two execution paths cannot drift.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),

    /// The rule's own target field.
    FieldRef(String),

    /// Another field of the same record (bare identifier in the rule text).
    CrossFieldRef(String),

    /// A field taken at another visit of the same subject: `field@VISIT`.
    CrossVisitRef { field: String, visit: String },

    UnaryOp {
        op: UnaryOp,
        expr: Box<Expr>,
    },

    BinaryOp {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// Name resolution happens in the semantic pass, not here.
    FunctionCall { name: String, args: Vec<Expr> },

    /// `if <cond> then <rule> [else <rule>] endif`
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },

    /// `expr in ('A', 'B', ...)`
    ListMembership { expr: Box<Expr>, list: Vec<Value> },

    /// `expr between low and high` — inclusive on both bounds.
    Range {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },

    /// `required` — the target field must be present and non-null.
    Required,

    /// Tolerance comparison against a baseline expression.
    Tolerance {
        kind: ToleranceKind,
        current: Box<Expr>,
        amount: f64,
        baseline: Box<Expr>,
    },
}

impl Expr {
    /// Every record field this expression reads (target + cross-field refs,
    /// plus the field side of cross-visit refs and aggregate arguments).
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.walk(&mut |e| {
            match e {
                Expr::FieldRef(name) | Expr::CrossFieldRef(name) => {
                    out.insert(name.clone());
                }
                Expr::CrossVisitRef { field, .. } => {
                    out.insert(field.clone());
                }
                _ => {}
            }
            true
        });
        out
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if let Expr::FunctionCall { name, .. } = e
                && is_aggregate(name)
            {
                found = true;
                return false;
            }
            true
        });
        found
    }

    pub fn contains_cross_visit(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::CrossVisitRef { .. }) {
                found = true;
                return false;
            }
            true
        });
        found
    }

    pub fn contains_required(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Required) {
                found = true;
                return false;
            }
            true
        });
        found
    }

    /// Depth-first pre-order walk. The visitor returns false to stop early.
    fn walk(&self, visit: &mut impl FnMut(&Expr) -> bool) -> bool {
        if !visit(self) {
            return false;
        }
        match self {
            Expr::UnaryOp { expr, .. } => expr.walk(visit),
            Expr::BinaryOp { lhs, rhs, .. } => lhs.walk(visit) && rhs.walk(visit),
            Expr::FunctionCall { args, .. } => args.iter().all(|a| a.walk(visit)),
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.walk(visit)
                    && then_branch.walk(visit)
                    && else_branch.as_ref().is_none_or(|e| e.walk(visit))
            }
            Expr::ListMembership { expr, .. } => expr.walk(visit),
            Expr::Range { expr, low, high } => {
                expr.walk(visit) && low.walk(visit) && high.walk(visit)
            }
            Expr::Tolerance {
                current, baseline, ..
            } => current.walk(visit) && baseline.walk(visit),
            _ => true,
        }
    }
}

pub fn is_aggregate(name: &str) -> bool {
    matches!(name, "mean" | "stddev")
}
