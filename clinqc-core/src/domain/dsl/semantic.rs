// clinqc-core/src/domain/dsl/semantic.rs

use crate::domain::dsl::ast::{BinaryOp, Expr, ToleranceKind, UnaryOp, is_aggregate};
use crate::domain::error::SemanticError;
use crate::domain::rule::RuleContext;
use crate::domain::schema::FieldType;
use crate::domain::value::Value;
use crate::ports::schema::FieldResolver;

/// Inferred static type of a sub-expression. `Unknown` marks nodes whose
/// inputs were already reported (unknown field, bad call), so one author
/// mistake does not cascade into a wall of follow-up errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprType {
    Number,
    Text,
    Date,
    Bool,
    Unknown,
}

impl From<FieldType> for ExprType {
    fn from(ft: FieldType) -> Self {
        match ft {
            FieldType::Number => ExprType::Number,
            FieldType::Text => ExprType::Text,
            FieldType::Date => ExprType::Date,
            FieldType::Bool => ExprType::Bool,
        }
    }
}

impl ExprType {
    fn is_ordered(self) -> bool {
        matches!(self, ExprType::Number | ExprType::Text | ExprType::Date | ExprType::Unknown)
    }

    fn name(self) -> &'static str {
        match self {
            ExprType::Number => "number",
            ExprType::Text => "text",
            ExprType::Date => "date",
            ExprType::Bool => "bool",
            ExprType::Unknown => "unknown",
        }
    }
}

/// Check an AST for well-formedness against the declared schema.
///
/// Returns *all* detected errors, not just the first, so a rule author can
/// fix everything in one pass. A rule that fails here must never reach
/// either codegen backend.
pub fn check(
    expr: &Expr,
    context: RuleContext,
    resolver: &dyn FieldResolver,
) -> Result<(), Vec<SemanticError>> {
    let mut checker = Checker {
        context,
        resolver,
        errors: Vec::new(),
    };
    checker.infer(expr);
    if checker.errors.is_empty() {
        Ok(())
    } else {
        Err(checker.errors)
    }
}

struct Checker<'a> {
    context: RuleContext,
    resolver: &'a dyn FieldResolver,
    errors: Vec<SemanticError>,
}

impl<'a> Checker<'a> {
    fn push(&mut self, err: SemanticError) {
        if !self.errors.contains(&err) {
            self.errors.push(err);
        }
    }

    fn resolve(&mut self, name: &str) -> ExprType {
        match self.resolver.resolve_field(name) {
            Some(ft) => ft.into(),
            None => {
                self.push(SemanticError::UnknownField(name.to_string()));
                ExprType::Unknown
            }
        }
    }

    fn infer(&mut self, expr: &Expr) -> ExprType {
        match expr {
            Expr::Literal(v) => match v {
                Value::Number(_) => ExprType::Number,
                Value::Text(_) => ExprType::Text,
                Value::Date(_) => ExprType::Date,
                Value::Bool(_) => ExprType::Bool,
                Value::Null => ExprType::Unknown,
            },

            Expr::FieldRef(name) | Expr::CrossFieldRef(name) => self.resolve(name),

            Expr::CrossVisitRef { field, visit } => {
                let ty = self.resolve(field);
                if !self.resolver.knows_visit(visit) {
                    self.push(SemanticError::UnknownVisit {
                        field: field.clone(),
                        visit: visit.clone(),
                    });
                }
                ty
            }

            Expr::UnaryOp { op, expr } => {
                let inner = self.infer(expr);
                match op {
                    UnaryOp::Not => {
                        self.expect_type(inner, ExprType::Bool, "not");
                        ExprType::Bool
                    }
                    UnaryOp::Neg => {
                        self.expect_type(inner, ExprType::Number, "-");
                        ExprType::Number
                    }
                }
            }

            Expr::BinaryOp { op, lhs, rhs } => {
                let lt = self.infer(lhs);
                let rt = self.infer(rhs);
                match op {
                    BinaryOp::And | BinaryOp::Or => {
                        self.expect_type(lt, ExprType::Bool, &op.to_string());
                        self.expect_type(rt, ExprType::Bool, &op.to_string());
                        ExprType::Bool
                    }
                    BinaryOp::Eq | BinaryOp::Ne => {
                        self.expect_compatible(lt, rt, &op.to_string());
                        ExprType::Bool
                    }
                    BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                        if !lt.is_ordered() || !rt.is_ordered() {
                            self.push(SemanticError::TypeMismatch {
                                op: op.to_string(),
                                found: format!("{}/{}", lt.name(), rt.name()),
                            });
                        } else {
                            self.expect_compatible(lt, rt, &op.to_string());
                        }
                        ExprType::Bool
                    }
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                        self.expect_type(lt, ExprType::Number, &op.to_string());
                        self.expect_type(rt, ExprType::Number, &op.to_string());
                        ExprType::Number
                    }
                }
            }

            Expr::FunctionCall { name, args } => self.infer_call(name, args),

            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                let ct = self.infer(condition);
                self.expect_type(ct, ExprType::Bool, "if");
                let tt = self.infer(then_branch);
                self.expect_type(tt, ExprType::Bool, "then");
                if let Some(eb) = else_branch {
                    let et = self.infer(eb);
                    self.expect_type(et, ExprType::Bool, "else");
                }
                ExprType::Bool
            }

            Expr::ListMembership { expr, list } => {
                let et = self.infer(expr);
                for item in list {
                    let it = match item {
                        Value::Number(_) => ExprType::Number,
                        Value::Text(_) => ExprType::Text,
                        Value::Date(_) => ExprType::Date,
                        Value::Bool(_) => ExprType::Bool,
                        Value::Null => ExprType::Unknown,
                    };
                    self.expect_compatible(et, it, "in");
                }
                ExprType::Bool
            }

            Expr::Range { expr, low, high } => {
                let et = self.infer(expr);
                let lt = self.infer(low);
                let ht = self.infer(high);
                if !et.is_ordered() {
                    self.push(SemanticError::TypeMismatch {
                        op: "between".into(),
                        found: et.name().into(),
                    });
                }
                self.expect_compatible(et, lt, "between");
                self.expect_compatible(et, ht, "between");
                ExprType::Bool
            }

            Expr::Required => ExprType::Bool,

            Expr::Tolerance {
                kind,
                current,
                baseline,
                ..
            } => {
                let ct = self.infer(current);
                let bt = self.infer(baseline);
                match kind {
                    ToleranceKind::Percent => {
                        self.expect_type(ct, ExprType::Number, "within %");
                        self.expect_type(bt, ExprType::Number, "within %");
                    }
                    ToleranceKind::Days => {
                        self.expect_type(ct, ExprType::Date, "within days");
                        self.expect_type(bt, ExprType::Date, "within days");
                    }
                }
                ExprType::Bool
            }
        }
    }

    fn infer_call(&mut self, name: &str, args: &[Expr]) -> ExprType {
        if is_aggregate(name) && self.context == RuleContext::RealTime {
            self.push(SemanticError::AggregateInRealtime(name.to_string()));
        }

        match name {
            "today" => {
                self.expect_arity(name, 0, args);
                ExprType::Date
            }
            "length" => {
                self.expect_arity(name, 1, args);
                if let Some(arg) = args.first() {
                    let at = self.infer(arg);
                    self.expect_type(at, ExprType::Text, "length");
                }
                ExprType::Number
            }
            "abs" => {
                self.expect_arity(name, 1, args);
                if let Some(arg) = args.first() {
                    let at = self.infer(arg);
                    self.expect_type(at, ExprType::Number, "abs");
                }
                ExprType::Number
            }
            "matches" => {
                self.expect_arity(name, 2, args);
                if let Some(arg) = args.first() {
                    let at = self.infer(arg);
                    self.expect_type(at, ExprType::Text, "matches");
                }
                match args.get(1) {
                    Some(Expr::Literal(Value::Text(pattern))) => {
                        if regex::Regex::new(pattern).is_err() {
                            self.push(SemanticError::TypeMismatch {
                                op: "matches".into(),
                                found: "invalid regular expression".into(),
                            });
                        }
                    }
                    Some(_) => self.push(SemanticError::TypeMismatch {
                        op: "matches".into(),
                        found: "non-literal pattern".into(),
                    }),
                    None => {}
                }
                ExprType::Bool
            }
            "mean" | "stddev" => {
                self.expect_arity(name, 1, args);
                if let Some(arg) = args.first() {
                    let at = self.infer(arg);
                    self.expect_type(at, ExprType::Number, name);
                }
                ExprType::Number
            }
            _ => {
                self.push(SemanticError::UnknownFunction(name.to_string()));
                // Still type-check the arguments for additional feedback
                for arg in args {
                    self.infer(arg);
                }
                ExprType::Unknown
            }
        }
    }

    fn expect_arity(&mut self, name: &str, expected: usize, args: &[Expr]) {
        if args.len() != expected {
            self.push(SemanticError::WrongArity {
                name: name.to_string(),
                expected,
                found: args.len(),
            });
        }
    }

    fn expect_type(&mut self, found: ExprType, expected: ExprType, op: &str) {
        if found != expected && found != ExprType::Unknown {
            self.push(SemanticError::TypeMismatch {
                op: op.to_string(),
                found: found.name().into(),
            });
        }
    }

    fn expect_compatible(&mut self, a: ExprType, b: ExprType, op: &str) {
        if a == ExprType::Unknown || b == ExprType::Unknown || a == b {
            return;
        }
        self.push(SemanticError::TypeMismatch {
            op: op.to_string(),
            found: format!("{}/{}", a.name(), b.name()),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::dsl::parser::parse;
    use crate::domain::schema::DatasetSchema;
    use std::collections::BTreeMap;

    fn schema() -> DatasetSchema {
        let mut fields = BTreeMap::new();
        fields.insert("age".to_string(), FieldType::Number);
        fields.insert("weight".to_string(), FieldType::Number);
        fields.insert("sex".to_string(), FieldType::Text);
        fields.insert("visit_date".to_string(), FieldType::Date);
        DatasetSchema {
            table: "observations".into(),
            subject_column: "subject_id".into(),
            visit_column: "visit".into(),
            fields,
            visits: vec!["BASELINE".into(), "WEEK4".into()],
        }
    }

    fn check_rule(text: &str, target: &str, ctx: RuleContext) -> Result<(), Vec<SemanticError>> {
        let ast = parse(text, target).unwrap();
        check(&ast, ctx, &schema())
    }

    #[test]
    fn test_valid_rule_passes() {
        assert!(check_rule("age between 18 and 65", "age", RuleContext::RealTime).is_ok());
        assert!(
            check_rule(
                "if sex == 'Female' then required endif",
                "weight",
                RuleContext::RealTime
            )
            .is_ok()
        );
    }

    #[test]
    fn test_all_errors_collected_not_just_first() {
        // Unknown field AND unknown function in one rule -> both reported
        let errs =
            check_rule("bogus(height) > 10 and ghost == 1", "age", RuleContext::Batch).unwrap_err();
        assert!(
            errs.iter()
                .any(|e| matches!(e, SemanticError::UnknownFunction(n) if n == "bogus"))
        );
        assert!(
            errs.iter()
                .any(|e| matches!(e, SemanticError::UnknownField(n) if n == "height"))
        );
        assert!(
            errs.iter()
                .any(|e| matches!(e, SemanticError::UnknownField(n) if n == "ghost"))
        );
    }

    #[test]
    fn test_between_rejected_on_text_field() {
        let errs = check_rule("sex between 1 and 5", "sex", RuleContext::RealTime).unwrap_err();
        assert!(
            errs.iter()
                .any(|e| matches!(e, SemanticError::TypeMismatch { op, .. } if op == "between"))
        );
    }

    #[test]
    fn test_aggregate_rejected_in_realtime_allowed_in_batch() {
        let rule = "weight > mean(weight) + 2 * stddev(weight)";
        let errs = check_rule(rule, "weight", RuleContext::RealTime).unwrap_err();
        assert!(
            errs.iter()
                .any(|e| matches!(e, SemanticError::AggregateInRealtime(_)))
        );
        assert!(check_rule(rule, "weight", RuleContext::Batch).is_ok());
    }

    #[test]
    fn test_arity_error() {
        let errs = check_rule("length(sex, sex) > 1", "sex", RuleContext::RealTime).unwrap_err();
        assert!(errs.iter().any(|e| matches!(
            e,
            SemanticError::WrongArity { name, expected: 1, found: 2 } if name == "length"
        )));
    }

    #[test]
    fn test_unknown_visit() {
        let errs = check_rule(
            "weight within 10% of weight@WEEK99",
            "weight",
            RuleContext::Batch,
        )
        .unwrap_err();
        assert!(
            errs.iter()
                .any(|e| matches!(e, SemanticError::UnknownVisit { visit, .. } if visit == "WEEK99"))
        );
    }

    #[test]
    fn test_invalid_regex_pattern_reported() {
        let errs = check_rule("matches(sex, '([')", "sex", RuleContext::RealTime).unwrap_err();
        assert!(
            errs.iter()
                .any(|e| matches!(e, SemanticError::TypeMismatch { op, .. } if op == "matches"))
        );
    }

    #[test]
    fn test_days_tolerance_requires_dates() {
        assert!(
            check_rule(
                "visit_date within 14 days of visit_date@BASELINE",
                "visit_date",
                RuleContext::Batch
            )
            .is_ok()
        );
        let errs = check_rule(
            "weight within 14 days of visit_date",
            "weight",
            RuleContext::Batch,
        )
        .unwrap_err();
        assert!(!errs.is_empty());
    }
}
