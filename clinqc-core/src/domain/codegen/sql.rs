// clinqc-core/src/domain/codegen/sql.rs
//
// Rend un QueryPlan en SQL portable (identifiants cités "..."). Le SQL
// produit est re-parsé via sqlparser (dialecte générique) avant d'être
// confié à un adaptateur : un plan qui ne re-parse pas est un bug de
// rendu, pas une erreur de données.

use crate::domain::codegen::batch::{
    AggFunc, Operand, PlanShape, Predicate, QueryPlan,
};
use crate::domain::error::DomainError;
use crate::domain::value::Value;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;

/// Render the plan as a single SELECT returning
/// (subject_id, visit, observed) for every violating row.
pub fn render_sql(plan: &QueryPlan) -> Result<String, DomainError> {
    let sql = match &plan.shape {
        PlanShape::Filter { predicate } => render_filter(plan, predicate)?,
        PlanShape::SelfJoin {
            baseline_visit,
            predicate,
        } => render_self_join(plan, baseline_visit, predicate)?,
        PlanShape::Outlier { predicate } => render_outlier(plan, predicate)?,
        PlanShape::AntiJoin { population } => render_anti_join(plan, population.as_ref())?,
    };

    // Self-check : le SQL rendu doit re-parser proprement.
    Parser::parse_sql(&GenericDialect {}, &sql).map_err(|e| {
        DomainError::Compilation(format!("rendered SQL failed to re-parse: {e}: {sql}"))
    })?;

    tracing::debug!("Rendered plan SQL: {}", sql);
    Ok(sql)
}

struct RenderCtx<'a> {
    /// Alias of the current-row table, when the query uses one.
    current: Option<&'a str>,
    /// Alias of the baseline-visit side of a self-join.
    baseline: Option<&'a str>,
    /// Alias of the aggregate CTE of an outlier plan.
    stats: Option<&'a str>,
}

fn render_filter(plan: &QueryPlan, predicate: &Predicate) -> Result<String, DomainError> {
    let ctx = RenderCtx {
        current: None,
        baseline: None,
        stats: None,
    };
    let pred = render_predicate(predicate, &ctx)?;
    let guards = render_guards(&plan.null_guards, None);
    Ok(format!(
        "SELECT {subj}, {visit}, {target} AS \"observed\" FROM {table} WHERE {guards}NOT ({pred})",
        subj = qi(&plan.subject_column),
        visit = qi(&plan.visit_column),
        target = qi(&plan.target_field),
        table = qi(&plan.table),
        guards = guards,
        pred = pred,
    ))
}

fn render_self_join(
    plan: &QueryPlan,
    baseline_visit: &str,
    predicate: &Predicate,
) -> Result<String, DomainError> {
    let ctx = RenderCtx {
        current: Some("c"),
        baseline: Some("b"),
        stats: None,
    };
    let pred = render_predicate(predicate, &ctx)?;
    let guards = render_guards(&plan.null_guards, Some("c"));

    // Les colonnes lues côté baseline ont leurs propres gardes NULL.
    let mut baseline_guards = String::new();
    for col in baseline_columns(predicate) {
        baseline_guards.push_str(&format!("\"b\".{} IS NOT NULL AND ", qi(&col)));
    }

    Ok(format!(
        "SELECT \"c\".{subj}, \"c\".{visit}, \"c\".{target} AS \"observed\" \
         FROM {table} AS \"c\" \
         JOIN {table} AS \"b\" ON \"c\".{subj} = \"b\".{subj} AND \"b\".{visit} = {bv} \
         WHERE \"c\".{visit} <> {bv} AND {guards}{bguards}NOT ({pred})",
        subj = qi(&plan.subject_column),
        visit = qi(&plan.visit_column),
        target = qi(&plan.target_field),
        table = qi(&plan.table),
        bv = str_literal(baseline_visit),
        guards = guards,
        bguards = baseline_guards,
        pred = pred,
    ))
}

fn render_outlier(plan: &QueryPlan, predicate: &Predicate) -> Result<String, DomainError> {
    let ctx = RenderCtx {
        current: Some("t"),
        baseline: None,
        stats: Some("stats"),
    };
    let pred = render_predicate(predicate, &ctx)?;
    let guards = render_guards(&plan.null_guards, Some("t"));

    // Première passe : une CTE qui matérialise les agrégats requis.
    let mut projections = Vec::new();
    for (func, col) in agg_columns(predicate) {
        let (sql_fn, prefix) = match func {
            AggFunc::Mean => ("AVG", "mean"),
            AggFunc::StdDev => ("STDDEV_POP", "stddev"),
        };
        projections.push(format!(
            "{sql_fn}({col_q}) AS {alias}",
            col_q = qi(&col),
            alias = qi(&format!("{prefix}_{col}")),
        ));
    }
    if projections.is_empty() {
        return Err(DomainError::Compilation(
            "outlier plan without aggregate operands".into(),
        ));
    }

    Ok(format!(
        "WITH \"stats\" AS (SELECT {proj} FROM {table}) \
         SELECT \"t\".{subj}, \"t\".{visit}, \"t\".{target} AS \"observed\" \
         FROM {table} AS \"t\", \"stats\" \
         WHERE {guards}NOT ({pred})",
        proj = projections.join(", "),
        subj = qi(&plan.subject_column),
        visit = qi(&plan.visit_column),
        target = qi(&plan.target_field),
        table = qi(&plan.table),
        guards = guards,
        pred = pred,
    ))
}

fn render_anti_join(
    plan: &QueryPlan,
    population: Option<&Predicate>,
) -> Result<String, DomainError> {
    let ctx = RenderCtx {
        current: Some("p"),
        baseline: None,
        stats: None,
    };
    let population_sql = match population {
        Some(pred) => format!("{} AND ", render_predicate(pred, &ctx)?),
        None => String::new(),
    };

    Ok(format!(
        "SELECT \"p\".{subj}, \"p\".{visit}, NULL AS \"observed\" \
         FROM {table} AS \"p\" \
         LEFT JOIN (SELECT {subj}, {visit} FROM {table} WHERE {target} IS NOT NULL) AS \"f\" \
         ON \"p\".{subj} = \"f\".{subj} AND \"p\".{visit} = \"f\".{visit} \
         WHERE {population}\"f\".{subj} IS NULL",
        subj = qi(&plan.subject_column),
        visit = qi(&plan.visit_column),
        target = qi(&plan.target_field),
        table = qi(&plan.table),
        population = population_sql,
    ))
}

fn render_guards(guards: &[String], alias: Option<&str>) -> String {
    let mut out = String::new();
    for col in guards {
        match alias {
            Some(a) => out.push_str(&format!("\"{a}\".{} IS NOT NULL AND ", qi(col))),
            None => out.push_str(&format!("{} IS NOT NULL AND ", qi(col))),
        }
    }
    out
}

fn render_predicate(pred: &Predicate, ctx: &RenderCtx<'_>) -> Result<String, DomainError> {
    Ok(match pred {
        Predicate::Cmp { lhs, op, rhs } => format!(
            "{} {} {}",
            render_operand(lhs, ctx)?,
            op.as_sql(),
            render_operand(rhs, ctx)?
        ),
        Predicate::And(a, b) => format!(
            "({} AND {})",
            render_predicate(a, ctx)?,
            render_predicate(b, ctx)?
        ),
        Predicate::Or(a, b) => format!(
            "({} OR {})",
            render_predicate(a, ctx)?,
            render_predicate(b, ctx)?
        ),
        Predicate::Not(p) => format!("NOT ({})", render_predicate(p, ctx)?),
        Predicate::Between { operand, low, high } => format!(
            "{} BETWEEN {} AND {}",
            render_operand(operand, ctx)?,
            render_operand(low, ctx)?,
            render_operand(high, ctx)?
        ),
        Predicate::InList { operand, list } => {
            let items = list
                .iter()
                .map(value_literal)
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} IN ({})", render_operand(operand, ctx)?, items)
        }
        Predicate::IsNotNull(operand) => {
            format!("{} IS NOT NULL", render_operand(operand, ctx)?)
        }
        Predicate::Matches { operand, pattern } => format!(
            "REGEXP_MATCHES({}, {})",
            render_operand(operand, ctx)?,
            str_literal(pattern)
        ),
        // Baseline à zéro : la règle est indécidable, jamais une violation.
        Predicate::PercentWithin {
            current,
            baseline,
            tolerance,
        } => {
            let c = render_operand(current, ctx)?;
            let b = render_operand(baseline, ctx)?;
            format!(
                "({b} = 0 OR ABS({c} - {b}) / ABS({b}) <= {})",
                num_literal(tolerance / 100.0)
            )
        }
        Predicate::DaysWithin {
            current,
            baseline,
            tolerance,
        } => {
            let c = render_operand(current, ctx)?;
            let b = render_operand(baseline, ctx)?;
            format!(
                "ABS(DATE_DIFF('day', {b}, {c})) <= {}",
                num_literal(*tolerance)
            )
        }
        Predicate::True => "TRUE".to_string(),
    })
}

fn render_operand(op: &Operand, ctx: &RenderCtx<'_>) -> Result<String, DomainError> {
    Ok(match op {
        Operand::Column(name) => match ctx.current {
            Some(a) => format!("\"{a}\".{}", qi(name)),
            None => qi(name),
        },
        Operand::JoinColumn(name) => match ctx.baseline {
            Some(a) => format!("\"{a}\".{}", qi(name)),
            None => {
                return Err(DomainError::Compilation(
                    "baseline column outside a self-join plan".into(),
                ));
            }
        },
        Operand::Const(v) => value_literal(v),
        Operand::Arith { op, lhs, rhs } => format!(
            "({} {} {})",
            render_operand(lhs, ctx)?,
            op.as_sql(),
            render_operand(rhs, ctx)?
        ),
        Operand::Neg(inner) => format!("(-{})", render_operand(inner, ctx)?),
        Operand::Length(inner) => format!("LENGTH({})", render_operand(inner, ctx)?),
        Operand::Abs(inner) => format!("ABS({})", render_operand(inner, ctx)?),
        Operand::Today => "CURRENT_DATE".to_string(),
        Operand::Agg { func, column } => match ctx.stats {
            Some(a) => {
                let prefix = match func {
                    AggFunc::Mean => "mean",
                    AggFunc::StdDev => "stddev",
                };
                format!("\"{a}\".{}", qi(&format!("{prefix}_{column}")))
            }
            None => {
                return Err(DomainError::Compilation(
                    "aggregate operand outside an outlier plan".into(),
                ));
            }
        },
    })
}

/// Colonnes lues côté baseline d'un self-join.
fn baseline_columns(pred: &Predicate) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    walk_operands(pred, &mut |op| {
        if let Operand::JoinColumn(name) = op {
            out.insert(name.clone());
        }
    });
    out
}

/// Agrégats requis par la passe 1 d'un plan outlier, dédupliqués.
fn agg_columns(pred: &Predicate) -> BTreeSet<(AggFunc, String)> {
    let mut out = BTreeSet::new();
    walk_operands(pred, &mut |op| {
        if let Operand::Agg { func, column } = op {
            out.insert((*func, column.clone()));
        }
    });
    out
}

fn walk_operands(pred: &Predicate, f: &mut impl FnMut(&Operand)) {
    match pred {
        Predicate::Cmp { lhs, rhs, .. } => {
            walk_operand(lhs, f);
            walk_operand(rhs, f);
        }
        Predicate::And(a, b) | Predicate::Or(a, b) => {
            walk_operands(a, f);
            walk_operands(b, f);
        }
        Predicate::Not(p) => walk_operands(p, f),
        Predicate::Between { operand, low, high } => {
            walk_operand(operand, f);
            walk_operand(low, f);
            walk_operand(high, f);
        }
        Predicate::InList { operand, .. }
        | Predicate::IsNotNull(operand)
        | Predicate::Matches { operand, .. } => walk_operand(operand, f),
        Predicate::PercentWithin {
            current, baseline, ..
        }
        | Predicate::DaysWithin {
            current, baseline, ..
        } => {
            walk_operand(current, f);
            walk_operand(baseline, f);
        }
        Predicate::True => {}
    }
}

fn walk_operand(op: &Operand, f: &mut impl FnMut(&Operand)) {
    f(op);
    match op {
        Operand::Arith { lhs, rhs, .. } => {
            walk_operand(lhs, f);
            walk_operand(rhs, f);
        }
        Operand::Neg(inner) | Operand::Length(inner) | Operand::Abs(inner) => {
            walk_operand(inner, f);
        }
        _ => {}
    }
}

fn qi(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn str_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn num_literal(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn value_literal(v: &Value) -> String {
    match v {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Number(n) => num_literal(*n),
        Value::Text(s) => str_literal(s),
        Value::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::codegen::batch::compile_batch;
    use crate::domain::dsl::parser::parse;
    use crate::domain::schema::{DatasetSchema, FieldType};
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
            visits: vec![],
        }
    }

    fn sql_for(rule: &str, target: &str) -> String {
        let ast = parse(rule, target).unwrap();
        let plan = compile_batch(&ast, target, &schema()).unwrap();
        render_sql(&plan).unwrap()
    }

    #[test]
    fn test_filter_sql_guards_nulls_and_negates_the_rule() {
        let sql = sql_for("age between 18 and 65", "age");
        assert!(sql.contains("\"age\" IS NOT NULL"));
        assert!(sql.contains("NOT (\"age\" BETWEEN 18 AND 65)"));
        assert!(sql.contains("FROM \"observations\""));
    }

    #[test]
    fn test_membership_sql_renders_quoted_list() {
        let sql = sql_for("sex in ('M', 'F')", "sex");
        assert!(sql.contains("\"sex\" IN ('M', 'F')"));
    }

    #[test]
    fn test_self_join_sql_joins_on_subject_and_baseline_visit() {
        let sql = sql_for("weight within 10% of weight@BASELINE", "weight");
        assert!(sql.contains("JOIN \"observations\" AS \"b\""));
        assert!(sql.contains("\"c\".\"subject_id\" = \"b\".\"subject_id\""));
        assert!(sql.contains("\"b\".\"visit\" = 'BASELINE'"));
        // La ligne baseline elle-même n'est pas candidate
        assert!(sql.contains("\"c\".\"visit\" <> 'BASELINE'"));
        // Garde NULL côté baseline
        assert!(sql.contains("\"b\".\"weight\" IS NOT NULL"));
    }

    #[test]
    fn test_zero_baseline_never_flagged_in_percent_tolerance() {
        let sql = sql_for("weight within 10% of weight@BASELINE", "weight");
        assert!(sql.contains("\"b\".\"weight\" = 0 OR"));
        assert!(sql.contains("<= 0.1"));
    }

    #[test]
    fn test_outlier_sql_uses_a_stats_cte() {
        let sql = sql_for("weight <= mean(weight) + 3 * stddev(weight)", "weight");
        assert!(sql.starts_with("WITH \"stats\" AS"));
        assert!(sql.contains("AVG(\"weight\") AS \"mean_weight\""));
        assert!(sql.contains("STDDEV_POP(\"weight\") AS \"stddev_weight\""));
        assert!(sql.contains("\"stats\".\"mean_weight\""));
    }

    #[test]
    fn test_required_sql_is_an_anti_join() {
        let sql = sql_for("if sex == 'Female' then required endif", "pregnant");
        assert!(sql.contains("LEFT JOIN"));
        assert!(sql.contains("\"pregnant\" IS NOT NULL"));
        assert!(sql.contains("\"f\".\"subject_id\" IS NULL"));
        assert!(sql.contains("\"p\".\"sex\" = 'Female'"));
    }

    #[test]
    fn test_all_rendered_sql_reparses() {
        // render_sql re-parse déjà en interne ; on vérifie qu'aucune forme
        // de plan ne déclenche le self-check.
        for (rule, target) in [
            ("age between 18 and 65", "age"),
            ("sex in ('M', 'F') and age > 18", "sex"),
            ("not (age < 0)", "age"),
            ("weight within 10% of weight@BASELINE", "weight"),
            ("visit_date within 3 days of visit_date@BASELINE", "visit_date"),
            ("weight <= mean(weight) + 3 * stddev(weight)", "weight"),
            ("required", "weight"),
            ("if sex == 'Female' then required endif", "pregnant"),
            ("matches(sex, '^[MF]$')", "sex"),
            ("length(sex) <= 10", "sex"),
        ] {
            let _ = sql_for(rule, target);
        }
    }
}
