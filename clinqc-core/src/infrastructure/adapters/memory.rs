// clinqc-core/src/infrastructure/adapters/memory.rs
//
// Store tabulaire en mémoire : interprète les QueryPlan directement, sans
// SQL. Sert de backend de test et de référence sémantique pour les
// adaptateurs SQL (mêmes lignes flaggées, mêmes lignes ignorées).

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::codegen::batch::{
    AggFunc, Operand, PlanShape, Predicate, QueryPlan,
};
use crate::domain::value::Value;
use crate::error::ClinqcError;
use crate::ports::store::{DataStore, PlanRow};

/// Une ligne du dataset : clé sujet, visite, valeurs de champs.
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub subject_id: String,
    pub visit: Option<String>,
    pub values: HashMap<String, Value>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<MemoryRecord>>>,
}

/// Logique trivaluée, alignée sur le backend temps réel : une ligne n'est
/// une violation que si la règle est définitivement fausse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tri {
    True,
    False,
    Unknown,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_table(&self, table: &str, records: Vec<MemoryRecord>) {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(table.to_string(), records);
        }
    }

    fn records(&self, table: &str) -> Result<Vec<MemoryRecord>, ClinqcError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| ClinqcError::InternalError("memory store lock poisoned".into()))?;
        tables.get(table).cloned().ok_or_else(|| {
            ClinqcError::InternalError(format!("unknown table '{}' in memory store", table))
        })
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn execute_plan(&self, plan: &QueryPlan) -> Result<Vec<PlanRow>, ClinqcError> {
        let records = self.records(&plan.table)?;

        let rows = match &plan.shape {
            PlanShape::Filter { predicate } => {
                filter_pass(plan, &records, predicate, &HashMap::new(), None)
            }
            PlanShape::Outlier { predicate } => {
                // Passe 1 : agrégats sur tout le dataset
                let aggs = compute_aggregates(&records, predicate);
                filter_pass(plan, &records, predicate, &aggs, None)
            }
            PlanShape::SelfJoin {
                baseline_visit,
                predicate,
            } => self_join_pass(plan, &records, baseline_visit, predicate),
            PlanShape::AntiJoin { population } => {
                anti_join_pass(plan, &records, population.as_ref())
            }
        };

        Ok(rows)
    }

    async fn register_source(&self, name: &str, _path: &str) -> Result<(), ClinqcError> {
        tracing::debug!("memory store ignores source registration for '{}'", name);
        Ok(())
    }

    fn engine_name(&self) -> &str {
        "memory"
    }
}

// --- TRAVERSALS ---

fn filter_pass(
    plan: &QueryPlan,
    records: &[MemoryRecord],
    predicate: &Predicate,
    aggs: &HashMap<(AggFunc, String), f64>,
    baseline: Option<&MemoryRecord>,
) -> Vec<PlanRow> {
    records
        .iter()
        .filter(|r| guards_hold(&plan.null_guards, r))
        .filter(|r| eval_pred(predicate, r, baseline, aggs) == Tri::False)
        .map(|r| plan_row(plan, r))
        .collect()
}

fn self_join_pass(
    plan: &QueryPlan,
    records: &[MemoryRecord],
    baseline_visit: &str,
    predicate: &Predicate,
) -> Vec<PlanRow> {
    let mut out = Vec::new();
    for record in records {
        if record.visit.as_deref() == Some(baseline_visit) {
            continue;
        }
        // Jointure sur le sujet, côté baseline
        let baseline = records.iter().find(|b| {
            b.subject_id == record.subject_id && b.visit.as_deref() == Some(baseline_visit)
        });
        let baseline = match baseline {
            Some(b) => b,
            None => continue, // pas de ligne baseline : indécidable
        };
        if !guards_hold(&plan.null_guards, record) {
            continue;
        }
        if eval_pred(predicate, record, Some(baseline), &HashMap::new()) == Tri::False {
            out.push(plan_row(plan, record));
        }
    }
    out
}

fn anti_join_pass(
    plan: &QueryPlan,
    records: &[MemoryRecord],
    population: Option<&Predicate>,
) -> Vec<PlanRow> {
    records
        .iter()
        .filter(|r| match population {
            // Hors population (ou population indécidable) : pas de violation
            Some(pred) => eval_pred(pred, r, None, &HashMap::new()) == Tri::True,
            None => true,
        })
        .filter(|r| field_of(r, &plan.target_field).is_none())
        .map(|r| PlanRow {
            subject_id: r.subject_id.clone(),
            visit: r.visit.clone(),
            observed: Value::Null,
        })
        .collect()
}

fn compute_aggregates(
    records: &[MemoryRecord],
    predicate: &Predicate,
) -> HashMap<(AggFunc, String), f64> {
    let mut needed: Vec<(AggFunc, String)> = Vec::new();
    collect_aggs(predicate, &mut needed);

    let mut out = HashMap::new();
    for (func, column) in needed {
        let values: Vec<f64> = records
            .iter()
            .filter_map(|r| field_of(r, &column).and_then(|v| v.as_number()))
            .collect();
        if values.is_empty() {
            continue; // agrégat indéfini : les lignes resteront indécidables
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let value = match func {
            AggFunc::Mean => mean,
            AggFunc::StdDev => {
                // Écart-type de population, comme STDDEV_POP côté SQL
                let variance =
                    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
                variance.sqrt()
            }
        };
        out.insert((func, column), value);
    }
    out
}

fn collect_aggs(pred: &Predicate, out: &mut Vec<(AggFunc, String)>) {
    match pred {
        Predicate::Cmp { lhs, rhs, .. } => {
            collect_aggs_operand(lhs, out);
            collect_aggs_operand(rhs, out);
        }
        Predicate::And(a, b) | Predicate::Or(a, b) => {
            collect_aggs(a, out);
            collect_aggs(b, out);
        }
        Predicate::Not(p) => collect_aggs(p, out),
        Predicate::Between { operand, low, high } => {
            collect_aggs_operand(operand, out);
            collect_aggs_operand(low, out);
            collect_aggs_operand(high, out);
        }
        Predicate::InList { operand, .. }
        | Predicate::IsNotNull(operand)
        | Predicate::Matches { operand, .. } => collect_aggs_operand(operand, out),
        Predicate::PercentWithin {
            current, baseline, ..
        }
        | Predicate::DaysWithin {
            current, baseline, ..
        } => {
            collect_aggs_operand(current, out);
            collect_aggs_operand(baseline, out);
        }
        Predicate::True => {}
    }
}

fn collect_aggs_operand(op: &Operand, out: &mut Vec<(AggFunc, String)>) {
    match op {
        Operand::Agg { func, column } => {
            if !out.contains(&(*func, column.clone())) {
                out.push((*func, column.clone()));
            }
        }
        Operand::Arith { lhs, rhs, .. } => {
            collect_aggs_operand(lhs, out);
            collect_aggs_operand(rhs, out);
        }
        Operand::Neg(inner) | Operand::Length(inner) | Operand::Abs(inner) => {
            collect_aggs_operand(inner, out);
        }
        _ => {}
    }
}

// --- EVALUATION (mêmes règles trivaluées que le backend temps réel) ---

fn guards_hold(guards: &[String], record: &MemoryRecord) -> bool {
    guards.iter().all(|g| field_of(record, g).is_some())
}

fn field_of(record: &MemoryRecord, field: &str) -> Option<Value> {
    match record.values.get(field) {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.clone()),
    }
}

fn eval_pred(
    pred: &Predicate,
    record: &MemoryRecord,
    baseline: Option<&MemoryRecord>,
    aggs: &HashMap<(AggFunc, String), f64>,
) -> Tri {
    match pred {
        Predicate::Cmp { lhs, op, rhs } => {
            let (a, b) = match (
                eval_operand(lhs, record, baseline, aggs),
                eval_operand(rhs, record, baseline, aggs),
            ) {
                (Some(a), Some(b)) => (a, b),
                _ => return Tri::Unknown,
            };
            use crate::domain::codegen::batch::CmpOp;
            match op {
                CmpOp::Eq => tri(a.loose_eq(&b)),
                CmpOp::Ne => tri(!a.loose_eq(&b)),
                _ => match a.partial_cmp_ordered(&b) {
                    Some(ord) => tri(match op {
                        CmpOp::Lt => ord.is_lt(),
                        CmpOp::Le => ord.is_le(),
                        CmpOp::Gt => ord.is_gt(),
                        CmpOp::Ge => ord.is_ge(),
                        CmpOp::Eq | CmpOp::Ne => unreachable!(),
                    }),
                    None => Tri::Unknown,
                },
            }
        }
        Predicate::And(a, b) => match (
            eval_pred(a, record, baseline, aggs),
            eval_pred(b, record, baseline, aggs),
        ) {
            (Tri::False, _) | (_, Tri::False) => Tri::False,
            (Tri::True, Tri::True) => Tri::True,
            _ => Tri::Unknown,
        },
        Predicate::Or(a, b) => match (
            eval_pred(a, record, baseline, aggs),
            eval_pred(b, record, baseline, aggs),
        ) {
            (Tri::True, _) | (_, Tri::True) => Tri::True,
            (Tri::False, Tri::False) => Tri::False,
            _ => Tri::Unknown,
        },
        Predicate::Not(p) => match eval_pred(p, record, baseline, aggs) {
            Tri::True => Tri::False,
            Tri::False => Tri::True,
            Tri::Unknown => Tri::Unknown,
        },
        Predicate::Between { operand, low, high } => {
            let (v, lo, hi) = match (
                eval_operand(operand, record, baseline, aggs),
                eval_operand(low, record, baseline, aggs),
                eval_operand(high, record, baseline, aggs),
            ) {
                (Some(v), Some(lo), Some(hi)) => (v, lo, hi),
                _ => return Tri::Unknown,
            };
            match (v.partial_cmp_ordered(&lo), v.partial_cmp_ordered(&hi)) {
                (Some(a), Some(b)) => tri(a.is_ge() && b.is_le()),
                _ => Tri::Unknown,
            }
        }
        Predicate::InList { operand, list } => {
            match eval_operand(operand, record, baseline, aggs) {
                Some(v) => tri(list.iter().any(|item| v.loose_eq(item))),
                None => Tri::Unknown,
            }
        }
        Predicate::IsNotNull(operand) => {
            tri(eval_operand(operand, record, baseline, aggs).is_some())
        }
        Predicate::Matches { operand, pattern } => {
            let v = match eval_operand(operand, record, baseline, aggs) {
                Some(Value::Text(s)) => s,
                Some(_) | None => return Tri::Unknown,
            };
            // Le pattern a été pré-validé au codegen
            match Regex::new(pattern) {
                Ok(re) => tri(re.is_match(&v)),
                Err(_) => Tri::Unknown,
            }
        }
        Predicate::PercentWithin {
            current,
            baseline: base,
            tolerance,
        } => {
            let (c, b) = match (
                eval_operand(current, record, baseline, aggs).and_then(|v| v.as_number()),
                eval_operand(base, record, baseline, aggs).and_then(|v| v.as_number()),
            ) {
                (Some(c), Some(b)) => (c, b),
                _ => return Tri::Unknown,
            };
            if b == 0.0 {
                return Tri::Unknown;
            }
            tri(((c - b) / b).abs() <= tolerance / 100.0)
        }
        Predicate::DaysWithin {
            current,
            baseline: base,
            tolerance,
        } => {
            let (c, b) = match (
                eval_operand(current, record, baseline, aggs).and_then(|v| v.as_date()),
                eval_operand(base, record, baseline, aggs).and_then(|v| v.as_date()),
            ) {
                (Some(c), Some(b)) => (c, b),
                _ => return Tri::Unknown,
            };
            tri((c - b).num_days().abs() as f64 <= *tolerance)
        }
        Predicate::True => Tri::True,
    }
}

fn eval_operand(
    op: &Operand,
    record: &MemoryRecord,
    baseline: Option<&MemoryRecord>,
    aggs: &HashMap<(AggFunc, String), f64>,
) -> Option<Value> {
    match op {
        Operand::Column(name) => field_of(record, name),
        Operand::JoinColumn(name) => baseline.and_then(|b| field_of(b, name)),
        Operand::Const(v) => Some(v.clone()),
        Operand::Arith { op, lhs, rhs } => {
            let a = eval_operand(lhs, record, baseline, aggs)?.as_number()?;
            let b = eval_operand(rhs, record, baseline, aggs)?.as_number()?;
            use crate::domain::codegen::batch::ArithOp;
            let result = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => {
                    if b == 0.0 {
                        return None;
                    }
                    a / b
                }
            };
            Some(Value::Number(result))
        }
        Operand::Neg(inner) => {
            let n = eval_operand(inner, record, baseline, aggs)?.as_number()?;
            Some(Value::Number(-n))
        }
        Operand::Length(inner) => match eval_operand(inner, record, baseline, aggs)? {
            Value::Text(s) => Some(Value::Number(s.chars().count() as f64)),
            _ => None,
        },
        Operand::Abs(inner) => {
            let n = eval_operand(inner, record, baseline, aggs)?.as_number()?;
            Some(Value::Number(n.abs()))
        }
        Operand::Today => Some(Value::Date(chrono::Local::now().date_naive())),
        Operand::Agg { func, column } => aggs
            .get(&(*func, column.clone()))
            .map(|v| Value::Number(*v)),
    }
}

fn tri(b: bool) -> Tri {
    if b { Tri::True } else { Tri::False }
}

fn plan_row(plan: &QueryPlan, record: &MemoryRecord) -> PlanRow {
    PlanRow {
        subject_id: record.subject_id.clone(),
        visit: record.visit.clone(),
        observed: field_of(record, &plan.target_field).unwrap_or(Value::Null),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::codegen::realtime::{compile_realtime, FieldValues};
    use crate::domain::codegen::{compile_batch, ValidationResult};
    use crate::domain::dsl::parser::parse;
    use crate::domain::schema::{DatasetSchema, FieldType};
    use std::collections::BTreeMap;

    fn schema() -> DatasetSchema {
        let mut fields = BTreeMap::new();
        fields.insert("age".to_string(), FieldType::Number);
        fields.insert("weight".to_string(), FieldType::Number);
        fields.insert("sex".to_string(), FieldType::Text);
        fields.insert("pregnant".to_string(), FieldType::Text);
        DatasetSchema {
            table: "observations".into(),
            subject_column: "subject_id".into(),
            visit_column: "visit".into(),
            fields,
            visits: vec!["BASELINE".into(), "WEEK2".into()],
        }
    }

    fn record(subject: &str, visit: &str, pairs: &[(&str, Value)]) -> MemoryRecord {
        MemoryRecord {
            subject_id: subject.into(),
            visit: Some(visit.into()),
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    async fn run(rule: &str, target: &str, records: Vec<MemoryRecord>) -> Vec<PlanRow> {
        let ast = parse(rule, target).unwrap();
        let plan = compile_batch(&ast, target, &schema()).unwrap();
        let store = MemoryStore::new();
        store.load_table("observations", records);
        store.execute_plan(&plan).await.unwrap()
    }

    #[tokio::test]
    async fn test_filter_flags_only_definitive_failures() {
        let rows = run(
            "age between 18 and 65",
            "age",
            vec![
                record("S1", "BASELINE", &[("age", num(70.0))]),
                record("S2", "BASELINE", &[("age", num(40.0))]),
                record("S3", "BASELINE", &[("age", Value::Null)]), // indécidable
            ],
        )
        .await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject_id, "S1");
        assert_eq!(rows[0].observed, num(70.0));
    }

    #[tokio::test]
    async fn test_self_join_compares_against_baseline_visit() {
        let rows = run(
            "weight within 10% of weight@BASELINE",
            "weight",
            vec![
                record("S1", "BASELINE", &[("weight", num(100.0))]),
                record("S1", "WEEK2", &[("weight", num(115.0))]), // -> violation
                record("S2", "BASELINE", &[("weight", num(100.0))]),
                record("S2", "WEEK2", &[("weight", num(105.0))]), // dans la tolérance
                record("S3", "WEEK2", &[("weight", num(80.0))]),  // pas de baseline
            ],
        )
        .await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject_id, "S1");
        assert_eq!(rows[0].visit.as_deref(), Some("WEEK2"));
    }

    #[tokio::test]
    async fn test_outlier_two_pass_flags_extreme_values() {
        let mut records: Vec<MemoryRecord> = (0..20)
            .map(|i| record(&format!("S{}", i), "BASELINE", &[("weight", num(70.0 + i as f64))]))
            .collect();
        records.push(record("S99", "BASELINE", &[("weight", num(500.0))]));

        let rows = run(
            "weight <= mean(weight) + 3 * stddev(weight)",
            "weight",
            records,
        )
        .await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject_id, "S99");
    }

    #[tokio::test]
    async fn test_anti_join_flags_missing_required_field() {
        let rows = run(
            "if sex == 'Female' then required endif",
            "pregnant",
            vec![
                record("S1", "BASELINE", &[("sex", Value::Text("Female".into()))]),
                record(
                    "S2",
                    "BASELINE",
                    &[
                        ("sex", Value::Text("Female".into())),
                        ("pregnant", Value::Text("No".into())),
                    ],
                ),
                record("S3", "BASELINE", &[("sex", Value::Text("Male".into()))]),
            ],
        )
        .await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject_id, "S1");
        assert_eq!(rows[0].observed, Value::Null);
    }

    #[tokio::test]
    async fn test_both_backends_agree_on_the_same_records() {
        // Même AST, deux backends : les sujets flaggés doivent coïncider.
        let rule = "age between 18 and 65";
        let ast = parse(rule, "age").unwrap();
        let validator = compile_realtime(&ast, "age", "out of range").unwrap();

        let dataset = [("S1", 70.0), ("S2", 40.0), ("S3", 17.0)];

        let mut realtime_flagged = Vec::new();
        for (subject, age) in dataset {
            let mut values = FieldValues::new();
            values.insert("age".to_string(), num(age));
            if let ValidationResult::Fail(_) = validator(&values) {
                realtime_flagged.push(subject.to_string());
            }
        }

        let records = dataset
            .iter()
            .map(|(s, age)| record(s, "BASELINE", &[("age", num(*age))]))
            .collect();
        let batch_flagged: Vec<String> = run(rule, "age", records)
            .await
            .into_iter()
            .map(|r| r.subject_id)
            .collect();

        assert_eq!(realtime_flagged, vec!["S1".to_string(), "S3".to_string()]);
        assert_eq!(batch_flagged, realtime_flagged);
    }
}
