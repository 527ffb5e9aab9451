// clinqc-core/src/application/engine.rs
//
// Moteur QC batch : exécute les plans compilés contre le store, matérialise
// les violations et gère leur cycle de vie. Une seule exécution à la fois ;
// l'annulation est coopérative, vérifiée entre les règles, jamais au milieu
// d'une requête.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::application::compiler;
use crate::domain::qc::run::{QcRun, RuleOutcome, RunStatus, RunTrigger};
use crate::domain::qc::violation::{ResolutionState, Violation};
use crate::domain::rule::{Rule, RuleContext, Severity};
use crate::domain::schema::DatasetSchema;
use crate::error::ClinqcError;
use crate::ports::store::{DataStore, PlanRow};

/// Jeton d'annulation coopératif partagé avec l'appelant.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Filtre des accesseurs de lecture exposés au tableau de bord.
#[derive(Debug, Clone, Default)]
pub struct ViolationFilter {
    pub rule_id: Option<String>,
    pub subject_id: Option<String>,
    pub state: Option<ResolutionState>,
    pub severity: Option<Severity>,
}

impl ViolationFilter {
    fn matches(&self, v: &Violation) -> bool {
        self.rule_id.as_deref().is_none_or(|r| r == v.rule_id)
            && self.subject_id.as_deref().is_none_or(|s| s == v.subject_id)
            && self.state.is_none_or(|s| s == v.resolution_state)
            && self.severity.is_none_or(|s| s == v.severity)
    }
}

/// État persisté du moteur. Les violations ne sont jamais supprimées,
/// les runs jamais réécrits.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QcState {
    next_violation_id: u64,
    next_run_id: u64,
    violations: Vec<Violation>,
    runs: Vec<QcRun>,
}

pub struct QcEngine {
    /// Sérialise les exécutions batch. `try_lock` échoue immédiatement
    /// avec RunInProgress plutôt que de mettre la demande en file.
    run_lock: tokio::sync::Mutex<()>,
    state: Mutex<QcState>,
    state_path: PathBuf,
}

impl QcEngine {
    /// Ouvre (ou initialise) l'état du moteur au chemin donné.
    pub fn new<P: AsRef<Path>>(state_path: P) -> Result<Self, ClinqcError> {
        let state_path = state_path.as_ref().to_path_buf();
        let state = if state_path.exists() {
            let content = fs::read_to_string(&state_path)?;
            serde_json::from_str(&content).map_err(|e| {
                ClinqcError::InternalError(format!("corrupted QC state file: {}", e))
            })?
        } else {
            QcState {
                next_violation_id: 1,
                next_run_id: 1,
                ..Default::default()
            }
        };
        Ok(Self {
            run_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(state),
            state_path,
        })
    }

    /// Exécute toutes les règles batch actives. Chaque règle est isolée :
    /// un échec de compilation ou d'exécution est consigné dans le résumé
    /// et n'interrompt pas les autres.
    #[instrument(skip_all, fields(trigger = %trigger))]
    pub async fn run_qc(
        &self,
        trigger: RunTrigger,
        rules: &[Rule],
        schema: &DatasetSchema,
        store: &dyn DataStore,
        cancel: &CancelToken,
    ) -> Result<QcRun, ClinqcError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| ClinqcError::RunInProgress)?;
        // Deuxième barrière, inter-processus : un autre moteur sur le même
        // fichier d'état ne doit pas écrire en même temps.
        let _file_lock = crate::infrastructure::fs::RunLock::acquire(
            self.state_path.with_extension("lock"),
        )?
        .ok_or(ClinqcError::RunInProgress)?;

        let start = Instant::now();
        let started_at = Utc::now();
        println!("🚀 Starting QC run ({}) on '{}'...", trigger, store.engine_name());

        let batch_rules: Vec<&Rule> = rules
            .iter()
            .filter(|r| r.active && r.context == RuleContext::Batch)
            .collect();
        println!("📝 {} active batch rule(s) to execute", batch_rules.len());

        let mut outcomes = Vec::with_capacity(batch_rules.len());
        let mut violations_found = 0usize;
        let mut cancelled = false;

        for (i, rule) in batch_rules.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("🛑 Run cancelled, skipping remaining rules");
                for skipped in &batch_rules[i..] {
                    outcomes.push(RuleOutcome::Skipped {
                        rule_id: skipped.id.clone(),
                    });
                }
                cancelled = true;
                break;
            }

            match self.execute_rule(rule, schema, store).await {
                Ok(count) => {
                    println!("  ✅ {}: {} violation(s)", rule.id, count);
                    violations_found += count;
                    outcomes.push(RuleOutcome::Executed {
                        rule_id: rule.id.clone(),
                        violations: count,
                    });
                }
                Err(e) => {
                    error!("❌ Rule '{}' failed: {}", rule.id, e);
                    outcomes.push(RuleOutcome::Failed {
                        rule_id: rule.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let rules_failed = outcomes
            .iter()
            .filter(|o| matches!(o, RuleOutcome::Failed { .. }))
            .count();
        let rules_executed = outcomes
            .iter()
            .filter(|o| matches!(o, RuleOutcome::Executed { .. }))
            .count();
        let status = if cancelled {
            RunStatus::Cancelled
        } else if rules_failed > 0 {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };

        let run = {
            let mut state = self.lock_state()?;
            let run = QcRun {
                run_id: state.next_run_id,
                trigger,
                started_at,
                duration_ms: start.elapsed().as_millis() as u64,
                rules_executed,
                rules_failed,
                violations_found,
                status,
                outcomes,
            };
            state.next_run_id += 1;
            state.runs.push(run.clone());
            self.persist(&state)?;
            run
        };

        println!(
            "✨ QC run #{} {} in {:.2}s: {} violation(s), {} rule failure(s)",
            run.run_id,
            run.status,
            run.duration_ms as f64 / 1000.0,
            run.violations_found,
            run.rules_failed
        );
        Ok(run)
    }

    /// Compile, exécute et upserte les violations d'une seule règle.
    async fn execute_rule(
        &self,
        rule: &Rule,
        schema: &DatasetSchema,
        store: &dyn DataStore,
    ) -> Result<usize, ClinqcError> {
        let compiled = compiler::compile(rule, schema)?;
        let plan = compiled.plan.ok_or_else(|| {
            ClinqcError::InternalError(format!("batch rule '{}' produced no plan", rule.id))
        })?;

        let rows = store.execute_plan(&plan).await?;

        let mut state = self.lock_state()?;
        for row in &rows {
            upsert_violation(&mut state, rule, row);
        }
        Ok(rows.len())
    }

    /// open -> resolved, avec acteur et note obligatoires.
    pub fn resolve(&self, id: u64, actor: &str, notes: &str) -> Result<Violation, ClinqcError> {
        self.transition(id, |v| v.resolve(actor, notes))
    }

    /// open -> false_positive.
    pub fn mark_false_positive(
        &self,
        id: u64,
        actor: &str,
        notes: &str,
    ) -> Result<Violation, ClinqcError> {
        self.transition(id, |v| v.mark_false_positive(actor, notes))
    }

    /// Résolution en masse : les violations déjà fermées sont ignorées
    /// (jamais rouvertes), les ids inconnus font échouer tout le lot.
    /// Tous les ids sont vérifiés avant la première transition, l'état
    /// en mémoire reste donc intact quand le lot est rejeté. Retourne le
    /// nombre de transitions effectuées.
    pub fn bulk_resolve(&self, ids: &[u64], actor: &str, notes: &str) -> Result<usize, ClinqcError> {
        let mut state = self.lock_state()?;
        for id in ids {
            if !state.violations.iter().any(|v| v.id == *id) {
                return Err(crate::domain::error::DomainError::ViolationNotFound(*id).into());
            }
        }
        let mut closed = 0usize;
        for id in ids {
            let violation = state.violations.iter_mut().find(|v| v.id == *id);
            if let Some(v) = violation {
                if v.is_open() {
                    v.resolve(actor, notes)?;
                    closed += 1;
                }
            }
        }
        self.persist(&state)?;
        info!("✅ Bulk resolved {} violation(s)", closed);
        Ok(closed)
    }

    pub fn get_violations(&self, filter: &ViolationFilter) -> Result<Vec<Violation>, ClinqcError> {
        let state = self.lock_state()?;
        Ok(state
            .violations
            .iter()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect())
    }

    /// Historique des runs, du plus récent au plus ancien.
    pub fn get_run_history(&self, limit: usize) -> Result<Vec<QcRun>, ClinqcError> {
        let state = self.lock_state()?;
        Ok(state.runs.iter().rev().take(limit).cloned().collect())
    }

    fn transition(
        &self,
        id: u64,
        apply: impl FnOnce(&mut Violation) -> Result<(), crate::domain::error::DomainError>,
    ) -> Result<Violation, ClinqcError> {
        let mut state = self.lock_state()?;
        let violation = state
            .violations
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or(crate::domain::error::DomainError::ViolationNotFound(id))?;
        apply(violation)?;
        let snapshot = violation.clone();
        self.persist(&state)?;
        Ok(snapshot)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, QcState>, ClinqcError> {
        self.state
            .lock()
            .map_err(|_| ClinqcError::InternalError("QC state lock poisoned".into()))
    }

    fn persist(&self, state: &QcState) -> Result<(), ClinqcError> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| ClinqcError::InternalError(format!("Serialization: {}", e)))?;
        crate::infrastructure::fs::atomic_write(&self.state_path, content)?;
        Ok(())
    }
}

/// Upsert par clé (rule_id, subject_id, field) : une re-détection met à jour
/// la violation ouverte existante ; une violation fermée n'est jamais
/// rouverte, on en crée une nouvelle.
fn upsert_violation(state: &mut QcState, rule: &Rule, row: &PlanRow) {
    let existing = state.violations.iter_mut().find(|v| {
        v.is_open() && v.key() == (rule.id.as_str(), row.subject_id.as_str(), rule.field.as_str())
    });

    match existing {
        Some(v) => {
            v.observed_value = row.observed.clone();
            v.detected_at = Utc::now();
            v.visit = row.visit.clone();
        }
        None => {
            let id = state.next_violation_id;
            state.next_violation_id += 1;
            state.violations.push(Violation {
                id,
                rule_id: rule.id.clone(),
                subject_id: row.subject_id.clone(),
                field: rule.field.clone(),
                visit: row.visit.clone(),
                observed_value: row.observed.clone(),
                severity: rule.severity,
                detected_at: Utc::now(),
                resolution_state: ResolutionState::Open,
                resolved_at: None,
                resolved_by: None,
                resolution_notes: None,
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::codegen::batch::QueryPlan;
    use crate::domain::schema::FieldType;
    use crate::domain::value::Value;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    /// Store factice : renvoie des lignes préparées par nom de règle cible,
    /// ou une erreur pour simuler un backend indisponible.
    struct StubStore {
        rows: BTreeMap<String, Vec<PlanRow>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl DataStore for StubStore {
        async fn execute_plan(&self, plan: &QueryPlan) -> Result<Vec<PlanRow>, ClinqcError> {
            if self.fail_on.as_deref() == Some(plan.target_field.as_str()) {
                return Err(ClinqcError::InternalError("store unavailable".into()));
            }
            Ok(self
                .rows
                .get(&plan.target_field)
                .cloned()
                .unwrap_or_default())
        }

        async fn register_source(&self, _name: &str, _path: &str) -> Result<(), ClinqcError> {
            Ok(())
        }

        fn engine_name(&self) -> &str {
            "stub"
        }
    }

    fn schema() -> DatasetSchema {
        let mut fields = BTreeMap::new();
        fields.insert("age".to_string(), FieldType::Number);
        fields.insert("weight".to_string(), FieldType::Number);
        DatasetSchema {
            table: "observations".into(),
            subject_column: "subject_id".into(),
            visit_column: "visit".into(),
            fields,
            visits: vec![],
        }
    }

    fn batch_rule(id: &str, field: &str, text: &str) -> Rule {
        Rule {
            id: id.into(),
            field: field.into(),
            rule: text.into(),
            context: RuleContext::Batch,
            severity: Severity::Error,
            active: true,
            description: None,
        }
    }

    fn row(subject: &str, observed: f64) -> PlanRow {
        PlanRow {
            subject_id: subject.into(),
            visit: Some("WEEK2".into()),
            observed: Value::Number(observed),
        }
    }

    fn engine(dir: &tempfile::TempDir) -> QcEngine {
        QcEngine::new(dir.path().join("qc_state.json")).unwrap()
    }

    #[tokio::test]
    async fn test_run_materializes_violations_and_a_run_record() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let store = StubStore {
            rows: BTreeMap::from([("age".to_string(), vec![row("SUBJ-001", 70.0)])]),
            fail_on: None,
        };

        let run = engine
            .run_qc(
                RunTrigger::Manual,
                &[batch_rule("age_range", "age", "age between 18 and 65")],
                &schema(),
                &store,
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.violations_found, 1);
        let violations = engine.get_violations(&ViolationFilter::default()).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].subject_id, "SUBJ-001");
        assert!(violations[0].is_open());
    }

    #[tokio::test]
    async fn test_rerun_on_unchanged_data_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let store = StubStore {
            rows: BTreeMap::from([("age".to_string(), vec![row("SUBJ-001", 70.0)])]),
            fail_on: None,
        };
        let rules = [batch_rule("age_range", "age", "age between 18 and 65")];

        let first = engine
            .run_qc(RunTrigger::Scheduled, &rules, &schema(), &store, &CancelToken::new())
            .await
            .unwrap();
        let second = engine
            .run_qc(RunTrigger::Scheduled, &rules, &schema(), &store, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(first.violations_found, second.violations_found);
        let violations = engine.get_violations(&ViolationFilter::default()).unwrap();
        assert_eq!(violations.len(), 1);
    }

    #[tokio::test]
    async fn test_one_failing_rule_does_not_abort_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let store = StubStore {
            rows: BTreeMap::from([("weight".to_string(), vec![row("SUBJ-002", 500.0)])]),
            fail_on: Some("age".to_string()),
        };
        let rules = [
            batch_rule("age_range", "age", "age between 18 and 65"),
            batch_rule("weight_max", "weight", "weight < 300"),
        ];

        let run = engine
            .run_qc(RunTrigger::Manual, &rules, &schema(), &store, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::CompletedWithErrors);
        assert_eq!(run.rules_failed, 1);
        assert_eq!(run.rules_executed, 1);
        assert_eq!(run.violations_found, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_persists_partial_results() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let store = StubStore {
            rows: BTreeMap::new(),
            fail_on: None,
        };
        let cancel = CancelToken::new();
        cancel.cancel();

        let run = engine
            .run_qc(
                RunTrigger::Scheduled,
                &[batch_rule("age_range", "age", "age between 18 and 65")],
                &schema(),
                &store,
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(matches!(run.outcomes[0], RuleOutcome::Skipped { .. }));
        // Le run annulé est bien dans l'historique
        assert_eq!(engine.get_run_history(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolution_workflow_is_forward_only() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let store = StubStore {
            rows: BTreeMap::from([("age".to_string(), vec![row("SUBJ-001", 70.0)])]),
            fail_on: None,
        };
        engine
            .run_qc(
                RunTrigger::Manual,
                &[batch_rule("age_range", "age", "age between 18 and 65")],
                &schema(),
                &store,
                &CancelToken::new(),
            )
            .await
            .unwrap();

        let resolved = engine.resolve(1, "dmanager", "age corrected at source").unwrap();
        assert_eq!(resolved.resolution_state, ResolutionState::Resolved);

        // Fermé = final
        let err = engine.mark_false_positive(1, "dmanager", "oops").unwrap_err();
        assert!(err.to_string().contains("already"));

        // Id inconnu
        assert!(engine.resolve(99, "dmanager", "?").is_err());
    }

    #[tokio::test]
    async fn test_bulk_resolve_skips_closed_and_never_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let store = StubStore {
            rows: BTreeMap::from([(
                "age".to_string(),
                vec![row("SUBJ-001", 70.0), row("SUBJ-002", 80.0)],
            )]),
            fail_on: None,
        };
        engine
            .run_qc(
                RunTrigger::Manual,
                &[batch_rule("age_range", "age", "age between 18 and 65")],
                &schema(),
                &store,
                &CancelToken::new(),
            )
            .await
            .unwrap();

        engine.mark_false_positive(1, "dmanager", "device swap").unwrap();

        // #1 déjà fermée : ignorée, jamais rouverte ; #2 passe à resolved
        let closed = engine.bulk_resolve(&[1, 2], "dmanager", "monthly review").unwrap();
        assert_eq!(closed, 1);

        let all = engine.get_violations(&ViolationFilter::default()).unwrap();
        assert_eq!(all[0].resolution_state, ResolutionState::FalsePositive);
        assert_eq!(all[1].resolution_state, ResolutionState::Resolved);
    }

    #[tokio::test]
    async fn test_bulk_resolve_unknown_id_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let store = StubStore {
            rows: BTreeMap::from([(
                "age".to_string(),
                vec![row("SUBJ-001", 70.0), row("SUBJ-002", 80.0)],
            )]),
            fail_on: None,
        };
        engine
            .run_qc(
                RunTrigger::Manual,
                &[batch_rule("age_range", "age", "age between 18 and 65")],
                &schema(),
                &store,
                &CancelToken::new(),
            )
            .await
            .unwrap();

        let err = engine.bulk_resolve(&[1, 99], "dmanager", "typo in id list").unwrap_err();
        assert!(err.to_string().contains("99"));

        // Le lot entier est rejeté : #1 n'a pas été résolue au passage
        let open = engine
            .get_violations(&ViolationFilter {
                state: Some(ResolutionState::Open),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(open.len(), 2);
    }

    #[tokio::test]
    async fn test_run_rejected_when_another_process_holds_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qc_state.json");
        let engine = QcEngine::new(&path).unwrap();
        let _other = crate::infrastructure::fs::RunLock::acquire(path.with_extension("lock"))
            .unwrap()
            .unwrap();
        let store = StubStore {
            rows: BTreeMap::new(),
            fail_on: None,
        };

        let err = engine
            .run_qc(RunTrigger::Manual, &[], &schema(), &store, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClinqcError::RunInProgress));
    }

    #[tokio::test]
    async fn test_redetection_after_resolution_creates_a_new_record() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let store = StubStore {
            rows: BTreeMap::from([("age".to_string(), vec![row("SUBJ-001", 70.0)])]),
            fail_on: None,
        };
        let rules = [batch_rule("age_range", "age", "age between 18 and 65")];

        engine
            .run_qc(RunTrigger::Manual, &rules, &schema(), &store, &CancelToken::new())
            .await
            .unwrap();
        engine.resolve(1, "dmanager", "corrected").unwrap();
        engine
            .run_qc(RunTrigger::Manual, &rules, &schema(), &store, &CancelToken::new())
            .await
            .unwrap();

        let all = engine.get_violations(&ViolationFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        let open = engine
            .get_violations(&ViolationFilter {
                state: Some(ResolutionState::Open),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, 2);
    }

    #[tokio::test]
    async fn test_state_survives_engine_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qc_state.json");
        {
            let engine = QcEngine::new(&path).unwrap();
            let store = StubStore {
                rows: BTreeMap::from([("age".to_string(), vec![row("SUBJ-001", 70.0)])]),
                fail_on: None,
            };
            engine
                .run_qc(
                    RunTrigger::Manual,
                    &[batch_rule("age_range", "age", "age between 18 and 65")],
                    &schema(),
                    &store,
                    &CancelToken::new(),
                )
                .await
                .unwrap();
        }
        let reopened = QcEngine::new(&path).unwrap();
        assert_eq!(
            reopened.get_violations(&ViolationFilter::default()).unwrap().len(),
            1
        );
        assert_eq!(reopened.get_run_history(10).unwrap().len(), 1);
    }
}
