// clinqc-core/src/application/cache.rs
//
// Cache des validateurs temps réel. Lecture très fréquente (chaque frappe
// côté saisie), écriture rare (reload de configuration). Les lecteurs ne
// voient jamais un cache à moitié mis à jour : le reload construit un
// snapshot complet puis échange le pointeur d'un coup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{info, warn};

use crate::application::compiler;
use crate::domain::codegen::realtime::Validator;
use crate::domain::rule::{Rule, RuleContext, Severity};
use crate::domain::schema::DatasetSchema;

/// Un validateur prêt à l'emploi, avec le contexte de la règle d'origine.
#[derive(Clone)]
pub struct CachedValidator {
    pub rule_id: String,
    pub severity: Severity,
    pub validator: Validator,
}

/// Snapshot immuable : plusieurs règles peuvent viser le même champ.
#[derive(Default)]
struct Snapshot {
    validators: HashMap<String, Vec<CachedValidator>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub fields: usize,
    pub validators: usize,
    pub hits: u64,
    pub misses: u64,
    pub reloads: u64,
}

/// Compte rendu d'un chargement : les règles rejetées n'entrent jamais
/// dans le cache, mais ne bloquent pas les autres.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
    pub rejected: Vec<(String, String)>,
}

pub struct ValidatorCache {
    snapshot: RwLock<Arc<Snapshot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    reloads: AtomicU64,
}

impl Default for ValidatorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidatorCache {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
        }
    }

    /// (Re)charge le cache depuis la configuration. Seules les règles
    /// `real-time` actives sont compilées ; les règles invalides sont
    /// rapportées et ignorées.
    pub fn load(&self, rules: &[Rule], schema: &DatasetSchema) -> LoadReport {
        let mut report = LoadReport::default();
        let mut validators: HashMap<String, Vec<CachedValidator>> = HashMap::new();

        for rule in rules {
            if !rule.active || rule.context != RuleContext::RealTime {
                report.skipped += 1;
                continue;
            }
            match compiler::compile(rule, schema) {
                Ok(compiled) => {
                    // compile() garantit un validateur pour le contexte real-time
                    if let Some(validator) = compiled.validator {
                        validators.entry(rule.field.clone()).or_default().push(
                            CachedValidator {
                                rule_id: rule.id.clone(),
                                severity: rule.severity,
                                validator,
                            },
                        );
                        report.loaded += 1;
                    }
                }
                Err(e) => {
                    warn!("⚠️  Rule '{}' rejected: {}", rule.id, e);
                    report.rejected.push((rule.id.clone(), e.to_string()));
                }
            }
        }

        let next = Arc::new(Snapshot { validators });
        // Échange atomique du snapshot complet
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = next;
        }
        self.reloads.fetch_add(1, Ordering::Relaxed);

        info!(
            "🧠 Validator cache loaded: {} validator(s), {} rejected",
            report.loaded,
            report.rejected.len()
        );
        report
    }

    /// Accès direct par champ cible. Pas de scan, pas de re-parse.
    pub fn get(&self, field: &str) -> Option<Vec<CachedValidator>> {
        let snapshot = match self.snapshot.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(_) => return None,
        };
        match snapshot.validators.get(field) {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(v.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Champs actuellement couverts par le cache.
    pub fn fields(&self) -> Vec<String> {
        match self.snapshot.read() {
            Ok(guard) => guard.validators.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Retire les validateurs d'un champ (copie du snapshot moins l'entrée,
    /// puis échange — les lecteurs en vol gardent l'ancien snapshot).
    pub fn invalidate(&self, field: &str) {
        let current = match self.snapshot.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(_) => return,
        };
        let mut validators = current.validators.clone();
        validators.remove(field);
        let next = Arc::new(Snapshot { validators });
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = next;
        }
    }

    pub fn stats(&self) -> CacheStats {
        let (fields, validators) = match self.snapshot.read() {
            Ok(guard) => (
                guard.validators.len(),
                guard.validators.values().map(Vec::len).sum(),
            ),
            Err(_) => (0, 0),
        };
        CacheStats {
            fields,
            validators,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::codegen::realtime::FieldValues;
    use crate::domain::schema::FieldType;
    use crate::domain::value::Value;
    use std::collections::BTreeMap;

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

    fn rule(id: &str, field: &str, text: &str, context: RuleContext, active: bool) -> Rule {
        Rule {
            id: id.into(),
            field: field.into(),
            rule: text.into(),
            context,
            severity: Severity::Error,
            active,
            description: None,
        }
    }

    #[test]
    fn test_load_compiles_only_active_realtime_rules() {
        let cache = ValidatorCache::new();
        let rules = vec![
            rule("age_range", "age", "age between 18 and 65", RuleContext::RealTime, true),
            rule("age_batch", "age", "age > 0", RuleContext::Batch, true),
            rule("age_off", "age", "age < 120", RuleContext::RealTime, false),
        ];
        let report = cache.load(&rules, &schema());
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 2);
        assert!(report.rejected.is_empty());
        assert_eq!(cache.get("age").unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_rule_is_rejected_not_cached() {
        let cache = ValidatorCache::new();
        let rules = vec![
            rule("bad", "age", "age between 18 and", RuleContext::RealTime, true),
            rule("good", "age", "age >= 0", RuleContext::RealTime, true),
        ];
        let report = cache.load(&rules, &schema());
        assert_eq!(report.loaded, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, "bad");
        // La règle valide est bien servie
        assert_eq!(cache.get("age").unwrap().len(), 1);
    }

    #[test]
    fn test_reload_swaps_the_whole_snapshot() {
        let cache = ValidatorCache::new();
        cache.load(
            &[rule("v1", "age", "age > 0", RuleContext::RealTime, true)],
            &schema(),
        );
        assert!(cache.get("age").is_some());

        // Le reload remplace tout : "age" disparaît, "weight" apparaît
        cache.load(
            &[rule("v2", "weight", "weight > 0", RuleContext::RealTime, true)],
            &schema(),
        );
        assert!(cache.get("age").is_none());
        assert!(cache.get("weight").is_some());
        assert_eq!(cache.stats().reloads, 2);
    }

    #[test]
    fn test_invalidate_removes_one_field_only() {
        let cache = ValidatorCache::new();
        cache.load(
            &[
                rule("a", "age", "age > 0", RuleContext::RealTime, true),
                rule("w", "weight", "weight > 0", RuleContext::RealTime, true),
            ],
            &schema(),
        );
        cache.invalidate("age");
        assert!(cache.get("age").is_none());
        assert!(cache.get("weight").is_some());
    }

    #[test]
    fn test_cached_validator_evaluates() {
        let cache = ValidatorCache::new();
        cache.load(
            &[rule("age_range", "age", "age between 18 and 65", RuleContext::RealTime, true)],
            &schema(),
        );
        let cached = cache.get("age").unwrap();
        let mut values = FieldValues::new();
        values.insert("age".to_string(), Value::Number(70.0));
        assert!(!(cached[0].validator)(&values).is_pass());
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = ValidatorCache::new();
        cache.load(
            &[rule("a", "age", "age > 0", RuleContext::RealTime, true)],
            &schema(),
        );
        let _ = cache.get("age");
        let _ = cache.get("nope");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.fields, 1);
    }
}
