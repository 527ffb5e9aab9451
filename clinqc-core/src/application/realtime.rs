// clinqc-core/src/application/realtime.rs
//
// Frontière d'invocation temps réel : appelée de façon synchrone par la
// couche de saisie à chaque changement de champ ou soumission de formulaire.
// Aucune I/O ici, uniquement le graphe de closures pré-compilé.

use std::collections::HashMap;

use serde::Serialize;

use crate::application::cache::ValidatorCache;
use crate::domain::codegen::realtime::{FieldValues, ValidationResult};
use crate::domain::rule::Severity;
use crate::domain::value::Value;

/// Verdict d'une règle pour un champ.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldOutcome {
    pub rule_id: String,
    pub field: String,
    pub severity: Severity,
    pub result: ValidationResult,
}

impl FieldOutcome {
    pub fn is_fail(&self) -> bool {
        matches!(self.result, ValidationResult::Fail(_))
    }
}

/// Agrégat de tous les verdicts d'un formulaire. `Indeterminate` ne bloque
/// pas la soumission : un champ pas encore saisi n'est pas une violation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormValidationResult {
    pub outcomes: Vec<FieldOutcome>,
    pub passed: bool,
}

impl FormValidationResult {
    pub fn failures(&self) -> impl Iterator<Item = &FieldOutcome> {
        self.outcomes.iter().filter(|o| o.is_fail())
    }
}

/// Valide un champ qui vient de changer, avec les valeurs voisines du
/// formulaire comme contexte cross-field.
pub fn validate_field(
    cache: &ValidatorCache,
    field: &str,
    value: &Value,
    sibling_values: &FieldValues,
) -> Vec<FieldOutcome> {
    let validators = match cache.get(field) {
        Some(v) => v,
        None => return Vec::new(),
    };

    let mut values: HashMap<String, Value> = sibling_values.clone();
    values.insert(field.to_string(), value.clone());

    validators
        .iter()
        .map(|cached| FieldOutcome {
            rule_id: cached.rule_id.clone(),
            field: field.to_string(),
            severity: cached.severity,
            result: (cached.validator)(&values),
        })
        .collect()
}

/// Valide un formulaire complet : toutes les règles de tous les champs
/// couverts par le cache, contre le même jeu de valeurs.
pub fn validate_form(cache: &ValidatorCache, values: &FieldValues) -> FormValidationResult {
    let mut outcomes = Vec::new();
    let mut fields = cache.fields();
    fields.sort(); // ordre stable pour l'affichage

    for field in fields {
        if let Some(validators) = cache.get(&field) {
            for cached in &validators {
                outcomes.push(FieldOutcome {
                    rule_id: cached.rule_id.clone(),
                    field: field.clone(),
                    severity: cached.severity,
                    result: (cached.validator)(values),
                });
            }
        }
    }

    let passed = !outcomes.iter().any(FieldOutcome::is_fail);
    FormValidationResult { outcomes, passed }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::rule::{Rule, RuleContext};
    use crate::domain::schema::{DatasetSchema, FieldType};
    use std::collections::BTreeMap;

    fn schema() -> DatasetSchema {
        let mut fields = BTreeMap::new();
        fields.insert("age".to_string(), FieldType::Number);
        fields.insert("sex".to_string(), FieldType::Text);
        fields.insert("pregnant".to_string(), FieldType::Bool);
        DatasetSchema {
            table: "observations".into(),
            subject_column: "subject_id".into(),
            visit_column: "visit".into(),
            fields,
            visits: vec![],
        }
    }

    fn loaded_cache() -> ValidatorCache {
        let cache = ValidatorCache::new();
        let rules = vec![
            Rule {
                id: "age_range".into(),
                field: "age".into(),
                rule: "age between 18 and 65".into(),
                context: RuleContext::RealTime,
                severity: Severity::Error,
                active: true,
                description: Some("Age must be between 18 and 65".into()),
            },
            Rule {
                id: "pregnancy_check".into(),
                field: "pregnant".into(),
                rule: "if sex == 'Female' then required endif".into(),
                context: RuleContext::RealTime,
                severity: Severity::Warning,
                active: true,
                description: None,
            },
        ];
        let report = cache.load(&rules, &schema());
        assert_eq!(report.loaded, 2);
        cache
    }

    #[test]
    fn test_validate_field_reports_failure_with_rule_context() {
        let cache = loaded_cache();
        let outcomes =
            validate_field(&cache, "age", &Value::Number(70.0), &FieldValues::new());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].rule_id, "age_range");
        assert!(outcomes[0].is_fail());
    }

    #[test]
    fn test_validate_field_without_rules_is_empty() {
        let cache = loaded_cache();
        let outcomes =
            validate_field(&cache, "sex", &Value::Text("Male".into()), &FieldValues::new());
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_sibling_values_feed_cross_field_rules() {
        let cache = loaded_cache();
        let mut siblings = FieldValues::new();
        siblings.insert("sex".to_string(), Value::Text("Female".into()));
        // pregnant est null -> la règle required échoue
        let outcomes = validate_field(&cache, "pregnant", &Value::Null, &siblings);
        assert!(outcomes[0].is_fail());
    }

    #[test]
    fn test_form_passes_when_indeterminate_only() {
        let cache = loaded_cache();
        // Aucun champ saisi : age est Indeterminate, pregnant dépend de sex
        // qui est absent (condition Unknown -> Indeterminate).
        let result = validate_form(&cache, &FieldValues::new());
        assert!(result.passed);
        assert!(result
            .outcomes
            .iter()
            .all(|o| o.result == ValidationResult::Indeterminate));
    }

    #[test]
    fn test_form_fails_on_any_definitive_violation() {
        let cache = loaded_cache();
        let mut values = FieldValues::new();
        values.insert("age".to_string(), Value::Number(17.0));
        values.insert("sex".to_string(), Value::Text("Male".into()));
        let result = validate_form(&cache, &values);
        assert!(!result.passed);
        assert_eq!(result.failures().count(), 1);
    }
}
