// clinqc-core/src/domain/qc/violation.rs

use crate::domain::error::DomainError;
use crate::domain::rule::Severity;
use crate::domain::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// État de résolution d'une violation. Les deux états fermés sont finaux :
/// une re-détection après résolution crée un nouvel enregistrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    Open,
    Resolved,
    FalsePositive,
}

impl std::fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionState::Open => write!(f, "open"),
            ResolutionState::Resolved => write!(f, "resolved"),
            ResolutionState::FalsePositive => write!(f, "false_positive"),
        }
    }
}

/// Une violation détectée par une exécution batch. Créée uniquement par le
/// moteur QC ; mutée uniquement via le workflow de résolution ; jamais
/// supprimée.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: u64,
    pub rule_id: String,
    pub subject_id: String,
    pub field: String,
    pub visit: Option<String>,
    pub observed_value: Value,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    pub resolution_state: ResolutionState,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
}

impl Violation {
    /// Clé d'upsert : une seule violation ouverte par (règle, sujet, champ).
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.rule_id, &self.subject_id, &self.field)
    }

    pub fn is_open(&self) -> bool {
        self.resolution_state == ResolutionState::Open
    }

    /// open -> resolved. Une note et un acteur humains sont obligatoires.
    pub fn resolve(&mut self, actor: &str, notes: &str) -> Result<(), DomainError> {
        self.close(ResolutionState::Resolved, actor, notes)
    }

    /// open -> false_positive.
    pub fn mark_false_positive(&mut self, actor: &str, notes: &str) -> Result<(), DomainError> {
        self.close(ResolutionState::FalsePositive, actor, notes)
    }

    fn close(
        &mut self,
        next: ResolutionState,
        actor: &str,
        notes: &str,
    ) -> Result<(), DomainError> {
        if !self.is_open() {
            return Err(DomainError::AlreadyClosed {
                id: self.id,
                state: self.resolution_state.to_string(),
            });
        }
        self.resolution_state = next;
        self.resolved_at = Some(Utc::now());
        self.resolved_by = Some(actor.to_string());
        self.resolution_notes = Some(notes.to_string());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn open_violation() -> Violation {
        Violation {
            id: 1,
            rule_id: "age_range".into(),
            subject_id: "SUBJ-001".into(),
            field: "age".into(),
            visit: Some("WEEK2".into()),
            observed_value: Value::Number(70.0),
            severity: Severity::Error,
            detected_at: Utc::now(),
            resolution_state: ResolutionState::Open,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        }
    }

    #[test]
    fn test_resolve_records_actor_and_notes() {
        let mut v = open_violation();
        v.resolve("dmanager", "source document confirmed, age corrected").unwrap();
        assert_eq!(v.resolution_state, ResolutionState::Resolved);
        assert_eq!(v.resolved_by.as_deref(), Some("dmanager"));
        assert!(v.resolved_at.is_some());
    }

    #[test]
    fn test_closed_states_are_final() {
        let mut v = open_violation();
        v.mark_false_positive("dmanager", "protocol waiver on file").unwrap();

        let err = v.resolve("dmanager", "trying to reopen").unwrap_err();
        assert!(matches!(err, DomainError::AlreadyClosed { id: 1, .. }));
        // L'état fermé n'a pas bougé
        assert_eq!(v.resolution_state, ResolutionState::FalsePositive);
    }

    #[test]
    fn test_resolution_state_serde_snake_case() {
        let json = serde_json::to_string(&ResolutionState::FalsePositive).unwrap();
        assert_eq!(json, "\"false_positive\"");
    }
}
