// clinqc-core/src/domain/qc/run.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunTrigger::Scheduled => write!(f, "scheduled"),
            RunTrigger::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Au moins une règle a échoué à la compilation ou à l'exécution ;
    /// les autres règles ont tourné normalement.
    CompletedWithErrors,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::CompletedWithErrors => write!(f, "completed_with_errors"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Résultat par règle d'une exécution batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RuleOutcome {
    Executed {
        rule_id: String,
        violations: usize,
    },
    Failed {
        rule_id: String,
        message: String,
    },
    /// Annulation coopérative : la règle n'a pas démarré.
    Skipped { rule_id: String },
}

impl RuleOutcome {
    pub fn rule_id(&self) -> &str {
        match self {
            RuleOutcome::Executed { rule_id, .. }
            | RuleOutcome::Failed { rule_id, .. }
            | RuleOutcome::Skipped { rule_id } => rule_id,
        }
    }
}

/// Trace immuable d'une exécution batch, persistée même quand aucune
/// violation n'est trouvée.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcRun {
    pub run_id: u64,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub rules_executed: usize,
    pub rules_failed: usize,
    pub violations_found: usize,
    pub status: RunStatus,
    pub outcomes: Vec<RuleOutcome>,
}
