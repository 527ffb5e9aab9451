// clinqc-core/src/domain/rule.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a rule executes: pre-compiled closure at data entry, or a query
/// plan against the full dataset during the nightly QC run.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RuleContext {
    #[default]
    RealTime,
    Batch,
}

impl fmt::Display for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleContext::RealTime => write!(f, "real-time"),
            RuleContext::Batch => write!(f, "batch"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// An authored rule, as stored in configuration. Immutable once compiled:
/// edits replace the whole record and the compiled artifacts are rebuilt,
/// never patched in place.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Rule {
    pub id: String,

    /// The field this rule guards (cache key on the real-time path).
    pub field: String,

    /// DSL source text, authored by a non-programmer.
    pub rule: String,

    #[serde(default)]
    pub context: RuleContext,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default = "default_active")]
    pub active: bool,

    pub description: Option<String>,
}

fn default_active() -> bool {
    true
}
