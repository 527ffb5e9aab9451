// clinqc/src/commands/violations.rs
//
// USE CASE: List recorded violations for the dashboard / data manager.

use std::path::PathBuf;

use comfy_table::Table;

use clinqc_core::application::{QcEngine, ViolationFilter};
use clinqc_core::domain::qc::violation::ResolutionState;
use clinqc_core::infrastructure::config::load_project_config;

pub fn execute(
    rule: Option<String>,
    subject: Option<String>,
    state: Option<String>,
    project_dir: PathBuf,
) -> anyhow::Result<()> {
    let config = load_project_config(&project_dir)?;
    let engine = QcEngine::new(config.qc_state_path(&project_dir))?;

    let state = match state.as_deref() {
        None => None,
        Some("open") => Some(ResolutionState::Open),
        Some("resolved") => Some(ResolutionState::Resolved),
        Some("false_positive") => Some(ResolutionState::FalsePositive),
        Some(other) => anyhow::bail!(
            "unknown state '{}' (expected open | resolved | false_positive)",
            other
        ),
    };

    let filter = ViolationFilter {
        rule_id: rule,
        subject_id: subject,
        state,
        severity: None,
    };
    let violations = engine.get_violations(&filter)?;

    if violations.is_empty() {
        println!("✨ No violation matches the filter.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "ID", "Rule", "Subject", "Field", "Visit", "Observed", "Severity", "State", "Detected",
    ]);
    for v in &violations {
        table.add_row(vec![
            v.id.to_string(),
            v.rule_id.clone(),
            v.subject_id.clone(),
            v.field.clone(),
            v.visit.clone().unwrap_or_default(),
            v.observed_value.to_string(),
            v.severity.to_string(),
            v.resolution_state.to_string(),
            v.detected_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    println!("{table}");
    println!("📋 {} violation(s)", violations.len());
    Ok(())
}
