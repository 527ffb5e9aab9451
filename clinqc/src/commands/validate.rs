// clinqc/src/commands/validate.rs
//
// USE CASE: One-shot real-time validation of a field value, as the data
// entry layer would do on every field change.

use std::collections::HashMap;
use std::path::PathBuf;

use clinqc_core::application::{validate_field, ValidatorCache};
use clinqc_core::domain::codegen::ValidationResult;
use clinqc_core::domain::value::Value;
use clinqc_core::infrastructure::config::{discover_rules, load_project_config};

pub fn execute(
    field: String,
    value: String,
    siblings: String,
    project_dir: PathBuf,
) -> anyhow::Result<()> {
    let config = load_project_config(&project_dir)?;
    let rules = discover_rules(&project_dir, &config)?;

    let cache = ValidatorCache::new();
    let report = cache.load(&rules, &config.dataset);
    for (rule_id, message) in &report.rejected {
        eprintln!("  ⚠️  Rule '{}' rejected: {}", rule_id, message);
    }

    let value = parse_value(&value);
    let siblings: HashMap<String, Value> = serde_json::from_str(&siblings)
        .map_err(|e| anyhow::anyhow!("--siblings must be a JSON object: {}", e))?;

    let outcomes = validate_field(&cache, &field, &value, &siblings);
    if outcomes.is_empty() {
        println!("ℹ️  No real-time rule guards field '{}'", field);
        return Ok(());
    }

    let mut failed = false;
    for outcome in &outcomes {
        match &outcome.result {
            ValidationResult::Pass => {
                println!("  ✅ {} PASS", outcome.rule_id);
            }
            ValidationResult::Fail(message) => {
                failed = true;
                println!("  ❌ {} FAIL ({}): {}", outcome.rule_id, outcome.severity, message);
            }
            ValidationResult::Indeterminate => {
                println!("  ⏳ {} INDETERMINATE (missing inputs)", outcome.rule_id);
            }
        }
    }

    if failed {
        anyhow::bail!("validation failed for field '{}'", field);
    }
    Ok(())
}

/// Un littéral JSON si possible (70, true, null), sinon du texte brut.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Text(raw.to_string()))
}
