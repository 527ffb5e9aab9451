// clinqc/src/commands/check.rs
//
// USE CASE: Validate every rule file without executing anything.
// A rule that fails here never enters the cache nor the QC schedule.

use std::path::PathBuf;

use clinqc_core::application::compile;
use clinqc_core::infrastructure::config::{discover_rules, load_project_config};

pub fn execute(emit_sql: bool, project_dir: PathBuf) -> anyhow::Result<()> {
    let config = load_project_config(&project_dir)?;
    let rules = discover_rules(&project_dir, &config)?;

    println!("🔎 Checking {} rule(s) for '{}'...", rules.len(), config.name);

    let mut failures = 0usize;
    for rule in &rules {
        match compile(rule, &config.dataset) {
            Ok(compiled) => {
                println!("  ✅ {} ({})", rule.id, rule.context);
                if let Some(sql) = &compiled.sql {
                    if emit_sql {
                        println!("     SQL: {}", sql);
                        if let Some(plan) = &compiled.plan {
                            for hint in &plan.index_hints {
                                println!(
                                    "     💡 index on {}({}) [{}]",
                                    hint.table,
                                    hint.columns.join(", "),
                                    hint.reason
                                );
                            }
                        }
                    } else {
                        tracing::debug!("SQL for '{}': {}", rule.id, sql);
                    }
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("  ❌ {}", rule.id);
                // Rapport miette complet (offset, aide, erreurs liées)
                eprintln!("{:?}", miette::Report::new(e));
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} invalid rule(s)", failures);
    }
    println!("✨ All rules valid.");
    Ok(())
}
