// clinqc/src/commands/run.rs
//
// USE CASE: Execute all active batch rules against the data store.

use std::path::{Path, PathBuf};

use comfy_table::Table;

use clinqc_core::application::{CancelToken, QcEngine};
use clinqc_core::domain::qc::run::{QcRun, RuleOutcome, RunTrigger};
use clinqc_core::infrastructure::adapters::duckdb::DuckDbStore;
use clinqc_core::infrastructure::config::{discover_rules, load_project_config};
use clinqc_core::ports::store::DataStore;

pub async fn execute(project_dir: PathBuf) -> anyhow::Result<()> {
    // A. Config + règles (Infra)
    println!("⚙️  Loading configuration...");
    let config = load_project_config(&project_dir)?;
    println!("   Project: {}", config.name);
    let rules = discover_rules(&project_dir, &config)?;

    // B. Store (DuckDB) + enregistrement des sources
    let store = DuckDbStore::new(&config.store.path)?;
    println!("🔌 Registering sources...");
    for source in &config.store.sources {
        let raw_path = Path::new(&source.path);
        let absolute_path = if raw_path.is_absolute() {
            raw_path.to_path_buf()
        } else {
            project_dir.join(raw_path)
        };
        if absolute_path.exists() {
            store
                .register_source(&source.name, &absolute_path.to_string_lossy())
                .await?;
        } else {
            println!("   ⚠️  Warning: Source file not found at {:?}", absolute_path);
        }
    }

    // C. Moteur QC (Application)
    let state_path = config.qc_state_path(&project_dir);
    if let Some(parent) = state_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let engine = QcEngine::new(&state_path)?;

    let run = engine
        .run_qc(
            RunTrigger::Manual,
            &rules,
            &config.dataset,
            &store,
            &CancelToken::new(),
        )
        .await?;

    print_outcomes(&run);

    if run.rules_failed > 0 {
        anyhow::bail!("{} rule(s) failed during the run", run.rules_failed);
    }
    Ok(())
}

fn print_outcomes(run: &QcRun) {
    let mut table = Table::new();
    table.set_header(vec!["Rule", "Status", "Detail"]);
    for outcome in &run.outcomes {
        match outcome {
            RuleOutcome::Executed { rule_id, violations } => {
                table.add_row(vec![
                    rule_id.clone(),
                    "executed".to_string(),
                    format!("{} violation(s)", violations),
                ]);
            }
            RuleOutcome::Failed { rule_id, message } => {
                table.add_row(vec![rule_id.clone(), "failed".to_string(), message.clone()]);
            }
            RuleOutcome::Skipped { rule_id } => {
                table.add_row(vec![rule_id.clone(), "skipped".to_string(), String::new()]);
            }
        }
    }
    println!("{table}");
}
