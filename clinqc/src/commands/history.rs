// clinqc/src/commands/history.rs
//
// USE CASE: Show the QC run history, latest first.

use std::path::PathBuf;

use comfy_table::Table;

use clinqc_core::application::QcEngine;
use clinqc_core::infrastructure::config::load_project_config;

pub fn execute(limit: usize, project_dir: PathBuf) -> anyhow::Result<()> {
    let config = load_project_config(&project_dir)?;
    let engine = QcEngine::new(config.qc_state_path(&project_dir))?;

    let runs = engine.get_run_history(limit)?;
    if runs.is_empty() {
        println!("ℹ️  No QC run recorded yet. Try 'clinqc run'.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Run", "Trigger", "Started", "Duration", "Rules", "Failed", "Violations", "Status",
    ]);
    for run in &runs {
        table.add_row(vec![
            run.run_id.to_string(),
            run.trigger.to_string(),
            run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            format!("{:.2}s", run.duration_ms as f64 / 1000.0),
            run.rules_executed.to_string(),
            run.rules_failed.to_string(),
            run.violations_found.to_string(),
            run.status.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
