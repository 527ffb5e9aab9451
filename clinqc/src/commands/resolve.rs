// clinqc/src/commands/resolve.rs
//
// USE CASE: Resolution workflow. Transitions are forward-only and carry a
// human-attributable actor + note.

use std::path::PathBuf;

use clinqc_core::application::QcEngine;
use clinqc_core::infrastructure::config::load_project_config;

pub fn execute(
    ids: String,
    actor: String,
    notes: String,
    false_positive: bool,
    project_dir: PathBuf,
) -> anyhow::Result<()> {
    let config = load_project_config(&project_dir)?;
    let engine = QcEngine::new(config.qc_state_path(&project_dir))?;

    let ids = parse_ids(&ids)?;

    if false_positive {
        for id in &ids {
            let v = engine.mark_false_positive(*id, &actor, &notes)?;
            println!("  🚫 Violation #{} marked false positive ({})", v.id, v.rule_id);
        }
    } else if ids.len() == 1 {
        let v = engine.resolve(ids[0], &actor, &notes)?;
        println!("  ✅ Violation #{} resolved ({})", v.id, v.rule_id);
    } else {
        let closed = engine.bulk_resolve(&ids, &actor, &notes)?;
        println!("  ✅ {} violation(s) resolved", closed);
    }
    Ok(())
}

fn parse_ids(raw: &str) -> anyhow::Result<Vec<u64>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("invalid violation id '{}'", part.trim()))
        })
        .collect()
}
