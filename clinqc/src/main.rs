// clinqc/src/main.rs

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Setup Logging (Tracing)
    // RUST_LOG=debug clinqc run ... pour voir les détails
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check {
            emit_sql,
            project_dir,
        } => commands::check::execute(emit_sql, project_dir),
        Commands::Run { project_dir } => commands::run::execute(project_dir).await,
        Commands::Validate {
            field,
            value,
            siblings,
            project_dir,
        } => commands::validate::execute(field, value, siblings, project_dir),
        Commands::Violations {
            rule,
            subject,
            state,
            project_dir,
        } => commands::violations::execute(rule, subject, state, project_dir),
        Commands::History { limit, project_dir } => {
            commands::history::execute(limit, project_dir)
        }
        Commands::Resolve {
            ids,
            actor,
            notes,
            false_positive,
            project_dir,
        } => commands::resolve::execute(ids, actor, notes, false_positive, project_dir),
    };

    if let Err(e) = result {
        eprintln!("💥 {}", e);
        std::process::exit(1);
    }
    Ok(())
}
