// clinqc/src/cli.rs
//
// Single source of truth for all CLI definitions (Clap structs).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clinqc")]
#[command(about = "Clinical data-quality rule compiler and batch QC engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 🔎 Parses and validates every rule file (no execution)
    Check {
        /// Print the rendered SQL and index hints of each batch rule
        #[arg(long)]
        emit_sql: bool,

        /// Project directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// 🚀 Runs all active batch rules against the data store
    Run {
        /// Project directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// ⚡ Validates a single field value through the real-time path
    Validate {
        /// Target field name
        #[arg(long)]
        field: String,

        /// Value to validate (JSON literal or bare text)
        #[arg(long)]
        value: String,

        /// Sibling form values as a JSON object (ex: '{"sex": "Female"}')
        #[arg(long, default_value = "{}")]
        siblings: String,

        /// Project directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// 📋 Lists recorded violations
    Violations {
        /// Filter by rule id
        #[arg(long)]
        rule: Option<String>,

        /// Filter by subject id
        #[arg(long)]
        subject: Option<String>,

        /// Filter by state (open | resolved | false_positive)
        #[arg(long)]
        state: Option<String>,

        /// Project directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// 📚 Shows the QC run history
    History {
        /// Maximum number of runs to show
        #[arg(long, default_value = "10")]
        limit: usize,

        /// Project directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// ✅ Resolves a violation (or flags it as a false positive)
    Resolve {
        /// Violation id(s), comma-separated
        ids: String,

        /// Who performs the resolution
        #[arg(long)]
        actor: String,

        /// Human note recorded with the transition
        #[arg(long)]
        notes: String,

        /// Mark as false positive instead of resolved
        #[arg(long)]
        false_positive: bool,

        /// Project directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
}
