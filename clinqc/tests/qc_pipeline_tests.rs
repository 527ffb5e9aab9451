// clinqc/tests/qc_pipeline_tests.rs
//
// End-to-end tests of the CLI: project fixtures are written inline into a
// temp directory, then the binary is driven exactly like a user would.

use anyhow::Result;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

const PROJECT_CONFIG: &str = r#"
name: demo_study
dataset:
  table: observations
  subject_column: subject_id
  visit_column: visit
  visits: [BASELINE, WEEK2]
  fields:
    age: number
    weight: number
    sex: text
    pregnant: text
store:
  engine: duckdb
  path: ":memory:"
  sources:
    - name: observations
      path: data/observations.csv
"#;

const RULES: &str = r#"
rules:
  - id: age_range
    field: age
    rule: "age between 18 and 65"
    context: batch
    severity: error
    description: "Age must be between 18 and 65"
  - id: weight_drift
    field: weight
    rule: "weight within 10% of weight@BASELINE"
    context: batch
    severity: warning
  - id: age_entry
    field: age
    rule: "age between 18 and 65"
    context: real-time
"#;

const DATA: &str = "\
subject_id,visit,age,weight,sex,pregnant
S1,BASELINE,70,100,Male,
S1,WEEK2,70,115,Male,
S2,BASELINE,40,100,Female,No
S2,WEEK2,40,105,Female,No
";

/// Abstraction for managing the clinqc test environment.
struct QcTestEnv {
    _tmp: TempDir,
    root: PathBuf,
}

impl QcTestEnv {
    fn new() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let root = tmp.path().to_path_buf();

        fs::write(root.join("clinqc.yaml"), PROJECT_CONFIG)?;
        fs::create_dir_all(root.join("rules"))?;
        fs::write(root.join("rules/demo.yml"), RULES)?;
        fs::create_dir_all(root.join("data"))?;
        fs::write(root.join("data/observations.csv"), DATA)?;

        Ok(Self { _tmp: tmp, root })
    }

    fn clinqc(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("clinqc"));
        cmd.current_dir(&self.root);
        cmd
    }
}

#[test]
fn test_check_accepts_valid_rules() -> Result<()> {
    let env = QcTestEnv::new()?;
    env.clinqc()
        .args(["check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All rules valid"));
    Ok(())
}

#[test]
fn test_check_emit_sql_prints_plans_and_hints() -> Result<()> {
    let env = QcTestEnv::new()?;
    env.clinqc()
        .args(["check", "--emit-sql"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SQL: SELECT"))
        .stdout(predicate::str::contains("index on observations"));
    Ok(())
}

#[test]
fn test_check_rejects_malformed_rule_with_context() -> Result<()> {
    let env = QcTestEnv::new()?;
    fs::write(
        env.root.join("rules/broken.yml"),
        r#"
rules:
  - id: broken_rule
    field: age
    rule: "age between 18 and"
    context: batch
"#,
    )?;

    env.clinqc()
        .args(["check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("broken_rule"));
    Ok(())
}

#[test]
fn test_run_detects_violations_end_to_end() -> Result<()> {
    let env = QcTestEnv::new()?;

    // age_range: S1 hors bornes aux deux visites; weight_drift: S1 WEEK2
    env.clinqc()
        .args(["run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("age_range"))
        .stdout(predicate::str::contains("weight_drift"));

    // L'upsert par (règle, sujet, champ) regroupe les deux visites de S1
    // pour age_range en un seul enregistrement.
    env.clinqc()
        .args(["violations"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 violation(s)"))
        .stdout(predicate::str::contains("S1"));

    // S2 est dans les clous partout
    env.clinqc()
        .args(["violations", "--subject", "S2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No violation matches"));

    env.clinqc()
        .args(["history"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));
    Ok(())
}

#[test]
fn test_rerun_does_not_duplicate_violations() -> Result<()> {
    let env = QcTestEnv::new()?;
    env.clinqc().args(["run"]).assert().success();
    env.clinqc().args(["run"]).assert().success();

    env.clinqc()
        .args(["violations"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 violation(s)"));
    Ok(())
}

#[test]
fn test_resolution_workflow_is_forward_only() -> Result<()> {
    let env = QcTestEnv::new()?;
    env.clinqc().args(["run"]).assert().success();

    env.clinqc()
        .args(["resolve", "1", "--actor", "dmanager", "--notes", "source doc checked"])
        .assert()
        .success()
        .stdout(predicate::str::contains("resolved"));

    env.clinqc()
        .args(["violations", "--state", "resolved"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 violation(s)"));

    // Un état fermé est final
    env.clinqc()
        .args([
            "resolve", "1", "--actor", "dmanager", "--notes", "again",
            "--false-positive",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already"));
    Ok(())
}

#[test]
fn test_validate_runs_the_realtime_path() -> Result<()> {
    let env = QcTestEnv::new()?;

    env.clinqc()
        .args(["validate", "--field", "age", "--value", "40"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS"));

    env.clinqc()
        .args(["validate", "--field", "age", "--value", "70"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAIL"));

    // Champ non couvert par une règle temps réel
    env.clinqc()
        .args(["validate", "--field", "sex", "--value", "Male"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No real-time rule"));
    Ok(())
}
