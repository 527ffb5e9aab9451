// clinqc-core/src/infrastructure/adapters/duckdb.rs

use async_trait::async_trait;
use duckdb::{Config, Connection};
use std::sync::{Arc, Mutex};

// Imports Hexagonaux
use crate::domain::codegen::batch::QueryPlan;
use crate::domain::codegen::render_sql;
use crate::domain::value::Value;
use crate::error::ClinqcError;
use crate::infrastructure::error::{DatabaseError, InfrastructureError};
use crate::ports::store::{DataStore, PlanRow};

pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    pub fn new(db_path: &str) -> Result<Self, InfrastructureError> {
        let config = Config::default();

        let conn = if db_path == ":memory:" {
            Connection::open_in_memory_with_flags(config)?
        } else {
            Connection::open_with_flags(db_path, config)?
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Exécution SQL brute (création de tables de test, maintenance).
    pub fn execute_raw(&self, query: &str) -> Result<(), ClinqcError> {
        let conn = self.lock_conn()?;
        conn.execute_batch(query).map_err(db_err)?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ClinqcError> {
        self.conn.lock().map_err(|_| {
            ClinqcError::Infrastructure(InfrastructureError::Io(std::io::Error::other(
                "DuckDB Mutex Poisoned",
            )))
        })
    }
}

fn db_err(e: duckdb::Error) -> ClinqcError {
    ClinqcError::Infrastructure(InfrastructureError::Database(DatabaseError::DuckDB(e)))
}

/// Conversion des valeurs DuckDB vers le modèle du domaine. Les types non
/// couverts par la grammaire (blobs, intervalles...) passent en texte.
fn to_domain(v: duckdb::types::Value) -> Value {
    use duckdb::types::Value as Dv;
    match v {
        Dv::Null => Value::Null,
        Dv::Boolean(b) => Value::Bool(b),
        Dv::TinyInt(i) => Value::Number(i as f64),
        Dv::SmallInt(i) => Value::Number(i as f64),
        Dv::Int(i) => Value::Number(i as f64),
        Dv::BigInt(i) => Value::Number(i as f64),
        Dv::HugeInt(i) => Value::Number(i as f64),
        Dv::UTinyInt(i) => Value::Number(i as f64),
        Dv::USmallInt(i) => Value::Number(i as f64),
        Dv::UInt(i) => Value::Number(i as f64),
        Dv::UBigInt(i) => Value::Number(i as f64),
        Dv::Float(f) => Value::Number(f as f64),
        Dv::Double(f) => Value::Number(f),
        Dv::Text(s) => Value::Text(s),
        Dv::Date32(days) => {
            let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1);
            match epoch {
                Some(e) => Value::Date(e + chrono::Duration::days(days as i64)),
                None => Value::Null,
            }
        }
        other => Value::Text(format!("{:?}", other)),
    }
}

#[async_trait]
impl DataStore for DuckDbStore {
    async fn execute_plan(&self, plan: &QueryPlan) -> Result<Vec<PlanRow>, ClinqcError> {
        let sql = render_sql(plan)?;
        tracing::debug!("⚡ Executing plan SQL: {}", sql);

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let mut rows = stmt.query([]).map_err(db_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let subject: duckdb::types::Value = row.get(0).map_err(db_err)?;
            let visit: duckdb::types::Value = row.get(1).map_err(db_err)?;
            let observed: duckdb::types::Value = row.get(2).map_err(db_err)?;

            let visit = match to_domain(visit) {
                Value::Null => None,
                v => Some(v.to_string()),
            };
            out.push(PlanRow {
                subject_id: to_domain(subject).to_string(),
                visit,
                observed: to_domain(observed),
            });
        }
        Ok(out)
    }

    async fn register_source(&self, name: &str, path: &str) -> Result<(), ClinqcError> {
        let query = format!(
            "CREATE OR REPLACE VIEW \"{}\" AS SELECT * FROM read_csv_auto('{}')",
            name, path
        );
        let conn = self.lock_conn()?;
        conn.execute(&query, []).map(|_rows| ()).map_err(db_err)
    }

    fn engine_name(&self) -> &str {
        "duckdb"
    }
}
