//! The read-only executor (spec §4.H). Opens a transaction declared
//! read-only for its whole duration, sets a statement timeout, runs the
//! rewritten query, and always releases the connection — rolling back on
//! any error after the transaction begins rather than leaking it.

use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo};
use sqg_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticResult};

pub struct Executor {
    pool: PgPool,
}

impl Executor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs `sql` with `params` bound positionally, inside a read-only
    /// transaction bounded by `statement_timeout_ms`.
    #[tracing::instrument(skip(self, params), fields(statement_timeout_ms))]
    pub async fn execute_read_only(
        &self,
        sql: &str,
        params: &[String],
        statement_timeout_ms: u64,
    ) -> DiagnosticResult<Vec<Map<String, Value>>> {
        // Defense in depth: if anything upstream of the orchestrator ever
        // hands the executor SQL that bypassed the rewrite stages, refuse
        // it here too.
        sqg_guard::check_rewrite_output(sql)?;

        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        if let Err(err) = run_transaction(&mut tx, sql, params, statement_timeout_ms).await {
            let _ = tx.rollback().await;
            return Err(err);
        }

        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(param);
        }

        let rows = match query.fetch_all(&mut *tx).await {
            Ok(rows) => rows,
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(map_db_error(err));
            }
        };

        tx.commit().await.map_err(map_db_error)?;

        rows.iter().map(row_to_map).collect()
    }
}

async fn run_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    _sql: &str,
    _params: &[String],
    statement_timeout_ms: u64,
) -> DiagnosticResult<()> {
    sqlx::query("SET TRANSACTION READ ONLY")
        .execute(&mut **tx)
        .await
        .map_err(map_db_error)?;

    sqlx::query(&format!("SET statement_timeout = {statement_timeout_ms}"))
        .execute(&mut **tx)
        .await
        .map_err(map_db_error)?;

    Ok(())
}

fn row_to_map(row: &PgRow) -> DiagnosticResult<Map<String, Value>> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_value(row, index, column.type_info().name()));
    }
    Ok(map)
}

fn decode_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Number(v.into()))
            .unwrap_or(Value::Null),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Number(v.into()))
            .unwrap_or(Value::Null),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Number(v.into()))
            .unwrap_or(Value::Null),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .and_then(|v| serde_json::Number::from_f64(v as f64))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        // NUMERIC has no exact f64 representation; decode as text to avoid
        // silently losing precision.
        "NUMERIC" => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "UUID" => row
            .try_get::<Option<sqlx::types::Uuid>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<sqlx::types::chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<sqlx::types::chrono::DateTime<sqlx::types::chrono::Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<Option<sqlx::types::chrono::NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(index)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(|bytes| Value::String(hex_encode(&bytes)))
            .unwrap_or(Value::Null),
        // Anything else: fall back to text decoding rather than erroring —
        // the row set is for display, not further computation.
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn map_db_error(err: sqlx::Error) -> Diagnostic {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            if DiagnosticCode::SCHEMA_SQLSTATES.contains(&code.as_ref()) {
                return Diagnostic::new(DiagnosticCode::DbSchemaError, db_err.message().to_string());
            }
        }
        let message = db_err.message().to_lowercase();
        if message.contains("column") || message.contains("relation") || message.contains("syntax error")
        {
            return Diagnostic::new(DiagnosticCode::DbSchemaError, db_err.message().to_string());
        }
    }
    Diagnostic::new(DiagnosticCode::DbOther, err.to_string())
}
