// Execution context rows: one row per key, typed value columns

use crate::error::map_sqlx_error;
use chunkline_core::domain::{ContextValue, ExecutionContext, ExecutionId};
use chunkline_core::error::{BatchError, Result};
use sqlx::SqliteConnection;

/// Owner kind of a context row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContextKind {
    Job,
    Step,
}

impl ContextKind {
    fn as_str(self) -> &'static str {
        match self {
            ContextKind::Job => "JOB",
            ContextKind::Step => "STEP",
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ContextRow {
    key: String,
    type_tag: String,
    string_value: Option<String>,
    long_value: Option<i64>,
    double_value: Option<f64>,
    object_value: Option<String>,
}

impl ContextRow {
    fn into_entry(self) -> Result<(String, ContextValue)> {
        let ContextRow {
            key,
            type_tag,
            string_value,
            long_value,
            double_value,
            object_value,
        } = self;
        let value = match type_tag.as_str() {
            "STRING" => string_value.map(ContextValue::String),
            "LONG" => long_value.map(ContextValue::Long),
            "DOUBLE" => double_value.map(ContextValue::Double),
            "OBJECT" => match object_value {
                Some(json) => Some(ContextValue::Object(serde_json::from_str(&json)?)),
                None => None,
            },
            _ => None,
        };
        match value {
            Some(value) => Ok((key, value)),
            None => Err(BatchError::Database(format!(
                "Corrupt execution context entry '{}' (type {})",
                key, type_tag
            ))),
        }
    }
}

pub(crate) async fn load_context(
    conn: &mut SqliteConnection,
    execution_id: ExecutionId,
    kind: ContextKind,
) -> Result<ExecutionContext> {
    let rows: Vec<ContextRow> = sqlx::query_as(
        r#"
        SELECT key, type_tag, string_value, long_value, double_value, object_value
        FROM execution_context
        WHERE execution_id = ? AND kind = ?
        "#,
    )
    .bind(execution_id)
    .bind(kind.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    rows.into_iter().map(ContextRow::into_entry).collect()
}

/// Replace the stored context with `context`. Callers provide the transaction.
pub(crate) async fn write_context(
    conn: &mut SqliteConnection,
    execution_id: ExecutionId,
    kind: ContextKind,
    context: &ExecutionContext,
) -> Result<()> {
    sqlx::query("DELETE FROM execution_context WHERE execution_id = ? AND kind = ?")
        .bind(execution_id)
        .bind(kind.as_str())
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    for (key, value) in context.iter() {
        let (string_value, long_value, double_value, object_value) = match value {
            ContextValue::String(s) => (Some(s.clone()), None, None, None),
            ContextValue::Long(v) => (None, Some(*v), None, None),
            ContextValue::Double(v) => (None, None, Some(*v), None),
            ContextValue::Object(v) => (None, None, None, Some(serde_json::to_string(v)?)),
        };
        sqlx::query(
            r#"
            INSERT INTO execution_context (
                execution_id, kind, key, type_tag,
                string_value, long_value, double_value, object_value
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution_id)
        .bind(kind.as_str())
        .bind(key)
        .bind(value.type_tag())
        .bind(string_value)
        .bind(long_value)
        .bind(double_value)
        .bind(object_value)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    }
    Ok(())
}
