// sqlx::Error -> BatchError mapping
//
// Lives here because of the orphan rule: core cannot depend on sqlx.

use chunkline_core::error::BatchError;

/// Convert sqlx::Error to BatchError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> BatchError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            match db_err.code().as_deref() {
                Some(code @ ("2067" | "1555")) => BatchError::Database(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                Some(code @ ("787" | "3850")) => BatchError::Database(format!(
                    "Foreign key constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                // SQLITE_BUSY - database is locked
                Some("5") => BatchError::Database(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                // SQLITE_FULL - database or disk is full
                Some("13") => BatchError::Database(format!("Database full: {}", db_err.message())),
                Some(code) => BatchError::Database(format!(
                    "Database error [{}]: {}",
                    code,
                    db_err.message()
                )),
                None => BatchError::Database(format!("Database error: {}", db_err.message())),
            }
        }
        sqlx::Error::RowNotFound => BatchError::NotFound("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            BatchError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => BatchError::Database(err.to_string()),
    }
}

/// Unique-constraint violation (SQLITE_CONSTRAINT_UNIQUE / PRIMARYKEY)
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("2067") | Some("1555"))
        }
        _ => false,
    }
}

/// Foreign-key violation (SQLITE_CONSTRAINT_FOREIGNKEY)
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(db_err.code().as_deref(), Some("787")),
        _ => false,
    }
}
