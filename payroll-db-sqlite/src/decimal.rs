//! Money and rates are stored as TEXT so they read back with the scale they
//! were written with (`550.00` stays `550.00`).

use std::str::FromStr;

use payroll_core::RepositoryError;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, TypeInfo, ValueRef};

fn column_error(
    column: &str,
    detail: impl std::fmt::Display,
) -> RepositoryError {
    RepositoryError::Database(format!("column '{column}': {detail}"))
}

/// Reads a nullable decimal column.
///
/// TEXT is parsed exactly. INTEGER and REAL cells only appear in rows typed
/// by hand and are converted.
pub fn get_optional_decimal(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<Decimal>, RepositoryError> {
    let raw = row
        .try_get_raw(column)
        .map_err(|e| column_error(column, e))?;
    if raw.is_null() {
        return Ok(None);
    }

    let value = match raw.type_info().name() {
        "TEXT" => {
            let text: &str = row.try_get(column).map_err(|e| column_error(column, e))?;
            Decimal::from_str(text.trim())
                .map_err(|e| column_error(column, format!("'{text}' is not a decimal ({e})")))?
        }
        "INTEGER" => Decimal::from(
            row.try_get::<i64, _>(column)
                .map_err(|e| column_error(column, e))?,
        ),
        "REAL" => {
            let real: f64 = row.try_get(column).map_err(|e| column_error(column, e))?;
            Decimal::try_from(real).map_err(|e| column_error(column, e))?
        }
        other => return Err(column_error(column, format!("unsupported type {other}"))),
    };
    Ok(Some(value))
}

/// Reads a required decimal column; NULL is an error, never zero.
pub fn get_decimal(
    row: &SqliteRow,
    column: &str,
) -> Result<Decimal, RepositoryError> {
    get_optional_decimal(row, column)?.ok_or_else(|| column_error(column, "unexpected NULL"))
}

pub fn decimal_to_text(d: Decimal) -> String {
    d.to_string()
}
