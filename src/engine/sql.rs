//! Statement builder.
//!
//! Every identifier that reaches SQL text goes through [`quote_ident`];
//! values are bound as parameters by the caller. Declared column types are
//! the only unquoted fragment and are checked by
//! [`validate_declared_type`](crate::names::validate_declared_type).

use crate::error::{BranchError, Result};
use crate::names::validate_declared_type;
use crate::types::{Column, TableRef};

/// Quote an identifier with double quotes, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for c in name.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// `"schema"."table"` using an explicit schema alias.
pub fn qualified(alias: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(alias), quote_ident(table))
}

/// Comma separated list of quoted column names.
pub fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn reject_empty(columns: &[String], table: &TableRef<'_>) -> Result<()> {
    if columns.is_empty() {
        return Err(BranchError::Validation(format!(
            "no columns to copy for table {table}"
        )));
    }
    Ok(())
}

/// `ALTER TABLE … ADD COLUMN …`.
pub fn add_column(alias: &str, table: &TableRef<'_>, column: &Column) -> Result<String> {
    validate_declared_type(&column.declared_type)?;
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {}",
        qualified(alias, table.table),
        quote_ident(&column.name)
    );
    if !column.declared_type.is_empty() {
        sql.push(' ');
        sql.push_str(&column.declared_type);
    }
    Ok(sql)
}

/// Plain `INSERT … SELECT` of every listed column.
pub fn insert_select(
    target_alias: &str,
    target: &TableRef<'_>,
    source_alias: &str,
    source: &TableRef<'_>,
    columns: &[String],
) -> Result<String> {
    reject_empty(columns, source)?;
    let cols = column_list(columns);
    Ok(format!(
        "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
        qualified(target_alias, target.table),
        qualified(source_alias, source.table),
    ))
}

/// `INSERT … SELECT … ON CONFLICT DO UPDATE` over the given columns.
///
/// Rows whose key already exists in the target take the source values.
/// The `WHERE true` keeps the parser from reading `ON` as a join clause.
pub fn upsert_select(
    target_alias: &str,
    target: &TableRef<'_>,
    source_alias: &str,
    source: &TableRef<'_>,
    columns: &[String],
) -> Result<String> {
    reject_empty(columns, source)?;
    let cols = column_list(columns);
    let updates = columns
        .iter()
        .map(|c| {
            let q = quote_ident(c);
            format!("{q} = excluded.{q}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "INSERT INTO {} ({cols}) SELECT {cols} FROM {} WHERE true ON CONFLICT DO UPDATE SET {updates}",
        qualified(target_alias, target.table),
        qualified(source_alias, source.table),
    ))
}

/// `SELECT COUNT(*)` of a table.
pub fn row_count(alias: &str, table: &TableRef<'_>) -> String {
    format!("SELECT COUNT(*) FROM {}", qualified(alias, table.table))
}

/// Rewrite a stored `CREATE TABLE name (...)` statement so it creates the
/// same definition under another qualified name.
pub fn retarget_create_table(create_sql: &str, alias: &str, table: &str) -> Result<String> {
    let open = create_sql.find('(').ok_or_else(|| {
        BranchError::Execution(format!("cannot clone table definition: {create_sql}"))
    })?;
    Ok(format!(
        "CREATE TABLE {} {}",
        qualified(alias, table),
        &create_sql[open..]
    ))
}

/// Rewrite a stored `CREATE [UNIQUE] INDEX name ON table (...)` statement so
/// it creates the same index in `alias` on `table`.
///
/// Everything from the column list on (including a partial-index `WHERE`)
/// is kept verbatim.
pub fn retarget_create_index(
    create_sql: &str,
    alias: &str,
    index: &str,
    table: &str,
) -> Result<String> {
    let open = create_sql.find('(').ok_or_else(|| {
        BranchError::Execution(format!("cannot clone index definition: {create_sql}"))
    })?;
    let unique = create_sql
        .split_whitespace()
        .nth(1)
        .is_some_and(|word| word.eq_ignore_ascii_case("UNIQUE"));
    Ok(format!(
        "CREATE {}INDEX {} ON {} {}",
        if unique { "UNIQUE " } else { "" },
        qualified(alias, index),
        quote_ident(table),
        &create_sql[open..]
    ))
}
