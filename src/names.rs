//! Name validation for branches, migrations and declared column types.
//!
//! Branch and migration names end up in schema names and artifact paths, so
//! they are restricted to ASCII letters, digits, `_` and `-`.

use crate::error::{BranchError, Result};

/// Longest accepted branch name.
pub const MAX_BRANCH_NAME_LEN: usize = 64;

/// Longest accepted migration name.
pub const MAX_MIGRATION_NAME_LEN: usize = 128;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn validate_name(kind: &str, name: &str, max_len: usize) -> Result<()> {
    if name.is_empty() {
        return Err(BranchError::Validation(format!(
            "{kind} name must not be empty"
        )));
    }
    if name.len() > max_len {
        return Err(BranchError::Validation(format!(
            "{kind} name '{name}' is longer than {max_len} characters"
        )));
    }
    if let Some(bad) = name.chars().find(|c| !is_name_char(*c)) {
        return Err(BranchError::Validation(format!(
            "{kind} name '{name}' contains forbidden character {bad:?}"
        )));
    }
    Ok(())
}

/// Validate a branch name.
///
/// ```
/// use schemabranch::names::validate_branch_name;
///
/// assert!(validate_branch_name("feature-auth").is_ok());
/// assert!(validate_branch_name("").is_err());
/// assert!(validate_branch_name("a;DROP").is_err());
/// ```
pub fn validate_branch_name(name: &str) -> Result<()> {
    validate_name("branch", name, MAX_BRANCH_NAME_LEN)
}

/// Validate a migration name.
pub fn validate_migration_name(name: &str) -> Result<()> {
    validate_name("migration", name, MAX_MIGRATION_NAME_LEN)
}

/// Validate a declared column type before it is spliced into `ADD COLUMN`.
///
/// Types cannot be bound as parameters, so only a conservative grammar is
/// accepted: words, digits, spaces, parentheses and commas, e.g.
/// `VARCHAR(255)`, `DECIMAL(10, 2)`, `INTEGER NOT NULL`. An empty type is
/// allowed (untyped column).
pub fn validate_declared_type(declared_type: &str) -> Result<()> {
    let ok = declared_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ','));
    if !ok {
        return Err(BranchError::Validation(format!(
            "refusing to use column type {declared_type:?}"
        )));
    }
    Ok(())
}
