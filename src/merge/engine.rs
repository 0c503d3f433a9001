//! Merge engine implementation.

use crate::branches::BranchRegistry;
use crate::engine::{RelationalEngine, Session, Transaction};
use crate::error::{BranchError, MergeStep, Result};
use crate::migrations::MigrationLedger;
use crate::types::TableRef;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// What a merge changed in the target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Tables cloned from the source.
    pub tables_created: Vec<String>,
    /// `(table, column)` pairs added to existing target tables.
    pub columns_added: Vec<(String, String)>,
    /// Rows inserted or updated, per table.
    pub rows_upserted: Vec<(String, u64)>,
    /// Migration records appended to the target ledger.
    pub migrations_spliced: usize,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.tables_created.is_empty()
            && self.columns_added.is_empty()
            && self.rows_upserted.is_empty()
            && self.migrations_spliced == 0
    }

    pub fn total_rows(&self) -> u64 {
        self.rows_upserted.iter().map(|(_, rows)| rows).sum()
    }
}

/// Folds a source branch into a target branch.
pub struct MergeEngine {
    engine: Arc<dyn RelationalEngine>,
}

struct MergeContext<'a> {
    source: &'a str,
    target: &'a str,
    source_schema: &'a str,
    target_schema: &'a str,
}

impl MergeContext<'_> {
    fn failed(&self, table: &str, step: MergeStep) -> impl FnOnce(BranchError) -> BranchError {
        let source_branch = self.source.to_string();
        let target_branch = self.target.to_string();
        let table = table.to_string();
        move |e| BranchError::MergeFailed {
            source_branch,
            target_branch,
            table,
            step,
            message: e.to_string(),
        }
    }
}

impl MergeEngine {
    pub fn new(engine: Arc<dyn RelationalEngine>) -> Self {
        Self { engine }
    }

    /// Merge `source` into `target`.
    ///
    /// Schema changes are additive: missing tables are cloned and missing
    /// columns are added with the source's declared type. Every source row
    /// is then upserted into the target (source wins on key conflicts).
    /// Once the data is committed the source's newer migration records are
    /// spliced into the target ledger.
    ///
    /// A source without tables is a successful no-op.
    pub fn merge(
        &self,
        registry: &BranchRegistry,
        ledger: &MigrationLedger,
        source: &str,
        target: &str,
    ) -> Result<MergeReport> {
        if source == target {
            return Err(BranchError::Validation(format!(
                "cannot merge branch '{source}' into itself"
            )));
        }
        registry.require(source)?;
        registry.require(target)?;

        let source_schema = registry.schema_name(source);
        let target_schema = registry.schema_name(target);
        let ctx = MergeContext {
            source,
            target,
            source_schema: &source_schema,
            target_schema: &target_schema,
        };

        let mut session = self.engine.connect(Some(&target_schema))?;

        // Listing both sides attaches them before the transaction starts.
        let source_tables = session
            .list_tables(&source_schema)
            .map_err(ctx.failed("", MergeStep::ListTables))?;
        if source_tables.is_empty() {
            info!(source, target, "source has no tables; nothing to merge");
            return Ok(MergeReport::default());
        }
        let target_tables: HashSet<String> = session
            .list_tables(&target_schema)
            .map_err(ctx.failed("", MergeStep::ListTables))?
            .into_iter()
            .collect();

        let mut report = MergeReport::default();
        let mut tx = Transaction::begin(session.as_mut())?;
        for table in &source_tables {
            merge_table(
                tx.session(),
                &ctx,
                table,
                target_tables.contains(table),
                &mut report,
            )?;
        }
        tx.commit().map_err(ctx.failed("", MergeStep::Commit))?;

        report.migrations_spliced = ledger.splice(source, target)?.len();
        registry.touch(source)?;
        registry.touch(target)?;

        info!(
            source,
            target,
            tables = source_tables.len(),
            created = report.tables_created.len(),
            columns = report.columns_added.len(),
            rows = report.total_rows(),
            migrations = report.migrations_spliced,
            "merged branch"
        );
        Ok(report)
    }
}

fn merge_table(
    session: &mut dyn Session,
    ctx: &MergeContext<'_>,
    table: &str,
    exists_in_target: bool,
    report: &mut MergeReport,
) -> Result<()> {
    let source_ref = TableRef::new(ctx.source_schema, table);
    let target_ref = TableRef::new(ctx.target_schema, table);

    let source_columns = session
        .list_columns(source_ref)
        .map_err(ctx.failed(table, MergeStep::ListColumns))?;

    if exists_in_target {
        let existing: HashSet<String> = session
            .list_columns(target_ref)
            .map_err(ctx.failed(table, MergeStep::ListColumns))?
            .into_iter()
            .map(|c| c.name)
            .collect();

        for column in source_columns.iter().filter(|c| !existing.contains(&c.name)) {
            session
                .add_column(target_ref, column)
                .map_err(ctx.failed(table, MergeStep::AddColumn))?;
            debug!(table, column = %column.name, "added column");
            report
                .columns_added
                .push((table.to_string(), column.name.clone()));
        }
    } else {
        session
            .create_table_like(target_ref, source_ref)
            .map_err(ctx.failed(table, MergeStep::CreateTable))?;
        debug!(table, "created table");
        report.tables_created.push(table.to_string());
    }

    let columns: Vec<String> = source_columns.into_iter().map(|c| c.name).collect();
    let rows = session
        .upsert_rows(target_ref, source_ref, &columns)
        .map_err(ctx.failed(table, MergeStep::Upsert))?;
    debug!(table, rows, "upserted rows");
    report.rows_upserted.push((table.to_string(), rows));
    Ok(())
}
