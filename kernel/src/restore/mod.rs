// Restore Entry Point
//
// Validates a restore request into a descriptor, then replays the log
// into a fresh relation. Nothing is created before every name, key and
// column has been checked.

mod descriptor;

pub use descriptor::{build_restore_descriptor, DescriptorError, RestoreDescriptor};

use chrono::{DateTime, Utc};

use crate::backend::Executor;
use crate::catalog::Catalog;
use crate::log::LogLayout;
use crate::replay::{replay, ReplayError, ReplayMode, ReplayOptions, ReplaySummary};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RestoreError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// One restore invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    pub source: String,
    /// Explicit single key column of the source.
    pub source_key: Option<String>,
    pub log: String,
    pub log_key: String,
    pub restore: String,
    pub cutoff: DateTime<Utc>,
    pub key_filter: Option<String>,
    pub mode: ReplayMode,
    pub keep_permanent: bool,
    pub layout: LogLayout,
}

impl RestoreRequest {
    pub fn new(
        source: impl Into<String>,
        log: impl Into<String>,
        log_key: impl Into<String>,
        restore: impl Into<String>,
        cutoff: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            source_key: None,
            log: log.into(),
            log_key: log_key.into(),
            restore: restore.into(),
            cutoff,
            key_filter: None,
            mode: ReplayMode::Forward,
            keep_permanent: false,
            layout: LogLayout::default(),
        }
    }

    pub fn source_key(mut self, column: impl Into<String>) -> Self {
        self.source_key = Some(column.into());
        self
    }

    /// Restrict the restore to one key value; empty means no filter.
    pub fn key_filter(mut self, key: impl Into<String>) -> Self {
        self.key_filter = Some(key.into()).filter(|k| !k.is_empty());
        self
    }

    pub fn mode(mut self, mode: ReplayMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn keep_permanent(mut self, keep: bool) -> Self {
        self.keep_permanent = keep;
        self
    }

    pub fn layout(mut self, layout: LogLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Apply the integer flags of the positional call form: a mode above
    /// zero is backward, a keep flag above zero makes the restore
    /// relation permanent.
    pub fn flags(self, mode: i64, keep: i64) -> Self {
        self.mode(ReplayMode::from_flag(mode)).keep_permanent(keep > 0)
    }
}

/// Run a restore and report what the replay did.
pub fn restore_table<C, E>(
    catalog: &C,
    executor: &E,
    request: &RestoreRequest,
) -> Result<ReplaySummary, RestoreError>
where
    C: Catalog + ?Sized,
    E: Executor + ?Sized,
{
    let descr = build_restore_descriptor(
        catalog,
        &request.source,
        request.source_key.as_deref(),
        &request.log,
        &request.log_key,
        &request.restore,
        &request.layout,
    )?
    .keep_permanent(request.keep_permanent);

    let options = ReplayOptions::new(request.cutoff, request.mode)
        .with_key_filter(request.key_filter.clone());

    tracing::info!(
        source = %descr.source,
        restore = %descr.restore,
        cutoff = %request.cutoff,
        mode = ?request.mode,
        "restoring table"
    );
    Ok(replay(executor, &descr, &options)?)
}

/// Run a restore; returns the rendered name of the restore relation.
pub fn restore<C, E>(catalog: &C, executor: &E, request: &RestoreRequest) -> Result<String, RestoreError>
where
    C: Catalog + ?Sized,
    E: Executor + ?Sized,
{
    restore_table(catalog, executor, request).map(|summary| summary.restore.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqlTrace;
    use crate::capture::CaptureConfig;
    use crate::ident::RelationIdent;
    use crate::memory::{ColumnSpec, MemoryDatabase};
    use crate::statement::{Expr, Statement};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    fn log_columns(data: &[&str]) -> Vec<ColumnSpec> {
        let mut columns = vec![ColumnSpec::serial("trigger_id")];
        columns.extend(data.iter().map(|c| ColumnSpec::new(*c, "text")));
        columns.extend([
            ColumnSpec::new("trigger_mode", "varchar"),
            ColumnSpec::new("trigger_tuple", "varchar"),
            ColumnSpec::new("trigger_changed", "timestamptz"),
        ]);
        columns
    }

    fn orders() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        let relid = db
            .create_table(
                "public",
                "orders",
                vec![ColumnSpec::new("id", "integer"), ColumnSpec::new("status", "text")],
                &["id"],
            )
            .unwrap();
        db.create_table("public", "orders_log", log_columns(&["id", "status"]), &[])
            .unwrap();
        db.attach_capture(relid, CaptureConfig::default());

        db.set_now(at(1));
        db.execute(&Statement::Insert {
            table: RelationIdent::bare("orders"),
            columns: vec!["id".into(), "status".into()],
            values: vec![Expr::Literal("1".into()), Expr::Literal("new".into())],
        })
        .unwrap();
        db
    }

    #[test]
    fn restore_returns_restore_identifier() {
        let db = orders();
        let request = RestoreRequest::new("orders", "orders_log", "trigger_id", "orders_r", at(1));
        assert_eq!(restore(&db, &db, &request).unwrap(), "\"orders_r\"");
        assert_eq!(db.is_temporary(&RelationIdent::bare("orders_r")), Some(true));
        assert_eq!(db.rows(&RelationIdent::bare("orders_r")).unwrap().len(), 1);
    }

    #[test]
    fn keep_flag_makes_restore_permanent() {
        let db = orders();
        let request = RestoreRequest::new("orders", "orders_log", "trigger_id", "public.kept", at(1))
            .flags(0, 1);
        restore(&db, &db, &request).unwrap();
        assert_eq!(db.is_temporary(&RelationIdent::qualified("public", "kept")), Some(false));
    }

    #[test]
    fn existing_restore_table_fails_before_any_statement() {
        let db = orders();
        let trace = SqlTrace::new(&db);
        let request = RestoreRequest::new("orders", "orders_log", "trigger_id", "orders", at(1));
        let err = restore(&db, &trace, &request).unwrap_err();
        assert!(matches!(
            err,
            RestoreError::Descriptor(DescriptorError::RestoreTableExists { .. })
        ));
        assert!(trace.transcript().is_empty());
    }

    #[test]
    fn composite_keys_are_rejected_before_any_statement() {
        let db = MemoryDatabase::new();
        db.create_table(
            "public",
            "lines",
            vec![ColumnSpec::new("order_id", "integer"), ColumnSpec::new("line", "integer")],
            &["order_id", "line"],
        )
        .unwrap();
        db.create_table("public", "lines_log", log_columns(&["order_id", "line"]), &[])
            .unwrap();

        let trace = SqlTrace::new(&db);
        let request = RestoreRequest::new("lines", "lines_log", "trigger_id", "r", at(1)).flags(1, 0);
        let err = restore(&db, &trace, &request).unwrap_err();
        assert!(matches!(
            err,
            RestoreError::Descriptor(DescriptorError::CompositeKeyUnsupported { .. })
        ));
        assert!(trace.transcript().is_empty());
        assert_eq!(db.relation_id(&RelationIdent::bare("r")), None);
    }

    #[test]
    fn explicit_key_makes_composite_tables_restorable() {
        let db = MemoryDatabase::new();
        let relid = db
            .create_table(
                "public",
                "lines",
                vec![
                    ColumnSpec::new("line_id", "integer"),
                    ColumnSpec::new("order_id", "integer"),
                    ColumnSpec::new("qty", "integer"),
                ],
                &["order_id", "line_id"],
            )
            .unwrap();
        db.create_table("public", "lines_log", log_columns(&["line_id", "order_id", "qty"]), &[])
            .unwrap();
        db.attach_capture(relid, CaptureConfig::default());
        db.set_now(at(1));
        db.execute(&Statement::Insert {
            table: RelationIdent::bare("lines"),
            columns: vec!["line_id".into(), "order_id".into(), "qty".into()],
            values: ["10", "1", "3"].iter().map(|v| Expr::Literal(v.to_string())).collect(),
        })
        .unwrap();

        let request = RestoreRequest::new("lines", "lines_log", "trigger_id", "r", at(1))
            .source_key("line_id");
        let summary = restore_table(&db, &db, &request).unwrap();
        assert_eq!(summary.applied, 1);
    }

    #[test]
    fn traced_restore_shows_rendered_sql() {
        let db = orders();
        let trace = SqlTrace::new(&db);
        let request = RestoreRequest::new("orders", "orders_log", "trigger_id", "r", at(1));
        restore(&db, &trace, &request).unwrap();

        let sql = trace.transcript();
        assert_eq!(sql.len(), 3);
        assert_eq!(
            sql[0],
            "CREATE TEMPORARY TABLE \"r\" AS SELECT * FROM \"public\".\"orders\" LIMIT 0"
        );
        assert!(sql[1].starts_with("SELECT \"id\", \"status\", \"trigger_mode\""));
        assert_eq!(sql[2], "INSERT INTO \"r\" (\"id\", \"status\") VALUES ('1', 'new')");
    }
}
