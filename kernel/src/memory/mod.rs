// In-Memory Backend
//
// A small relational store implementing both the `Catalog` and the
// `Executor` contracts. It interprets typed statements directly, keeps
// a settable transaction clock for `NOW()`, honors a search path and
// per-schema usage rights, and fires attached capture hooks after every
// row it mutates. A failing hook rolls the whole statement back.

mod image;
mod table;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};

use crate::backend::{BackendError, Datum, Executor, Outcome, Row};
use crate::capture::{capture_row_change, CaptureConfig, SourceRelation, TriggerContext};
use crate::catalog::{AttrNumber, Catalog, CatalogError, IndexDef, RelationId, TupleDesc};
use crate::ident::RelationIdent;
use crate::log::ChangeMode;
use crate::partition::PartitionSelector;
use crate::statement::{Expr, Predicate, SortOrder, Statement};

pub use image::{DatabaseImage, TableImage};
pub use table::{format_timestamp, parse_timestamp, ColumnSpec};
use table::{order_datums, Table};

/// Row images touched by one mutated row, full width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    pub relid: RelationId,
    pub mode: ChangeMode,
    pub old: Option<Row>,
    pub new: Option<Row>,
}

#[derive(Debug, Clone)]
struct Inner {
    schemas: BTreeMap<String, bool>,
    search_path: Vec<String>,
    session_user: String,
    now: DateTime<Utc>,
    tables: BTreeMap<RelationId, Table>,
    next_relid: u32,
    locks: HashMap<RelationId, usize>,
    hooks: HashMap<RelationId, CaptureConfig>,
}

impl Inner {
    fn lookup(&self, schema: &str, name: &str) -> Option<RelationId> {
        self.tables
            .iter()
            .find(|(_, t)| t.schema == schema && t.name == name)
            .map(|(relid, _)| *relid)
    }

    fn on_search_path(&self, name: &str) -> Option<RelationId> {
        self.search_path
            .iter()
            .find_map(|schema| self.lookup(schema, name))
    }

    fn resolve(&self, ident: &RelationIdent) -> Result<RelationId, BackendError> {
        let found = match ident {
            RelationIdent::Qualified { schema, name } => self.lookup(schema, name),
            RelationIdent::Bare { name } => self.on_search_path(name),
        };
        found.ok_or_else(|| BackendError::UndefinedRelation {
            relation: ident.render(),
        })
    }

    fn table(&self, relid: RelationId) -> Result<&Table, CatalogError> {
        self.tables.get(&relid).ok_or(CatalogError::UnknownRelation(relid))
    }

    fn eval(&self, expr: &Expr) -> Datum {
        match expr {
            Expr::Null => None,
            Expr::Literal(text) => Some(text.clone()),
            Expr::Timestamp(ts) => Some(format_timestamp(ts)),
            Expr::Now => Some(format_timestamp(&self.now)),
            Expr::SessionUser => Some(self.session_user.clone()),
        }
    }

    fn add_table(&mut self, table: Table) -> RelationId {
        self.next_relid += 1;
        let relid = RelationId(self.next_relid);
        self.tables.insert(relid, table);
        relid
    }
}

/// In-memory database.
///
/// `statements` serializes writers. It is held from a statement's
/// rollback snapshot until its capture hooks have finished, and is
/// reentrant so hooks can write the log through the same handle.
#[derive(Debug)]
pub struct MemoryDatabase {
    inner: RwLock<Inner>,
    statements: ReentrantMutex<()>,
    partitions: &'static PartitionSelector,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    /// Empty database with a `public` schema on the search path.
    pub fn new() -> Self {
        let mut schemas = BTreeMap::new();
        schemas.insert("public".to_string(), true);
        Self {
            inner: RwLock::new(Inner {
                schemas,
                search_path: vec!["public".to_string()],
                session_user: "postgres".to_string(),
                now: DateTime::<Utc>::UNIX_EPOCH,
                tables: BTreeMap::new(),
                next_relid: 16384,
                locks: HashMap::new(),
                hooks: HashMap::new(),
            }),
            statements: ReentrantMutex::new(()),
            partitions: PartitionSelector::global(),
        }
    }

    /// Read the active log partition from `selector` instead of the
    /// process-wide one.
    pub fn with_partition_selector(mut self, selector: &'static PartitionSelector) -> Self {
        self.partitions = selector;
        self
    }

    fn exclusive(&self) -> ReentrantMutexGuard<'_, ()> {
        self.statements.lock()
    }

    /// Capture every row mutation of `relid` with `config`.
    pub fn attach_capture(&self, relid: RelationId, config: CaptureConfig) {
        let _writer = self.exclusive();
        self.inner.write().hooks.insert(relid, config);
    }

    pub fn create_schema(&self, schema: &str) {
        let _writer = self.exclusive();
        self.inner.write().schemas.entry(schema.to_string()).or_insert(true);
    }

    /// Remove the current user's usage right on `schema`.
    pub fn revoke_usage(&self, schema: &str) {
        let _writer = self.exclusive();
        if let Some(usable) = self.inner.write().schemas.get_mut(schema) {
            *usable = false;
        }
    }

    pub fn set_search_path(&self, schemas: Vec<String>) {
        let _writer = self.exclusive();
        self.inner.write().search_path = schemas;
    }

    pub fn set_session_user(&self, user: impl Into<String>) {
        let _writer = self.exclusive();
        self.inner.write().session_user = user.into();
    }

    /// Set the transaction clock read by `NOW()`.
    pub fn set_now(&self, now: DateTime<Utc>) {
        let _writer = self.exclusive();
        self.inner.write().now = now;
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.read().now
    }

    pub fn create_table(
        &self,
        schema: &str,
        name: &str,
        columns: Vec<ColumnSpec>,
        primary_key: &[&str],
    ) -> Result<RelationId, BackendError> {
        let _writer = self.exclusive();
        let mut inner = self.inner.write();
        if !inner.schemas.contains_key(schema) {
            return Err(BackendError::Rejected(format!(
                "schema \"{schema}\" does not exist"
            )));
        }
        if inner.lookup(schema, name).is_some() {
            return Err(BackendError::DuplicateRelation {
                relation: RelationIdent::qualified(schema, name).render(),
            });
        }

        let mut table = Table {
            schema: schema.to_string(),
            name: name.to_string(),
            temporary: false,
            columns,
            primary_key: Vec::new(),
            rows: Vec::new(),
            next_serial: 1,
        };
        table.primary_key = primary_key
            .iter()
            .map(|column| table.slot(column).map(|slot| slot as AttrNumber + 1))
            .collect::<Result<_, _>>()?;

        Ok(inner.add_table(table))
    }

    /// Mark a column dropped; its slot stays in place.
    pub fn drop_column(&self, relid: RelationId, column: &str) -> Result<(), BackendError> {
        let _writer = self.exclusive();
        let mut inner = self.inner.write();
        let table = inner
            .tables
            .get_mut(&relid)
            .ok_or_else(|| BackendError::Rejected(format!("unknown relation {relid:?}")))?;
        let slot = table.slot(column)?;
        table.columns[slot].dropped = true;
        table.columns[slot].name = format!("........pg.dropped.{}........", slot + 1);
        table.primary_key.retain(|attnum| *attnum as usize != slot + 1);
        for row in &mut table.rows {
            row[slot] = None;
        }
        Ok(())
    }

    pub fn relation_id(&self, ident: &RelationIdent) -> Option<RelationId> {
        self.inner.read().resolve(ident).ok()
    }

    /// Rows of a relation projected onto its surviving columns.
    pub fn rows(&self, ident: &RelationIdent) -> Result<Vec<Row>, BackendError> {
        let inner = self.inner.read();
        let relid = inner.resolve(ident)?;
        let table = &inner.tables[&relid];
        Ok(table.rows.iter().map(|r| table.project(r)).collect())
    }

    pub fn is_temporary(&self, ident: &RelationIdent) -> Option<bool> {
        let inner = self.inner.read();
        let relid = inner.resolve(ident).ok()?;
        Some(inner.tables[&relid].temporary)
    }

    /// Number of access-share locks currently held on `relid`.
    pub fn shared_locks(&self, relid: RelationId) -> usize {
        self.inner.read().locks.get(&relid).copied().unwrap_or(0)
    }

    /// Execute a statement and report the row images it touched.
    pub fn execute_with_changes(
        &self,
        statement: &Statement,
    ) -> Result<(Outcome, Vec<RowChange>), BackendError> {
        let _writer = self.exclusive();
        let mut inner = self.inner.write();
        let mut changes = Vec::new();

        let outcome = match statement {
            Statement::Insert {
                table,
                columns,
                values,
            } => {
                let relid = inner.resolve(table)?;
                let values: Vec<Datum> = values.iter().map(|v| inner.eval(v)).collect();
                let target = inner.tables.get_mut(&relid).ok_or_else(|| {
                    BackendError::UndefinedRelation {
                        relation: table.render(),
                    }
                })?;
                if values.len() != columns.len() {
                    return Err(BackendError::ValueCount {
                        relation: target.display_name(),
                        columns: columns.len(),
                        values: values.len(),
                    });
                }

                let slots = columns
                    .iter()
                    .map(|c| target.slot(c))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut row: Row = vec![None; target.columns.len()];
                for (slot, value) in slots.iter().zip(values) {
                    row[*slot] = value;
                }
                target.fill_serials(&mut row, &slots);
                target.check_primary_key(&row, None)?;
                target.rows.push(row.clone());

                changes.push(RowChange {
                    relid,
                    mode: ChangeMode::Insert,
                    old: None,
                    new: Some(row),
                });
                Outcome::Inserted(1)
            }

            Statement::Update {
                table,
                assignments,
                filter,
            } => {
                let relid = inner.resolve(table)?;
                let filter_value = inner.eval(&filter.value);
                let assigned: Vec<(String, Datum)> = assignments
                    .iter()
                    .map(|(column, value)| (column.clone(), inner.eval(value)))
                    .collect();
                let target = inner.tables.get_mut(&relid).ok_or_else(|| {
                    BackendError::UndefinedRelation {
                        relation: table.render(),
                    }
                })?;

                let predicate = target.resolve_predicate(filter, filter_value)?;
                let slots = assigned
                    .iter()
                    .map(|(column, value)| target.slot(column).map(|slot| (slot, value.clone())))
                    .collect::<Result<Vec<_>, _>>()?;

                let matched: Vec<usize> = (0..target.rows.len())
                    .filter(|&i| target.matches(&target.rows[i], std::slice::from_ref(&predicate)))
                    .collect();

                // rows are replaced one at a time; a violation restores them all
                let original = target.rows.clone();
                for &i in &matched {
                    let old = target.rows[i].clone();
                    let mut new = old.clone();
                    for (slot, value) in &slots {
                        new[*slot] = value.clone();
                    }
                    if let Err(err) = target.check_primary_key(&new, Some(i)) {
                        target.rows = original;
                        return Err(err);
                    }
                    target.rows[i] = new.clone();
                    changes.push(RowChange {
                        relid,
                        mode: ChangeMode::Update,
                        old: Some(old),
                        new: Some(new),
                    });
                }
                Outcome::Updated(matched.len() as u64)
            }

            Statement::Delete { table, filter } => {
                let relid = inner.resolve(table)?;
                let filter_value = inner.eval(&filter.value);
                let target = inner.tables.get_mut(&relid).ok_or_else(|| {
                    BackendError::UndefinedRelation {
                        relation: table.render(),
                    }
                })?;
                let predicate = target.resolve_predicate(filter, filter_value)?;

                let rows = std::mem::take(&mut target.rows);
                let (removed, kept): (Vec<Row>, Vec<Row>) = rows
                    .into_iter()
                    .partition(|row| target.matches(row, std::slice::from_ref(&predicate)));
                target.rows = kept;

                let count = removed.len() as u64;
                changes.extend(removed.into_iter().map(|row| RowChange {
                    relid,
                    mode: ChangeMode::Delete,
                    old: Some(row),
                    new: None,
                }));
                Outcome::Deleted(count)
            }

            Statement::Select {
                table,
                columns,
                filter,
                order_by,
            } => {
                let relid = inner.resolve(table)?;
                let source = &inner.tables[&relid];
                let predicates = resolve_filter(&inner, source, filter)?;
                let slots = columns
                    .iter()
                    .map(|c| source.slot(c))
                    .collect::<Result<Vec<_>, _>>()?;

                let mut selected: Vec<&Row> = source
                    .rows
                    .iter()
                    .filter(|row| source.matches(row, &predicates))
                    .collect();
                if let Some((column, order)) = order_by {
                    let slot = source.slot(column)?;
                    let kind = source.kind(slot);
                    selected.sort_by(|a, b| {
                        let ordering = order_datums(kind, &a[slot], &b[slot]);
                        match order {
                            SortOrder::Asc => ordering,
                            SortOrder::Desc => ordering.reverse(),
                        }
                    });
                }

                Outcome::Rows {
                    columns: columns.clone(),
                    rows: selected
                        .into_iter()
                        .map(|row| slots.iter().map(|&s| row[s].clone()).collect())
                        .collect(),
                }
            }

            Statement::CreateTableAs {
                table,
                temporary,
                source,
                filter,
                with_data,
            } => {
                let (schema, name) = match table {
                    RelationIdent::Qualified { schema, name } => {
                        if !inner.schemas.contains_key(schema) {
                            return Err(BackendError::Rejected(format!(
                                "schema \"{schema}\" does not exist"
                            )));
                        }
                        (schema.clone(), name.clone())
                    }
                    RelationIdent::Bare { name } => {
                        let schema = inner.search_path.first().cloned().ok_or_else(|| {
                            BackendError::Rejected("no schema has been selected to create in".into())
                        })?;
                        (schema, name.clone())
                    }
                };
                if inner.lookup(&schema, &name).is_some() {
                    return Err(BackendError::DuplicateRelation {
                        relation: table.render(),
                    });
                }

                let source_relid = inner.resolve(source)?;
                let origin = &inner.tables[&source_relid];
                let predicates = resolve_filter(&inner, origin, filter.as_slice())?;
                let rows: Vec<Row> = if *with_data {
                    origin
                        .rows
                        .iter()
                        .filter(|row| origin.matches(row, &predicates))
                        .map(|row| origin.project(row))
                        .collect()
                } else {
                    Vec::new()
                };
                let columns = origin
                    .columns
                    .iter()
                    .filter(|c| !c.dropped)
                    .map(|c| ColumnSpec::new(c.name.clone(), c.type_name.clone()))
                    .collect();

                let count = rows.len() as u64;
                inner.add_table(Table {
                    schema,
                    name,
                    temporary: *temporary,
                    columns,
                    primary_key: Vec::new(),
                    rows,
                    next_serial: 1,
                });
                Outcome::Created(count)
            }
        };

        Ok((outcome, changes))
    }
}

fn resolve_filter(
    inner: &Inner,
    table: &Table,
    filter: &[Predicate],
) -> Result<Vec<table::ResolvedPredicate>, BackendError> {
    filter
        .iter()
        .map(|p| table.resolve_predicate(p, inner.eval(&p.value)))
        .collect()
}

/// Whether `statement` mutates a relation with a capture hook attached.
fn captured_target(inner: &Inner, statement: &Statement) -> bool {
    let table = match statement {
        Statement::Insert { table, .. }
        | Statement::Update { table, .. }
        | Statement::Delete { table, .. } => table,
        Statement::Select { .. } | Statement::CreateTableAs { .. } => return false,
    };
    inner
        .resolve(table)
        .is_ok_and(|relid| inner.hooks.contains_key(&relid))
}

impl MemoryDatabase {
    fn fire_capture(&self, changes: &[RowChange]) -> Result<(), BackendError> {
        for change in changes {
            let Some(config) = self.inner.read().hooks.get(&change.relid).cloned() else {
                continue;
            };
            let source = SourceRelation::from_catalog(self, change.relid)
                .map_err(|err| BackendError::Rejected(err.to_string()))?;

            let (tuple, new_tuple) = match change.mode {
                ChangeMode::Insert => (change.new.as_deref(), None),
                ChangeMode::Update => (change.old.as_deref(), change.new.as_deref()),
                ChangeMode::Delete => (change.old.as_deref(), None),
            };
            let ctx =
                TriggerContext::after_row(change.mode, &source, tuple.unwrap_or_default(), new_tuple);

            capture_row_change(self, self, &ctx, &config, self.partitions.active()).map_err(
                |err| BackendError::TriggerFailed {
                    relation: source.ident().render(),
                    detail: err.to_string(),
                },
            )?;
        }
        Ok(())
    }
}

impl Executor for MemoryDatabase {
    fn execute(&self, statement: &Statement) -> Result<Outcome, BackendError> {
        let _writer = self.exclusive();
        let snapshot = {
            let inner = self.inner.read();
            captured_target(&inner, statement).then(|| inner.clone())
        };

        let (outcome, changes) = self.execute_with_changes(statement)?;
        if let Err(err) = self.fire_capture(&changes) {
            if let Some(snapshot) = snapshot {
                let mut inner = self.inner.write();
                // shared locks belong to readers, not to this statement
                let locks = std::mem::take(&mut inner.locks);
                *inner = snapshot;
                inner.locks = locks;
            }
            return Err(err);
        }
        Ok(outcome)
    }
}

impl Catalog for MemoryDatabase {
    fn lookup_namespace(&self, schema: &str) -> Result<(), CatalogError> {
        match self.inner.read().schemas.get(schema) {
            Some(true) => Ok(()),
            Some(false) => Err(CatalogError::PermissionDenied {
                schema: schema.to_string(),
            }),
            None => Err(CatalogError::SchemaNotFound {
                schema: schema.to_string(),
            }),
        }
    }

    fn relation_in_namespace(&self, schema: &str, name: &str) -> Option<RelationId> {
        self.inner.read().lookup(schema, name)
    }

    fn relation_on_search_path(&self, name: &str) -> Option<RelationId> {
        self.inner.read().on_search_path(name)
    }

    fn relation_name(&self, relid: RelationId) -> Result<String, CatalogError> {
        Ok(self.inner.read().table(relid)?.name.clone())
    }

    fn relation_namespace(&self, relid: RelationId) -> Result<String, CatalogError> {
        Ok(self.inner.read().table(relid)?.schema.clone())
    }

    fn tuple_desc(&self, relid: RelationId) -> Result<TupleDesc, CatalogError> {
        Ok(self.inner.read().table(relid)?.desc())
    }

    fn indexes(&self, relid: RelationId) -> Result<Vec<IndexDef>, CatalogError> {
        Ok(self.inner.read().table(relid)?.indexes())
    }

    fn lock_shared(&self, relid: RelationId) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        inner.table(relid)?;
        *inner.locks.entry(relid).or_insert(0) += 1;
        Ok(())
    }

    fn unlock_shared(&self, relid: RelationId) {
        let mut inner = self.inner.write();
        if let Some(count) = inner.locks.get_mut(&relid) {
            *count = count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::resolve_relation;
    use chrono::TimeZone;

    fn lit(v: &str) -> Expr {
        Expr::Literal(v.to_string())
    }

    fn orders() -> (MemoryDatabase, RelationId) {
        let db = MemoryDatabase::new();
        let relid = db
            .create_table(
                "public",
                "orders",
                vec![ColumnSpec::new("id", "integer"), ColumnSpec::new("status", "text")],
                &["id"],
            )
            .unwrap();
        (db, relid)
    }

    fn insert(id: &str, status: &str) -> Statement {
        Statement::Insert {
            table: RelationIdent::bare("orders"),
            columns: vec!["id".into(), "status".into()],
            values: vec![lit(id), lit(status)],
        }
    }

    #[test]
    fn insert_update_delete_report_row_images() {
        let (db, relid) = orders();
        let (_, changes) = db.execute_with_changes(&insert("1", "new")).unwrap();
        assert_eq!(changes[0].new, Some(vec![Some("1".into()), Some("new".into())]));

        let (outcome, changes) = db
            .execute_with_changes(&Statement::Update {
                table: RelationIdent::bare("orders"),
                assignments: vec![("status".into(), lit("shipped"))],
                filter: Predicate::eq("id", lit("1")),
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Updated(1));
        assert_eq!(changes[0].relid, relid);
        assert_eq!(changes[0].old.as_ref().unwrap()[1], Some("new".into()));
        assert_eq!(changes[0].new.as_ref().unwrap()[1], Some("shipped".into()));

        let (outcome, changes) = db
            .execute_with_changes(&Statement::Delete {
                table: RelationIdent::bare("orders"),
                filter: Predicate::eq("id", lit("1")),
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Deleted(1));
        assert_eq!(changes[0].mode, ChangeMode::Delete);
        assert!(db.rows(&RelationIdent::bare("orders")).unwrap().is_empty());
    }

    #[test]
    fn primary_key_is_enforced() {
        let (db, _) = orders();
        db.execute(&insert("1", "new")).unwrap();
        assert!(matches!(
            db.execute(&insert("1", "dup")),
            Err(BackendError::UniqueViolation { .. })
        ));
    }

    #[test]
    fn serial_columns_fill_in_order() {
        let db = MemoryDatabase::new();
        db.create_table(
            "public",
            "events",
            vec![ColumnSpec::serial("seq"), ColumnSpec::new("what", "text")],
            &[],
        )
        .unwrap();
        for what in ["a", "b"] {
            db.execute(&Statement::Insert {
                table: RelationIdent::bare("events"),
                columns: vec!["what".into()],
                values: vec![lit(what)],
            })
            .unwrap();
        }
        let rows = db.rows(&RelationIdent::bare("events")).unwrap();
        assert_eq!(rows[0][0], Some("1".into()));
        assert_eq!(rows[1][0], Some("2".into()));
    }

    #[test]
    fn now_uses_the_transaction_clock() {
        let db = MemoryDatabase::new();
        db.create_table(
            "public",
            "ticks",
            vec![ColumnSpec::new("at", "timestamptz")],
            &[],
        )
        .unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        db.set_now(at);
        db.execute(&Statement::Insert {
            table: RelationIdent::bare("ticks"),
            columns: vec!["at".into()],
            values: vec![Expr::Now],
        })
        .unwrap();
        let rows = db.rows(&RelationIdent::bare("ticks")).unwrap();
        assert_eq!(parse_timestamp(rows[0][0].as_deref().unwrap()), Some(at));
    }

    #[test]
    fn create_table_as_copies_surviving_columns() {
        let (db, relid) = orders();
        db.execute(&insert("1", "new")).unwrap();
        db.execute(&insert("2", "paid")).unwrap();
        db.drop_column(relid, "status").unwrap();

        let outcome = db
            .execute(&Statement::CreateTableAs {
                table: RelationIdent::bare("copy"),
                temporary: true,
                source: RelationIdent::bare("orders"),
                filter: Some(Predicate::eq("id", lit("2"))),
                with_data: true,
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Created(1));
        assert_eq!(
            db.rows(&RelationIdent::bare("copy")).unwrap(),
            vec![vec![Some("2".into())]]
        );
        assert_eq!(db.is_temporary(&RelationIdent::bare("copy")), Some(true));

        assert!(matches!(
            db.execute(&Statement::CreateTableAs {
                table: RelationIdent::bare("copy"),
                temporary: false,
                source: RelationIdent::bare("orders"),
                filter: None,
                with_data: false,
            }),
            Err(BackendError::DuplicateRelation { .. })
        ));
    }

    #[test]
    fn select_orders_and_filters() {
        let (db, _) = orders();
        for (id, status) in [("3", "c"), ("1", "a"), ("2", "b")] {
            db.execute(&insert(id, status)).unwrap();
        }
        let rows = db
            .execute(&Statement::Select {
                table: RelationIdent::bare("orders"),
                columns: vec!["status".into()],
                filter: vec![Predicate::cmp("id", crate::statement::Comparison::GtEq, lit("2"))],
                order_by: Some(("id".into(), SortOrder::Desc)),
            })
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(rows, vec![vec![Some("c".into())], vec![Some("b".into())]]);
    }

    #[test]
    fn capture_hook_logs_each_mutated_row() {
        static SELECTOR: PartitionSelector = PartitionSelector::new();
        let (db, relid) = orders();
        let db = db.with_partition_selector(&SELECTOR);
        db.create_table(
            "public",
            "orders_log",
            vec![
                ColumnSpec::serial("trigger_id"),
                ColumnSpec::new("id", "integer"),
                ColumnSpec::new("status", "text"),
                ColumnSpec::new("trigger_mode", "varchar"),
                ColumnSpec::new("trigger_tuple", "varchar"),
                ColumnSpec::new("trigger_changed", "timestamptz"),
            ],
            &[],
        )
        .unwrap();
        db.attach_capture(relid, CaptureConfig::default());

        db.execute(&insert("1", "new")).unwrap();
        db.execute(&Statement::Update {
            table: RelationIdent::bare("orders"),
            assignments: vec![("status".into(), lit("paid"))],
            filter: Predicate::eq("id", lit("1")),
        })
        .unwrap();

        let log = db.rows(&RelationIdent::bare("orders_log")).unwrap();
        let trailer: Vec<_> = log
            .iter()
            .map(|r| (r[0].as_deref(), r[3].as_deref(), r[4].as_deref()))
            .collect();
        assert_eq!(
            trailer,
            vec![
                (Some("1"), Some("INSERT"), Some("new")),
                (Some("2"), Some("UPDATE"), Some("old")),
                (Some("3"), Some("UPDATE"), Some("new")),
            ]
        );
    }

    #[test]
    fn failing_capture_rolls_the_statement_back() {
        let (db, relid) = orders();
        // log relation is missing the trailer
        db.create_table("public", "orders_log", vec![ColumnSpec::new("id", "integer")], &[])
            .unwrap();
        db.attach_capture(relid, CaptureConfig::default());

        let err = db.execute(&insert("1", "new")).unwrap_err();
        assert!(matches!(err, BackendError::TriggerFailed { .. }));
        assert!(db.rows(&RelationIdent::bare("orders")).unwrap().is_empty());
    }

    fn captured_orders() -> (MemoryDatabase, RelationId) {
        let (db, relid) = orders();
        db.create_table(
            "public",
            "orders_log",
            vec![
                ColumnSpec::serial("trigger_id"),
                ColumnSpec::new("id", "integer"),
                ColumnSpec::new("status", "text"),
                ColumnSpec::new("trigger_mode", "varchar"),
                ColumnSpec::new("trigger_tuple", "varchar"),
                ColumnSpec::new("trigger_changed", "timestamptz"),
            ],
            &[],
        )
        .unwrap();
        db.attach_capture(relid, CaptureConfig::default());
        (db, relid)
    }

    #[test]
    fn key_violation_mid_update_leaves_rows_and_log_untouched() {
        let (db, _) = captured_orders();
        db.execute(&insert("1", "a")).unwrap();
        db.execute(&insert("2", "a")).unwrap();
        let rows_before = db.rows(&RelationIdent::bare("orders")).unwrap();
        let log_before = db.rows(&RelationIdent::bare("orders_log")).unwrap();

        let err = db
            .execute(&Statement::Update {
                table: RelationIdent::bare("orders"),
                assignments: vec![("id".into(), lit("7"))],
                filter: Predicate::eq("status", lit("a")),
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::UniqueViolation { ref key, .. } if key == "7"));
        assert_eq!(db.rows(&RelationIdent::bare("orders")).unwrap(), rows_before);
        assert_eq!(db.rows(&RelationIdent::bare("orders_log")).unwrap(), log_before);
    }

    #[test]
    fn key_violation_mid_update_without_capture_is_atomic() {
        let (db, _) = orders();
        db.execute(&insert("1", "a")).unwrap();
        db.execute(&insert("2", "a")).unwrap();

        let result = db.execute_with_changes(&Statement::Update {
            table: RelationIdent::bare("orders"),
            assignments: vec![("id".into(), lit("7"))],
            filter: Predicate::eq("status", lit("a")),
        });
        assert!(matches!(result, Err(BackendError::UniqueViolation { .. })));
        assert_eq!(
            db.rows(&RelationIdent::bare("orders")).unwrap(),
            vec![
                vec![Some("1".into()), Some("a".into())],
                vec![Some("2".into()), Some("a".into())],
            ]
        );
    }

    #[test]
    fn text_keys_compare_as_text() {
        let db = MemoryDatabase::new();
        db.create_table(
            "public",
            "items",
            vec![ColumnSpec::new("sku", "text"), ColumnSpec::new("qty", "integer")],
            &["sku"],
        )
        .unwrap();
        let add = |sku: &str, qty: &str| {
            db.execute(&Statement::Insert {
                table: RelationIdent::bare("items"),
                columns: vec!["sku".into(), "qty".into()],
                values: vec![lit(sku), lit(qty)],
            })
        };
        add("007", "1").unwrap();
        add("7", "2").unwrap();
        assert!(matches!(add("7", "3"), Err(BackendError::UniqueViolation { .. })));

        let outcome = db
            .execute(&Statement::Delete {
                table: RelationIdent::bare("items"),
                filter: Predicate::eq("sku", lit("7")),
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Deleted(1));
        assert_eq!(
            db.rows(&RelationIdent::bare("items")).unwrap(),
            vec![vec![Some("007".into()), Some("1".into())]]
        );

        // the integer column still compares numerically
        let outcome = db
            .execute(&Statement::Update {
                table: RelationIdent::bare("items"),
                assignments: vec![("qty".into(), lit("5"))],
                filter: Predicate::eq("qty", lit("01")),
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Updated(1));
    }

    #[test]
    fn rollback_does_not_discard_concurrent_writes() {
        let (db, relid) = orders();
        db.create_table("public", "orders_log", vec![ColumnSpec::new("id", "integer")], &[])
            .unwrap();
        db.create_table("public", "notes", vec![ColumnSpec::new("body", "text")], &[])
            .unwrap();
        db.attach_capture(relid, CaptureConfig::default());

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..200 {
                    let err = db.execute(&insert(&i.to_string(), "new")).unwrap_err();
                    assert!(matches!(err, BackendError::TriggerFailed { .. }));
                }
            });
            scope.spawn(|| {
                for i in 0..200 {
                    db.execute(&Statement::Insert {
                        table: RelationIdent::bare("notes"),
                        columns: vec!["body".into()],
                        values: vec![lit(&i.to_string())],
                    })
                    .unwrap();
                }
            });
        });

        assert!(db.rows(&RelationIdent::bare("orders")).unwrap().is_empty());
        assert_eq!(db.rows(&RelationIdent::bare("notes")).unwrap().len(), 200);
    }

    #[test]
    fn explicit_schema_lookup_checks_usage() {
        let db = MemoryDatabase::new();
        db.create_schema("audit");
        db.create_table("audit", "orders_log", vec![ColumnSpec::new("id", "integer")], &[])
            .unwrap();

        let ident = RelationIdent::qualified("audit", "orders_log");
        assert!(resolve_relation(&db, &ident).unwrap().is_some());
        assert_eq!(resolve_relation(&db, &RelationIdent::bare("orders_log")).unwrap(), None);

        db.revoke_usage("audit");
        assert_eq!(
            resolve_relation(&db, &ident),
            Err(CatalogError::PermissionDenied {
                schema: "audit".into()
            })
        );
        assert_eq!(
            resolve_relation(&db, &RelationIdent::qualified("nope", "x")),
            Err(CatalogError::SchemaNotFound {
                schema: "nope".into()
            })
        );
    }
}
