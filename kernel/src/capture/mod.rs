// Change Capture
//
// Serializes one row image into one log record. A capture session is
// prepared once per row event: it resolves the active log relation and
// checks the column accounting before anything is written. Each record
// is a single INSERT carrying the surviving source columns in source
// order, the optional acting user, then mode, tuple role and the
// backend's transaction timestamp.

mod config;

pub use config::{CaptureConfig, MAX_TRIGGER_ARGS, PARTITION_MARKER};

use crate::backend::{Datum, Executor, Outcome};
use crate::catalog::{resolve_relation, Catalog, CatalogError, RelationId, TupleDesc};
use crate::ident::RelationIdent;
use crate::log::{ChangeMode, LogLayout, TupleRole};
use crate::partition::PartitionId;
use crate::statement::{Expr, Statement};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture can't process STATEMENT events")]
    NotRowTrigger,

    #[error("capture must be fired after the event")]
    NotAfterTrigger,

    #[error("UPDATE on {relation} carries no new row image")]
    MissingNewTuple { relation: String },

    #[error("too many capture arguments: {count} (at most {max})", max = MAX_TRIGGER_ARGS)]
    TooManyArguments { count: usize },

    #[error("relation {relation} has no columns")]
    EmptyRelation { relation: String },

    #[error("log relation {relation} does not exist")]
    RelationNotFound { relation: String },

    #[error(
        "number of columns in relation {relation}({relation_columns}) does not match \
         columns in {log}({log_columns}), expected {expected}"
    )]
    ColumnCountMismatch {
        relation: String,
        relation_columns: usize,
        log: String,
        log_columns: usize,
        expected: usize,
    },

    #[error("row image for {relation} has {actual} slots, relation has {expected}")]
    TupleShapeMismatch {
        relation: String,
        expected: usize,
        actual: usize,
    },

    #[error("could not write log record to {relation}: {detail}")]
    LogWriteFailed { relation: String, detail: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// The relation a row event fired on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRelation {
    pub schema: String,
    pub name: String,
    pub desc: TupleDesc,
}

impl SourceRelation {
    pub fn from_catalog<C: Catalog + ?Sized>(
        catalog: &C,
        relid: RelationId,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            schema: catalog.relation_namespace(relid)?,
            name: catalog.relation_name(relid)?,
            desc: catalog.tuple_desc(relid)?,
        })
    }

    pub fn ident(&self) -> RelationIdent {
        RelationIdent::qualified(&self.schema, &self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTiming {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerLevel {
    Row,
    Statement,
}

/// One row event as delivered by the hook mechanism.
///
/// Tuples are full width: one slot per attribute, dropped ones included.
/// `tuple` is the new image for INSERT and the old image otherwise.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    pub timing: TriggerTiming,
    pub level: TriggerLevel,
    pub event: ChangeMode,
    pub relation: &'a SourceRelation,
    pub tuple: &'a [Datum],
    pub new_tuple: Option<&'a [Datum]>,
}

impl<'a> TriggerContext<'a> {
    /// After-row event, the only kind capture accepts.
    pub fn after_row(
        event: ChangeMode,
        relation: &'a SourceRelation,
        tuple: &'a [Datum],
        new_tuple: Option<&'a [Datum]>,
    ) -> Self {
        Self {
            timing: TriggerTiming::After,
            level: TriggerLevel::Row,
            event,
            relation,
            tuple,
            new_tuple,
        }
    }
}

/// Validated target of the records of one row event.
#[derive(Debug)]
pub struct CaptureSession<'a> {
    source: &'a SourceRelation,
    log: RelationIdent,
    columns: Vec<String>,
    acting_user: bool,
    layout: LogLayout,
}

impl<'a> CaptureSession<'a> {
    /// Resolve the active log relation and check its column count
    /// against the source: surviving source columns plus the trailer,
    /// plus one with the acting user. The configured sequence column is
    /// not counted.
    pub fn prepare<C: Catalog + ?Sized>(
        catalog: &C,
        source: &'a SourceRelation,
        config: &CaptureConfig,
        partition: PartitionId,
    ) -> Result<Self, CaptureError> {
        let source_name = source.ident().render();
        let source_columns = source.desc.surviving_count();
        if source_columns < 1 {
            return Err(CaptureError::EmptyRelation {
                relation: source_name,
            });
        }
        tracing::debug!(relation = %source_name, columns = source_columns, "source relation");

        let log = config.log_relation(&source.schema, &source.name, partition);
        let log_relid =
            resolve_relation(catalog, &log)?.ok_or_else(|| CaptureError::RelationNotFound {
                relation: log.render(),
            })?;

        let log_desc = catalog.tuple_desc(log_relid)?;
        let sequence = config
            .sequence_column
            .as_deref()
            .and_then(|column| log_desc.attnum(column));
        let log_columns = log_desc.surviving_count() - usize::from(sequence.is_some());
        tracing::debug!(log = %log, columns = log_columns, "log relation");

        let expected = config.expected_log_columns(source_columns);
        if log_columns != expected {
            return Err(CaptureError::ColumnCountMismatch {
                relation: source_name,
                relation_columns: source_columns,
                log: log.render(),
                log_columns,
                expected,
            });
        }

        Ok(Self {
            source,
            log,
            columns: source.desc.surviving_names(),
            acting_user: config.log_acting_user,
            layout: config.layout.clone(),
        })
    }

    pub fn log_relation(&self) -> &RelationIdent {
        &self.log
    }

    /// The INSERT that records `tuple`.
    pub fn statement(
        &self,
        tuple: &[Datum],
        mode: ChangeMode,
        role: TupleRole,
    ) -> Result<Statement, CaptureError> {
        let desc = &self.source.desc;
        if tuple.len() != desc.natts() {
            return Err(CaptureError::TupleShapeMismatch {
                relation: self.source.ident().render(),
                expected: desc.natts(),
                actual: tuple.len(),
            });
        }

        let mut columns = self.columns.clone();
        let mut values: Vec<Expr> = desc
            .surviving()
            .map(|(attnum, _)| Expr::from_datum(&tuple[attnum as usize - 1]))
            .collect();

        if self.acting_user {
            columns.push(self.layout.user_column.clone());
            values.push(Expr::SessionUser);
        }
        columns.extend(self.layout.trailer().iter().map(|c| c.to_string()));
        values.push(Expr::Literal(mode.as_str().into()));
        values.push(Expr::Literal(role.as_str().into()));
        values.push(Expr::Now);

        Ok(Statement::Insert {
            table: self.log.clone(),
            columns,
            values,
        })
    }

    /// Append one record; the insert must succeed and report exactly
    /// one row.
    pub fn append<E: Executor + ?Sized>(
        &self,
        executor: &E,
        tuple: &[Datum],
        mode: ChangeMode,
        role: TupleRole,
    ) -> Result<(), CaptureError> {
        let statement = self.statement(tuple, mode, role)?;
        tracing::trace!(sql = %statement, "log record");

        let outcome = executor
            .execute(&statement)
            .map_err(|err| CaptureError::LogWriteFailed {
                relation: self.log.render(),
                detail: err.to_string(),
            })?;
        match outcome {
            Outcome::Inserted(1) => Ok(()),
            other => Err(CaptureError::LogWriteFailed {
                relation: self.log.render(),
                detail: format!("insert reported {} rows", other.affected()),
            }),
        }
    }
}

/// Capture one row event. Returns the number of records written.
///
/// INSERT logs the new image, DELETE the old one, UPDATE the old then
/// the new image (old only in basic mode).
pub fn capture_row_change<C, E>(
    catalog: &C,
    executor: &E,
    ctx: &TriggerContext<'_>,
    config: &CaptureConfig,
    partition: PartitionId,
) -> Result<usize, CaptureError>
where
    C: Catalog + ?Sized,
    E: Executor + ?Sized,
{
    if ctx.level != TriggerLevel::Row {
        return Err(CaptureError::NotRowTrigger);
    }
    if ctx.timing != TriggerTiming::After {
        return Err(CaptureError::NotAfterTrigger);
    }

    let new_tuple = match (ctx.event, ctx.new_tuple, config.basic) {
        (ChangeMode::Update, None, false) => {
            return Err(CaptureError::MissingNewTuple {
                relation: ctx.relation.ident().render(),
            })
        }
        (_, new_tuple, _) => new_tuple,
    };

    let session = CaptureSession::prepare(catalog, ctx.relation, config, partition)?;

    let written = match ctx.event {
        ChangeMode::Insert => {
            session.append(executor, ctx.tuple, ChangeMode::Insert, TupleRole::New)?;
            1
        }
        ChangeMode::Delete => {
            session.append(executor, ctx.tuple, ChangeMode::Delete, TupleRole::Old)?;
            1
        }
        ChangeMode::Update => {
            session.append(executor, ctx.tuple, ChangeMode::Update, TupleRole::Old)?;
            match new_tuple {
                Some(new_tuple) if !config.basic => {
                    session.append(executor, new_tuple, ChangeMode::Update, TupleRole::New)?;
                    2
                }
                _ => 1,
            }
        }
    };

    tracing::debug!(
        relation = %ctx.relation.ident(),
        log = %session.log_relation(),
        mode = %ctx.event,
        records = written,
        "captured row change"
    );
    Ok(written)
}
