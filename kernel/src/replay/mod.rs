// Replay Engine
//
// Rebuilds a relation as of a past instant from its change log. Forward
// replay starts from an empty copy of the source and re-applies every
// record up to the cutoff in log order. Backward replay starts from a
// copy of the current source and undoes every record from the cutoff
// on, newest first. Records are applied strictly one at a time; a
// failure stops the pass and leaves the restore relation as far as it
// got.

mod pairing;

pub use pairing::{Action, Step, UpdatePairing};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, Datum, Executor, Outcome};
use crate::ident::RelationIdent;
use crate::log::{ChangeRecord, RecordError};
use crate::restore::RestoreDescriptor;
use crate::statement::{Comparison, Expr, Predicate, SortOrder, Statement};

/// Errors that stop a replay pass.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("corrupt log record: {0}")]
    Record(#[from] RecordError),

    #[error("NULL value in key column \"{column}\" of a {relation} record")]
    NullKey { relation: String, column: String },

    #[error("{statement} on {relation} failed: {source}")]
    Backend {
        statement: &'static str,
        relation: String,
        source: BackendError,
    },

    #[error("{statement} on {relation} returned {outcome}")]
    UnexpectedOutcome {
        statement: &'static str,
        relation: String,
        outcome: String,
    },
}

/// Replay direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    #[default]
    Forward,
    Backward,
}

impl ReplayMode {
    /// Integer flag form: anything above zero is backward.
    pub fn from_flag(flag: i64) -> Self {
        if flag > 0 {
            Self::Backward
        } else {
            Self::Forward
        }
    }

    fn cutoff_comparison(self) -> Comparison {
        match self {
            Self::Forward => Comparison::LtEq,
            Self::Backward => Comparison::GtEq,
        }
    }

    fn log_order(self) -> SortOrder {
        match self {
            Self::Forward => SortOrder::Asc,
            Self::Backward => SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOptions {
    pub cutoff: DateTime<Utc>,
    /// Restrict seed and log selection to one key value.
    pub key_filter: Option<String>,
    pub mode: ReplayMode,
}

impl ReplayOptions {
    pub fn new(cutoff: DateTime<Utc>, mode: ReplayMode) -> Self {
        Self {
            cutoff,
            key_filter: None,
            mode,
        }
    }

    /// An empty filter means no filter.
    pub fn with_key_filter(mut self, key: Option<String>) -> Self {
        self.key_filter = key.filter(|k| !k.is_empty());
        self
    }
}

/// What one replay pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub restore: RelationIdent,
    pub mode: ReplayMode,
    /// Rows copied from the source when seeding.
    pub seeded: u64,
    /// Log records selected.
    pub records: usize,
    /// Row actions applied.
    pub applied: usize,
}

fn run<E: Executor + ?Sized>(
    executor: &E,
    statement: &Statement,
) -> Result<Outcome, ReplayError> {
    executor
        .execute(statement)
        .map_err(|source| ReplayError::Backend {
            statement: statement.kind(),
            relation: statement.table().render(),
            source,
        })
}

fn key_predicate(column: &str, key: &str) -> Predicate {
    Predicate::eq(column, Expr::Literal(key.to_string()))
}

/// Create the restore relation: an empty copy of the source for
/// forward replay, a full (or key-filtered) copy for backward replay.
pub fn seed_statement(descr: &RestoreDescriptor, options: &ReplayOptions) -> Statement {
    let backward = options.mode == ReplayMode::Backward;
    Statement::CreateTableAs {
        table: descr.restore.clone(),
        temporary: descr.temporary,
        source: descr.source.clone(),
        filter: match (&options.key_filter, backward) {
            (Some(key), true) => Some(key_predicate(descr.key_name(), key)),
            _ => None,
        },
        with_data: backward,
    }
}

/// Log records in replay order: up to the cutoff ascending for forward
/// replay, from the cutoff on descending for backward replay.
pub fn selection_statement(descr: &RestoreDescriptor, options: &ReplayOptions) -> Statement {
    let mut columns = descr.source_columns.clone();
    columns.extend(descr.layout.trailer().iter().map(|c| c.to_string()));

    let mut filter = vec![Predicate::cmp(
        descr.layout.changed_column.clone(),
        options.mode.cutoff_comparison(),
        Expr::Timestamp(options.cutoff),
    )];
    if let Some(key) = &options.key_filter {
        filter.push(key_predicate(descr.key_name(), key));
    }

    Statement::Select {
        table: descr.log.clone(),
        columns,
        filter,
        order_by: Some((descr.log_key.clone(), options.mode.log_order())),
    }
}

fn require_key(descr: &RestoreDescriptor, key: Datum) -> Result<Expr, ReplayError> {
    match key {
        Some(key) => Ok(Expr::Literal(key)),
        None => Err(ReplayError::NullKey {
            relation: descr.log.render(),
            column: descr.key_name().to_string(),
        }),
    }
}

/// The statement applying `action` to the restore relation.
pub fn action_statement(
    descr: &RestoreDescriptor,
    action: Action,
) -> Result<Statement, ReplayError> {
    let table = descr.restore.clone();
    Ok(match action {
        Action::Insert { values } => Statement::Insert {
            table,
            columns: descr.source_columns.clone(),
            values: values.iter().map(Expr::from_datum).collect(),
        },
        Action::Delete { key } => Statement::Delete {
            table,
            filter: Predicate::eq(descr.key_name(), require_key(descr, key)?),
        },
        Action::Update { target_key, values } => Statement::Update {
            table,
            assignments: descr
                .source_columns
                .iter()
                .cloned()
                .zip(values.iter().map(Expr::from_datum))
                .collect(),
            filter: Predicate::eq(descr.key_name(), require_key(descr, target_key)?),
        },
    })
}

/// Seed the restore relation and replay the log into it.
pub fn replay<E: Executor + ?Sized>(
    executor: &E,
    descr: &RestoreDescriptor,
    options: &ReplayOptions,
) -> Result<ReplaySummary, ReplayError> {
    let seed = seed_statement(descr, options);
    let seeded = match run(executor, &seed)? {
        Outcome::Created(rows) => rows,
        other => {
            return Err(ReplayError::UnexpectedOutcome {
                statement: seed.kind(),
                relation: descr.restore.render(),
                outcome: format!("{other:?}"),
            })
        }
    };
    tracing::debug!(restore = %descr.restore, rows = seeded, "restore relation seeded");

    let select = selection_statement(descr, options);
    let rows = run(executor, &select)?
        .into_rows()
        .ok_or_else(|| ReplayError::UnexpectedOutcome {
            statement: select.kind(),
            relation: descr.log.render(),
            outcome: "no rows".into(),
        })?;
    let records = rows.len();
    tracing::debug!(log = %descr.log, records, mode = ?options.mode, "log records selected");

    let mut pairing = UpdatePairing::new(options.mode, descr.key_position);
    let mut applied = 0;
    for row in rows {
        let record = ChangeRecord::from_log_row(row, descr.source_columns.len())?;
        let (mode, role) = (record.mode, record.role);

        let action = match pairing.apply(record) {
            Step::Carry => continue,
            Step::Apply(action) => action,
        };
        let statement = action_statement(descr, action)?;
        let outcome = run(executor, &statement)?;
        if outcome.affected() == 0 {
            tracing::debug!(sql = %statement, "record matched no row");
        }
        tracing::debug!(%mode, %role, affected = outcome.affected(), "record applied");
        applied += 1;
    }

    tracing::info!(
        restore = %descr.restore,
        mode = ?options.mode,
        records,
        applied,
        "replay finished"
    );

    Ok(ReplaySummary {
        restore: descr.restore.clone(),
        mode: options.mode,
        seeded,
        records,
        applied,
    })
}
