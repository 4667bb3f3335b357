// Statement Transport
//
// The storage backend is an opaque "execute a statement, get rows or
// an error" service. Values travel in their text output form, NULL as
// `None`, which is all capture and replay ever need.

use parking_lot::Mutex;

use crate::statement::Statement;

/// A column value in text form; `None` is NULL.
pub type Datum = Option<String>;

/// One result row.
pub type Row = Vec<Datum>;

/// Result of executing a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Rows { columns: Vec<String>, rows: Vec<Row> },
    Inserted(u64),
    Updated(u64),
    Deleted(u64),
    /// Relation created; carries the number of rows copied into it.
    Created(u64),
}

impl Outcome {
    pub fn affected(&self) -> u64 {
        match self {
            Self::Rows { rows, .. } => rows.len() as u64,
            Self::Inserted(n) | Self::Updated(n) | Self::Deleted(n) | Self::Created(n) => *n,
        }
    }

    pub fn into_rows(self) -> Option<Vec<Row>> {
        match self {
            Self::Rows { rows, .. } => Some(rows),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("relation {relation} does not exist")]
    UndefinedRelation { relation: String },

    #[error("relation {relation} already exists")]
    DuplicateRelation { relation: String },

    #[error("column \"{column}\" of relation {relation} does not exist")]
    UndefinedColumn { relation: String, column: String },

    #[error("{relation}: {columns} columns but {values} values")]
    ValueCount {
        relation: String,
        columns: usize,
        values: usize,
    },

    #[error("duplicate key value violates primary key of {relation}: {key}")]
    UniqueViolation { relation: String, key: String },

    #[error("null value in primary key column \"{column}\" of {relation}")]
    NotNullViolation { relation: String, column: String },

    #[error("capture hook on {relation} failed: {detail}")]
    TriggerFailed { relation: String, detail: String },

    #[error("statement rejected: {0}")]
    Rejected(String),
}

/// Executes typed statements against a storage backend.
pub trait Executor {
    fn execute(&self, statement: &Statement) -> Result<Outcome, BackendError>;
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, statement: &Statement) -> Result<Outcome, BackendError> {
        (**self).execute(statement)
    }
}

/// Executor decorator that logs and records the rendered SQL of every
/// statement passed through it.
pub struct SqlTrace<E> {
    inner: E,
    transcript: Mutex<Vec<String>>,
}

impl<E: Executor> SqlTrace<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            transcript: Mutex::new(Vec::new()),
        }
    }

    /// Rendered statements in execution order.
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.lock().clone()
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: Executor> Executor for SqlTrace<E> {
    fn execute(&self, statement: &Statement) -> Result<Outcome, BackendError> {
        let sql = statement.render();
        tracing::trace!(%sql, "executing statement");
        self.transcript.lock().push(sql);
        self.inner.execute(statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::RelationIdent;
    use crate::statement::{Expr, Predicate};

    struct CountingExecutor;

    impl Executor for CountingExecutor {
        fn execute(&self, statement: &Statement) -> Result<Outcome, BackendError> {
            match statement {
                Statement::Delete { .. } => Ok(Outcome::Deleted(1)),
                other => Err(BackendError::Rejected(other.kind().into())),
            }
        }
    }

    #[test]
    fn trace_records_rendered_sql_even_on_failure() {
        let trace = SqlTrace::new(CountingExecutor);
        let delete = Statement::Delete {
            table: RelationIdent::bare("t"),
            filter: Predicate::eq("id", Expr::Literal("7".into())),
        };
        let select = Statement::Select {
            table: RelationIdent::bare("t"),
            columns: vec!["id".into()],
            filter: vec![],
            order_by: None,
        };

        assert_eq!(trace.execute(&delete).unwrap().affected(), 1);
        assert!(trace.execute(&select).is_err());
        assert_eq!(
            trace.transcript(),
            vec![
                "DELETE FROM \"t\" WHERE \"id\" = '7'".to_string(),
                "SELECT \"id\" FROM \"t\"".to_string(),
            ]
        );
    }
}
