// Typed Statements
//
// The capture and replay paths never assemble statement text by hand.
// They build a `Statement` value; `render()` produces PostgreSQL text
// with every identifier and literal routed through `crate::quote`.
// Backends that understand the typed form may execute it directly.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::ident::RelationIdent;
use crate::quote::{quote_identifier, quote_literal};

/// Value expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Null,
    /// Text literal; the backend converts it to the column type.
    Literal(String),
    Timestamp(DateTime<Utc>),
    /// Transaction timestamp of the backend.
    Now,
    SessionUser,
}

impl Expr {
    /// Literal for `Some`, NULL for `None`.
    pub fn from_datum(datum: &Option<String>) -> Self {
        match datum {
            Some(text) => Self::Literal(text.clone()),
            None => Self::Null,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Literal(text) => quote_literal(text),
            Self::Timestamp(ts) => format!(
                "{}::timestamptz",
                quote_literal(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            ),
            Self::Now => "NOW()".to_string(),
            Self::SessionUser => "SESSION_USER".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    LtEq,
    GtEq,
}

impl Comparison {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::LtEq => "<=",
            Self::GtEq => ">=",
        }
    }
}

/// `column <op> value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub column: String,
    pub op: Comparison,
    pub value: Expr,
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: Expr) -> Self {
        Self {
            column: column.into(),
            op: Comparison::Eq,
            value,
        }
    }

    pub fn cmp(column: impl Into<String>, op: Comparison, value: Expr) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn render(&self) -> String {
        format!(
            "{} {} {}",
            quote_identifier(&self.column),
            self.op.as_sql(),
            self.value.render()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Insert {
        table: RelationIdent,
        columns: Vec<String>,
        values: Vec<Expr>,
    },
    Update {
        table: RelationIdent,
        assignments: Vec<(String, Expr)>,
        filter: Predicate,
    },
    Delete {
        table: RelationIdent,
        filter: Predicate,
    },
    Select {
        table: RelationIdent,
        columns: Vec<String>,
        filter: Vec<Predicate>,
        order_by: Option<(String, SortOrder)>,
    },
    /// Create `table` with the shape (and optionally the rows) of `source`.
    CreateTableAs {
        table: RelationIdent,
        temporary: bool,
        source: RelationIdent,
        filter: Option<Predicate>,
        with_data: bool,
    },
}

impl Statement {
    /// Short statement kind, for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "INSERT",
            Self::Update { .. } => "UPDATE",
            Self::Delete { .. } => "DELETE",
            Self::Select { .. } => "SELECT",
            Self::CreateTableAs { .. } => "CREATE TABLE AS",
        }
    }

    pub fn table(&self) -> &RelationIdent {
        match self {
            Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::Select { table, .. }
            | Self::CreateTableAs { table, .. } => table,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Insert {
                table,
                columns,
                values,
            } => format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                join_identifiers(columns),
                values.iter().map(Expr::render).collect::<Vec<_>>().join(", ")
            ),
            Self::Update {
                table,
                assignments,
                filter,
            } => format!(
                "UPDATE {} SET {} WHERE {}",
                table,
                assignments
                    .iter()
                    .map(|(column, value)| format!("{}={}", quote_identifier(column), value.render()))
                    .collect::<Vec<_>>()
                    .join(", "),
                filter.render()
            ),
            Self::Delete { table, filter } => {
                format!("DELETE FROM {} WHERE {}", table, filter.render())
            }
            Self::Select {
                table,
                columns,
                filter,
                order_by,
            } => {
                let mut sql = format!("SELECT {} FROM {}", join_identifiers(columns), table);
                if !filter.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(
                        &filter
                            .iter()
                            .map(Predicate::render)
                            .collect::<Vec<_>>()
                            .join(" AND "),
                    );
                }
                if let Some((column, order)) = order_by {
                    let dir = match order {
                        SortOrder::Asc => "ASC",
                        SortOrder::Desc => "DESC",
                    };
                    sql.push_str(&format!(" ORDER BY {} {}", quote_identifier(column), dir));
                }
                sql
            }
            Self::CreateTableAs {
                table,
                temporary,
                source,
                filter,
                with_data,
            } => {
                let mut sql = format!(
                    "CREATE {}TABLE {} AS SELECT * FROM {}",
                    if *temporary { "TEMPORARY " } else { "" },
                    table,
                    source
                );
                if let Some(filter) = filter {
                    sql.push_str(" WHERE ");
                    sql.push_str(&filter.render());
                }
                if !with_data {
                    sql.push_str(" LIMIT 0");
                }
                sql
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn join_identifiers(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn insert_quotes_everything() {
        let stmt = Statement::Insert {
            table: RelationIdent::qualified("public", "orders_log"),
            columns: vec!["id".into(), "note".into(), "trigger_changed".into()],
            values: vec![Expr::Literal("1".into()), Expr::Literal("it's".into()), Expr::Now],
        };
        assert_eq!(
            stmt.render(),
            "INSERT INTO \"public\".\"orders_log\" (\"id\", \"note\", \"trigger_changed\") VALUES ('1', 'it''s', NOW())"
        );
    }

    #[test]
    fn update_and_delete_render_filters() {
        let table = RelationIdent::bare("restore");
        let update = Statement::Update {
            table: table.clone(),
            assignments: vec![("id".into(), Expr::Literal("2".into())), ("status".into(), Expr::Null)],
            filter: Predicate::eq("id", Expr::Literal("1".into())),
        };
        assert_eq!(
            update.render(),
            "UPDATE \"restore\" SET \"id\"='2', \"status\"=NULL WHERE \"id\" = '1'"
        );

        let delete = Statement::Delete {
            table,
            filter: Predicate::eq("id", Expr::Literal("1".into())),
        };
        assert_eq!(delete.render(), "DELETE FROM \"restore\" WHERE \"id\" = '1'");
    }

    #[test]
    fn select_renders_cutoff_and_order() {
        let cutoff = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let stmt = Statement::Select {
            table: RelationIdent::bare("orders_log"),
            columns: vec!["id".into()],
            filter: vec![Predicate::cmp("trigger_changed", Comparison::LtEq, Expr::Timestamp(cutoff))],
            order_by: Some(("trigger_id".into(), SortOrder::Asc)),
        };
        assert_eq!(
            stmt.render(),
            "SELECT \"id\" FROM \"orders_log\" WHERE \"trigger_changed\" <= '2024-03-01T12:00:00.000000Z'::timestamptz ORDER BY \"trigger_id\" ASC"
        );
    }

    #[test]
    fn create_table_as_without_data_uses_limit_zero() {
        let stmt = Statement::CreateTableAs {
            table: RelationIdent::bare("orders_restore"),
            temporary: true,
            source: RelationIdent::bare("orders"),
            filter: None,
            with_data: false,
        };
        assert_eq!(
            stmt.render(),
            "CREATE TEMPORARY TABLE \"orders_restore\" AS SELECT * FROM \"orders\" LIMIT 0"
        );
    }

    #[test]
    fn hostile_values_stay_inside_literals() {
        let stmt = Statement::Delete {
            table: RelationIdent::bare("t"),
            filter: Predicate::eq("id", Expr::Literal("1'; DROP TABLE t; --".into())),
        };
        assert_eq!(stmt.render(), "DELETE FROM \"t\" WHERE \"id\" = '1''; DROP TABLE t; --'");
    }
}
