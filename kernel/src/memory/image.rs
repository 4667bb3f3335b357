// Serializable snapshot of a `MemoryDatabase`, used by the CLI to load
// and save database state as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::table::{ColumnSpec, Table};
use super::MemoryDatabase;
use crate::backend::{BackendError, Row};
use crate::catalog::AttrNumber;

fn default_schema() -> String {
    "public".to_string()
}

fn default_search_path() -> Vec<String> {
    vec![default_schema()]
}

fn default_user() -> String {
    "postgres".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableImage {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub temporary: bool,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Full-width rows matching `columns`, dropped slots included.
    #[serde(default)]
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseImage {
    #[serde(default = "default_search_path")]
    pub search_path: Vec<String>,
    #[serde(default = "default_user")]
    pub session_user: String,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    /// Schemas besides those implied by `tables`.
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub tables: Vec<TableImage>,
}

impl MemoryDatabase {
    pub fn from_image(image: DatabaseImage) -> Result<Self, BackendError> {
        let db = MemoryDatabase::new();
        {
            let mut inner = db.inner.write();
            inner.search_path = image.search_path;
            inner.session_user = image.session_user;
            if let Some(now) = image.now {
                inner.now = now;
            }
            for schema in image.schemas {
                inner.schemas.entry(schema).or_insert(true);
            }

            for t in image.tables {
                inner.schemas.entry(t.schema.clone()).or_insert(true);
                if inner.lookup(&t.schema, &t.name).is_some() {
                    return Err(BackendError::DuplicateRelation {
                        relation: format!("{}.{}", t.schema, t.name),
                    });
                }

                let mut table = Table {
                    schema: t.schema,
                    name: t.name,
                    temporary: t.temporary,
                    columns: t.columns,
                    primary_key: Vec::new(),
                    rows: Vec::with_capacity(t.rows.len()),
                    next_serial: 1,
                };
                table.primary_key = t
                    .primary_key
                    .iter()
                    .map(|column| table.slot(column).map(|slot| slot as AttrNumber + 1))
                    .collect::<Result<_, _>>()?;

                for row in t.rows {
                    if row.len() != table.columns.len() {
                        return Err(BackendError::ValueCount {
                            relation: table.display_name(),
                            columns: table.columns.len(),
                            values: row.len(),
                        });
                    }
                    table.check_primary_key(&row, None)?;
                    table.rows.push(row);
                }
                table.recompute_serial();
                inner.add_table(table);
            }
        }
        Ok(db)
    }

    pub fn to_image(&self) -> DatabaseImage {
        let inner = self.inner.read();
        DatabaseImage {
            search_path: inner.search_path.clone(),
            session_user: inner.session_user.clone(),
            now: Some(inner.now),
            schemas: inner.schemas.keys().cloned().collect(),
            tables: inner
                .tables
                .values()
                .map(|t| TableImage {
                    schema: t.schema.clone(),
                    name: t.name.clone(),
                    temporary: t.temporary,
                    columns: t.columns.clone(),
                    primary_key: t
                        .primary_key
                        .iter()
                        .map(|attnum| t.columns[*attnum as usize - 1].name.clone())
                        .collect(),
                    rows: t.rows.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Executor;
    use crate::ident::RelationIdent;
    use crate::statement::{Expr, Statement};

    const IMAGE: &str = r#"{
        "tables": [
            {
                "name": "orders",
                "columns": [
                    {"name": "id", "type": "integer"},
                    {"name": "status", "type": "text"}
                ],
                "primary_key": ["id"],
                "rows": [["1", "new"], ["2", null]]
            },
            {
                "schema": "audit",
                "name": "orders_log",
                "columns": [
                    {"name": "trigger_id", "type": "bigint", "serial": true},
                    {"name": "id", "type": "integer"}
                ],
                "rows": [["7", "1"]]
            }
        ]
    }"#;

    #[test]
    fn load_json_image() {
        let image: DatabaseImage = serde_json::from_str(IMAGE).unwrap();
        let db = MemoryDatabase::from_image(image).unwrap();

        let rows = db.rows(&RelationIdent::bare("orders")).unwrap();
        assert_eq!(rows[1], vec![Some("2".to_string()), None]);

        // serial continues after the highest loaded value
        db.execute(&Statement::Insert {
            table: RelationIdent::qualified("audit", "orders_log"),
            columns: vec!["id".into()],
            values: vec![Expr::Literal("2".into())],
        })
        .unwrap();
        let log = db.rows(&RelationIdent::qualified("audit", "orders_log")).unwrap();
        assert_eq!(log[1][0], Some("8".to_string()));
    }

    #[test]
    fn image_survives_a_save_and_load() {
        let image: DatabaseImage = serde_json::from_str(IMAGE).unwrap();
        let db = MemoryDatabase::from_image(image).unwrap();
        let saved = db.to_image();
        let reloaded = MemoryDatabase::from_image(saved.clone()).unwrap();
        assert_eq!(reloaded.to_image(), saved);
    }

    #[test]
    fn duplicate_keys_in_image_are_rejected() {
        let image: DatabaseImage = serde_json::from_str(
            r#"{"tables": [{"name": "t", "columns": [{"name": "id", "type": "integer"}],
                "primary_key": ["id"], "rows": [["1"], ["1"]]}]}"#,
        )
        .unwrap();
        assert!(matches!(
            MemoryDatabase::from_image(image),
            Err(BackendError::UniqueViolation { .. })
        ));
    }
}
