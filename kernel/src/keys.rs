// Primary Key Resolution
//
// Finds the key columns of a source relation, either from its primary
// index or from a single column named by the caller. The lookup holds
// an access-share lock on the relation and never upgrades it.

use crate::catalog::{AttrNumber, Catalog, CatalogError, RelationId, SharedLock};

/// One key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    pub attnum: AttrNumber,
    pub name: String,
}

/// Ordered primary key columns; never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    columns: Vec<KeyColumn>,
}

impl PrimaryKey {
    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn is_composite(&self) -> bool {
        self.columns.len() > 1
    }

    /// The key column, when the key has exactly one.
    pub fn single(&self) -> Option<&KeyColumn> {
        match self.columns.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("column \"{column}\" of relation \"{relation}\" does not exist")]
    ColumnNotFound { relation: String, column: String },

    #[error("no primary key on table \"{relation}\" found")]
    NoPrimaryKey { relation: String },

    #[error("primary key of \"{relation}\" references invalid attribute {attnum}")]
    InvalidKeyAttribute { relation: String, attnum: AttrNumber },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Resolve the primary key of `relid`.
///
/// With `explicit_column` the key is that single column; otherwise the
/// relation's primary index defines the columns and their order.
pub fn resolve_primary_key<C: Catalog + ?Sized>(
    catalog: &C,
    relid: RelationId,
    explicit_column: Option<&str>,
) -> Result<PrimaryKey, KeyError> {
    let _lock = SharedLock::acquire(catalog, relid)?;
    let relation = catalog.relation_name(relid)?;
    let desc = catalog.tuple_desc(relid)?;

    let columns = match explicit_column {
        Some(column) => {
            let attnum = desc.attnum(column).ok_or_else(|| KeyError::ColumnNotFound {
                relation: relation.clone(),
                column: column.to_string(),
            })?;
            vec![KeyColumn {
                attnum,
                name: column.to_string(),
            }]
        }
        None => {
            let primary = catalog
                .indexes(relid)?
                .into_iter()
                .find(|index| index.is_primary)
                .ok_or_else(|| KeyError::NoPrimaryKey {
                    relation: relation.clone(),
                })?;

            primary
                .key_attnums
                .iter()
                .map(|&attnum| {
                    desc.attribute(attnum)
                        .map(|a| KeyColumn {
                            attnum,
                            name: a.name.clone(),
                        })
                        .ok_or_else(|| KeyError::InvalidKeyAttribute {
                            relation: relation.clone(),
                            attnum,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    if columns.is_empty() {
        return Err(KeyError::NoPrimaryKey { relation });
    }

    tracing::debug!(
        relation = %relation,
        columns = ?columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "resolved primary key"
    );

    Ok(PrimaryKey { columns })
}
