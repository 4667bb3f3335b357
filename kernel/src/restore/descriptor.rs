// Restore Descriptor
//
// Everything a restore needs to know about its three relations,
// validated up front. Building a descriptor creates nothing.

use crate::catalog::{resolve_relation, Catalog, CatalogError, RelationId};
use crate::ident::{IdentError, RelationIdent};
use crate::keys::{resolve_primary_key, KeyColumn, KeyError, PrimaryKey};
use crate::log::LogLayout;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("invalid syntax for {role} table name: {source}")]
    InvalidName {
        role: &'static str,
        source: IdentError,
    },

    #[error("{role} relation {relation} does not exist")]
    RelationNotFound {
        role: &'static str,
        relation: String,
    },

    #[error("restore table {relation} already exists")]
    RestoreTableExists { relation: String },

    #[error("primary key of log table {log} (\"{column}\") is part of the source table's key")]
    KeyCollision { log: String, column: String },

    #[error("composite primary key on {relation} ({}) is not supported by restore", .columns.join(", "))]
    CompositeKeyUnsupported {
        relation: String,
        columns: Vec<String>,
    },

    #[error("column \"{column}\" of relation {relation} does not exist")]
    ColumnNotFound { relation: String, column: String },

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Validated identity of the source, log and restore relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreDescriptor {
    /// Source relation, schema-qualified after resolution.
    pub source: RelationIdent,
    pub source_relid: RelationId,
    /// Surviving source columns, in source order.
    pub source_columns: Vec<String>,
    pub primary_key: PrimaryKey,
    /// Index of the key column within `source_columns`.
    pub key_position: usize,
    pub log: RelationIdent,
    pub log_relid: RelationId,
    /// Monotonic ordering column of the log relation.
    pub log_key: String,
    pub layout: LogLayout,
    /// Restore relation as named by the caller.
    pub restore: RelationIdent,
    pub temporary: bool,
}

impl RestoreDescriptor {
    /// The single key column.
    pub fn key(&self) -> &KeyColumn {
        &self.primary_key.columns()[0]
    }

    pub fn key_name(&self) -> &str {
        &self.key().name
    }

    pub fn keep_permanent(mut self, permanent: bool) -> Self {
        self.temporary = !permanent;
        self
    }
}

fn parse_name(role: &'static str, input: &str) -> Result<RelationIdent, DescriptorError> {
    RelationIdent::parse(input).map_err(|source| DescriptorError::InvalidName { role, source })
}

fn require<C: Catalog + ?Sized>(
    catalog: &C,
    role: &'static str,
    ident: &RelationIdent,
) -> Result<RelationId, DescriptorError> {
    resolve_relation(catalog, ident)?.ok_or_else(|| DescriptorError::RelationNotFound {
        role,
        relation: ident.render(),
    })
}

/// Validate the names of a restore and resolve everything replay needs.
///
/// `source_pk` names an explicit single key column; without it the
/// source's primary index is used. The restore relation must not exist
/// yet and is temporary unless changed with `keep_permanent`.
pub fn build_restore_descriptor<C: Catalog + ?Sized>(
    catalog: &C,
    source: &str,
    source_pk: Option<&str>,
    log: &str,
    log_key: &str,
    restore: &str,
    layout: &LogLayout,
) -> Result<RestoreDescriptor, DescriptorError> {
    let source = parse_name("source", source)?;
    let log = parse_name("log", log)?;
    let restore = parse_name("restore", restore)?;

    let source_relid = require(catalog, "source", &source)?;
    let log_relid = require(catalog, "log", &log)?;

    if resolve_relation(catalog, &restore)?.is_some() {
        return Err(DescriptorError::RestoreTableExists {
            relation: restore.render(),
        });
    }

    let source = RelationIdent::qualified(
        catalog.relation_namespace(source_relid)?,
        catalog.relation_name(source_relid)?,
    );
    let primary_key = resolve_primary_key(catalog, source_relid, source_pk)?;

    if primary_key.contains(log_key) {
        return Err(DescriptorError::KeyCollision {
            log: log.render(),
            column: log_key.to_string(),
        });
    }
    if primary_key.is_composite() {
        return Err(DescriptorError::CompositeKeyUnsupported {
            relation: source.render(),
            columns: primary_key.names().into_iter().map(str::to_string).collect(),
        });
    }

    let source_columns = catalog.tuple_desc(source_relid)?.surviving_names();
    let key_name = &primary_key.columns()[0].name;
    let key_position = source_columns
        .iter()
        .position(|c| c == key_name)
        .ok_or_else(|| DescriptorError::ColumnNotFound {
            relation: source.render(),
            column: key_name.clone(),
        })?;

    // the log must carry every column replay selects from it
    let log_desc = catalog.tuple_desc(log_relid)?;
    let needed = std::iter::once(log_key)
        .chain(source_columns.iter().map(String::as_str))
        .chain(layout.trailer());
    for column in needed {
        if log_desc.attnum(column).is_none() {
            return Err(DescriptorError::ColumnNotFound {
                relation: log.render(),
                column: column.to_string(),
            });
        }
    }

    tracing::debug!(
        source = %source,
        log = %log,
        restore = %restore,
        key = %key_name,
        "restore descriptor built"
    );

    Ok(RestoreDescriptor {
        source,
        source_relid,
        source_columns,
        primary_key,
        key_position,
        log,
        log_relid,
        log_key: log_key.to_string(),
        layout: layout.clone(),
        restore,
        temporary: true,
    })
}
