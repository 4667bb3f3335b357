// Catalog Boundary
//
// The minimal view of schema metadata the capture and restore paths
// need: relation lookup, column lists (including dropped slots), index
// definitions and a shared relation lock. Backends implement
// `Catalog`; this module only defines the contract and the helpers
// built on top of it.

use serde::{Deserialize, Serialize};

use crate::ident::RelationIdent;

/// Backend-assigned relation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationId(pub u32);

/// 1-based attribute position within a relation, dropped slots included.
pub type AttrNumber = i16;

/// One column slot of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub dropped: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            dropped: false,
        }
    }
}

/// Column layout of a relation.
///
/// Dropped attributes keep their slot so attribute numbers of the
/// surviving columns never shift.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TupleDesc {
    pub attributes: Vec<Attribute>,
}

impl TupleDesc {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self { attributes }
    }

    /// Total number of slots, dropped ones included.
    pub fn natts(&self) -> usize {
        self.attributes.len()
    }

    /// Surviving attributes with their attribute numbers.
    pub fn surviving(&self) -> impl Iterator<Item = (AttrNumber, &Attribute)> {
        self.attributes
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.dropped)
            .map(|(i, a)| (i as AttrNumber + 1, a))
    }

    pub fn surviving_count(&self) -> usize {
        self.attributes.iter().filter(|a| !a.dropped).count()
    }

    pub fn surviving_names(&self) -> Vec<String> {
        self.surviving().map(|(_, a)| a.name.clone()).collect()
    }

    /// Attribute number of a surviving column.
    pub fn attnum(&self, name: &str) -> Option<AttrNumber> {
        self.surviving()
            .find(|(_, a)| a.name == name)
            .map(|(attnum, _)| attnum)
    }

    /// Surviving attribute at `attnum`.
    pub fn attribute(&self, attnum: AttrNumber) -> Option<&Attribute> {
        let index = usize::try_from(attnum).ok()?.checked_sub(1)?;
        self.attributes.get(index).filter(|a| !a.dropped)
    }
}

/// Index definition as far as key discovery needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub is_primary: bool,
    pub key_attnums: Vec<AttrNumber>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("schema \"{schema}\" does not exist")]
    SchemaNotFound { schema: String },

    #[error("permission denied for schema \"{schema}\"")]
    PermissionDenied { schema: String },

    #[error("cache lookup failed for relation {0:?}")]
    UnknownRelation(RelationId),
}

/// Read access to schema metadata.
///
/// Implementations must answer from a view consistent with the
/// statements executed through the same backend.
pub trait Catalog {
    /// Check an explicitly named schema exists and is usable by the
    /// current user.
    fn lookup_namespace(&self, schema: &str) -> Result<(), CatalogError>;

    /// Relation `name` inside `schema`.
    fn relation_in_namespace(&self, schema: &str, name: &str) -> Option<RelationId>;

    /// First relation called `name` along the search path.
    fn relation_on_search_path(&self, name: &str) -> Option<RelationId>;

    fn relation_name(&self, relid: RelationId) -> Result<String, CatalogError>;

    fn relation_namespace(&self, relid: RelationId) -> Result<String, CatalogError>;

    fn tuple_desc(&self, relid: RelationId) -> Result<TupleDesc, CatalogError>;

    fn indexes(&self, relid: RelationId) -> Result<Vec<IndexDef>, CatalogError>;

    /// Take an access-share lock on the relation.
    fn lock_shared(&self, relid: RelationId) -> Result<(), CatalogError>;

    fn unlock_shared(&self, relid: RelationId);
}

/// Resolve an identifier to a relation, honoring explicit-schema rules.
///
/// A qualified name first checks the schema itself, so a missing or
/// inaccessible schema is an error rather than "no such relation".
pub fn resolve_relation<C: Catalog + ?Sized>(
    catalog: &C,
    ident: &RelationIdent,
) -> Result<Option<RelationId>, CatalogError> {
    match ident {
        RelationIdent::Qualified { schema, name } => {
            catalog.lookup_namespace(schema)?;
            Ok(catalog.relation_in_namespace(schema, name))
        }
        RelationIdent::Bare { name } => Ok(catalog.relation_on_search_path(name)),
    }
}

/// Access-share lock held until dropped.
pub struct SharedLock<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    relid: RelationId,
}

impl<'a, C: Catalog + ?Sized> SharedLock<'a, C> {
    pub fn acquire(catalog: &'a C, relid: RelationId) -> Result<Self, CatalogError> {
        catalog.lock_shared(relid)?;
        Ok(Self { catalog, relid })
    }

    pub fn relid(&self) -> RelationId {
        self.relid
    }
}

impl<C: Catalog + ?Sized> Drop for SharedLock<'_, C> {
    fn drop(&mut self) {
        self.catalog.unlock_shared(self.relid);
    }
}
