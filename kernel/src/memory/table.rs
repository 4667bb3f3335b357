// In-memory table storage and value comparison.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, Datum, Row};
use crate::catalog::{AttrNumber, Attribute, IndexDef, TupleDesc};
use crate::statement::{Comparison, Predicate};

/// Column definition used when creating tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Filled from a per-table sequence when an insert omits it.
    #[serde(default)]
    pub serial: bool,
    #[serde(default)]
    pub dropped: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            serial: false,
            dropped: false,
        }
    }

    pub fn serial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: "bigint".into(),
            serial: true,
            dropped: false,
        }
    }

    pub(crate) fn kind(&self) -> ValueKind {
        ValueKind::of(&self.type_name)
    }
}

/// Comparison family of a column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueKind {
    Integer,
    Numeric,
    Timestamp,
    Text,
}

impl ValueKind {
    pub fn of(type_name: &str) -> Self {
        let type_name = type_name.trim().to_ascii_lowercase();
        match type_name.as_str() {
            "smallint" | "integer" | "int" | "int2" | "int4" | "int8" | "bigint"
            | "smallserial" | "serial" | "bigserial" | "serial2" | "serial4" | "serial8" => {
                ValueKind::Integer
            }
            "real" | "float4" | "float8" | "double precision" => ValueKind::Numeric,
            t if t.starts_with("numeric") || t.starts_with("decimal") => ValueKind::Numeric,
            t if t.starts_with("timestamp") => ValueKind::Timestamp,
            _ => ValueKind::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub schema: String,
    pub name: String,
    pub temporary: bool,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<AttrNumber>,
    /// Full-width rows, dropped slots included.
    pub rows: Vec<Row>,
    pub next_serial: i64,
}

impl Table {
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn desc(&self) -> TupleDesc {
        TupleDesc::new(
            self.columns
                .iter()
                .map(|c| Attribute {
                    name: c.name.clone(),
                    type_name: c.type_name.clone(),
                    dropped: c.dropped,
                })
                .collect(),
        )
    }

    pub fn indexes(&self) -> Vec<IndexDef> {
        if self.primary_key.is_empty() {
            return Vec::new();
        }
        vec![IndexDef {
            name: format!("{}_pkey", self.name),
            is_primary: true,
            key_attnums: self.primary_key.clone(),
        }]
    }

    /// Slot index of a surviving column.
    pub fn slot(&self, column: &str) -> Result<usize, BackendError> {
        self.columns
            .iter()
            .position(|c| !c.dropped && c.name == column)
            .ok_or_else(|| BackendError::UndefinedColumn {
                relation: self.display_name(),
                column: column.to_string(),
            })
    }

    pub fn kind(&self, slot: usize) -> ValueKind {
        self.columns[slot].kind()
    }

    /// Project a full-width row onto the surviving columns.
    pub fn project(&self, row: &Row) -> Row {
        self.columns
            .iter()
            .zip(row)
            .filter(|(c, _)| !c.dropped)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn matches(&self, row: &Row, filter: &[ResolvedPredicate]) -> bool {
        filter.iter().all(|p| p.matches(row))
    }

    pub fn resolve_predicate(
        &self,
        predicate: &Predicate,
        value: Datum,
    ) -> Result<ResolvedPredicate, BackendError> {
        let slot = self.slot(&predicate.column)?;
        Ok(ResolvedPredicate {
            slot,
            kind: self.kind(slot),
            op: predicate.op,
            value,
        })
    }

    /// Fill serial columns the insert did not provide.
    pub fn fill_serials(&mut self, row: &mut Row, provided: &[usize]) {
        for (slot, column) in self.columns.iter().enumerate() {
            if column.serial && !column.dropped && !provided.contains(&slot) {
                row[slot] = Some(self.next_serial.to_string());
                self.next_serial += 1;
            }
        }
    }

    /// Reject NULL or duplicate primary key values; `skip` is the row
    /// being replaced, if any.
    pub fn check_primary_key(&self, row: &Row, skip: Option<usize>) -> Result<(), BackendError> {
        if self.primary_key.is_empty() {
            return Ok(());
        }
        let slots: Vec<usize> = self.primary_key.iter().map(|a| *a as usize - 1).collect();

        for &slot in &slots {
            if row[slot].is_none() {
                return Err(BackendError::NotNullViolation {
                    relation: self.display_name(),
                    column: self.columns[slot].name.clone(),
                });
            }
        }

        let duplicate = self.rows.iter().enumerate().any(|(i, other)| {
            Some(i) != skip
                && slots
                    .iter()
                    .all(|&s| {
                        compare_datums(self.kind(s), &row[s], &other[s]) == Some(Ordering::Equal)
                    })
        });
        if duplicate {
            let key = slots
                .iter()
                .map(|&s| row[s].clone().unwrap_or_default())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(BackendError::UniqueViolation {
                relation: self.display_name(),
                key,
            });
        }
        Ok(())
    }

    /// Highest integer found in serial columns, plus one.
    pub fn recompute_serial(&mut self) {
        let max = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.serial)
            .flat_map(|(slot, _)| self.rows.iter().filter_map(move |r| r[slot].as_deref()))
            .filter_map(|v| v.parse::<i64>().ok())
            .max()
            .unwrap_or(0);
        self.next_serial = max + 1;
    }
}

/// Predicate bound to a row slot and an evaluated value.
pub(crate) struct ResolvedPredicate {
    slot: usize,
    kind: ValueKind,
    op: Comparison,
    value: Datum,
}

impl ResolvedPredicate {
    fn matches(&self, row: &Row) -> bool {
        match compare_datums(self.kind, &row[self.slot], &self.value) {
            Some(ordering) => match self.op {
                Comparison::Eq => ordering == Ordering::Equal,
                Comparison::LtEq => ordering != Ordering::Greater,
                Comparison::GtEq => ordering != Ordering::Less,
            },
            None => false,
        }
    }
}

/// Compare two values of a column of the given kind.
///
/// Text compares bytewise. A value that does not parse as its column's
/// kind falls back to text comparison. NULL compares to nothing.
pub(crate) fn compare_datums(kind: ValueKind, a: &Datum, b: &Datum) -> Option<Ordering> {
    let (a, b) = (a.as_deref()?, b.as_deref()?);
    let typed = match kind {
        ValueKind::Integer => match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
            (Ok(x), Ok(y)) => Some(x.cmp(&y)),
            _ => None,
        },
        ValueKind::Numeric => match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
            (Ok(x), Ok(y)) => x.partial_cmp(&y),
            _ => None,
        },
        ValueKind::Timestamp => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => None,
        },
        ValueKind::Text => None,
    };
    Some(typed.unwrap_or_else(|| a.cmp(b)))
}

/// Sort key ordering with NULLs last, as in ascending SQL order.
pub(crate) fn order_datums(kind: ValueKind, a: &Datum, b: &Datum) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        _ => compare_datums(kind, a, b).unwrap_or(Ordering::Equal),
    }
}

/// Text form used for timestamps produced by the backend.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f+00").to_string()
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
