// Change Log Records
//
// A log relation holds one row per captured tuple image: the surviving
// source columns in source order, an optional acting-user column, then
// three trailer columns (mode, tuple role, change timestamp). Records
// are append-only.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backend::{Datum, Row};

/// Number of fixed trailer columns every log relation carries.
pub const TRAILER_COLUMNS: usize = 3;

/// Kind of row-level mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeMode {
    Insert,
    Update,
    Delete,
}

impl ChangeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeMode {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(RecordError::UnknownChangeMode {
                mode: other.to_string(),
            }),
        }
    }
}

/// Which image of the row a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TupleRole {
    Old,
    New,
}

impl TupleRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Old => "old",
            Self::New => "new",
        }
    }
}

impl fmt::Display for TupleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TupleRole {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "old" => Ok(Self::Old),
            "new" => Ok(Self::New),
            other => Err(RecordError::UnknownTupleRole {
                role: other.to_string(),
            }),
        }
    }
}

/// Physical names of the non-data columns of a log relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogLayout {
    pub user_column: String,
    pub mode_column: String,
    pub tuple_column: String,
    pub changed_column: String,
}

impl Default for LogLayout {
    fn default() -> Self {
        Self {
            user_column: "trigger_user".into(),
            mode_column: "trigger_mode".into(),
            tuple_column: "trigger_tuple".into(),
            changed_column: "trigger_changed".into(),
        }
    }
}

impl LogLayout {
    /// The three trailer column names, in layout order.
    pub fn trailer(&self) -> [&str; TRAILER_COLUMNS] {
        [&self.mode_column, &self.tuple_column, &self.changed_column]
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown change mode: {mode}")]
    UnknownChangeMode { mode: String },

    #[error("unknown tuple role: {role}")]
    UnknownTupleRole { role: String },

    #[error("log row has {actual} columns, expected {expected}")]
    ShortRow { expected: usize, actual: usize },

    #[error("log row has NULL in trailer column \"{column}\"")]
    NullTrailer { column: &'static str },
}

/// One log row as read back for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Surviving source column values, in source order.
    pub values: Row,
    pub mode: ChangeMode,
    pub role: TupleRole,
    /// Change timestamp in the backend's text form.
    pub changed_at: String,
}

impl ChangeRecord {
    /// Decode a row selected as `<data columns>, mode, tuple, changed`.
    pub fn from_log_row(mut row: Row, data_columns: usize) -> Result<Self, RecordError> {
        let expected = data_columns + TRAILER_COLUMNS;
        if row.len() != expected {
            return Err(RecordError::ShortRow {
                expected,
                actual: row.len(),
            });
        }

        let trailer = row.split_off(data_columns);
        let [mode, role, changed]: [Datum; TRAILER_COLUMNS] = match trailer.try_into() {
            Ok(t) => t,
            Err(t) => {
                return Err(RecordError::ShortRow {
                    expected,
                    actual: data_columns + t.len(),
                })
            }
        };

        let mode = mode.ok_or(RecordError::NullTrailer { column: "mode" })?;
        let role = role.ok_or(RecordError::NullTrailer { column: "tuple" })?;
        let changed_at = changed.ok_or(RecordError::NullTrailer { column: "changed" })?;

        Ok(Self {
            values: row,
            mode: mode.parse()?,
            role: role.parse()?,
            changed_at,
        })
    }

    /// Value of the data column at `index`.
    pub fn value(&self, index: usize) -> &Datum {
        &self.values[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[Option<&str>]) -> Row {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn decode_log_row() {
        let record = ChangeRecord::from_log_row(
            row(&[Some("1"), None, Some("UPDATE"), Some("old"), Some("2024-01-01 00:00:00+00")]),
            2,
        )
        .unwrap();

        assert_eq!(record.values, row(&[Some("1"), None]));
        assert_eq!(record.mode, ChangeMode::Update);
        assert_eq!(record.role, TupleRole::Old);
    }

    #[test]
    fn unknown_mode_is_corruption() {
        let err = ChangeRecord::from_log_row(
            row(&[Some("1"), Some("UPSERT"), Some("new"), Some("t")]),
            1,
        )
        .unwrap_err();
        assert_eq!(
            err,
            RecordError::UnknownChangeMode {
                mode: "UPSERT".into()
            }
        );
    }

    #[test]
    fn mode_parsing_is_case_sensitive() {
        assert!("insert".parse::<ChangeMode>().is_err());
        assert_eq!("DELETE".parse::<ChangeMode>().unwrap(), ChangeMode::Delete);
    }

    #[test]
    fn wrong_width_is_rejected() {
        let err = ChangeRecord::from_log_row(row(&[Some("INSERT"), Some("new")]), 1).unwrap_err();
        assert!(matches!(err, RecordError::ShortRow { expected: 4, actual: 2 }));
    }
}
