// Capture Configuration
//
// Where a captured change goes and what the log relation looks like.
// Loaded from JSON, or built from the positional argument list a
// capture hook is registered with.

use serde::{Deserialize, Serialize};

use super::CaptureError;
use crate::ident::RelationIdent;
use crate::log::LogLayout;
use crate::partition::PartitionId;

/// Maximum number of positional hook arguments.
pub const MAX_TRIGGER_ARGS: usize = 4;

/// Marker in the fourth hook argument that enables partitioned logs.
pub const PARTITION_MARKER: &str = "PARTITION";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Log relation name; `<source>_log` when absent.
    pub log_table: Option<String>,
    /// Log schema; the source relation's schema when absent.
    pub log_schema: Option<String>,
    /// Write the session user into the acting-user column.
    pub log_acting_user: bool,
    /// Append the active partition suffix to the log relation name.
    pub partitioned: bool,
    /// Log only the old image of an UPDATE.
    pub basic: bool,
    /// Serial column of the log relation that the encoder never writes.
    /// Excluded from column accounting when present.
    pub sequence_column: Option<String>,
    pub layout: LogLayout,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            log_table: None,
            log_schema: None,
            log_acting_user: false,
            partitioned: false,
            basic: false,
            sequence_column: Some("trigger_id".into()),
            layout: LogLayout::default(),
        }
    }
}

impl CaptureConfig {
    /// Build a configuration from positional hook arguments:
    /// `[log_table [, acting_user [, log_schema [, "PARTITION"]]]]`.
    ///
    /// The acting user is enabled only by the exact value `1`; the log
    /// schema only applies when at least three arguments are given.
    pub fn from_trigger_args<S: AsRef<str>>(args: &[S]) -> Result<Self, CaptureError> {
        if args.len() > MAX_TRIGGER_ARGS {
            return Err(CaptureError::TooManyArguments { count: args.len() });
        }
        let arg = |i: usize| args.get(i).map(|a| a.as_ref());

        Ok(Self {
            log_table: arg(0).map(str::to_string),
            log_acting_user: arg(1).map(|a| a.trim().parse::<i64>() == Ok(1)).unwrap_or(false),
            log_schema: arg(2).map(str::to_string),
            partitioned: arg(3) == Some(PARTITION_MARKER),
            ..Self::default()
        })
    }

    /// Basic mode: UPDATE logs the old image only.
    pub fn basic(mut self) -> Self {
        self.basic = true;
        self
    }

    /// The log relation a change to `source_schema.source_name` is
    /// written to.
    pub fn log_relation(
        &self,
        source_schema: &str,
        source_name: &str,
        partition: PartitionId,
    ) -> RelationIdent {
        let mut name = match &self.log_table {
            Some(table) => table.clone(),
            None => format!("{source_name}_log"),
        };
        if self.partitioned {
            name.push_str(&partition.suffix());
        }
        let schema = self.log_schema.as_deref().unwrap_or(source_schema);
        RelationIdent::qualified(schema, name)
    }

    /// Number of log columns the encoder writes for `source_columns`
    /// surviving source columns.
    pub fn expected_log_columns(&self, source_columns: usize) -> usize {
        source_columns + crate::log::TRAILER_COLUMNS + usize::from(self.log_acting_user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_arguments_use_defaults() {
        let config = CaptureConfig::from_trigger_args::<&str>(&[]).unwrap();
        assert_eq!(config, CaptureConfig::default());
        assert_eq!(
            config.log_relation("public", "orders", PartitionId::default()),
            RelationIdent::qualified("public", "orders_log")
        );
    }

    #[test]
    fn positional_arguments() {
        let config =
            CaptureConfig::from_trigger_args(&["orders_audit", "1", "audit", "PARTITION"]).unwrap();
        assert!(config.log_acting_user);
        assert!(config.partitioned);

        let partition = PartitionId::new(1).unwrap();
        assert_eq!(
            config.log_relation("public", "orders", partition),
            RelationIdent::qualified("audit", "orders_audit_1")
        );
        assert_eq!(config.expected_log_columns(2), 6);
    }

    #[test]
    fn acting_user_needs_exactly_one() {
        for flag in ["0", "yes", "2", ""] {
            let config = CaptureConfig::from_trigger_args(&["log", flag]).unwrap();
            assert!(!config.log_acting_user, "flag {flag:?}");
        }
    }

    #[test]
    fn partition_marker_is_exact() {
        let config = CaptureConfig::from_trigger_args(&["log", "0", "s", "partition"]).unwrap();
        assert!(!config.partitioned);
    }

    #[test]
    fn too_many_arguments() {
        let err = CaptureConfig::from_trigger_args(&["a", "b", "c", "d", "e"]).unwrap_err();
        assert!(matches!(err, CaptureError::TooManyArguments { count: 5 }));
    }

    #[test]
    fn json_config_fills_defaults() {
        let config: CaptureConfig =
            serde_json::from_str(r#"{"log_schema": "audit", "basic": true}"#).unwrap();
        assert!(config.basic);
        assert_eq!(config.sequence_column.as_deref(), Some("trigger_id"));
        assert_eq!(config.layout, LogLayout::default());
    }
}
