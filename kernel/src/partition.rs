// Log Partition Selection
//
// Partitioned capture writes to `<log table>_<id>`. The core takes the
// partition as a plain `PartitionId` value; the process-wide selector
// below is the administrative default that boundary code reads from.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Number of log partitions a partitioned capture may rotate through.
pub const MAX_PARTITIONS: u32 = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("partition id {0} is outside the valid range 0..{MAX_PARTITIONS}")]
    OutOfRange(i64),
}

/// Validated partition identifier in `[0, MAX_PARTITIONS)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct PartitionId(u32);

impl PartitionId {
    pub fn new(id: i64) -> Result<Self, PartitionError> {
        match u32::try_from(id) {
            Ok(id) if id < MAX_PARTITIONS => Ok(Self(id)),
            _ => Err(PartitionError::OutOfRange(id)),
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Relation name suffix for this partition.
    pub fn suffix(self) -> String {
        format!("_{}", self.0)
    }
}

impl TryFrom<i64> for PartitionId {
    type Error = PartitionError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<PartitionId> for u32 {
    fn from(id: PartitionId) -> Self {
        id.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Holder of the active partition.
///
/// Changes are not transactional: a new value applies to every capture
/// that reads the selector afterwards.
#[derive(Debug, Default)]
pub struct PartitionSelector {
    active: AtomicU32,
}

static GLOBAL: PartitionSelector = PartitionSelector::new();

impl PartitionSelector {
    pub const fn new() -> Self {
        Self {
            active: AtomicU32::new(0),
        }
    }

    /// The process-wide selector.
    pub fn global() -> &'static PartitionSelector {
        &GLOBAL
    }

    pub fn active(&self) -> PartitionId {
        PartitionId(self.active.load(Ordering::Acquire))
    }

    pub fn set(&self, id: PartitionId) {
        tracing::info!(partition = id.get(), "active log partition changed");
        self.active.store(id.0, Ordering::Release);
    }

    /// Validate and set a raw administrative value.
    pub fn set_raw(&self, id: i64) -> Result<PartitionId, PartitionError> {
        let id = PartitionId::new(id)?;
        self.set(id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_enforced() {
        assert!(PartitionId::new(0).is_ok());
        assert!(PartitionId::new(1).is_ok());
        assert_eq!(PartitionId::new(2), Err(PartitionError::OutOfRange(2)));
        assert_eq!(PartitionId::new(-1), Err(PartitionError::OutOfRange(-1)));
    }

    #[test]
    fn selector_defaults_to_zero_and_switches() {
        let selector = PartitionSelector::new();
        assert_eq!(selector.active().get(), 0);

        selector.set_raw(1).unwrap();
        assert_eq!(selector.active().suffix(), "_1");

        assert!(selector.set_raw(5).is_err());
        assert_eq!(selector.active().get(), 1);
    }

    #[test]
    fn partition_id_deserializes_with_validation() {
        let id: PartitionId = serde_json::from_str("1").unwrap();
        assert_eq!(id.get(), 1);
        assert!(serde_json::from_str::<PartitionId>("3").is_err());
    }
}
