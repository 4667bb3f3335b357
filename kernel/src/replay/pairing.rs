// Update Pairing
//
// Turns the ordered stream of log records into row actions on the
// restore relation. An UPDATE is logged as two records; the first one
// met in replay order is not applied, only its key is remembered, and
// the second one updates the row found under that key. The remembered
// key lives only for one replay pass.

use crate::backend::{Datum, Row};
use crate::log::{ChangeMode, ChangeRecord, TupleRole};

use super::ReplayMode;

/// Row action on the restore relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Insert { values: Row },
    Delete { key: Datum },
    /// Overwrite every column of the row currently keyed `target_key`.
    Update { target_key: Datum, values: Row },
}

/// Outcome of feeding one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Key remembered; nothing to apply yet.
    Carry,
    Apply(Action),
}

/// Reducer over log records for one replay direction.
#[derive(Debug)]
pub struct UpdatePairing {
    mode: ReplayMode,
    key_position: usize,
    remembered: Option<Datum>,
}

impl UpdatePairing {
    pub fn new(mode: ReplayMode, key_position: usize) -> Self {
        Self {
            mode,
            key_position,
            remembered: None,
        }
    }

    /// Feed the next record in replay order.
    pub fn apply(&mut self, record: ChangeRecord) -> Step {
        use ChangeMode::*;
        use ReplayMode::*;
        use TupleRole::*;

        let key = record.value(self.key_position).clone();
        let action = match (self.mode, record.mode, record.role) {
            (Forward, Insert, _) | (Backward, Delete, _) => Action::Insert {
                values: record.values,
            },
            (Forward, Delete, _) | (Backward, Insert, _) => Action::Delete { key },

            // first half of an update pair
            (Forward, Update, Old) | (Backward, Update, New) => {
                if self.remembered.replace(key).is_some() {
                    tracing::warn!(
                        changed_at = %record.changed_at,
                        "unpaired UPDATE record superseded"
                    );
                }
                return Step::Carry;
            }

            // second half
            (Forward, Update, New) | (Backward, Update, Old) => {
                let target_key = match self.remembered.take() {
                    Some(remembered) => remembered,
                    None => {
                        tracing::warn!(
                            changed_at = %record.changed_at,
                            "UPDATE record without its pair, using its own key"
                        );
                        key
                    }
                };
                Action::Update {
                    target_key,
                    values: record.values,
                }
            }
        };
        Step::Apply(action)
    }

    /// Key of an update half still waiting for its pair.
    pub fn pending(&self) -> Option<&Datum> {
        self.remembered.as_ref()
    }
}
