use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{event_registry::EventType, timestamp::Timestamp};

/// Token identifying one invocation of a named operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub fn value(&self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for Generation {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SlotState {
    Idle,
    Pending,
}

/// Read-only view of one operation's single-flight state.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSlot {
    pub name: String,
    pub generation: Generation,
    pub state: SlotState,
    pub completion_type: EventType,
    pub started_at: Timestamp,
}

/// Result of trying to settle a generation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Settle {
    /// The generation was current and pending; the slot is now idle.
    Settled { completion_type: EventType },
    /// A newer invocation replaced this one.
    Superseded { current: Generation },
    /// The generation is current but was already settled.
    AlreadySettled,
    /// The operation was never started on this owner.
    Unknown,
}

/// Per-owner table of operation slots, keyed by operation name.
///
/// Each advance or settle runs under the shard lock for its key, so a
/// generation check and the state change it guards are one atomic step even
/// when completions arrive from other threads.
#[derive(Debug, Default)]
pub struct OperationTable {
    slots: DashMap<String, OperationSlot>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new generation, superseding any pending one.
    pub(crate) fn advance(&self, name: &str, completion_type: &EventType) -> Generation {
        let mut slot = self
            .slots
            .entry(name.to_string())
            .or_insert_with(|| OperationSlot {
                name: name.to_string(),
                generation: Generation::default(),
                state: SlotState::Idle,
                completion_type: completion_type.clone(),
                started_at: Timestamp::now(),
            });

        if slot.state == SlotState::Pending {
            debug!(
                operation = name,
                superseded = %slot.generation,
                "superseding pending operation"
            );
        }

        slot.generation = slot.generation.next();
        slot.state = SlotState::Pending;
        slot.completion_type = completion_type.clone();
        slot.started_at = Timestamp::now();
        slot.generation
    }

    pub(crate) fn settle(&self, name: &str, generation: Generation) -> Settle {
        let Some(mut slot) = self.slots.get_mut(name) else {
            return Settle::Unknown;
        };
        if slot.generation != generation {
            return Settle::Superseded {
                current: slot.generation,
            };
        }
        if slot.state != SlotState::Pending {
            return Settle::AlreadySettled;
        }
        slot.state = SlotState::Idle;
        Settle::Settled {
            completion_type: slot.completion_type.clone(),
        }
    }

    /// True while `generation` is the pending invocation of `name`.
    pub fn is_current(&self, name: &str, generation: Generation) -> bool {
        self.slots
            .get(name)
            .is_some_and(|slot| slot.generation == generation && slot.state == SlotState::Pending)
    }

    pub fn slot(&self, name: &str) -> Option<OperationSlot> {
        self.slots.get(name).map(|slot| slot.clone())
    }

    pub fn pending_operations(&self) -> Vec<String> {
        let mut pending: Vec<String> = self
            .slots
            .iter()
            .filter(|slot| slot.state == SlotState::Pending)
            .map(|slot| slot.name.clone())
            .collect();
        pending.sort();
        pending
    }
}
