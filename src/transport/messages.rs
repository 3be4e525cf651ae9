//! Messages exchanged with the dispatcher.

use serde::{Deserialize, Serialize};

/// Bitmask over trigger types (0..=63) a worker is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerTypeMask(u64);

impl TriggerTypeMask {
    pub const ALL: TriggerTypeMask = TriggerTypeMask(u64::MAX);
    pub const NONE: TriggerTypeMask = TriggerTypeMask(0);

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn from_types<I>(types: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        types
            .into_iter()
            .fold(Self::NONE, |mask, trigger_type| mask.with(trigger_type))
    }

    /// Returns a copy of the mask that also accepts `trigger_type`.
    /// Types above 63 are ignored.
    pub fn with(self, trigger_type: u8) -> Self {
        match 1u64.checked_shl(u32::from(trigger_type)) {
            Some(bit) => Self(self.0 | bit),
            None => self,
        }
    }

    pub fn accepts(&self, trigger_type: u8) -> bool {
        1u64.checked_shl(u32::from(trigger_type))
            .map(|bit| self.0 & bit != 0)
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TriggerTypeMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Request for more trigger records, sent upstream once per batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRequest {
    /// Address the dispatcher should deliver the records to.
    pub origin: String,
    pub accepted_types: TriggerTypeMask,
    pub count: usize,
}

impl RecordRequest {
    pub fn new(origin: impl Into<String>, accepted_types: TriggerTypeMask, count: usize) -> Self {
        Self {
            origin: origin.into(),
            accepted_types,
            count,
        }
    }
}

/// Unit of work received from the dispatcher and, once processed, forwarded
/// to the result destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub run_number: u32,
    pub trigger_number: u64,
    pub trigger_type: u8,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl TriggerRecord {
    pub fn new(run_number: u32, trigger_number: u64, trigger_type: u8, payload: Vec<u8>) -> Self {
        Self {
            run_number,
            trigger_number,
            trigger_type,
            payload,
        }
    }
}
