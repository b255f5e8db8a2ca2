//! Transaction ids and conflict footprints

use crate::error::SchedulerError;
use std::fmt;

/// Transaction identifier
///
/// Dense position of a transaction in the block's canonical serial order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub u32);

impl TxId {
    /// Create a new transaction ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Get the ID as a vertex index
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for TxId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl TryFrom<usize> for TxId {
    type Error = SchedulerError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        u32::try_from(index)
            .map(Self)
            .map_err(|_| SchedulerError::BlockTooLarge(index))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Conflict footprint of a single transaction
///
/// Decided once per transaction before the graph is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictFootprint<K> {
    /// Bounded set of conflict keys the transaction may read or write
    Known(Vec<K>),
    /// Footprint cannot be derived; conflicts with everything
    Unknown,
}

impl<K> ConflictFootprint<K> {
    /// Returns true if the footprint is known.
    pub fn is_known(&self) -> bool {
        matches!(self, ConflictFootprint::Known(_))
    }

    /// Keys of a known footprint, `None` if unknown.
    pub fn keys(&self) -> Option<&[K]> {
        match self {
            ConflictFootprint::Known(keys) => Some(keys),
            ConflictFootprint::Unknown => None,
        }
    }
}

impl<K> From<Option<Vec<K>>> for ConflictFootprint<K> {
    fn from(keys: Option<Vec<K>>) -> Self {
        match keys {
            Some(keys) => ConflictFootprint::Known(keys),
            None => ConflictFootprint::Unknown,
        }
    }
}
