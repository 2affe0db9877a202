//! Poisoned cache selection
//!
//! A run that cleans up data produced by a faulty module version only deletes
//! the objects of a block window, optionally restricted to some artifact kinds
//! and to objects written no later than a given instant.

use chrono::{DateTime, Utc};

use crate::codec::{ArtifactKind, ObjectClassification};
use crate::error::PurgeError;
use crate::lister::ObjectRecord;

/// Inclusive block window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Result<Self, PurgeError> {
        if start > end {
            return Err(PurgeError::Config(format!(
                "block range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Whether the artifact covers at least one block of the window
    pub fn overlaps(&self, classification: &ObjectClassification) -> bool {
        classification.range_low <= self.end && classification.range_high >= self.start
    }
}

/// Narrows the objects of a target down to the ones to delete.
///
/// The default filter keeps everything that classifies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    /// Empty means every kind
    pub kinds: Vec<ArtifactKind>,
    pub block_range: Option<BlockRange>,
    /// Objects created after this instant are left alone
    pub exclude_after: Option<DateTime<Utc>>,
}

impl ObjectFilter {
    pub fn is_unrestricted(&self) -> bool {
        self.kinds.is_empty() && self.block_range.is_none() && self.exclude_after.is_none()
    }

    pub fn matches(&self, record: &ObjectRecord, classification: &ObjectClassification) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&classification.kind) {
            return false;
        }
        if let Some(range) = &self.block_range {
            if !range.overlaps(classification) {
                return false;
            }
        }
        match self.exclude_after {
            Some(instant) => record.created_at <= instant,
            None => true,
        }
    }
}
