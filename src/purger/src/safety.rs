//! Storage/metadata consistency check.
//!
//! The metadata of a purge target says when its youngest file was written.
//! Storage holding a younger object under the same prefix means the two
//! disagree, and deleting anything there could destroy live data.

use crate::error::PurgeError;
use crate::lister::ObjectRecord;
use crate::resolver::PurgeTarget;

#[derive(Clone, Debug)]
pub struct SafetyValidator {
    partial_suffix: String,
}

impl SafetyValidator {
    /// `partial_suffix` marks files still being written, which may legitimately
    /// be younger than the metadata.
    pub fn new(partial_suffix: impl Into<String>) -> Self {
        Self {
            partial_suffix: partial_suffix.into(),
        }
    }

    pub fn check(&self, target: &PurgeTarget, record: &ObjectRecord) -> Result<(), PurgeError> {
        if record.created_at > target.retention_boundary
            && !record.key.ends_with(&self.partial_suffix)
        {
            return Err(PurgeError::ConsistencyViolation {
                key: record.key.clone(),
                created_at: record.created_at,
                target: target.to_string(),
                boundary: target.retention_boundary,
            });
        }
        Ok(())
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new(".partial.zst")
    }
}
