//! Object key codec.
//!
//! Module cache artifacts are named after the block range they cover and the
//! kind of data they hold:
//!
//! ```text
//! <scope>/<sub path>/0001973000-0001974000.output.zst
//! <scope>/<sub path>/0015369000-0012369621.kv.zst
//! <scope>/<sub path>/0000989000-0000990000.index.zst
//! ```

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use thiserror::Error;

/// Compression suffix stripped before decoding a file name.
pub const COMPRESSION_SUFFIX: &str = ".zst";

/// Kind of module cache artifact, encoded as the second dot-separated field
/// of the file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Output,
    State,
    Index,
}

impl ArtifactKind {
    /// Tag used in file names
    pub fn tag(&self) -> &'static str {
        match self {
            ArtifactKind::Output => "output",
            ArtifactKind::State => "kv",
            ArtifactKind::Index => "index",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "output" => Ok(ArtifactKind::Output),
            "kv" | "state" => Ok(ArtifactKind::State),
            "index" => Ok(ArtifactKind::Index),
            other => Err(format!(
                "unknown artifact kind {other:?}, expected one of: output, kv, index"
            )),
        }
    }
}

/// Block range and kind decoded from an object key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectClassification {
    pub range_low: u64,
    pub range_high: u64,
    pub kind: ArtifactKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("invalid block number in {key:?}: {source}")]
    InvalidBlockNumber {
        key: String,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid file type {kind:?} in {key:?}")]
    UnknownKind { key: String, kind: String },

    #[error("block range {low}-{high} of {key:?} is inverted")]
    InvertedRange { key: String, low: u64, high: u64 },
}

/// Decode the block range and artifact kind of an object key.
///
/// Only the final path segment matters. A failure means the object is not a
/// module cache artifact this purger understands; it must be left alone.
pub fn classify(key: &str) -> Result<ObjectClassification, ClassificationError> {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    let base = file_name
        .strip_suffix(COMPRESSION_SUFFIX)
        .unwrap_or(file_name);

    let parts: Vec<&str> = base.split('.').collect();
    if parts.len() < 2 {
        return Err(ClassificationError::InvalidFileName(key.to_string()));
    }

    let numbers: Vec<&str> = parts[0].split('-').collect();
    if numbers.len() != 2 {
        return Err(ClassificationError::InvalidFileName(key.to_string()));
    }
    let first = parse_block_number(key, numbers[0])?;
    let second = parse_block_number(key, numbers[1])?;

    let (range_low, range_high, kind) = match parts[1] {
        "output" => (first, second, ArtifactKind::Output),
        // State files are named `<high>-<low>.kv`, the reverse of the other
        // kinds. Existing caches depend on it, keep the swap.
        "kv" => (second, first, ArtifactKind::State),
        "index" => (first, second, ArtifactKind::Index),
        other => {
            return Err(ClassificationError::UnknownKind {
                key: key.to_string(),
                kind: other.to_string(),
            });
        }
    };

    if range_low > range_high {
        return Err(ClassificationError::InvertedRange {
            key: key.to_string(),
            low: range_low,
            high: range_high,
        });
    }

    Ok(ObjectClassification {
        range_low,
        range_high,
        kind,
    })
}

/// Plain decimal digits only, `u64::from_str` alone would accept a sign.
fn parse_block_number(key: &str, digits: &str) -> Result<u64, ClassificationError> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ClassificationError::InvalidFileName(key.to_string()));
    }
    digits
        .parse::<u64>()
        .map_err(|source| ClassificationError::InvalidBlockNumber {
            key: key.to_string(),
            source,
        })
}
