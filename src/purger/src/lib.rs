//! Module cache purge engine
//!
//! Deletes stale or invalidated module caches from bucket storage:
//!
//! - `resolver`: which module caches qualify, from the metadata database
//! - `lister`: enumerate the objects stored under a module cache prefix
//! - `codec`: decode block range and artifact kind from object keys
//! - `safety`: refuse to run when storage contradicts the metadata
//! - `pool`: bounded worker pool that deletes the selected objects
//! - `confirm`: optional operator checkpoint per module cache
//! - `engine`: runs the whole sequence target by target

pub mod codec;
pub mod confirm;
pub mod deleter;
pub mod engine;
pub mod error;
pub mod filter;
pub mod lister;
pub mod metrics;
pub mod pool;
pub mod resolver;
pub mod safety;

pub use codec::{ArtifactKind, ClassificationError, ObjectClassification, classify};
pub use confirm::{AlwaysConfirm, ConfirmationGate, Confirmer, Decision, TerminalConfirmer};
pub use deleter::{Deleter, ObjectStoreDeleter};
pub use engine::{EngineConfig, PurgeReport, Purger, TargetOutcome, TargetReport};
pub use error::PurgeError;
pub use filter::{BlockRange, ObjectFilter};
pub use lister::{ListOptions, ObjectRecord, list_objects};
pub use metrics::{CountersSummary, RunCounters};
pub use pool::{DeleteJob, DeletionPool, PoolConfig};
pub use resolver::{CandidateResolver, PurgeCriteria, PurgeTarget, TargetSource};
pub use safety::SafetyValidator;
