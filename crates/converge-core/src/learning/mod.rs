//! Learning store: patterns and antipatterns observed across runs.
//!
//! The controller queries relevant records before each fix call and records
//! outcomes afterwards. Store failures are advisory; a run never fails because
//! its learning store did.

pub mod error;
pub mod fs;
pub mod memory;
pub mod record;
pub mod store;

pub use error::{LearningError, LearningResult};
pub use fs::FsLearningStore;
pub use memory::MemoryLearningStore;
pub use record::{
    rank_relevant, relevance_order, ObservedOutcome, PatternKind, PatternRecord, RecordKey,
};
pub use store::{KeyLocks, LearningStore};
