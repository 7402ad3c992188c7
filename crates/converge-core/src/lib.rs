//! Converge Core Library
//!
//! Parallel verification batches and an iterative multi-methodology
//! convergence controller, with a loop guard, a learning store and a fix
//! pipeline contract.

pub mod config;
pub mod convergence;
pub mod domain;
pub mod fix;
pub mod learning;
pub mod loop_guard;
pub mod metrics;
pub mod obs;
pub mod parallel;
pub mod registry;
pub mod reporting;
pub mod telemetry;

pub use config::{ConfigError, EngineConfig, LearningConfig};

pub use convergence::{
    CleanlinessOracle, ControllerResult, ControllerState, ConvergenceController,
    ConvergenceError, ConvergencePolicy, ConvergenceResult, IssueFreeOracle, IssueStatus,
    MethodologySelector, OutstandingIssue, PassRecord, RandomSelector, RunSummary,
    TerminationReason,
};

pub use domain::{
    Issue, IssueId, Methodology, MethodologyError, MethodologyResult, PassContext, PassResult,
    ReviewerProfile, ReviewerTier, Severity, SubCheck, Subject, VerificationExecutor,
};

pub use fix::{FixError, FixExecutor, FixOutcome, FixResult, NoopFixer};

pub use learning::{
    FsLearningStore, LearningError, LearningStore, MemoryLearningStore, ObservedOutcome,
    PatternKind, PatternRecord,
};

pub use loop_guard::{IssueEscalation, LoopGuard, PivotAction};

pub use parallel::{
    run_parallel_batch, AggregationReport, BatchConfig, BatchPolicy, CoordinatorError, Operation,
    ParallelCoordinator, TaskError, TaskId, TaskOutput, TaskStatus,
};

pub use registry::{MethodologyRegistry, RegistryError};

pub use reporting::{read_run_report, render_summary_md, write_run_report, ReportError};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
