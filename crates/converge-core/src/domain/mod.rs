//! Domain vocabulary shared by the coordinator and the convergence controller.
//!
//! - `Subject`: the thing being driven toward a clean state
//! - `Issue` / `Severity`: findings reported by a pass
//! - `PassResult`: one methodology invocation's output
//! - `Methodology` / `VerificationExecutor`: pluggable verification units
//! - `PassContext`: transient context carried between passes

pub mod context;
pub mod error;
pub mod issue;
pub mod methodology;
pub mod pass_result;
pub mod subject;

pub use context::{PassContext, ISSUE_HISTORY_KEY, SUBJECT_ID_KEY};
pub use error::{MethodologyError, MethodologyResult};
pub use issue::{Issue, IssueId, Severity};
pub use methodology::{
    Methodology, ReviewerProfile, ReviewerTier, SubCheck, SubCheckFuture, VerificationExecutor,
};
pub use pass_result::PassResult;
pub use subject::Subject;
