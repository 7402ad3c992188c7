//! Multi-methodology convergence control.
//!
//! A run verifies one subject with rotating methodologies, sends open issues
//! through the fix pipeline, and stops once enough consecutive clean passes
//! by distinct methodologies were observed, or the pass budget ran out.

pub mod controller;
pub mod error;
pub mod oracle;
pub mod policy;
pub mod result;
pub mod selector;
pub mod state;

pub use controller::ConvergenceController;
pub use error::{ControllerResult, ConvergenceError};
pub use oracle::{CleanlinessOracle, IssueFreeOracle};
pub use policy::ConvergencePolicy;
pub use result::{ConvergenceResult, RunSummary, SeverityCounts, TerminationReason};
pub use selector::{MethodologySelector, RandomSelector};
pub use state::{
    ControllerState, ConvergenceState, FixSummary, IssueStatus, OutstandingIssue, PassRecord,
};
