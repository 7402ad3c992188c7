//! Error types for the convergence controller.

use crate::domain::{IssueId, MethodologyError};
use crate::fix::FixError;
use crate::loop_guard::IssueEscalation;
use crate::registry::RegistryError;

use super::state::ControllerState;

/// Errors produced by the convergence controller.
///
/// A run that ends without converging is not an error by itself: `run`
/// returns a [`ConvergenceResult`](super::ConvergenceResult) describing it.
/// These variants cover invalid input and the `?`-style conversion offered by
/// [`ConvergenceResult::into_result`](super::ConvergenceResult::into_result).
#[derive(Debug, thiserror::Error)]
pub enum ConvergenceError {
    #[error("invalid convergence policy: {0}")]
    InvalidPolicy(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("issue {issue_id} pivoted after {attempts} fix attempts")]
    LoopGuardPivot { issue_id: IssueId, attempts: u32 },

    #[error("did not converge within {passes} passes ({outstanding} issues outstanding)")]
    ConvergenceExhausted { passes: usize, outstanding: usize },

    #[error("convergence run cancelled after {passes} passes")]
    Cancelled { passes: usize },

    #[error(transparent)]
    FixPipeline(#[from] FixError),

    #[error("methodology {name} failed: {source}")]
    Methodology {
        name: String,
        #[source]
        source: MethodologyError,
    },

    #[error("invalid controller state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ControllerState,
        to: ControllerState,
    },
}

impl From<IssueEscalation> for ConvergenceError {
    fn from(escalation: IssueEscalation) -> Self {
        ConvergenceError::LoopGuardPivot {
            issue_id: escalation.issue.id,
            attempts: escalation.attempts,
        }
    }
}

/// Result type for controller operations.
pub type ControllerResult<T> = std::result::Result<T, ConvergenceError>;
