//! Methodologies: named, pluggable verification routines.
//!
//! The controller never looks inside an executor. It hands over the subject,
//! the run's [`PassContext`] and the methodology's [`ReviewerProfile`], and
//! receives a [`PassResult`]. An executor whose work splits into independent
//! sub-checks exposes them through [`VerificationExecutor::sub_checks`] so the
//! controller can fan them out through the parallel coordinator.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::context::PassContext;
use super::error::MethodologyResult;
use super::pass_result::PassResult;
use super::subject::Subject;

/// Reviewer quality tier requested from the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerTier {
    #[default]
    Standard,
    Thorough,
    Critical,
}

/// Opaque description of who (or what) performs a review.
///
/// Model choice, cost ceilings and similar knobs live in `params`. Only the
/// executor interprets the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerProfile {
    pub name: String,
    #[serde(default)]
    pub tier: ReviewerTier,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ReviewerProfile {
    pub fn new(name: impl Into<String>, tier: ReviewerTier) -> Self {
        Self {
            name: name.into(),
            tier,
            params: serde_json::Value::Null,
        }
    }
}

impl Default for ReviewerProfile {
    fn default() -> Self {
        Self::new("default", ReviewerTier::Standard)
    }
}

/// Boxed future returned by a [`SubCheck`].
pub type SubCheckFuture = BoxFuture<'static, MethodologyResult<PassResult>>;

/// One independent piece of a methodology that may run concurrently with its
/// siblings. Re-runnable: the coordinator may invoke it again on recovery.
#[derive(Clone)]
pub struct SubCheck {
    pub name: String,
    run: Arc<dyn Fn() -> SubCheckFuture + Send + Sync>,
}

impl SubCheck {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodologyResult<PassResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move || Box::pin(run())),
        }
    }

    pub fn execute(&self) -> SubCheckFuture {
        (self.run)()
    }
}

impl fmt::Debug for SubCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubCheck").field("name", &self.name).finish()
    }
}

/// Contract every verification executor implements.
#[async_trait]
pub trait VerificationExecutor: Send + Sync {
    /// Inspect the subject and report what was found.
    async fn verify(
        &self,
        subject: &Subject,
        context: &mut PassContext,
        profile: &ReviewerProfile,
    ) -> MethodologyResult<PassResult>;

    /// Independent sub-checks for this subject, if the executor decomposes.
    ///
    /// A non-empty list replaces the call to [`verify`](Self::verify): the
    /// controller runs the sub-checks as one parallel batch and merges their
    /// results.
    fn sub_checks(&self, _subject: &Subject, _profile: &ReviewerProfile) -> Vec<SubCheck> {
        Vec::new()
    }
}

/// A named verification unit. Immutable once constructed.
#[derive(Clone)]
pub struct Methodology {
    name: String,
    profile: ReviewerProfile,
    executor: Arc<dyn VerificationExecutor>,
}

impl Methodology {
    pub fn new(name: impl Into<String>, executor: Arc<dyn VerificationExecutor>) -> Self {
        Self {
            name: name.into(),
            profile: ReviewerProfile::default(),
            executor,
        }
    }

    pub fn with_profile(mut self, profile: ReviewerProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> &ReviewerProfile {
        &self.profile
    }

    pub fn executor(&self) -> &Arc<dyn VerificationExecutor> {
        &self.executor
    }
}

impl fmt::Debug for Methodology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Methodology")
            .field("name", &self.name)
            .field("profile", &self.profile.name)
            .finish()
    }
}
