//! The thing being driven toward a clean state.

use serde::{Deserialize, Serialize};

/// A subject under convergence: identity plus an opaque payload that
/// methodologies and the fix pipeline interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Subject {
    pub fn new(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}
