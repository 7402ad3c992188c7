//! Methodology pool for a convergence run.
//!
//! An ordered set of [`Methodology`] values keyed by name. Selection excludes
//! names already used in the current clean streak; resetting that exclusion
//! set is the controller's job, not the registry's.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::domain::Methodology;

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("methodology already registered: {name}")]
    DuplicateName { name: String },

    #[error("methodology pool exhausted: all {pool_size} methodologies excluded")]
    PoolExhausted { pool_size: usize },
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Ordered, duplicate-free pool of methodologies.
#[derive(Debug, Clone, Default)]
pub struct MethodologyRegistry {
    methodologies: Vec<Methodology>,
}

impl MethodologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an iterator, failing on the first duplicate name.
    pub fn from_methodologies<I>(methodologies: I) -> RegistryResult<Self>
    where
        I: IntoIterator<Item = Methodology>,
    {
        let mut registry = Self::new();
        for m in methodologies {
            registry.register(m)?;
        }
        Ok(registry)
    }

    /// Add a methodology to the pool.
    pub fn register(&mut self, methodology: Methodology) -> RegistryResult<()> {
        if self.contains(methodology.name()) {
            return Err(RegistryError::DuplicateName {
                name: methodology.name().to_string(),
            });
        }
        self.methodologies.push(methodology);
        Ok(())
    }

    /// Methodologies whose name is not in `exclude`, in registration order.
    ///
    /// Returns [`RegistryError::PoolExhausted`] when nothing is left.
    pub fn select_unused(&self, exclude: &BTreeSet<String>) -> RegistryResult<Vec<&Methodology>> {
        let unused: Vec<&Methodology> = self
            .methodologies
            .iter()
            .filter(|m| !exclude.contains(m.name()))
            .collect();

        if unused.is_empty() {
            return Err(RegistryError::PoolExhausted {
                pool_size: self.methodologies.len(),
            });
        }
        Ok(unused)
    }

    pub fn get(&self, name: &str) -> Option<&Methodology> {
        self.methodologies.iter().find(|m| m.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.methodologies.iter().map(|m| m.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Methodology> {
        self.methodologies.iter()
    }

    pub fn len(&self) -> usize {
        self.methodologies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methodologies.is_empty()
    }
}
