//! Choosing the next methodology among the unused ones.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::Methodology;

/// Picks one of `candidates` (never empty) and returns its index.
pub trait MethodologySelector: Send + Sync {
    fn select(&self, candidates: &[&Methodology]) -> usize;
}

/// Uniform random choice.
#[derive(Debug)]
pub struct RandomSelector {
    rng: Mutex<StdRng>,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sequence for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodologySelector for RandomSelector {
    fn select(&self, candidates: &[&Methodology]) -> usize {
        if candidates.len() <= 1 {
            return 0;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0..candidates.len())
    }
}
