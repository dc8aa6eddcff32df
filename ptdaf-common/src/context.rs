//! Process-wide model context
//!
//! Static model inputs (zone system size, seed) are set up once per process
//! and shared by every co-located worker through an `Arc`. Per-worker
//! mutable state, such as broadcast zone data, stays with the worker.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::info;

use crate::config::DafConfig;
use crate::messages::TOTAL_SEGMENTS;

static CONTEXT: OnceCell<Arc<ModelContext>> = OnceCell::new();

/// Read-only inputs shared by all workers in a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelContext {
    /// Highest zone number
    pub zones: usize,
    /// Market segments per purpose
    pub segments: u8,
    /// Seed for any stochastic collaborator
    pub seed: u64,
}

impl ModelContext {
    /// Build a standalone context (tests, embedding)
    pub fn new(zones: usize, seed: u64) -> Self {
        Self {
            zones,
            segments: TOTAL_SEGMENTS,
            seed,
        }
    }

    /// Initialize the process-wide context from config.
    ///
    /// Only the first call builds the context; later calls return the same
    /// instance and ignore their config.
    pub fn init(config: &DafConfig) -> Arc<ModelContext> {
        CONTEXT
            .get_or_init(|| {
                info!(
                    "Initializing model context: {} zones, seed {}",
                    config.population.zones, config.population.seed
                );
                Arc::new(ModelContext::new(config.population.zones, config.population.seed))
            })
            .clone()
    }
}
