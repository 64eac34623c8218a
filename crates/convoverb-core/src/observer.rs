//! Lifecycle observer registered on the filter node

use std::sync::Arc;

use crate::diagnostics::FilterStats;
use crate::host::{FilterState, StateObserver};

/// Logs host state transitions and records the latest state
///
/// Purely informational: it never retries, tears down or touches the
/// processing loop.
pub struct LogObserver {
    stats: Arc<FilterStats>,
}

impl LogObserver {
    pub fn new(stats: Arc<FilterStats>) -> Self {
        Self { stats }
    }
}

impl StateObserver for LogObserver {
    fn state_changed(&mut self, old: FilterState, new: FilterState, error: Option<&str>) {
        log::info!("State change: {} -> {}", old, new);
        if let Some(message) = error {
            log::error!("Error: {}", message);
        }
        self.stats.set_state(new);
    }
}
