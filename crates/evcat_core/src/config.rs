//! Store configuration.
//!
//! # Responsibility
//! - Carry the tunables used when opening a catalogue store.
//!
//! # Invariants
//! - Configuration is passed explicitly; there is no process-wide state.

use std::time::Duration;

/// Default wait for the SQLite write lock before reporting a conflict.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for opening a catalogue store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// How long a writer waits for the database lock. Lock acquisition that
    /// outlasts this timeout surfaces as a conflict.
    pub busy_timeout: Duration,
    /// Memoize dynamic-catalogue membership per store version.
    pub membership_cache: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            membership_cache: true,
        }
    }
}

impl StoreConfig {
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn without_membership_cache(mut self) -> Self {
        self.membership_cache = false;
        self
    }
}
