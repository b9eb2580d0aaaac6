//! Synchronization Mode
//!
//! Governs when dirty records are written back: only on explicit
//! [`save`](crate::cache::WriteBackCache::save) calls (manual), or whenever
//! the external driver requests a commit (auto). Transition semantics live
//! in the engine.

/// Write-back synchronization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Changes reach the backing store only via an explicit save
    #[default]
    Manual,
    /// Driver-triggered commits flush pending changes
    Auto,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Manual => write!(f, "manual"),
            SyncMode::Auto => write!(f, "auto"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
