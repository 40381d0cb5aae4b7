//! Sync error taxonomy.
//!
//! Conflicts are deliberately absent: they are an expected part of the
//! protocol and are resolved internally, never surfaced as errors. No
//! error here ever loses an accepted local mutation; the journal retains
//! it until explicit acknowledgement.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can abort a sync cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The household is not registered on this device.
    #[error("household not registered on this device: {0}")]
    UnknownHousehold(String),
    /// Transient network failure. The cycle aborts without side effects
    /// and the next scheduled cycle retries from the last checkpoint.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The authority is reachable but refusing service. Local operations
    /// continue; callers see degraded-sync status.
    #[error("authority unavailable: {0}")]
    AuthorityUnavailable(String),
    /// The presented credentials do not cover the household.
    #[error("not authorized for household: {0}")]
    Unauthorized(String),
    /// The authority answered something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Persisting device state after the cycle failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// True for failures that the next scheduled cycle is expected to
    /// clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::AuthorityUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_classification() {
        assert!(SyncError::Transport("reset".into()).is_transient());
        assert!(SyncError::AuthorityUnavailable("503".into()).is_transient());
        assert!(!SyncError::Unauthorized("hh-1".into()).is_transient());
        assert!(!SyncError::Protocol("bad body".into()).is_transient());
    }
}
