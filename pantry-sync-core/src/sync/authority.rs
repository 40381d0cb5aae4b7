//! The authority contract consumed by the reconciler.

use crate::journal::MutationRecord;
use crate::sync::{PullResponse, SubmitResponse, SyncError};

/// The remote system holding the canonical `version` for each item.
///
/// Both operations are independently idempotent: a pull has no side
/// effects, and a resubmitted `op_id` is replayed as a no-op. That makes
/// sync-cycle cancellation safe at any await point.
#[allow(async_fn_in_trait)]
pub trait Authority {
    /// Current household state: a delta since `checkpoint`, or a full
    /// snapshot when the checkpoint is absent or not recognized.
    async fn pull(
        &self,
        household_id: &str,
        checkpoint: Option<u64>,
    ) -> Result<PullResponse, SyncError>;

    /// Optimistic-concurrency submission of one journalled mutation.
    async fn submit(&self, record: &MutationRecord) -> Result<SubmitResponse, SyncError>;
}
