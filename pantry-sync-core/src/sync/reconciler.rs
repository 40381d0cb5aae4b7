//! The reconciler: drives one sync cycle per household.
//!
//! A cycle pulls the authority's state, adopts remote writes that have no
//! competing local mutation, drains the journal with optimistic
//! concurrency, routes conflicts through the resolver and only then
//! advances the checkpoint. Network failure at any step aborts the cycle
//! without local side effects beyond what the authority already durably
//! committed; the next scheduled cycle retries from the last checkpoint.
//!
//! Cycles never overlap on one device: the whole cycle runs under the
//! device's sync gate. State-lock scopes never span network I/O.

use uuid::Uuid;

use crate::device::{DeviceState, PantryDevice};
use crate::events::{ChangeEvent, ChangeOrigin};
use crate::journal::MutationRecord;
use crate::model::{ItemPatch, MutationPayload, PantryItem};
use crate::resolver::resolve;
use crate::sync::{Authority, SubmitResponse, SyncError};

/// Outcome of one sync cycle for one household.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub household_id: String,
    /// True when the authority answered with a full snapshot rather than
    /// a delta.
    pub snapshot: bool,
    /// Items received from the authority.
    pub pulled: usize,
    /// Remote items adopted directly (no competing local mutation).
    pub applied: usize,
    /// Journalled ops the authority accepted.
    pub submitted: usize,
    /// Conflicts routed through the resolver.
    pub conflicts: usize,
    /// Ops fully subsumed by a merge (acknowledged without resubmission).
    pub subsumed: usize,
    /// Ops the authority refused structurally.
    pub rejected: usize,
}

impl SyncReport {
    /// True when the cycle changed nothing on either side.
    pub fn is_noop(&self) -> bool {
        self.applied == 0 && self.submitted == 0 && self.conflicts == 0 && self.rejected == 0
    }
}

/// Drives the sync protocol against an authority.
pub struct Reconciler<A> {
    authority: A,
}

impl<A: Authority> Reconciler<A> {
    pub fn new(authority: A) -> Self {
        Self { authority }
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    /// Runs one cycle for every household registered on the device,
    /// stopping at the first failure.
    pub async fn sync_all(&self, device: &PantryDevice) -> Result<Vec<SyncReport>, SyncError> {
        let mut reports = Vec::new();
        for household_id in device.households() {
            reports.push(self.sync_household(device, &household_id).await?);
        }
        Ok(reports)
    }

    /// Runs one sync cycle for one household and tracks sync health.
    pub async fn sync_household(
        &self,
        device: &PantryDevice,
        household_id: &str,
    ) -> Result<SyncReport, SyncError> {
        let result = self.run_cycle(device, household_id).await;
        match result {
            Ok(report) => {
                device.mark_sync_ok();
                Ok(report)
            }
            Err(e) => {
                device.mark_sync_failed();
                tracing::warn!(household = household_id, error = %e, "sync cycle failed");
                Err(e)
            }
        }
    }

    async fn run_cycle(
        &self,
        device: &PantryDevice,
        household_id: &str,
    ) -> Result<SyncReport, SyncError> {
        let _cycle = device.sync_gate().lock().await;

        if !device.is_registered(household_id) {
            return Err(SyncError::UnknownHousehold(household_id.to_string()));
        }

        let checkpoint = device.checkpoint(household_id);
        let pull = self.authority.pull(household_id, checkpoint).await?;
        tracing::debug!(
            household = household_id,
            items = pull.items.len(),
            snapshot = pull.snapshot,
            "pulled authority state"
        );

        let mut report = SyncReport {
            household_id: household_id.to_string(),
            snapshot: pull.snapshot,
            pulled: pull.items.len(),
            ..Default::default()
        };

        // Adopt remote writes that have no competing local mutation.
        // Items with pending local ops are deferred: their remote state
        // arrives through the submit path, as acceptance or conflict.
        let (events, pending_ops) = {
            let mut state = device.state();
            let mut events = Vec::new();
            for item in pull.items {
                state.clock.observe(item.last_write_at);
                if state.journal.has_pending_for(item.id) {
                    continue;
                }
                if let Some(adopted) = state.store.adopt_remote(item) {
                    report.applied += 1;
                    events.push(ChangeEvent {
                        household_id: household_id.to_string(),
                        item: adopted,
                        origin: ChangeOrigin::Sync,
                    });
                }
            }
            let pending_ops: Vec<Uuid> = state
                .journal
                .pending(household_id)
                .iter()
                .map(|r| r.op_id)
                .collect();
            (events, pending_ops)
        };
        for event in events {
            device.emit(event);
        }

        for op_id in pending_ops {
            self.submit_one(device, household_id, op_id, &mut report)
                .await?;
        }

        // The cycle is atomic at household granularity: the checkpoint
        // advances and the device persists only once everything above
        // succeeded.
        device
            .state()
            .checkpoints
            .insert(household_id.to_string(), pull.checkpoint);
        device.persist()?;
        Ok(report)
    }

    /// Submits one journalled op, resolving at most one conflict inline.
    /// A second conflict leaves the rebased op in the journal for the next
    /// cycle.
    async fn submit_one(
        &self,
        device: &PantryDevice,
        household_id: &str,
        op_id: Uuid,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        // Re-read the record each attempt: an earlier acceptance in this
        // cycle may have rebased it.
        let Some(mut record) = device.state().journal.get(op_id).cloned() else {
            return Ok(());
        };

        for _attempt in 0..2 {
            match self.authority.submit(&record).await? {
                SubmitResponse::Accepted { item } => {
                    let event = {
                        let mut state = device.state();
                        state.clock.observe(item.last_write_at);
                        state.journal.acknowledge(op_id);
                        state.journal.rebase_item(item.id, item.version);
                        state.store.adopt_remote(item).map(|adopted| ChangeEvent {
                            household_id: household_id.to_string(),
                            item: adopted,
                            origin: ChangeOrigin::Sync,
                        })
                    };
                    if let Some(event) = event {
                        device.emit(event);
                    }
                    report.submitted += 1;
                    return Ok(());
                }
                SubmitResponse::Conflict { item: remote } => {
                    report.conflicts += 1;
                    let (merged, next) = {
                        let mut state = device.state();
                        state.clock.observe(remote.last_write_at);
                        merge_conflict(&mut state, &record, remote)
                    };
                    device.emit(ChangeEvent {
                        household_id: household_id.to_string(),
                        item: merged,
                        origin: ChangeOrigin::Sync,
                    });
                    match next {
                        None => {
                            report.subsumed += 1;
                            return Ok(());
                        }
                        Some(rebased) => record = rebased,
                    }
                }
                SubmitResponse::Rejected { reason } => {
                    // The authority refused the op structurally. Retrying
                    // cannot help; drop it so the journal does not wedge.
                    tracing::warn!(
                        household = household_id,
                        op = %op_id,
                        %reason,
                        "authority rejected journalled op"
                    );
                    device.state().journal.acknowledge(op_id);
                    report.rejected += 1;
                    return Ok(());
                }
            }
        }
        // Still conflicting after one rebase; the requeued op retries on
        // the next cycle.
        Ok(())
    }
}

/// Resolves a conflict inside the state lock: writes the merge result to
/// the store and either retires the op (merge equals the authority copy)
/// or requeues a compensating mutation rebased onto the authority version.
///
/// Returns the merged item and, when needed, the rebased record to
/// resubmit.
fn merge_conflict(
    state: &mut DeviceState,
    record: &MutationRecord,
    remote: PantryItem,
) -> (PantryItem, Option<MutationRecord>) {
    let local = state
        .store
        .get(&record.household_id, record.item_id)
        .cloned()
        .unwrap_or_else(|| remote.clone());
    let merged = resolve(&local, &remote, record);
    state.store.put_merged(merged.clone());

    match compensating_payload(&merged, &remote, record) {
        None => {
            // The merge is exactly the authority's copy; the op is
            // subsumed.
            state.journal.acknowledge(record.op_id);
            state.journal.rebase_item(record.item_id, merged.version);
            (merged, None)
        }
        Some(payload) => {
            state
                .journal
                .requeue(record.op_id, payload.clone(), remote.version);
            let mut rebased = record.clone();
            rebased.payload = payload;
            rebased.base_version = remote.version;
            (merged, Some(rebased))
        }
    }
}

/// Builds the corrective mutation that moves the authority's record to the
/// merge result, or `None` when the merge already equals it.
///
/// A conflicting quantity adjustment stays a quantity adjustment so that
/// further concurrent adjustments on other devices remain additive.
fn compensating_payload(
    merged: &PantryItem,
    remote: &PantryItem,
    record: &MutationRecord,
) -> Option<MutationPayload> {
    if merged.same_content(remote) {
        return None;
    }
    if merged.is_deleted() {
        return Some(MutationPayload::Delete);
    }
    if let MutationPayload::QuantityDelta { delta } = record.payload {
        return Some(MutationPayload::QuantityDelta { delta });
    }
    Some(MutationPayload::Update {
        patch: ItemPatch::diff(remote, merged),
        prior: Some(Box::new(remote.clone())),
    })
}
