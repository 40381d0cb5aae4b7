//! Mutation journal: the append-only record of local operations this
//! device still owes the authority.
//!
//! Entries are ordered by a device-local sequence number (per-device causal
//! order); queues on different devices are independent until the
//! reconciler merges them through the authority. Acknowledgement is
//! idempotent to support at-least-once delivery from the authority.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::model::MutationPayload;

/// One journalled operation.
///
/// `op_id` is the client-generated idempotency key; `base_version` is the
/// item version the device believed was current when the operation was
/// produced; `produced_at` is the device's logical clock at that moment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutationRecord {
    pub op_id: Uuid,
    pub household_id: String,
    pub item_id: Uuid,
    pub payload: MutationPayload,
    pub base_version: u64,
    pub produced_at: u64,
    pub device_id: String,
    pub user_id: String,
    /// Device-local causal sequence number.
    pub seq: u64,
}

/// The device's pending-operation bookkeeping.
///
/// Records are immutable once appended except through [`requeue`], which
/// the reconciler uses to rebase an operation after a merge. A record is
/// retired only by [`acknowledge`].
///
/// [`requeue`]: MutationJournal::requeue
/// [`acknowledge`]: MutationJournal::acknowledge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationJournal {
    entries: Vec<MutationRecord>,
    acked: HashSet<Uuid>,
    next_seq: u64,
}

impl MutationJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next device-local sequence number.
    pub fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Appends a record. Records must carry a `seq` obtained from
    /// [`next_seq`](MutationJournal::next_seq) so causal order holds.
    pub fn enqueue(&mut self, record: MutationRecord) {
        self.entries.push(record);
    }

    /// Pending records for a household, in causal order.
    pub fn pending(&self, household_id: &str) -> Vec<MutationRecord> {
        self.entries
            .iter()
            .filter(|r| r.household_id == household_id)
            .cloned()
            .collect()
    }

    /// Looks up a pending record by op id.
    pub fn get(&self, op_id: Uuid) -> Option<&MutationRecord> {
        self.entries.iter().find(|r| r.op_id == op_id)
    }

    /// Returns true if any pending record targets `item_id`.
    pub fn has_pending_for(&self, item_id: Uuid) -> bool {
        self.entries.iter().any(|r| r.item_id == item_id)
    }

    /// Retires a record. Re-acknowledging an already-cleared op id is a
    /// no-op, not an error. Returns true if a record was actually retired.
    pub fn acknowledge(&mut self, op_id: Uuid) -> bool {
        let len_before = self.entries.len();
        self.entries.retain(|r| r.op_id != op_id);
        let removed = self.entries.len() != len_before;
        if removed {
            self.acked.insert(op_id);
        }
        removed
    }

    /// Returns true if `op_id` was acknowledged at some point.
    pub fn is_acknowledged(&self, op_id: Uuid) -> bool {
        self.acked.contains(&op_id)
    }

    /// Rewrites a pending record in place with a new payload and base
    /// version, preserving its `op_id` and causal position. Used by the
    /// reconciler to rebase an operation onto the authority's current
    /// version after a merge. Returns false if the op is no longer pending.
    pub fn requeue(&mut self, op_id: Uuid, payload: MutationPayload, base_version: u64) -> bool {
        match self.entries.iter_mut().find(|r| r.op_id == op_id) {
            Some(record) => {
                record.payload = payload;
                record.base_version = base_version;
                true
            }
            None => false,
        }
    }

    /// Rebase all pending records targeting `item_id` onto a newly
    /// confirmed version. Later entries in a local causal chain were
    /// produced on top of earlier ones, so once the authority accepts an
    /// earlier entry the rest of the chain builds on its version.
    pub fn rebase_item(&mut self, item_id: Uuid, base_version: u64) {
        for record in self.entries.iter_mut().filter(|r| r.item_id == item_id) {
            record.base_version = base_version;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(household: &str, item_id: Uuid, seq: u64) -> MutationRecord {
        MutationRecord {
            op_id: Uuid::new_v4(),
            household_id: household.to_string(),
            item_id,
            payload: MutationPayload::QuantityDelta { delta: -1.0 },
            base_version: 4,
            produced_at: seq,
            device_id: "phone".to_string(),
            user_id: "erin".to_string(),
            seq,
        }
    }

    #[test]
    fn test_pending_is_in_causal_order_and_scoped() {
        let mut journal = MutationJournal::new();
        let item = Uuid::new_v4();
        for i in 1..=3 {
            let seq = journal.next_seq();
            assert_eq!(seq, i);
            journal.enqueue(record("hh-1", item, seq));
        }
        let seq = journal.next_seq();
        journal.enqueue(record("hh-2", Uuid::new_v4(), seq));

        let pending = journal.pending("hh-1");
        assert_eq!(pending.len(), 3);
        assert!(pending.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(journal.pending("hh-2").len(), 1);
        assert_eq!(journal.len(), 4);
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let mut journal = MutationJournal::new();
        let rec = record("hh-1", Uuid::new_v4(), 1);
        let op_id = rec.op_id;
        journal.enqueue(rec);

        assert!(journal.acknowledge(op_id));
        assert!(!journal.acknowledge(op_id));
        assert!(journal.is_acknowledged(op_id));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_requeue_preserves_identity_and_order() {
        let mut journal = MutationJournal::new();
        let item = Uuid::new_v4();
        let first = record("hh-1", item, 1);
        let op_id = first.op_id;
        journal.enqueue(first);
        journal.enqueue(record("hh-1", item, 2));

        assert!(journal.requeue(op_id, MutationPayload::Delete, 9));

        let pending = journal.pending("hh-1");
        assert_eq!(pending[0].op_id, op_id);
        assert_eq!(pending[0].seq, 1);
        assert_eq!(pending[0].base_version, 9);
        assert_eq!(pending[0].payload, MutationPayload::Delete);
    }

    #[test]
    fn test_requeue_of_cleared_op_fails() {
        let mut journal = MutationJournal::new();
        let rec = record("hh-1", Uuid::new_v4(), 1);
        let op_id = rec.op_id;
        journal.enqueue(rec);
        journal.acknowledge(op_id);

        assert!(!journal.requeue(op_id, MutationPayload::Delete, 1));
    }

    #[test]
    fn test_rebase_item_updates_whole_chain() {
        let mut journal = MutationJournal::new();
        let item = Uuid::new_v4();
        journal.enqueue(record("hh-1", item, 1));
        journal.enqueue(record("hh-1", item, 2));
        let other = record("hh-1", Uuid::new_v4(), 3);
        let other_base = other.base_version;
        journal.enqueue(other);

        journal.rebase_item(item, 12);

        for rec in journal.pending("hh-1") {
            if rec.item_id == item {
                assert_eq!(rec.base_version, 12);
            } else {
                assert_eq!(rec.base_version, other_base);
            }
        }
    }

    #[test]
    fn test_has_pending_for() {
        let mut journal = MutationJournal::new();
        let item = Uuid::new_v4();
        let rec = record("hh-1", item, 1);
        let op_id = rec.op_id;
        journal.enqueue(rec);

        assert!(journal.has_pending_for(item));
        journal.acknowledge(op_id);
        assert!(!journal.has_pending_for(item));
    }
}
