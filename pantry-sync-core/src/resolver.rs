//! Deterministic conflict resolution.
//!
//! Pure decision function over two concurrent versions of an item. Every
//! device resolving the same pair against the same journalled operation
//! produces the same result, which is what lets all household members
//! converge without a central lock.
//!
//! Policy, in order:
//! 1. Delete beats any concurrent non-delete mutation: a discarded item is
//!    never resurrected by a stale edit.
//! 2. Concurrent quantity adjustments are additive: the merge quantity is
//!    `remote.quantity + delta`, floored at zero. Two people each using
//!    some milk must both be reflected.
//! 3. Edits on disjoint fields merge field-by-field, each device keeping
//!    the field it touched.
//! 4. Edits to the same non-quantity field use last-writer-wins on the
//!    logical clock, ties broken by device id (lexically greater wins).
//! 5. The result's `version` is the authority's current version; the
//!    post-merge version is always assigned by the authority, never here.

use chrono::{DateTime, Utc};

use crate::journal::MutationRecord;
use crate::model::{ItemPatch, MutationPayload, PantryItem};

/// Resolves a conflict between the local copy (with `local_op` applied
/// optimistically) and the competing remote copy returned by the authority.
pub fn resolve(local: &PantryItem, remote: &PantryItem, local_op: &MutationRecord) -> PantryItem {
    // Delete wins, whichever side it came from.
    if remote.is_deleted() {
        return remote.clone();
    }
    if matches!(local_op.payload, MutationPayload::Delete) || local.is_deleted() {
        let mut merged = remote.clone();
        merged.deleted_at = local.deleted_at.or(Some(Utc::now()));
        merged.last_writer_id = local.last_writer_id.clone();
        merged.last_writer_device = local.last_writer_device.clone();
        merged.last_write_at = remote.last_write_at.max(local.last_write_at);
        return merged;
    }

    match &local_op.payload {
        MutationPayload::Delete => unreachable!("handled above"),
        MutationPayload::QuantityDelta { delta } => {
            let mut merged = remote.clone();
            merged.quantity = (remote.quantity + delta).max(0.0);
            stamp(&mut merged, remote, local_op);
            merged
        }
        MutationPayload::Update { patch, prior } => {
            merge_fields(remote, patch, prior.as_deref(), local_op)
        }
        MutationPayload::Create {
            name,
            quantity,
            unit,
            category,
            expires_at,
        } => {
            // The same id was created on both sides. Treat the local create
            // as an edit of every field; with no common base, differing
            // fields fall through to last-writer-wins.
            let patch = ItemPatch {
                name: Some(name.clone()),
                quantity: Some(*quantity),
                unit: Some(unit.clone()),
                category: Some(category.clone()),
                expires_at: *expires_at,
                clear_expiration: expires_at.is_none(),
            };
            merge_fields(remote, &patch, None, local_op)
        }
    }
}

/// Field-by-field merge of a local patch into the remote copy.
///
/// For each field the local op touched:
/// - remote still holds the common base value (it did not touch the field):
///   the local edit lands, since disjoint edits merge;
/// - remote holds the same value the local edit produced: nothing to do;
/// - remote holds a third value: genuine same-field conflict, decided by
///   last-writer-wins.
///
/// `prior` is the local op's snapshot of the common base. Without it (a
/// duplicated create, or a record produced by an older device) every
/// differing field is treated as a genuine conflict.
fn merge_fields(
    remote: &PantryItem,
    patch: &ItemPatch,
    prior: Option<&PantryItem>,
    local_op: &MutationRecord,
) -> PantryItem {
    let local_wins = local_op.produced_at > remote.last_write_at
        || (local_op.produced_at == remote.last_write_at
            && local_op.device_id > remote.last_writer_device);

    let mut merged = remote.clone();
    let mut applied = false;

    if let Some(ref name) = patch.name {
        if take_local(&remote.name, name, prior.map(|p| &p.name), local_wins) {
            merged.name = name.clone();
            applied = true;
        }
    }
    if let Some(quantity) = patch.quantity {
        if take_local(&remote.quantity, &quantity, prior.map(|p| &p.quantity), local_wins) {
            merged.quantity = quantity;
            applied = true;
        }
    }
    if let Some(ref unit) = patch.unit {
        if take_local(&remote.unit, unit, prior.map(|p| &p.unit), local_wins) {
            merged.unit = unit.clone();
            applied = true;
        }
    }
    if let Some(ref category) = patch.category {
        if take_local(&remote.category, category, prior.map(|p| &p.category), local_wins) {
            merged.category = category.clone();
            applied = true;
        }
    }
    if patch.touches_expiration() {
        let local_value: Option<DateTime<Utc>> = if patch.clear_expiration {
            None
        } else {
            patch.expires_at
        };
        if take_local(
            &remote.expires_at,
            &local_value,
            prior.map(|p| &p.expires_at),
            local_wins,
        ) {
            merged.expires_at = local_value;
            applied = true;
        }
    }

    if applied {
        stamp(&mut merged, remote, local_op);
    }
    merged
}

/// Decides one field. `remote_value` is what the authority holds,
/// `local_value` what the local edit produced, `base_value` the common
/// ancestor if known.
fn take_local<T: PartialEq>(
    remote_value: &T,
    local_value: &T,
    base_value: Option<&T>,
    local_wins: bool,
) -> bool {
    if remote_value == local_value {
        return false;
    }
    match base_value {
        // Remote never touched the field; the local edit stands.
        Some(base) if remote_value == base => true,
        // Same-field conflict.
        _ => local_wins,
    }
}

fn stamp(merged: &mut PantryItem, remote: &PantryItem, local_op: &MutationRecord) {
    merged.last_writer_id = local_op.user_id.clone();
    merged.last_writer_device = local_op.device_id.clone();
    merged.last_write_at = remote.last_write_at.max(local_op.produced_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn base() -> PantryItem {
        PantryItem {
            id: Uuid::new_v4(),
            household_id: "hh-1".to_string(),
            name: "Milk".to_string(),
            quantity: 10.0,
            unit: "l".to_string(),
            category: "dairy".to_string(),
            expires_at: None,
            version: 4,
            last_writer_id: "erin".to_string(),
            last_writer_device: "phone".to_string(),
            last_write_at: 10,
            deleted_at: None,
        }
    }

    fn op(item: &PantryItem, payload: MutationPayload, produced_at: u64) -> MutationRecord {
        MutationRecord {
            op_id: Uuid::new_v4(),
            household_id: item.household_id.clone(),
            item_id: item.id,
            payload,
            base_version: 4,
            produced_at,
            device_id: "tablet".to_string(),
            user_id: "sam".to_string(),
            seq: 1,
        }
    }

    #[test]
    fn test_remote_delete_beats_local_edit() {
        let common = base();
        let mut local = common.clone();
        local.category = "fridge".to_string();
        let mut remote = common.clone();
        remote.version = 5;
        remote.deleted_at = Some(Utc::now());

        let patch = ItemPatch {
            category: Some("fridge".to_string()),
            ..Default::default()
        };
        let record = op(
            &common,
            MutationPayload::Update {
                patch,
                prior: Some(Box::new(common.clone())),
            },
            11,
        );

        let merged = resolve(&local, &remote, &record);
        assert!(merged.is_deleted());
        assert_eq!(merged.version, 5);
    }

    #[test]
    fn test_local_delete_beats_remote_edit() {
        let common = base();
        let mut local = common.clone();
        local.deleted_at = Some(Utc::now());
        let mut remote = common.clone();
        remote.version = 5;
        remote.category = "fridge".to_string();
        remote.last_write_at = 12;

        let record = op(&common, MutationPayload::Delete, 11);
        let merged = resolve(&local, &remote, &record);
        assert!(merged.is_deleted());
        assert_eq!(merged.deleted_at, local.deleted_at);
        assert_eq!(merged.version, 5);
    }

    #[test]
    fn test_concurrent_quantity_deltas_are_additive() {
        let common = base();
        let mut local = common.clone();
        local.quantity = 9.0;
        // The other device already committed its own -1.
        let mut remote = common.clone();
        remote.version = 5;
        remote.quantity = 9.0;
        remote.last_write_at = 12;

        let record = op(&common, MutationPayload::QuantityDelta { delta: -1.0 }, 11);
        let merged = resolve(&local, &remote, &record);
        assert_eq!(merged.quantity, 8.0);
        assert_eq!(merged.version, 5);
    }

    #[test]
    fn test_additive_merge_floors_at_zero() {
        let common = base();
        let mut remote = common.clone();
        remote.version = 5;
        remote.quantity = 1.0;

        let record = op(&common, MutationPayload::QuantityDelta { delta: -3.0 }, 11);
        let merged = resolve(&common, &remote, &record);
        assert_eq!(merged.quantity, 0.0);
    }

    #[test]
    fn test_disjoint_fields_merge_even_when_remote_clock_is_later() {
        let common = base();
        // Local edits expiration; remote edited category with a later clock.
        let expires = Some(Utc::now());
        let mut local = common.clone();
        local.expires_at = expires;
        let mut remote = common.clone();
        remote.version = 5;
        remote.category = "fridge".to_string();
        remote.last_write_at = 20;

        let patch = ItemPatch {
            expires_at: expires,
            ..Default::default()
        };
        let record = op(
            &common,
            MutationPayload::Update {
                patch,
                prior: Some(Box::new(common.clone())),
            },
            11,
        );

        let merged = resolve(&local, &remote, &record);
        assert_eq!(merged.category, "fridge");
        assert_eq!(merged.expires_at, expires);
    }

    #[test]
    fn test_same_field_conflict_uses_last_writer_wins() {
        let common = base();
        let mut local = common.clone();
        local.category = "fridge".to_string();
        let mut remote = common.clone();
        remote.version = 5;
        remote.category = "cellar".to_string();

        let patch = ItemPatch {
            category: Some("fridge".to_string()),
            ..Default::default()
        };

        // Local op produced later than remote's write: local wins.
        let newer = op(
            &common,
            MutationPayload::Update {
                patch: patch.clone(),
                prior: Some(Box::new(common.clone())),
            },
            remote.last_write_at + 1,
        );
        assert_eq!(resolve(&local, &remote, &newer).category, "fridge");

        // Local op produced earlier: remote wins.
        let older = op(
            &common,
            MutationPayload::Update {
                patch,
                prior: Some(Box::new(common.clone())),
            },
            remote.last_write_at - 1,
        );
        assert_eq!(resolve(&local, &remote, &older).category, "cellar");
    }

    #[test]
    fn test_clock_tie_broken_by_device_id() {
        let common = base();
        let mut remote = common.clone();
        remote.version = 5;
        remote.name = "Whole milk".to_string();
        remote.last_writer_device = "phone".to_string();

        let patch = ItemPatch {
            name: Some("Oat milk".to_string()),
            ..Default::default()
        };
        // Same logical clock; "tablet" > "phone" lexically, so local wins.
        let record = op(
            &common,
            MutationPayload::Update {
                patch,
                prior: Some(Box::new(common.clone())),
            },
            remote.last_write_at,
        );
        let merged = resolve(&common, &remote, &record);
        assert_eq!(merged.name, "Oat milk");
    }

    #[test]
    fn test_version_is_always_the_authoritys() {
        let common = base();
        let mut remote = common.clone();
        remote.version = 9;

        let record = op(&common, MutationPayload::QuantityDelta { delta: 1.0 }, 11);
        let merged = resolve(&common, &remote, &record);
        assert_eq!(merged.version, 9);
    }

    #[test]
    fn test_duplicate_create_resolves_deterministically() {
        let common = base();
        let mut remote = common.clone();
        remote.version = 1;
        remote.name = "Milk".to_string();
        remote.quantity = 1.0;
        remote.last_write_at = 5;

        let record = op(
            &common,
            MutationPayload::Create {
                name: "Milk".to_string(),
                quantity: 2.0,
                unit: "l".to_string(),
                category: "dairy".to_string(),
                expires_at: None,
            },
            7,
        );
        let merged = resolve(&common, &remote, &record);
        // Local create produced later, so its quantity wins the conflict.
        assert_eq!(merged.quantity, 2.0);
        assert_eq!(merged.version, 1);
    }
}
