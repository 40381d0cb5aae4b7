//! Local item store: the per-device materialized view of pantry items.
//!
//! Mutations are applied optimistically, independent of connectivity, and
//! every accepted apply appends a [`MutationRecord`] to the journal.
//! `Rejected` is returned only for structurally invalid input; staleness
//! is a reconciler concern, never a store concern.
//!
//! Households must be registered explicitly before any operation touches
//! them; there is no ambient "current household". Registration is the local
//! authorization surface: a mutation scoped to an unregistered household is
//! rejected before any state changes.

use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::journal::{MutationJournal, MutationRecord};
use crate::model::{Mutation, MutationPayload, PantryItem};

/// Structural rejection of a mutation. Never retried, surfaced to the
/// caller immediately.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejected {
    #[error("household not registered on this device: {0}")]
    UnknownHousehold(String),
    #[error("quantity must be non-negative, got {0}")]
    NegativeQuantity(f64),
    #[error("item name must not be empty")]
    EmptyName,
    #[error("no item with id {0}")]
    UnknownItem(Uuid),
    #[error("mutation requires an item id")]
    MissingItemId,
    #[error("item {0} already exists")]
    DuplicateItem(Uuid),
}

/// Provenance of a local write.
#[derive(Debug, Clone, Copy)]
pub struct Writer<'a> {
    pub device_id: &'a str,
    pub user_id: &'a str,
}

/// Per-device materialized item table, keyed by household then item id.
///
/// The store exclusively owns this table. The reconciler writes into it
/// through [`adopt_remote`] and [`put_merged`]; everything else goes
/// through [`apply`].
///
/// [`adopt_remote`]: ItemStore::adopt_remote
/// [`put_merged`]: ItemStore::put_merged
/// [`apply`]: ItemStore::apply
#[derive(Debug, Default)]
pub struct ItemStore {
    households: HashMap<String, HashMap<Uuid, PantryItem>>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a household on this device. Idempotent.
    pub fn register_household(&mut self, household_id: impl Into<String>) {
        self.households.entry(household_id.into()).or_default();
    }

    pub fn is_registered(&self, household_id: &str) -> bool {
        self.households.contains_key(household_id)
    }

    /// Registered households, sorted for stable output.
    pub fn households(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.households.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Applies a mutation optimistically and journals it.
    ///
    /// The returned item reflects the speculative local state; its
    /// `version` stays at the last authority-confirmed value until the
    /// reconciler confirms the write.
    pub fn apply(
        &mut self,
        journal: &mut MutationJournal,
        mutation: Mutation,
        writer: Writer<'_>,
        produced_at: u64,
    ) -> Result<PantryItem, Rejected> {
        let household_id = mutation.household_id.clone();
        let table = self
            .households
            .get_mut(&household_id)
            .ok_or_else(|| Rejected::UnknownHousehold(household_id.clone()))?;

        match mutation.payload {
            MutationPayload::Create {
                name,
                quantity,
                unit,
                category,
                expires_at,
            } => {
                if name.trim().is_empty() {
                    return Err(Rejected::EmptyName);
                }
                if quantity < 0.0 {
                    return Err(Rejected::NegativeQuantity(quantity));
                }
                let id = mutation.item_id.unwrap_or_else(Uuid::new_v4);
                if table.contains_key(&id) {
                    return Err(Rejected::DuplicateItem(id));
                }
                let item = PantryItem {
                    id,
                    household_id: household_id.clone(),
                    name: name.clone(),
                    quantity,
                    unit: unit.clone(),
                    category: category.clone(),
                    expires_at,
                    version: 0,
                    last_writer_id: writer.user_id.to_string(),
                    last_writer_device: writer.device_id.to_string(),
                    last_write_at: produced_at,
                    deleted_at: None,
                };
                table.insert(id, item.clone());
                let seq = journal.next_seq();
                journal.enqueue(MutationRecord {
                    op_id: Uuid::new_v4(),
                    household_id,
                    item_id: id,
                    payload: MutationPayload::Create {
                        name,
                        quantity,
                        unit,
                        category,
                        expires_at,
                    },
                    base_version: 0,
                    produced_at,
                    device_id: writer.device_id.to_string(),
                    user_id: writer.user_id.to_string(),
                    seq,
                });
                Ok(item)
            }
            MutationPayload::Update { patch, .. } => {
                let id = mutation.item_id.ok_or(Rejected::MissingItemId)?;
                let item = table
                    .get_mut(&id)
                    .filter(|i| !i.is_deleted())
                    .ok_or(Rejected::UnknownItem(id))?;
                if let Some(ref name) = patch.name {
                    if name.trim().is_empty() {
                        return Err(Rejected::EmptyName);
                    }
                }
                if let Some(quantity) = patch.quantity {
                    if quantity < 0.0 {
                        return Err(Rejected::NegativeQuantity(quantity));
                    }
                }
                if patch.is_empty() {
                    return Ok(item.clone());
                }
                let prior = Box::new(item.clone());
                let base_version = item.version;
                patch.apply_to(item);
                item.last_writer_id = writer.user_id.to_string();
                item.last_writer_device = writer.device_id.to_string();
                item.last_write_at = produced_at;
                let applied = item.clone();
                let seq = journal.next_seq();
                journal.enqueue(MutationRecord {
                    op_id: Uuid::new_v4(),
                    household_id,
                    item_id: id,
                    payload: MutationPayload::Update {
                        patch,
                        prior: Some(prior),
                    },
                    base_version,
                    produced_at,
                    device_id: writer.device_id.to_string(),
                    user_id: writer.user_id.to_string(),
                    seq,
                });
                Ok(applied)
            }
            MutationPayload::Delete => {
                let id = mutation.item_id.ok_or(Rejected::MissingItemId)?;
                let item = table.get_mut(&id).ok_or(Rejected::UnknownItem(id))?;
                if item.is_deleted() {
                    // Re-deleting a tombstone changes nothing.
                    return Ok(item.clone());
                }
                let base_version = item.version;
                item.deleted_at = Some(Utc::now());
                item.last_writer_id = writer.user_id.to_string();
                item.last_writer_device = writer.device_id.to_string();
                item.last_write_at = produced_at;
                let applied = item.clone();
                let seq = journal.next_seq();
                journal.enqueue(MutationRecord {
                    op_id: Uuid::new_v4(),
                    household_id,
                    item_id: id,
                    payload: MutationPayload::Delete,
                    base_version,
                    produced_at,
                    device_id: writer.device_id.to_string(),
                    user_id: writer.user_id.to_string(),
                    seq,
                });
                Ok(applied)
            }
            MutationPayload::QuantityDelta { delta } => {
                let id = mutation.item_id.ok_or(Rejected::MissingItemId)?;
                let item = table
                    .get_mut(&id)
                    .filter(|i| !i.is_deleted())
                    .ok_or(Rejected::UnknownItem(id))?;
                let base_version = item.version;
                item.quantity = (item.quantity + delta).max(0.0);
                item.last_writer_id = writer.user_id.to_string();
                item.last_writer_device = writer.device_id.to_string();
                item.last_write_at = produced_at;
                let applied = item.clone();
                let seq = journal.next_seq();
                journal.enqueue(MutationRecord {
                    op_id: Uuid::new_v4(),
                    household_id,
                    item_id: id,
                    payload: MutationPayload::QuantityDelta { delta },
                    base_version,
                    produced_at,
                    device_id: writer.device_id.to_string(),
                    user_id: writer.user_id.to_string(),
                    seq,
                });
                Ok(applied)
            }
        }
    }

    /// Item by id, tombstones included.
    pub fn get(&self, household_id: &str, item_id: Uuid) -> Option<&PantryItem> {
        self.households.get(household_id)?.get(&item_id)
    }

    /// Live items of a household, sorted by name.
    pub fn list(&self, household_id: &str) -> Vec<PantryItem> {
        let mut items: Vec<PantryItem> = match self.households.get(household_id) {
            Some(table) => table.values().filter(|i| !i.is_deleted()).cloned().collect(),
            None => return Vec::new(),
        };
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    /// All items of a household including tombstones, sorted by name.
    pub fn list_all(&self, household_id: &str) -> Vec<PantryItem> {
        let mut items: Vec<PantryItem> = match self.households.get(household_id) {
            Some(table) => table.values().cloned().collect(),
            None => return Vec::new(),
        };
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    /// Adopts an authority copy if it is strictly newer than the local one.
    ///
    /// Returns the adopted item, or `None` when the local copy is already
    /// at or past the remote version (a device never regresses an item) or
    /// the household is not registered here.
    pub fn adopt_remote(&mut self, item: PantryItem) -> Option<PantryItem> {
        let table = self.households.get_mut(&item.household_id)?;
        match table.get(&item.id) {
            Some(existing) if existing.version >= item.version => None,
            _ => {
                table.insert(item.id, item.clone());
                Some(item)
            }
        }
    }

    /// Writes a merge result into the table unconditionally. The merged
    /// item already carries the authority's post-conflict version.
    pub fn put_merged(&mut self, item: PantryItem) -> bool {
        match self.households.get_mut(&item.household_id) {
            Some(table) => {
                table.insert(item.id, item);
                true
            }
            None => false,
        }
    }

    /// Full table snapshot for persistence, tombstones included.
    pub fn snapshot(&self, household_id: &str) -> Vec<PantryItem> {
        self.households
            .get(household_id)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Restores a household table from persisted state, registering the
    /// household as a side effect.
    pub fn restore(&mut self, household_id: impl Into<String>, items: Vec<PantryItem>) {
        let table = self.households.entry(household_id.into()).or_default();
        for item in items {
            table.insert(item.id, item);
        }
    }
}
