//! In-process reference authority.
//!
//! Holds the canonical item tables and assigns every accepted write its
//! `version`. The server binary wraps this behind HTTP; the convergence
//! tests drive it directly.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::journal::MutationRecord;
use crate::model::{MutationPayload, PantryItem};
use crate::sync::{Authority, PullResponse, SubmitResponse, SyncError};

#[derive(Debug, Default)]
struct HouseholdTable {
    items: HashMap<Uuid, PantryItem>,
    /// Per-item write position in the household log, for delta pulls.
    item_seqs: HashMap<Uuid, u64>,
    /// Household log position of the most recent accepted write.
    log_seq: u64,
    /// Replay table: op id of every accepted write, for idempotent
    /// resubmission.
    applied: HashMap<Uuid, Uuid>,
}

/// Persistable copy of one household's authority state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthoritySnapshot {
    pub household_id: String,
    pub items: Vec<PantryItem>,
    pub item_seqs: Vec<(Uuid, u64)>,
    pub log_seq: u64,
    pub applied: Vec<(Uuid, Uuid)>,
}

/// The reference authority implementation.
#[derive(Debug, Default)]
pub struct MemoryAuthority {
    households: Mutex<HashMap<String, HouseholdTable>>,
}

impl MemoryAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Households with any recorded state, sorted.
    pub fn households(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.households.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Exports a household for persistence. `None` if the household has
    /// no state yet.
    pub fn snapshot_household(&self, household_id: &str) -> Option<AuthoritySnapshot> {
        let households = self.households.lock();
        let table = households.get(household_id)?;
        Some(AuthoritySnapshot {
            household_id: household_id.to_string(),
            items: table.items.values().cloned().collect(),
            item_seqs: table.item_seqs.iter().map(|(k, v)| (*k, *v)).collect(),
            log_seq: table.log_seq,
            applied: table.applied.iter().map(|(k, v)| (*k, *v)).collect(),
        })
    }

    /// Restores a household from a persisted snapshot.
    pub fn restore_household(&self, snapshot: AuthoritySnapshot) {
        let mut households = self.households.lock();
        let table = households.entry(snapshot.household_id).or_default();
        table.items = snapshot.items.into_iter().map(|i| (i.id, i)).collect();
        table.item_seqs = snapshot.item_seqs.into_iter().collect();
        table.log_seq = snapshot.log_seq;
        table.applied = snapshot.applied.into_iter().collect();
    }

    fn commit(table: &mut HouseholdTable, record: &MutationRecord, item: PantryItem) -> PantryItem {
        table.log_seq += 1;
        table.item_seqs.insert(item.id, table.log_seq);
        table.applied.insert(record.op_id, item.id);
        table.items.insert(item.id, item.clone());
        item
    }
}

impl Authority for MemoryAuthority {
    async fn pull(
        &self,
        household_id: &str,
        checkpoint: Option<u64>,
    ) -> Result<PullResponse, SyncError> {
        let households = self.households.lock();
        let Some(table) = households.get(household_id) else {
            return Ok(PullResponse {
                snapshot: true,
                items: Vec::new(),
                checkpoint: 0,
            });
        };

        match checkpoint {
            // Known cursor: only the items written after it.
            Some(cp) if cp <= table.log_seq => {
                let items = table
                    .items
                    .values()
                    .filter(|item| table.item_seqs.get(&item.id).copied().unwrap_or(0) > cp)
                    .cloned()
                    .collect();
                Ok(PullResponse {
                    snapshot: false,
                    items,
                    checkpoint: table.log_seq,
                })
            }
            // First sync or a cursor from a lost/foreign log: full snapshot.
            _ => Ok(PullResponse {
                snapshot: true,
                items: table.items.values().cloned().collect(),
                checkpoint: table.log_seq,
            }),
        }
    }

    async fn submit(&self, record: &MutationRecord) -> Result<SubmitResponse, SyncError> {
        let mut households = self.households.lock();
        let table = households.entry(record.household_id.clone()).or_default();

        // Idempotent replay of an already-applied op.
        if let Some(item_id) = table.applied.get(&record.op_id) {
            let item = table
                .items
                .get(item_id)
                .cloned()
                .ok_or_else(|| SyncError::Protocol("replay table references missing item".into()))?;
            return Ok(SubmitResponse::Accepted { item });
        }

        let current = table.items.get(&record.item_id).cloned();
        let current_version = current.as_ref().map_or(0, |item| item.version);
        if record.base_version != current_version {
            return match current {
                Some(item) => Ok(SubmitResponse::Conflict { item }),
                None => Ok(SubmitResponse::Rejected {
                    reason: format!("no item {} in household", record.item_id),
                }),
            };
        }

        let committed = match (&record.payload, current) {
            (
                MutationPayload::Create {
                    name,
                    quantity,
                    unit,
                    category,
                    expires_at,
                },
                None,
            ) => {
                if name.trim().is_empty() {
                    return Ok(SubmitResponse::Rejected {
                        reason: "item name must not be empty".into(),
                    });
                }
                if *quantity < 0.0 {
                    return Ok(SubmitResponse::Rejected {
                        reason: format!("quantity must be non-negative, got {}", quantity),
                    });
                }
                let item = PantryItem {
                    id: record.item_id,
                    household_id: record.household_id.clone(),
                    name: name.clone(),
                    quantity: *quantity,
                    unit: unit.clone(),
                    category: category.clone(),
                    expires_at: *expires_at,
                    version: 1,
                    last_writer_id: record.user_id.clone(),
                    last_writer_device: record.device_id.clone(),
                    last_write_at: record.produced_at,
                    deleted_at: None,
                };
                Self::commit(table, record, item)
            }
            (MutationPayload::Create { .. }, Some(item)) => {
                // Matching base version on an existing item cannot happen
                // for a create (existing versions start at 1), but keep the
                // arm total.
                return Ok(SubmitResponse::Conflict { item });
            }
            (_, None) => {
                return Ok(SubmitResponse::Rejected {
                    reason: format!("no item {} in household", record.item_id),
                });
            }
            (payload, Some(mut item)) => {
                if item.is_deleted() && !matches!(payload, MutationPayload::Delete) {
                    // Removal is authoritative intent: a write against a
                    // tombstone is subsumed, not applied.
                    return Ok(SubmitResponse::Accepted { item });
                }
                match payload {
                    MutationPayload::Update { patch, .. } => {
                        if let Some(ref name) = patch.name {
                            if name.trim().is_empty() {
                                return Ok(SubmitResponse::Rejected {
                                    reason: "item name must not be empty".into(),
                                });
                            }
                        }
                        if let Some(quantity) = patch.quantity {
                            if quantity < 0.0 {
                                return Ok(SubmitResponse::Rejected {
                                    reason: format!(
                                        "quantity must be non-negative, got {}",
                                        quantity
                                    ),
                                });
                            }
                        }
                        patch.apply_to(&mut item);
                    }
                    MutationPayload::Delete => {
                        if item.deleted_at.is_none() {
                            item.deleted_at = Some(Utc::now());
                        }
                    }
                    MutationPayload::QuantityDelta { delta } => {
                        item.quantity = (item.quantity + delta).max(0.0);
                    }
                    MutationPayload::Create { .. } => unreachable!("handled above"),
                }
                item.version += 1;
                item.last_writer_id = record.user_id.clone();
                item.last_writer_device = record.device_id.clone();
                item.last_write_at = record.produced_at;
                Self::commit(table, record, item)
            }
        };

        Ok(SubmitResponse::Accepted { item: committed })
    }
}
