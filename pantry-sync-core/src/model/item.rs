use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A single pantry item, scoped to a household.
///
/// `version` is the optimistic-concurrency token. It is assigned by the
/// authority on every accepted write; the locally stored value is advisory
/// until the next reconciliation confirms it. `id` and `household_id` never
/// change after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PantryItem {
    pub id: Uuid,
    /// Owning household. Items are never visible outside their household.
    pub household_id: String,
    pub name: String,
    /// Amount on hand. Never negative.
    pub quantity: f64,
    /// Unit for `quantity` (e.g., "l", "pcs").
    pub unit: String,
    /// Free-form category (e.g., "dairy").
    pub category: String,
    /// Expiration timestamp. `None` means expiration is not tracked.
    pub expires_at: Option<DateTime<Utc>>,
    /// Per-item write counter, incremented on every accepted write.
    pub version: u64,
    /// User who produced the most recent accepted write.
    pub last_writer_id: String,
    /// Device that produced the most recent accepted write.
    pub last_writer_device: String,
    /// Logical clock value of the most recent accepted write.
    pub last_write_at: u64,
    /// Tombstone timestamp. Tombstoned items are retained until sync
    /// completes so stale concurrent edits cannot resurrect them.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PantryItem {
    /// Returns true if this item carries a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Compares the user-visible content of two items: descriptive fields
    /// and tombstone state, ignoring version and writer provenance.
    pub fn same_content(&self, other: &PantryItem) -> bool {
        self.name == other.name
            && self.quantity == other.quantity
            && self.unit == other.unit
            && self.category == other.category
            && self.expires_at == other.expires_at
            && self.deleted_at.is_some() == other.deleted_at.is_some()
    }
}

impl fmt::Display for PantryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_empty() {
            write!(f, "{:<20} {}", self.name, self.quantity)?;
        } else {
            write!(f, "{:<20} {} {}", self.name, self.quantity, self.unit)?;
        }
        if !self.category.is_empty() {
            write!(f, " [{}]", self.category)?;
        }
        if let Some(expires) = self.expires_at {
            write!(f, " expires {}", expires.format("%Y-%m-%d"))?;
        }
        if self.is_deleted() {
            write!(f, " (deleted)")?;
        }
        Ok(())
    }
}
