use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::PantryItem;

/// A partial edit of an item's descriptive fields.
///
/// `None` means the field is untouched. Clearing a tracked expiration is
/// expressed with `clear_expiration` so it can be told apart from "leave
/// the expiration alone".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub clear_expiration: bool,
}

impl ItemPatch {
    /// Returns true if the patch touches no field.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.quantity.is_none()
            && self.unit.is_none()
            && self.category.is_none()
            && self.expires_at.is_none()
            && !self.clear_expiration
    }

    /// Returns true if the patch touches the expiration field.
    pub fn touches_expiration(&self) -> bool {
        self.expires_at.is_some() || self.clear_expiration
    }

    /// Applies the touched fields onto `item`.
    pub fn apply_to(&self, item: &mut PantryItem) {
        if let Some(ref name) = self.name {
            item.name = name.clone();
        }
        if let Some(quantity) = self.quantity {
            item.quantity = quantity;
        }
        if let Some(ref unit) = self.unit {
            item.unit = unit.clone();
        }
        if let Some(ref category) = self.category {
            item.category = category.clone();
        }
        if self.clear_expiration {
            item.expires_at = None;
        } else if let Some(expires) = self.expires_at {
            item.expires_at = Some(expires);
        }
    }

    /// Builds the patch that rewrites `from` into `to`, touching only the
    /// fields that differ.
    pub fn diff(from: &PantryItem, to: &PantryItem) -> Self {
        let mut patch = ItemPatch::default();
        if from.name != to.name {
            patch.name = Some(to.name.clone());
        }
        if from.quantity != to.quantity {
            patch.quantity = Some(to.quantity);
        }
        if from.unit != to.unit {
            patch.unit = Some(to.unit.clone());
        }
        if from.category != to.category {
            patch.category = Some(to.category.clone());
        }
        if from.expires_at != to.expires_at {
            match to.expires_at {
                Some(expires) => patch.expires_at = Some(expires),
                None => patch.clear_expiration = true,
            }
        }
        patch
    }
}

/// The closed set of mutation shapes accepted by the core.
///
/// `Update` carries `prior`, a snapshot of the item as the device last saw
/// it before the edit. Callers leave it `None`; the store fills it in when
/// the mutation is applied. The resolver compares the competing remote copy
/// against `prior` to tell "the other writer changed this field" apart from
/// "the other writer left it alone".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationPayload {
    Create {
        name: String,
        quantity: f64,
        unit: String,
        category: String,
        expires_at: Option<DateTime<Utc>>,
    },
    Update {
        patch: ItemPatch,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prior: Option<Box<PantryItem>>,
    },
    Delete,
    QuantityDelta {
        delta: f64,
    },
}

impl MutationPayload {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationPayload::Create { .. } => MutationKind::Create,
            MutationPayload::Update { .. } => MutationKind::Update,
            MutationPayload::Delete => MutationKind::Delete,
            MutationPayload::QuantityDelta { .. } => MutationKind::QuantityDelta,
        }
    }
}

/// Discriminant of a [`MutationPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    QuantityDelta,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
            MutationKind::QuantityDelta => "quantity-delta",
        };
        write!(f, "{}", name)
    }
}

/// An inbound mutation request, as produced by the manual-entry, barcode or
/// voice collaborators after normalization.
///
/// `item_id` is `None` only for `Create`, in which case the store assigns
/// a fresh id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation {
    pub household_id: String,
    pub item_id: Option<Uuid>,
    pub payload: MutationPayload,
}

impl Mutation {
    /// Convenience constructor for a create request.
    pub fn create(
        household_id: impl Into<String>,
        name: impl Into<String>,
        quantity: f64,
        unit: impl Into<String>,
        category: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            household_id: household_id.into(),
            item_id: None,
            payload: MutationPayload::Create {
                name: name.into(),
                quantity,
                unit: unit.into(),
                category: category.into(),
                expires_at,
            },
        }
    }

    /// Convenience constructor for a field edit.
    pub fn update(household_id: impl Into<String>, item_id: Uuid, patch: ItemPatch) -> Self {
        Self {
            household_id: household_id.into(),
            item_id: Some(item_id),
            payload: MutationPayload::Update { patch, prior: None },
        }
    }

    /// Convenience constructor for a quantity adjustment.
    pub fn quantity_delta(household_id: impl Into<String>, item_id: Uuid, delta: f64) -> Self {
        Self {
            household_id: household_id.into(),
            item_id: Some(item_id),
            payload: MutationPayload::QuantityDelta { delta },
        }
    }

    /// Convenience constructor for a delete request.
    pub fn delete(household_id: impl Into<String>, item_id: Uuid) -> Self {
        Self {
            household_id: household_id.into(),
            item_id: Some(item_id),
            payload: MutationPayload::Delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_item() -> PantryItem {
        PantryItem {
            id: Uuid::new_v4(),
            household_id: "hh-1".to_string(),
            name: "Eggs".to_string(),
            quantity: 12.0,
            unit: "pcs".to_string(),
            category: "fridge".to_string(),
            expires_at: None,
            version: 3,
            last_writer_id: "erin".to_string(),
            last_writer_device: "phone".to_string(),
            last_write_at: 9,
            deleted_at: None,
        }
    }

    #[test]
    fn test_empty_patch() {
        assert!(ItemPatch::default().is_empty());
        let patch = ItemPatch {
            category: Some("pantry".to_string()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_patch_apply() {
        let mut item = base_item();
        let patch = ItemPatch {
            name: Some("Organic eggs".to_string()),
            quantity: Some(6.0),
            ..Default::default()
        };
        patch.apply_to(&mut item);
        assert_eq!(item.name, "Organic eggs");
        assert_eq!(item.quantity, 6.0);
        assert_eq!(item.unit, "pcs");
    }

    #[test]
    fn test_patch_clear_expiration() {
        let mut item = base_item();
        item.expires_at = Some(Utc::now());
        let patch = ItemPatch {
            clear_expiration: true,
            ..Default::default()
        };
        assert!(patch.touches_expiration());
        patch.apply_to(&mut item);
        assert!(item.expires_at.is_none());
    }

    #[test]
    fn test_diff_touches_only_changed_fields() {
        let from = base_item();
        let mut to = from.clone();
        to.category = "pantry".to_string();
        to.expires_at = Some(Utc::now());

        let patch = ItemPatch::diff(&from, &to);
        assert!(patch.name.is_none());
        assert!(patch.quantity.is_none());
        assert_eq!(patch.category.as_deref(), Some("pantry"));
        assert_eq!(patch.expires_at, to.expires_at);

        let mut rebuilt = from.clone();
        patch.apply_to(&mut rebuilt);
        assert!(rebuilt.same_content(&to));
    }

    #[test]
    fn test_diff_clears_expiration() {
        let mut from = base_item();
        from.expires_at = Some(Utc::now());
        let mut to = from.clone();
        to.expires_at = None;

        let patch = ItemPatch::diff(&from, &to);
        assert!(patch.clear_expiration);
        assert!(patch.expires_at.is_none());
    }

    #[test]
    fn test_payload_kind_tag_roundtrip() {
        let payload = MutationPayload::QuantityDelta { delta: -1.5 };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"kind\":\"quantity_delta\""));
        let parsed: MutationPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_delete_payload_roundtrip() {
        let payload = MutationPayload::Delete;
        let json = serde_json::to_string(&payload).unwrap();
        let parsed: MutationPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, payload);
    }
}
