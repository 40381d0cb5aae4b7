//! Wire types for the authority protocol.
//!
//! The submit body is a [`MutationRecord`] serialized as-is; the types
//! here cover the remaining request and response shapes. Encoding on the
//! HTTP surface is JSON.
//!
//! [`MutationRecord`]: crate::journal::MutationRecord

use serde::{Deserialize, Serialize};

use crate::model::PantryItem;

/// Body of a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// Last checkpoint this device confirmed, or `None` for a first sync.
    pub checkpoint: Option<u64>,
}

/// Authority state returned by a pull.
///
/// When the presented checkpoint is recognized this is a delta holding
/// only the items written after it. Otherwise (first sync, checkpoint
/// loss) it is a full snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    pub snapshot: bool,
    pub items: Vec<PantryItem>,
    /// New cursor to confirm once the cycle completes.
    pub checkpoint: u64,
}

/// Authority verdict on a submitted mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitResponse {
    /// The base version matched; `item` is the committed state with the
    /// authority-assigned version.
    Accepted { item: PantryItem },
    /// The base version was stale; `item` is the competing current state.
    /// Expected, not an error; resolved by the reconciler.
    Conflict { item: PantryItem },
    /// The mutation was structurally invalid.
    Rejected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_submit_response_tag_roundtrip() {
        let item = PantryItem {
            id: Uuid::new_v4(),
            household_id: "hh-1".to_string(),
            name: "Milk".to_string(),
            quantity: 1.0,
            unit: "l".to_string(),
            category: "dairy".to_string(),
            expires_at: None,
            version: 2,
            last_writer_id: "erin".to_string(),
            last_writer_device: "phone".to_string(),
            last_write_at: 3,
            deleted_at: None,
        };
        let response = SubmitResponse::Conflict { item };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"conflict\""));
        let parsed: SubmitResponse = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, SubmitResponse::Conflict { .. }));
    }

    #[test]
    fn test_pull_request_without_checkpoint() {
        let json = serde_json::to_string(&PullRequest { checkpoint: None }).unwrap();
        let parsed: PullRequest = serde_json::from_str(&json).unwrap();
        assert!(parsed.checkpoint.is_none());
    }
}
