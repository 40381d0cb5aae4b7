//! Stateless freshness classification.
//!
//! Purely derived from item attributes; consumed by display and
//! notification collaborators. No state is kept here.

use chrono::{DateTime, Duration, Utc};

use crate::model::PantryItem;

/// Freshness classification of an item at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The item has no tracked expiration.
    NotTracked,
    Fresh,
    ExpiringSoon,
    Expired,
}

/// True if the item has a tracked expiration that lies in the past.
pub fn is_expired(item: &PantryItem, now: DateTime<Utc>) -> bool {
    match item.expires_at {
        Some(expires) => now > expires,
        None => false,
    }
}

/// True if the item expires within `window` from `now` but has not
/// expired yet.
pub fn is_expiring_soon(item: &PantryItem, now: DateTime<Utc>, window: Duration) -> bool {
    match item.expires_at {
        Some(expires) => !is_expired(item, now) && expires - now <= window,
        None => false,
    }
}

/// Classifies an item for display.
pub fn freshness(item: &PantryItem, now: DateTime<Utc>, window: Duration) -> Freshness {
    if item.expires_at.is_none() {
        Freshness::NotTracked
    } else if is_expired(item, now) {
        Freshness::Expired
    } else if is_expiring_soon(item, now, window) {
        Freshness::ExpiringSoon
    } else {
        Freshness::Fresh
    }
}
