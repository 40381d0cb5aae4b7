//! Pantry Sync Core Library
//!
//! Offline-first synchronization and conflict resolution for household
//! pantry inventory. Mutations apply locally while disconnected, a
//! journal records what each device still owes the shared authority, and
//! a deterministic resolver merges concurrent edits so every device in a
//! household converges to the same state.

pub mod clock;
pub mod device;
pub mod events;
pub mod expiration;
pub mod journal;
pub mod model;
pub mod resolver;
pub mod storage;
pub mod store;
pub mod sync;

pub use clock::LamportClock;
pub use device::{DeviceError, PantryDevice, SyncHealth};
pub use events::{ChangeEvent, ChangeFeed, ChangeOrigin};
pub use expiration::{freshness, is_expired, is_expiring_soon, Freshness};
pub use journal::{MutationJournal, MutationRecord};
pub use model::{ItemPatch, Mutation, MutationKind, MutationPayload, PantryItem};
pub use resolver::resolve;
pub use storage::{DeviceSnapshot, FileStorage, HouseholdSnapshot, StorageError};
pub use store::{ItemStore, Rejected, Writer};
pub use sync::{
    check_server, Authority, AuthoritySnapshot, HttpAuthority, MemoryAuthority, PullRequest,
    PullResponse, Reconciler, SubmitResponse, SyncError, SyncReport,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
