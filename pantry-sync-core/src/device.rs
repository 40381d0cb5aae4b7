//! Per-device engine.
//!
//! Composes the item store, the mutation journal, the logical clock and
//! durable storage behind one state lock, and exposes the change feed.
//! The lock guarantees that a local write and a reconciliation write to
//! the same item never interleave; the reconciler additionally serializes
//! whole sync cycles through [`sync_gate`].
//!
//! [`sync_gate`]: PantryDevice::sync_gate

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::LamportClock;
use crate::events::{ChangeEvent, ChangeFeed, ChangeOrigin};
use crate::journal::MutationJournal;
use crate::model::{Mutation, PantryItem};
use crate::storage::{DeviceSnapshot, FileStorage, HouseholdSnapshot, StorageError};
use crate::store::{ItemStore, Rejected, Writer};

/// Consecutive failed sync cycles after which the device reports degraded
/// sync health.
const DEGRADED_AFTER: u32 = 3;

/// Sync health as seen by callers. Local operation is unaffected either
/// way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncHealth {
    Healthy,
    Degraded { consecutive_failures: u32 },
}

/// Errors surfaced by device operations.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    Rejected(#[from] Rejected),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub(crate) struct DeviceState {
    pub store: ItemStore,
    pub journal: MutationJournal,
    pub checkpoints: HashMap<String, u64>,
    pub clock: LamportClock,
}

/// One device's view of its households.
pub struct PantryDevice {
    device_id: String,
    user_id: String,
    state: Mutex<DeviceState>,
    feed: ChangeFeed,
    sync_gate: tokio::sync::Mutex<()>,
    storage: Option<FileStorage>,
    sync_failures: AtomicU32,
}

impl PantryDevice {
    /// Creates an ephemeral device with no durable storage. Used by tests
    /// and embedders that persist elsewhere.
    pub fn new(device_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
            state: Mutex::new(DeviceState {
                store: ItemStore::new(),
                journal: MutationJournal::new(),
                checkpoints: HashMap::new(),
                clock: LamportClock::new(),
            }),
            feed: ChangeFeed::default(),
            sync_gate: tokio::sync::Mutex::new(()),
            storage: None,
            sync_failures: AtomicU32::new(0),
        }
    }

    /// Opens a durable device, restoring any snapshot found in storage.
    ///
    /// On first run the given identity is used and persisted; afterwards
    /// the persisted identity wins, so a device never changes ids across
    /// restarts.
    pub fn open(
        storage: FileStorage,
        device_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let snapshot = storage.load()?;
        let mut device = match snapshot {
            Some(snapshot) => {
                let mut store = ItemStore::new();
                let mut checkpoints = HashMap::new();
                for household in snapshot.households {
                    if let Some(checkpoint) = household.checkpoint {
                        checkpoints.insert(household.household_id.clone(), checkpoint);
                    }
                    store.restore(household.household_id, household.items);
                }
                Self {
                    device_id: snapshot.device_id,
                    user_id: snapshot.user_id,
                    state: Mutex::new(DeviceState {
                        store,
                        journal: snapshot.journal,
                        checkpoints,
                        clock: LamportClock::at(snapshot.clock),
                    }),
                    feed: ChangeFeed::default(),
                    sync_gate: tokio::sync::Mutex::new(()),
                    storage: None,
                    sync_failures: AtomicU32::new(0),
                }
            }
            None => Self::new(device_id, user_id),
        };
        device.storage = Some(storage);
        device.persist()?;
        Ok(device)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Registers a household on this device and persists the registration.
    pub fn register_household(&self, household_id: &str) -> Result<(), DeviceError> {
        self.state.lock().store.register_household(household_id);
        self.persist()?;
        Ok(())
    }

    pub fn is_registered(&self, household_id: &str) -> bool {
        self.state.lock().store.is_registered(household_id)
    }

    /// Registered households, sorted.
    pub fn households(&self) -> Vec<String> {
        self.state.lock().store.households()
    }

    /// Applies a mutation optimistically, journals it, persists the device
    /// and notifies subscribers.
    pub fn apply(&self, mutation: Mutation) -> Result<PantryItem, DeviceError> {
        let household_id = mutation.household_id.clone();
        let item = {
            let mut state = self.state.lock();
            let produced_at = state.clock.tick();
            let DeviceState { store, journal, .. } = &mut *state;
            store.apply(
                journal,
                mutation,
                Writer {
                    device_id: &self.device_id,
                    user_id: &self.user_id,
                },
                produced_at,
            )?
        };
        self.persist()?;
        self.feed.publish(ChangeEvent {
            household_id,
            item: item.clone(),
            origin: ChangeOrigin::Local,
        });
        Ok(item)
    }

    /// Item by id, tombstones included.
    pub fn get(&self, household_id: &str, item_id: Uuid) -> Option<PantryItem> {
        self.state.lock().store.get(household_id, item_id).cloned()
    }

    /// Live items of a household, sorted by name.
    pub fn list(&self, household_id: &str) -> Vec<PantryItem> {
        self.state.lock().store.list(household_id)
    }

    /// All items of a household including tombstones.
    pub fn list_all(&self, household_id: &str) -> Vec<PantryItem> {
        self.state.lock().store.list_all(household_id)
    }

    /// Number of journalled operations not yet acknowledged by the
    /// authority.
    pub fn pending_ops(&self, household_id: &str) -> usize {
        self.state.lock().journal.pending(household_id).len()
    }

    /// Last confirmed sync cursor for a household.
    pub fn checkpoint(&self, household_id: &str) -> Option<u64> {
        self.state.lock().checkpoints.get(household_id).copied()
    }

    /// Subscribes to the change feed.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Current sync health.
    pub fn sync_health(&self) -> SyncHealth {
        let failures = self.sync_failures.load(Ordering::Relaxed);
        if failures >= DEGRADED_AFTER {
            SyncHealth::Degraded {
                consecutive_failures: failures,
            }
        } else {
            SyncHealth::Healthy
        }
    }

    /// Writes the device snapshot to durable storage, if any is attached.
    pub fn persist(&self) -> Result<(), StorageError> {
        let Some(ref storage) = self.storage else {
            return Ok(());
        };
        let snapshot = {
            let state = self.state.lock();
            DeviceSnapshot {
                device_id: self.device_id.clone(),
                user_id: self.user_id.clone(),
                clock: state.clock.current(),
                journal: state.journal.clone(),
                households: state
                    .store
                    .households()
                    .into_iter()
                    .map(|household_id| HouseholdSnapshot {
                        items: state.store.snapshot(&household_id),
                        checkpoint: state.checkpoints.get(&household_id).copied(),
                        household_id,
                    })
                    .collect(),
            }
        };
        storage.save(&snapshot)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock()
    }

    pub(crate) fn sync_gate(&self) -> &tokio::sync::Mutex<()> {
        &self.sync_gate
    }

    pub(crate) fn emit(&self, event: ChangeEvent) {
        self.feed.publish(event);
    }

    pub(crate) fn mark_sync_ok(&self) {
        self.sync_failures.store(0, Ordering::Relaxed);
    }

    pub(crate) fn mark_sync_failed(&self) {
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
    }
}
