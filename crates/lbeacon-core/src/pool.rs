//! Push slot table and dispatch.
//!
//! The pool has a fixed number of slots, `slots_per_adapter` per push
//! adapter, laid out as a flat array: slot `i` belongs to adapter
//! `i / slots_per_adapter`. A slot is Busy while a push worker holds its
//! [`SlotLease`]; dropping the lease makes it Idle again.
//!
//! [`DispatchPool::allocate`] is the only way in. It runs the in-flight
//! check, the dedup admission and the slot claim under the slot-table lock,
//! so two concurrent detections of the same device can never both be
//! admitted and two admissions can never claim the same slot.
//!
//! Lock order: slot table, then dedup cache. The janitor only ever takes the
//! dedup cache.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::PushConfig;
use crate::dedup::{self, SharedDedupCache};
use crate::hardware::PushTransport;
use crate::types::{AdapterId, DeviceIdentity};
use crate::worker::{PushFile, PushOutcome, PushWorker};

/// Whether a slot is carrying a push, and for whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    /// Free for the next admitted device.
    Idle,
    /// Carrying a push to this device.
    Busy(DeviceIdentity),
}

/// One unit of push capacity.
#[derive(Debug, Clone)]
pub struct Slot {
    index: usize,
    adapter: AdapterId,
    status: SlotStatus,
}

impl Slot {
    /// Position in the table.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Adapter this slot pushes through.
    #[must_use]
    pub const fn adapter(&self) -> AdapterId {
        self.adapter
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> &SlotStatus {
        &self.status
    }
}

/// The fixed array of push slots.
#[derive(Debug, Clone)]
pub struct SlotTable {
    slots: Vec<Slot>,
}

/// Handle shared between the pool and the leases it hands out.
pub type SharedSlotTable = Arc<Mutex<SlotTable>>;

impl SlotTable {
    /// Create `adapters * slots_per_adapter` idle slots.
    #[must_use]
    pub fn new(adapters: usize, slots_per_adapter: usize) -> Self {
        let slots = (0..adapters * slots_per_adapter)
            .map(|index| Slot {
                index,
                adapter: AdapterId(index / slots_per_adapter),
                status: SlotStatus::Idle,
            })
            .collect();
        Self { slots }
    }

    /// Wrap the table for sharing across tasks.
    #[must_use]
    pub fn shared(self) -> SharedSlotTable {
        Arc::new(Mutex::new(self))
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots carrying a push.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.status, SlotStatus::Busy(_)))
            .count()
    }

    /// Look at one slot.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Whether some Busy slot is pushing to `id`.
    #[must_use]
    pub fn holds(&self, id: &DeviceIdentity) -> bool {
        self.slots
            .iter()
            .any(|slot| matches!(&slot.status, SlotStatus::Busy(held) if held == id))
    }

    /// Mark the first Idle slot Busy for `id` and return its index.
    pub fn claim(&mut self, id: &DeviceIdentity) -> Option<usize> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.status == SlotStatus::Idle)?;
        slot.status = SlotStatus::Busy(id.clone());
        Some(slot.index)
    }

    /// Return slot `index` to Idle if it is still Busy for `id`.
    ///
    /// Returns `false` and leaves the slot alone when it is Idle or carrying
    /// a push to another device.
    pub fn release(&mut self, index: usize, id: &DeviceIdentity) -> bool {
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        if !matches!(&slot.status, SlotStatus::Busy(held) if held == id) {
            warn!(slot = index, device = %id, status = ?slot.status, "Release of slot not held");
            return false;
        }
        slot.status = SlotStatus::Idle;
        trace!(slot = index, device = %id, "Slot released");
        true
    }

    /// Claim a slot for `id` and wrap it in a lease that releases on drop.
    ///
    /// Does not consult the dedup cache; [`DispatchPool::allocate`] does.
    #[must_use]
    pub(crate) fn claim_lease(table: &SharedSlotTable, id: &DeviceIdentity) -> Option<SlotLease> {
        let mut guard = lock(table);
        if guard.holds(id) {
            return None;
        }
        guard.lease(table, id)
    }

    /// Claim the first Idle slot for `id` through an already held lock.
    fn lease(&mut self, table: &SharedSlotTable, id: &DeviceIdentity) -> Option<SlotLease> {
        let index = self.claim(id)?;
        Some(SlotLease {
            table: Arc::clone(table),
            index,
            adapter: self.slots[index].adapter,
            identity: id.clone(),
        })
    }
}

/// Lock a shared slot table, recovering the data if a holder panicked.
pub(crate) fn lock(table: &Mutex<SlotTable>) -> MutexGuard<'_, SlotTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ownership of one Busy slot. The slot goes back to Idle when this drops.
#[derive(Debug)]
pub struct SlotLease {
    table: SharedSlotTable,
    index: usize,
    adapter: AdapterId,
    identity: DeviceIdentity,
}

impl SlotLease {
    /// Slot index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Adapter assigned to the slot.
    #[must_use]
    pub const fn adapter(&self) -> AdapterId {
        self.adapter
    }

    /// Device being served.
    #[must_use]
    pub const fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        lock(&self.table).release(self.index, &self.identity);
    }
}

/// A push that has been admitted and spawned.
#[derive(Debug)]
pub struct SlotHandle {
    /// Slot carrying the push.
    pub index: usize,
    /// Adapter pushing.
    pub adapter: AdapterId,
    /// Device being served.
    pub identity: DeviceIdentity,
    task: JoinHandle<PushOutcome>,
}

impl SlotHandle {
    /// Wait for the push worker to finish.
    ///
    /// Returns `None` if the worker panicked (its slot is released anyway).
    pub async fn join(self) -> Option<PushOutcome> {
        self.task.await.ok()
    }
}

/// Admits detected devices and hands them to push workers.
pub struct DispatchPool<T: PushTransport> {
    slots: SharedSlotTable,
    dedup: SharedDedupCache,
    transport: Arc<T>,
    file: Arc<PushFile>,
}

impl<T: PushTransport> DispatchPool<T> {
    /// Create a pool with all slots Idle.
    #[must_use]
    pub fn new(config: &PushConfig, dedup: SharedDedupCache, transport: Arc<T>) -> Self {
        Self {
            slots: SlotTable::new(config.adapters.len(), config.slots_per_adapter).shared(),
            dedup,
            transport,
            file: Arc::new(config.file()),
        }
    }

    /// Admit `id` and start pushing to it.
    ///
    /// Returns `None` when the device is already being served, was served
    /// within the dedup window, the dedup cache is full, or every slot is
    /// Busy. None of these are errors.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn allocate(&self, id: &DeviceIdentity) -> Option<SlotHandle> {
        let lease = {
            let mut slots = lock(&self.slots);
            if slots.holds(id) {
                trace!(device = %id, "Push already in flight");
                return None;
            }

            if !dedup::lock(&self.dedup).try_track(id, Instant::now()) {
                trace!(device = %id, "Recently served or dedup cache full");
                return None;
            }

            let Some(lease) = slots.lease(&self.slots, id) else {
                debug!(device = %id, "All push slots busy");
                return None;
            };
            lease
        };

        let (index, adapter) = (lease.index, lease.adapter);
        debug!(slot = index, %adapter, device = %id, "Dispatching push");
        let worker = PushWorker::new(lease, Arc::clone(&self.transport), Arc::clone(&self.file));
        let task = tokio::spawn(worker.run());

        Some(SlotHandle {
            index,
            adapter,
            identity: id.clone(),
            task,
        })
    }

    /// Number of slots carrying a push.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        lock(&self.slots).busy_count()
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        lock(&self.slots).capacity()
    }

    /// Whether a push to `id` is in flight.
    #[must_use]
    pub fn is_in_flight(&self, id: &DeviceIdentity) -> bool {
        lock(&self.slots).holds(id)
    }

    /// The dedup cache this pool admits through.
    #[must_use]
    pub fn dedup(&self) -> SharedDedupCache {
        Arc::clone(&self.dedup)
    }
}
