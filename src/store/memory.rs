//! # In-Memory Transactional Object Store
//!
//! `MemStore` keeps every object as versioned serialized bytes in a single
//! table. Objects are written and rehydrated through `bincode`, so every
//! commit exercises the same serialization path a disk- or network-backed
//! store would.
//!
//! ## Versioning
//!
//! Each slot carries a monotonically increasing version, bumped on every
//! committed write. A transaction records the version of each object the
//! first time it reads it; commit re-checks those versions under the store
//! lock. An object that was overwritten or removed since the transaction
//! read it fails validation and aborts the whole commit.
//!
//! ```text
//! tx A: get(#5 @v3) ... update(#5)          commit: #5 still v3 -> v4, ok
//! tx B: get(#5 @v3) ... update(#5)          commit: #5 now v4 -> conflict
//! ```
//!
//! ## Write Buffering
//!
//! Writes never touch the shared table before commit. `create_ref`
//! allocates a fresh id and buffers the bytes; `update` and
//! `remove_object` buffer over the id; `get` reads through the buffer
//! first so a transaction always sees its own writes. Dropping a
//! transaction without committing discards the buffer, which is all
//! rollback needs to do.
//!
//! ## Locking
//!
//! The object table sits behind one `parking_lot` mutex, taken briefly per
//! read and once for the whole of commit. Conflict granularity, not lock
//! granularity, is what the map's concurrency story rests on: validation
//! happens per object, so transactions over disjoint leaves never abort
//! each other.

use std::sync::atomic::{AtomicU64, Ordering};

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;

use super::handle::Ref;
use super::value::Storable;

struct Slot {
    version: u64,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct Table {
    objects: HashMap<u64, Slot>,
}

/// In-memory object store with optimistic transactional concurrency.
pub struct MemStore {
    table: Mutex<Table>,
    next_id: AtomicU64,
    allocations: AtomicU64,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            next_id: AtomicU64::new(1),
            allocations: AtomicU64::new(0),
        }
    }

    /// Starts a transaction.
    pub fn begin(&self) -> Tx<'_> {
        Tx {
            store: self,
            reads: HashMap::new(),
            writes: HashMap::new(),
        }
    }

    /// Number of live committed objects.
    pub fn object_count(&self) -> usize {
        self.table.lock().objects.len()
    }

    /// Total handles ever issued, committed or not. Monotonic; useful for
    /// observing whether an operation allocated.
    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One transaction against a [`MemStore`].
///
/// Buffered writes are only visible to this transaction until
/// [`commit`](Tx::commit) succeeds. Dropping the transaction discards
/// them.
pub struct Tx<'s> {
    store: &'s MemStore,
    /// Object id -> version observed at first read.
    reads: HashMap<u64, u64>,
    /// Object id -> buffered bytes; `None` marks removal.
    writes: HashMap<u64, Option<Vec<u8>>>,
}

impl<'s> Tx<'s> {
    /// Resolves a handle to the object state visible to this transaction.
    pub fn get<T: DeserializeOwned>(&mut self, handle: Ref) -> Result<T> {
        if let Some(buffered) = self.writes.get(&handle.id()) {
            return match buffered {
                Some(bytes) => Ok(bincode::deserialize(bytes).map_err(Error::Codec)?),
                None => Err(Error::ObjectNotFound(handle.id()).into()),
            };
        }
        let table = self.store.table.lock();
        match table.objects.get(&handle.id()) {
            Some(slot) => {
                self.reads.entry(handle.id()).or_insert(slot.version);
                Ok(bincode::deserialize(&slot.bytes).map_err(Error::Codec)?)
            }
            None => Err(Error::ObjectNotFound(handle.id()).into()),
        }
    }

    /// Registers a newly constructed object and returns its handle.
    pub fn create_ref<T: Serialize>(&mut self, obj: &T) -> Result<Ref> {
        let bytes = bincode::serialize(obj).map_err(Error::Codec)?;
        let id = self.store.next_id.fetch_add(1, Ordering::SeqCst);
        self.store.allocations.fetch_add(1, Ordering::Relaxed);
        self.writes.insert(id, Some(bytes));
        Ok(Ref::from_id(id))
    }

    /// Declares intent to write the object, pulling it into the conflict
    /// surface even if no [`update`](Tx::update) follows.
    pub fn mark_for_update(&mut self, handle: Ref) -> Result<()> {
        if self.writes.contains_key(&handle.id()) {
            return Ok(());
        }
        let table = self.store.table.lock();
        match table.objects.get(&handle.id()) {
            Some(slot) => {
                self.reads.entry(handle.id()).or_insert(slot.version);
                self.writes.insert(handle.id(), Some(slot.bytes.clone()));
                Ok(())
            }
            None => Err(Error::ObjectNotFound(handle.id()).into()),
        }
    }

    /// Writes a new state for an existing object.
    pub fn update<T: Serialize>(&mut self, handle: Ref, obj: &T) -> Result<()> {
        let bytes = bincode::serialize(obj).map_err(Error::Codec)?;
        if let Some(buffered) = self.writes.get_mut(&handle.id()) {
            if buffered.is_none() {
                return Err(Error::ObjectNotFound(handle.id()).into());
            }
            *buffered = Some(bytes);
            return Ok(());
        }
        let table = self.store.table.lock();
        match table.objects.get(&handle.id()) {
            Some(slot) => {
                self.reads.entry(handle.id()).or_insert(slot.version);
                drop(table);
                self.writes.insert(handle.id(), Some(bytes));
                Ok(())
            }
            None => Err(Error::ObjectNotFound(handle.id()).into()),
        }
    }

    /// Deletes the object from the store.
    pub fn remove_object(&mut self, handle: Ref) -> Result<()> {
        if let Some(buffered) = self.writes.get_mut(&handle.id()) {
            if buffered.is_none() {
                return Err(Error::ObjectNotFound(handle.id()).into());
            }
            *buffered = None;
            return Ok(());
        }
        let table = self.store.table.lock();
        match table.objects.get(&handle.id()) {
            Some(slot) => {
                self.reads.entry(handle.id()).or_insert(slot.version);
                drop(table);
                self.writes.insert(handle.id(), None);
                Ok(())
            }
            None => Err(Error::ObjectNotFound(handle.id()).into()),
        }
    }

    /// Whether the value is itself a direct store citizen.
    pub fn is_managed<T: Storable>(&self, obj: &T) -> bool {
        obj.managed_handle().is_some()
    }

    /// Validates every version this transaction read and installs the
    /// write buffer atomically. First committer wins; a conflicting
    /// transaction gets [`Error::TransactionConflict`] and installs
    /// nothing.
    pub fn commit(self) -> Result<()> {
        let mut table = self.store.table.lock();
        for (&id, &seen) in &self.reads {
            let current = table.objects.get(&id).map(|slot| slot.version);
            if current != Some(seen) {
                return Err(Error::TransactionConflict(id).into());
            }
        }
        for (id, buffered) in self.writes {
            match buffered {
                Some(bytes) => {
                    let slot = table.objects.entry(id).or_insert(Slot {
                        version: 0,
                        bytes: Vec::new(),
                    });
                    slot.version += 1;
                    slot.bytes = bytes;
                }
                None => {
                    table.objects.remove(&id);
                }
            }
        }
        Ok(())
    }

    /// Discards all buffered effects. Equivalent to dropping the
    /// transaction.
    pub fn rollback(self) {}
}
