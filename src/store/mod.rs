//! # Object Store
//!
//! This module provides the storage substrate the map lives on: durable
//! handles, the contract for storable values, and an in-memory object
//! store with optimistic transactional concurrency.
//!
//! ## Handles
//!
//! A [`Ref`] is a durable identifier for one stored object. Handles are
//! plain 64-bit ids: they compare, hash, serialize as fields of other
//! stored objects, and stay valid across transactions and process
//! restarts. Parent, child and sibling pointers in the map's node graph
//! are cyclic; expressing them as handles rather than owning references is
//! what breaks the cycle.
//!
//! ## Transactions
//!
//! Every store access happens inside a [`Tx`]. A transaction buffers its
//! writes locally and records the version of every object it reads; at
//! commit the versions are re-validated under the store lock and the
//! write set is installed atomically. If any object read by the
//! transaction was overwritten in the meantime, commit fails with
//! [`Error::TransactionConflict`](crate::Error::TransactionConflict) and
//! installs nothing - first committer wins.
//!
//! Conflict detection is per object. Two transactions that write disjoint
//! objects - for the map, disjoint leaves - commit concurrently.
//!
//! ## Managed Objects and Boxing
//!
//! A value placed in the map is either a *store citizen* (it already lives
//! in the store under its own handle, and the map only records that
//! handle) or plain data, which the map wraps in a *box*: a store object
//! the map allocates, reuses on overwrite, and destroys on removal. The
//! [`Storable`] trait carries the two hooks that drive this protocol and
//! [`Stored`] is a ready-made value type that mixes both kinds in one map.

mod handle;
mod memory;
mod value;

pub use handle::Ref;
pub use memory::{MemStore, Tx};
pub use value::{Storable, Stored};
