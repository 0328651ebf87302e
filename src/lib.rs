//! # prefixmap - Concurrent Map over a Transactional Object Store
//!
//! prefixmap implements a distributed, concurrent key-value map whose
//! internal nodes are independent objects in a transactional object store.
//! It behaves like an in-memory associative map while persisting every node
//! through durable handles, and it dynamically splits and merges its storage
//! nodes so that writers touching different parts of the key space commit in
//! parallel without conflicting.
//!
//! ## Quick Start
//!
//! ```ignore
//! use prefixmap::{MemStore, PrefixHashMap};
//!
//! let store = MemStore::new();
//! let mut tx = store.begin();
//! let map: PrefixHashMap<u32, String> = PrefixHashMap::new(&mut tx)?;
//! map.put(&mut tx, 1, "one".to_string())?;
//! assert_eq!(map.get(&mut tx, &1)?, Some("one".to_string()));
//! tx.commit()?;
//! ```
//!
//! ## Architecture
//!
//! The map is a binary prefix trie whose leaves are fixed-capacity
//! hash-bucket tables. Internal nodes hold no entries; leaves hold all the
//! data. Each node is an independently stored object:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Public API (PrefixHashMap)        │
//! ├─────────────────────────────────────┤
//! │   Trie Router │ Split/Merge Engine  │
//! ├─────────────────────────────────────┤
//! │   Nodes, Entries, Boxing            │
//! ├─────────────────────────────────────┤
//! │   Transactions (Tx)                 │
//! ├─────────────────────────────────────┤
//! │   Object Store (MemStore)           │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Locality of Change
//!
//! A typical mutation dirties exactly one leaf. Reads dirty nothing. A
//! split dirties the splitting leaf, its two new children and up to two
//! neighboring leaves; a merge dirties the parent and up to two neighbors
//! and destroys the two children. Because the store detects conflicts at
//! object granularity, transactions that touch disjoint leaves commit
//! concurrently - that is the entire point of the design.
//!
//! ## Concurrency Model
//!
//! All concurrency control is delegated to the store. Every map operation
//! runs inside a caller-supplied transaction ([`store::Tx`]); commits are
//! validated optimistically and the first committer wins. A losing
//! transaction surfaces [`Error::TransactionConflict`] and can simply be
//! retried - map operations are read-modify-write over a handful of
//! objects and are idempotent under retry.
//!
//! ## Module Overview
//!
//! - [`store`]: durable handles, the `Storable` contract, transactions and
//!   the in-memory object store
//! - [`map`]: the prefix-tree hash map, its nodes and cursors
//! - [`hash`]: stable key hashing and the bit-mixing function
//! - [`config`]: construction options and derived thresholds
//! - [`error`]: typed error kinds surfaced through `eyre`

pub mod config;
pub mod error;
pub mod hash;
pub mod map;
pub mod store;

pub use config::{MapConfig, MergeRule};
pub use error::Error;
pub use hash::KeyHash;
pub use map::{Entries, Keys, MapStats, PrefixHashMap, Values};
pub use store::{MemStore, Ref, Storable, Stored, Tx};
