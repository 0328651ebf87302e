//! # Cursors
//!
//! Iteration follows the sibling-linked leaf list from the leftmost leaf,
//! sweeping each leaf's buckets and the chains within them. Every cursor
//! step runs inside the caller's transaction, so the cursor API is a
//! `next(&mut Tx)` method rather than the `Iterator` trait.
//!
//! ## Robustness Under Concurrent Change
//!
//! Cursors hold the materialized state of their current leaf, not a live
//! reference. Mutations behind the cursor, or in leaves it has not yet
//! reached, never make a step panic:
//!
//! - A split of an upcoming leaf leaves the cursor's cached sibling
//!   handle pointing at a node that is now internal; the cursor descends
//!   it to its leftmost leaf and keeps going.
//! - A merge can destroy a leaf the cursor's cached handle points at; a
//!   handle that no longer resolves ends the iteration cleanly.
//!
//! - A remove behind the cursor destroys boxes the cached leaf still
//!   references; an entry whose key or value no longer resolves is
//!   skipped, exactly as if the cursor had already passed it.
//!
//! The only ordering guarantee is that all entries of one leaf are
//! produced before any entry of the next; entries mutated after the
//! cursor passed them may or may not be visible.

use eyre::Result;
use std::marker::PhantomData;

use crate::error::Error;
use crate::hash::KeyHash;
use crate::store::{Ref, Storable, Tx};

use super::node::{Entry, Node};

/// Whether the error is a dangling handle left behind by a concurrent
/// structural change.
fn vanished(report: &eyre::Report) -> bool {
    matches!(
        report.downcast_ref::<Error>(),
        Some(Error::ObjectNotFound(_))
    )
}

/// Cursor over the bindings of a map.
pub struct Entries<K, V> {
    /// Materialized current leaf; `None` once exhausted.
    leaf: Option<Node>,
    bucket: usize,
    chain: usize,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Entries<K, V>
where
    K: Storable + KeyHash + PartialEq,
    V: Storable,
{
    /// Positions a cursor at the leftmost leaf under `root`.
    pub(crate) fn at_leftmost(tx: &mut Tx<'_>, root: Ref) -> Result<Self> {
        let mut node: Node = tx.get(root)?;
        while !node.is_leaf() {
            let (left, _) = node.children();
            node = tx.get(left)?;
        }
        Ok(Entries {
            leaf: Some(node),
            bucket: 0,
            chain: 0,
            _marker: PhantomData,
        })
    }

    /// Produces the next binding, or `None` when the map is exhausted.
    pub fn next(&mut self, tx: &mut Tx<'_>) -> Result<Option<(K, V)>> {
        loop {
            let Some(entry) = self.next_entry(tx)? else {
                return Ok(None);
            };
            let key = match entry.load_key(tx) {
                Ok(key) => key,
                Err(report) if vanished(&report) => continue,
                Err(report) => return Err(report),
            };
            match entry.load_value(tx) {
                Ok(value) => return Ok(Some((key, value))),
                Err(report) if vanished(&report) => continue,
                Err(report) => return Err(report),
            }
        }
    }

    /// Removal through a cursor is not provided.
    pub fn remove(&mut self) -> Result<()> {
        Err(Error::UnsupportedOperation("cursor removal").into())
    }

    /// Advances to the next live entry record.
    pub(crate) fn next_entry(&mut self, tx: &mut Tx<'_>) -> Result<Option<Entry>> {
        loop {
            let next_leaf = {
                let Some(leaf) = self.leaf.as_ref() else {
                    return Ok(None);
                };
                let buckets = leaf.buckets();
                while self.bucket < buckets.len() {
                    let bucket = &buckets[self.bucket];
                    if self.chain < bucket.len() {
                        let entry = bucket[self.chain].clone();
                        self.chain += 1;
                        return Ok(Some(entry));
                    }
                    self.bucket += 1;
                    self.chain = 0;
                }
                leaf.right_sibling
            };

            let Some(next_ref) = next_leaf else {
                self.leaf = None;
                return Ok(None);
            };
            self.leaf = self.fetch_leaf(tx, next_ref)?;
            if self.leaf.is_none() {
                return Ok(None);
            }
            self.bucket = 0;
            self.chain = 0;
        }
    }

    /// Resolves a sibling handle to the leaf it now leads to, descending
    /// through any node that split since the handle was cached. `None`
    /// when the handle no longer resolves.
    fn fetch_leaf(&self, tx: &mut Tx<'_>, handle: Ref) -> Result<Option<Node>> {
        let mut next_ref = handle;
        loop {
            let node = match tx.get::<Node>(next_ref) {
                Ok(node) => node,
                Err(report) if vanished(&report) => return Ok(None),
                Err(report) => return Err(report),
            };
            if node.is_leaf() {
                return Ok(Some(node));
            }
            let (left, _) = node.children();
            next_ref = left;
        }
    }
}

/// Cursor over the keys of a map.
pub struct Keys<K, V> {
    inner: Entries<K, V>,
}

impl<K, V> Keys<K, V>
where
    K: Storable + KeyHash + PartialEq,
    V: Storable,
{
    pub(crate) fn new(inner: Entries<K, V>) -> Self {
        Keys { inner }
    }

    pub fn next(&mut self, tx: &mut Tx<'_>) -> Result<Option<K>> {
        loop {
            let Some(entry) = self.inner.next_entry(tx)? else {
                return Ok(None);
            };
            match entry.load_key(tx) {
                Ok(key) => return Ok(Some(key)),
                Err(report) if vanished(&report) => continue,
                Err(report) => return Err(report),
            }
        }
    }
}

/// Cursor over the values of a map.
pub struct Values<K, V> {
    inner: Entries<K, V>,
}

impl<K, V> Values<K, V>
where
    K: Storable + KeyHash + PartialEq,
    V: Storable,
{
    pub(crate) fn new(inner: Entries<K, V>) -> Self {
        Values { inner }
    }

    pub fn next(&mut self, tx: &mut Tx<'_>) -> Result<Option<V>> {
        loop {
            let Some(entry) = self.inner.next_entry(tx)? else {
                return Ok(None);
            };
            match entry.load_value(tx) {
                Ok(value) => return Ok(Some(value)),
                Err(report) if vanished(&report) => continue,
                Err(report) => return Err(report),
            }
        }
    }
}
