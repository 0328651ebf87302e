//! # Prefix-Tree Hash Map
//!
//! `PrefixHashMap` is an associative map stored as a binary prefix trie
//! of hash-bucket leaves. The map value itself is only a handle to the
//! root node; all state lives in the store, and every operation runs in
//! a caller-supplied transaction.
//!
//! ## Routing
//!
//! A key's stable hash code is mixed once ([`crate::hash::mix`]) and the
//! router walks from the root consuming one high bit per level: a 1 bit
//! routes to the left child, a 0 bit to the right, shifting the hash one
//! bit left each step. Every leaf at depth `d` therefore owns exactly
//! the hash values whose top `d` bits spell the path from the root,
//! adjacent leaves own adjacent hash ranges, and the sibling list is a
//! total order over the key space.
//!
//! Inside a leaf the bucket index is `hash & (capacity - 1)`, over the
//! same mixed hash the router consumed.
//!
//! ## Cost Model
//!
//! `get`, `put`, `remove` and `contains_key` are O(depth) node reads
//! plus one bucket scan; depth is logarithmic in the number of leaves.
//! `len` walks every leaf and is O(n_leaves) with a correspondingly
//! large read footprint; `is_empty` is O(1). `contains_value` scans
//! everything.
//!
//! ## What Dirties What
//!
//! Reads dirty nothing. A `put` or `remove` without structural change
//! dirties exactly one leaf. Splits and merges additionally dirty the
//! new or destroyed children and up to two neighboring leaves. Writers
//! in disjoint leaves commit without conflict.

mod iter;
mod node;
mod reshape;

pub use iter::{Entries, Keys, Values};

use std::marker::PhantomData;

use eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{MapConfig, MAX_DEPTH};
use crate::hash::{bucket_index, mix, KeyHash};
use crate::store::{Ref, Storable, Tx};

use node::{Entry, Node, NodeState};

/// A concurrent map persisted as a prefix tree of hash-bucket leaves.
///
/// The struct is a thin handle: cloning it, or serializing it as a field
/// of another stored object, yields another view of the same map.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PrefixHashMap<K, V> {
    root: Ref,
    #[serde(skip)]
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for PrefixHashMap<K, V> {
    fn clone(&self) -> Self {
        PrefixHashMap {
            root: self.root,
            _marker: PhantomData,
        }
    }
}

impl<K, V> Copy for PrefixHashMap<K, V> {}

/// Shape of the leaf level, as reported by [`PrefixHashMap::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapStats {
    /// Total live entries.
    pub entries: usize,
    /// Entry count of each leaf, in left-to-right order.
    pub leaf_counts: Vec<usize>,
    /// Depth of the shallowest leaf.
    pub min_leaf_depth: u8,
    /// Depth of the deepest leaf.
    pub max_leaf_depth: u8,
}

impl MapStats {
    pub fn leaves(&self) -> usize {
        self.leaf_counts.len()
    }
}

impl<K, V> PrefixHashMap<K, V>
where
    K: Storable + KeyHash + PartialEq,
    V: Storable,
{
    /// Creates an empty map with default tuning.
    pub fn new(tx: &mut Tx<'_>) -> Result<Self> {
        Self::create(tx, MapConfig::default())
    }

    /// Creates an empty map, pre-split to the depth implied by
    /// `config.min_concurrency`.
    pub fn create(tx: &mut Tx<'_>, config: MapConfig) -> Result<Self> {
        config.validate()?;
        let root = Node::new_leaf(0, &config);
        let root_ref = tx.create_ref(&root)?;
        reshape::ensure_depth(tx, root_ref, config.min_depth())?;
        debug!(root = root_ref.id(), min_depth = config.min_depth(), "created map");
        Ok(PrefixHashMap {
            root: root_ref,
            _marker: PhantomData,
        })
    }

    /// Reattaches to an existing map by its root handle.
    pub fn open(root: Ref) -> Self {
        PrefixHashMap {
            root,
            _marker: PhantomData,
        }
    }

    /// Handle of the root node.
    pub fn root(&self) -> Ref {
        self.root
    }

    /// Returns the value bound to `key`, or `None` when the map contains
    /// no binding for it.
    pub fn get(&self, tx: &mut Tx<'_>, key: &K) -> Result<Option<V>> {
        let hash = mix(key.key_hash());
        let (_, leaf) = self.lookup(tx, hash)?;
        match self.find_entry(tx, &leaf, hash, key)? {
            Some(index) => {
                let bucket = &leaf.buckets()[bucket_index(hash, leaf.config.leaf_capacity)];
                Ok(Some(bucket[index].load_value(tx)?))
            }
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, tx: &mut Tx<'_>, key: &K) -> Result<bool> {
        let hash = mix(key.key_hash());
        let (_, leaf) = self.lookup(tx, hash)?;
        Ok(self.find_entry(tx, &leaf, hash, key)?.is_some())
    }

    /// Binds `key` to `value`. Returns the previously bound value, or
    /// `None` when the key was not mapped.
    pub fn put(&self, tx: &mut Tx<'_>, key: K, value: V) -> Result<Option<V>> {
        let hash = mix(key.key_hash());
        let (leaf_ref, mut leaf) = self.lookup(tx, hash)?;
        tx.mark_for_update(leaf_ref)?;

        if let Some(index) = self.find_entry(tx, &leaf, hash, &key)? {
            let bucket_at = bucket_index(hash, leaf.config.leaf_capacity);
            let previous = leaf.buckets_mut()[bucket_at][index].set_value(tx, &value)?;
            tx.update(leaf_ref, &leaf)?;
            return Ok(Some(previous));
        }

        let entry = Entry::bind(tx, hash, &key, &value)?;
        leaf.chain_entry(entry);
        let should_split = leaf.count > leaf.split_threshold && leaf.depth < MAX_DEPTH;
        tx.update(leaf_ref, &leaf)?;
        if should_split {
            reshape::split(tx, leaf_ref)?;
        }
        Ok(None)
    }

    /// Removes the binding for `key`, returning the value it carried.
    pub fn remove(&self, tx: &mut Tx<'_>, key: &K) -> Result<Option<V>> {
        let hash = mix(key.key_hash());
        let (leaf_ref, mut leaf) = self.lookup(tx, hash)?;

        let Some(index) = self.find_entry(tx, &leaf, hash, key)? else {
            return Ok(None);
        };
        tx.mark_for_update(leaf_ref)?;

        let bucket_at = bucket_index(hash, leaf.config.leaf_capacity);
        let entry = leaf.buckets_mut()[bucket_at].remove(index);
        let previous = entry.load_value(tx)?;
        entry.unmanage(tx)?;
        leaf.count -= 1;

        let wants_merge = leaf.count < leaf.merge_threshold && leaf.depth > leaf.min_depth;
        let parent = leaf.parent;
        tx.update(leaf_ref, &leaf)?;
        if wants_merge {
            if let Some(parent_ref) = parent {
                reshape::merge(tx, parent_ref)?;
            }
        }
        Ok(Some(previous))
    }

    /// Copies every binding from the iterator into this map, replacing
    /// existing bindings for keys that occur on both sides.
    pub fn put_all<I>(&self, tx: &mut Tx<'_>, bindings: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in bindings {
            self.put(tx, key, value)?;
        }
        Ok(())
    }

    /// Copies every binding of `other` into this map.
    pub fn put_all_from(&self, tx: &mut Tx<'_>, other: &PrefixHashMap<K, V>) -> Result<()> {
        let mut entries = other.entries(tx)?;
        while let Some((key, value)) = entries.next(tx)? {
            self.put(tx, key, value)?;
        }
        Ok(())
    }

    /// Whether any key is bound to `value`. Scans the whole map.
    pub fn contains_value(&self, tx: &mut Tx<'_>, value: &V) -> Result<bool>
    where
        V: PartialEq,
    {
        let mut values = self.values(tx)?;
        while let Some(candidate) = values.next(tx)? {
            if candidate == *value {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Number of bindings. Walks every leaf; treat as non-trivial.
    pub fn len(&self, tx: &mut Tx<'_>) -> Result<usize> {
        let root: Node = tx.get(self.root)?;
        if root.is_leaf() {
            return Ok(root.count);
        }
        let (_, mut leaf) = leftmost(tx, self.root)?;
        let mut total = leaf.count;
        while let Some(next_ref) = leaf.right_sibling {
            leaf = tx.get(next_ref)?;
            total += leaf.count;
        }
        Ok(total)
    }

    /// Whether the map is empty. O(1): true iff the root is a leaf with
    /// no entries. A tree pre-split for concurrency reports non-empty
    /// until [`clear`](Self::clear) collapses it.
    pub fn is_empty(&self, tx: &mut Tx<'_>) -> Result<bool> {
        let root: Node = tx.get(self.root)?;
        Ok(root.is_leaf() && root.count == 0)
    }

    /// Removes every binding and every node below the root, destroying
    /// all boxes the map owns. The root is repaired to a singleton empty
    /// leaf.
    pub fn clear(&self, tx: &mut Tx<'_>) -> Result<()> {
        reshape::clear(tx, self.root)
    }

    /// Cursor over all bindings. All entries of one leaf are produced
    /// before any entry of the next leaf; no other order is guaranteed.
    pub fn entries(&self, tx: &mut Tx<'_>) -> Result<Entries<K, V>> {
        Entries::at_leftmost(tx, self.root)
    }

    /// Cursor over all keys.
    pub fn keys(&self, tx: &mut Tx<'_>) -> Result<Keys<K, V>> {
        Ok(Keys::new(self.entries(tx)?))
    }

    /// Cursor over all values.
    pub fn values(&self, tx: &mut Tx<'_>) -> Result<Values<K, V>> {
        Ok(Values::new(self.entries(tx)?))
    }

    /// Shape of the leaf level: per-leaf entry counts and depth bounds.
    pub fn stats(&self, tx: &mut Tx<'_>) -> Result<MapStats> {
        let (_, mut leaf) = leftmost(tx, self.root)?;
        let mut stats = MapStats {
            entries: 0,
            leaf_counts: Vec::new(),
            min_leaf_depth: leaf.depth,
            max_leaf_depth: leaf.depth,
        };
        loop {
            stats.entries += leaf.count;
            stats.leaf_counts.push(leaf.count);
            stats.min_leaf_depth = stats.min_leaf_depth.min(leaf.depth);
            stats.max_leaf_depth = stats.max_leaf_depth.max(leaf.depth);
            match leaf.right_sibling {
                Some(next_ref) => leaf = tx.get(next_ref)?,
                None => break,
            }
        }
        Ok(stats)
    }

    /// Renders the node structure for debugging.
    pub fn tree_diagram(&self, tx: &mut Tx<'_>) -> Result<String> {
        let mut out = String::new();
        render(tx, self.root, 0, &mut out)?;
        Ok(out)
    }

    /// Walks the whole tree checking structural invariants: variant
    /// consistency, depth bounds, hash-prefix ownership, bucket
    /// placement, and agreement between the tree shape and the sibling
    /// list. Panics on violation; corruption is not a runtime condition.
    pub fn check_invariants(&self, tx: &mut Tx<'_>) -> Result<()> {
        let mut leaves_in_tree_order = Vec::new();
        collect_leaves(tx, self.root, 0, 0, &mut leaves_in_tree_order)?;

        // the sibling list must visit exactly the leaves of the tree, in order
        let (leftmost_ref, mut leaf) = leftmost(tx, self.root)?;
        let mut chain = vec![leftmost_ref];
        let mut previous: Option<Ref> = None;
        loop {
            assert_eq!(leaf.left_sibling, previous, "backward sibling link broken");
            match leaf.right_sibling {
                Some(next_ref) => {
                    previous = Some(*chain.last().unwrap());
                    chain.push(next_ref);
                    leaf = tx.get(next_ref)?;
                }
                None => break,
            }
        }
        let tree_order: Vec<Ref> = leaves_in_tree_order.iter().map(|(r, _)| *r).collect();
        assert_eq!(chain, tree_order, "sibling list disagrees with tree order");
        Ok(())
    }

    /// Routes a mixed hash to the leaf owning it. The leaf's node state
    /// is returned alongside the handle so callers do not re-fetch it.
    fn lookup(&self, tx: &mut Tx<'_>, hash: u32) -> Result<(Ref, Node)> {
        let mut node_ref = self.root;
        let mut node: Node = tx.get(node_ref)?;
        let mut prefix = hash;
        while !node.is_leaf() {
            debug_assert!(node.depth < MAX_DEPTH, "internal node at the prefix width");
            let (left, right) = node.children();
            node_ref = if prefix >> 31 == 1 { left } else { right };
            node = tx.get(node_ref)?;
            prefix <<= 1;
        }
        Ok((node_ref, node))
    }

    /// Position of the entry matching `(hash, key)` within its bucket
    /// chain, if any.
    fn find_entry(&self, tx: &mut Tx<'_>, leaf: &Node, hash: u32, key: &K) -> Result<Option<usize>> {
        let bucket = &leaf.buckets()[bucket_index(hash, leaf.config.leaf_capacity)];
        for (index, entry) in bucket.iter().enumerate() {
            if entry.hash == hash && entry.load_key::<K>(tx)? == *key {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}

/// Descends left children until a leaf is reached.
fn leftmost(tx: &mut Tx<'_>, from: Ref) -> Result<(Ref, Node)> {
    let mut node_ref = from;
    let mut node: Node = tx.get(node_ref)?;
    while !node.is_leaf() {
        let (left, _) = node.children();
        node_ref = left;
        node = tx.get(node_ref)?;
    }
    Ok((node_ref, node))
}

fn render(tx: &mut Tx<'_>, node_ref: Ref, indent: usize, out: &mut String) -> Result<()> {
    let node: Node = tx.get(node_ref)?;
    for _ in 0..indent {
        out.push_str("  ");
    }
    if node.is_leaf() {
        out.push_str(&format!(
            "leaf {} depth={} count={}\n",
            node_ref, node.depth, node.count
        ));
    } else {
        out.push_str(&format!("node {} depth={}\n", node_ref, node.depth));
        let (left, right) = node.children();
        render(tx, left, indent + 1, out)?;
        render(tx, right, indent + 1, out)?;
    }
    Ok(())
}

/// DFS over the tree collecting `(handle, node)` for every leaf, with
/// invariant checks along the way. `path` carries the prefix bits spelled
/// by the route from the root.
fn collect_leaves(
    tx: &mut Tx<'_>,
    node_ref: Ref,
    depth: u8,
    path: u32,
    out: &mut Vec<(Ref, Node)>,
) -> Result<()> {
    let node: Node = tx.get(node_ref)?;
    assert_eq!(node.depth, depth, "stored depth disagrees with position");
    assert!(node.depth <= MAX_DEPTH, "node below the prefix width");
    match &node.state {
        NodeState::Leaf { buckets } => {
            let capacity = node.config.leaf_capacity;
            let mut live = 0;
            for (index, bucket) in buckets.iter().enumerate() {
                for entry in bucket {
                    live += 1;
                    assert_eq!(
                        bucket_index(entry.hash, capacity),
                        index,
                        "entry chained into the wrong bucket"
                    );
                    if depth > 0 {
                        assert_eq!(
                            entry.hash >> (32 - depth as u32),
                            path,
                            "entry hash prefix disagrees with leaf position"
                        );
                    }
                }
            }
            assert_eq!(live, node.count, "leaf count disagrees with live entries");
        }
        NodeState::Internal { left, right } => {
            let (left, right) = (*left, *right);
            // left child owns the 1 prefix, right child the 0 prefix
            collect_leaves(tx, left, depth + 1, (path << 1) | 1, out)?;
            collect_leaves(tx, right, depth + 1, path << 1, out)?;
            return Ok(());
        }
    }
    out.push((node_ref, node));
    Ok(())
}
