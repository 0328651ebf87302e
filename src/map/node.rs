//! # Nodes and Entries
//!
//! A node is one of two variants sharing a common header:
//!
//! - **Leaf**: owns a fixed-length bucket array of entry chains and a
//!   live entry count. Leaves hold all the data.
//! - **Internal**: owns exactly two child handles and nothing else.
//!   Internal nodes only route.
//!
//! The variant is a tagged enum, so "bucket array present iff leaf, both
//! children present iff internal" holds by construction rather than by
//! null-checking. Header fields that only apply to one variant (sibling
//! links for leaves, count for leaves) are reset when the variant flips
//! during a split or merge.
//!
//! ## Stored Form
//!
//! A node serializes as its header, a leaf flag, and - for leaves - the
//! flat list of live entries, chained entries included. Bucket positions
//! are not persisted: rehydration re-derives each entry's bucket from its
//! hash and the leaf capacity, and chained entries count toward the leaf
//! size again. This keeps the stored form independent of in-memory chain
//! layout.
//!
//! ## Entries and Boxing
//!
//! An entry binds a key handle to a value handle plus the key's mixed
//! hash and two flags recording whether each side is a box owned by the
//! map (`wrapped`) or a store citizen owned by the user. Boxes are
//! created when a plain value enters the map, reused when the value is
//! overwritten by another plain value, and destroyed when the entry is
//! removed or the value is overwritten by a citizen. Citizens are never
//! destroyed by the map.

use eyre::{bail, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::{MapConfig, MAX_DEPTH};
use crate::hash::bucket_index;
use crate::store::{Ref, Storable, Tx};

/// One bucket: a chain of entries sharing a bucket index.
pub(crate) type Bucket = SmallVec<[Entry; 2]>;

/// A single key/value binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Entry {
    pub hash: u32,
    pub key: Ref,
    pub value: Ref,
    pub key_wrapped: bool,
    pub value_wrapped: bool,
}

impl Entry {
    /// Binds `key` to `value`, boxing whichever side is not already a
    /// store citizen.
    pub fn bind<K: Storable, V: Storable>(
        tx: &mut Tx<'_>,
        hash: u32,
        key: &K,
        value: &V,
    ) -> Result<Entry> {
        let (key_ref, key_wrapped) = match key.managed_handle() {
            Some(handle) => (handle, false),
            None => (tx.create_ref(key)?, true),
        };
        let (value_ref, value_wrapped) = match value.managed_handle() {
            Some(handle) => (handle, false),
            None => (tx.create_ref(value)?, true),
        };
        Ok(Entry {
            hash,
            key: key_ref,
            value: value_ref,
            key_wrapped,
            value_wrapped,
        })
    }

    pub fn load_key<K: Storable>(&self, tx: &mut Tx<'_>) -> Result<K> {
        if self.key_wrapped {
            tx.get(self.key)
        } else {
            match K::from_managed(self.key) {
                Some(key) => Ok(key),
                None => bail!(
                    "entry records a citizen key at {} but the key type cannot \
                     be rebuilt from a handle",
                    self.key
                ),
            }
        }
    }

    pub fn load_value<V: Storable>(&self, tx: &mut Tx<'_>) -> Result<V> {
        if self.value_wrapped {
            tx.get(self.value)
        } else {
            match V::from_managed(self.value) {
                Some(value) => Ok(value),
                None => bail!(
                    "entry records a citizen value at {} but the value type \
                     cannot be rebuilt from a handle",
                    self.value
                ),
            }
        }
    }

    /// Replaces this entry's value, returning the previous one.
    ///
    /// A box is reused when the new value is plain, destroyed when a
    /// citizen takes its place.
    pub fn set_value<V: Storable>(&mut self, tx: &mut Tx<'_>, new: &V) -> Result<V> {
        let old = self.load_value(tx)?;
        match new.managed_handle() {
            Some(handle) => {
                if self.value_wrapped {
                    tx.remove_object(self.value)?;
                }
                self.value = handle;
                self.value_wrapped = false;
            }
            None => {
                if self.value_wrapped {
                    tx.update(self.value, new)?;
                } else {
                    self.value = tx.create_ref(new)?;
                    self.value_wrapped = true;
                }
            }
        }
        Ok(old)
    }

    /// Destroys the boxes this entry owns. Only called when the entry
    /// will never be referenced again.
    pub fn unmanage(&self, tx: &mut Tx<'_>) -> Result<()> {
        if self.key_wrapped {
            tx.remove_object(self.key)?;
        }
        if self.value_wrapped {
            tx.remove_object(self.value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) enum NodeState {
    Leaf { buckets: Vec<Bucket> },
    Internal { left: Ref, right: Ref },
}

/// One node of the prefix tree; a leaf or an internal router node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "NodeRepr", into = "NodeRepr")]
pub(crate) struct Node {
    pub parent: Option<Ref>,
    pub left_sibling: Option<Ref>,
    pub right_sibling: Option<Ref>,
    pub depth: u8,
    pub config: MapConfig,
    pub min_depth: u8,
    pub split_threshold: usize,
    pub merge_threshold: usize,
    pub count: usize,
    pub state: NodeState,
}

impl Node {
    /// A fresh empty leaf at `depth`, inheriting all tuning from `config`.
    pub fn new_leaf(depth: u8, config: &MapConfig) -> Node {
        assert!(depth <= MAX_DEPTH, "tree depth {depth} exceeds prefix width");
        Node {
            parent: None,
            left_sibling: None,
            right_sibling: None,
            depth,
            config: *config,
            min_depth: config.min_depth(),
            split_threshold: config.split_threshold(),
            merge_threshold: config.merge_threshold(),
            count: 0,
            state: NodeState::Leaf {
                buckets: vec![Bucket::new(); config.leaf_capacity],
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.state, NodeState::Leaf { .. })
    }

    pub fn buckets(&self) -> &[Bucket] {
        match &self.state {
            NodeState::Leaf { buckets } => buckets,
            NodeState::Internal { .. } => panic!("internal node has no bucket array"),
        }
    }

    pub fn buckets_mut(&mut self) -> &mut Vec<Bucket> {
        match &mut self.state {
            NodeState::Leaf { buckets } => buckets,
            NodeState::Internal { .. } => panic!("internal node has no bucket array"),
        }
    }

    pub fn children(&self) -> (Ref, Ref) {
        match self.state {
            NodeState::Internal { left, right } => (left, right),
            NodeState::Leaf { .. } => panic!("leaf node has no children"),
        }
    }

    /// Chains the entry into its bucket without any split check. Used by
    /// the reshape paths, which must not recurse.
    pub fn chain_entry(&mut self, entry: Entry) {
        let capacity = self.config.leaf_capacity;
        let index = bucket_index(entry.hash, capacity);
        self.buckets_mut()[index].insert(0, entry);
        self.count += 1;
    }
}

/// Stored form of a node; see the module docs.
#[derive(Serialize, Deserialize)]
struct NodeRepr {
    parent: Option<Ref>,
    left_sibling: Option<Ref>,
    right_sibling: Option<Ref>,
    children: Option<(Ref, Ref)>,
    depth: u8,
    config: MapConfig,
    min_depth: u8,
    split_threshold: usize,
    merge_threshold: usize,
    count: usize,
    leaf: bool,
    entries: Vec<Entry>,
}

impl From<Node> for NodeRepr {
    fn from(node: Node) -> NodeRepr {
        let (children, leaf, entries) = match node.state {
            NodeState::Leaf { buckets } => {
                let entries = buckets.into_iter().flatten().collect();
                (None, true, entries)
            }
            NodeState::Internal { left, right } => (Some((left, right)), false, Vec::new()),
        };
        NodeRepr {
            parent: node.parent,
            left_sibling: node.left_sibling,
            right_sibling: node.right_sibling,
            children,
            depth: node.depth,
            config: node.config,
            min_depth: node.min_depth,
            split_threshold: node.split_threshold,
            merge_threshold: node.merge_threshold,
            count: node.count,
            leaf,
            entries,
        }
    }
}

impl From<NodeRepr> for Node {
    fn from(repr: NodeRepr) -> Node {
        let (state, count) = if repr.leaf {
            let mut buckets = vec![Bucket::new(); repr.config.leaf_capacity];
            let count = repr.entries.len();
            for entry in repr.entries {
                let index = bucket_index(entry.hash, repr.config.leaf_capacity);
                buckets[index].push(entry);
            }
            (NodeState::Leaf { buckets }, count)
        } else {
            let (left, right) = repr
                .children
                .expect("stored internal node is missing its child handles");
            (NodeState::Internal { left, right }, repr.count)
        };
        Node {
            parent: repr.parent,
            left_sibling: repr.left_sibling,
            right_sibling: repr.right_sibling,
            depth: repr.depth,
            config: repr.config,
            min_depth: repr.min_depth,
            split_threshold: repr.split_threshold,
            merge_threshold: repr.merge_threshold,
            count,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::mix;
    use crate::store::MemStore;

    fn small_config() -> MapConfig {
        MapConfig::new().leaf_capacity(4)
    }

    fn entry_with_hash(tx: &mut Tx<'_>, hash: u32) -> Entry {
        Entry::bind(tx, hash, &hash, &format!("v{hash}")).unwrap()
    }

    #[test]
    fn fresh_leaf_has_empty_buckets() {
        let node = Node::new_leaf(0, &small_config());
        assert!(node.is_leaf());
        assert_eq!(node.buckets().len(), 4);
        assert_eq!(node.count, 0);
        assert_eq!(node.split_threshold, 4);
        assert_eq!(node.merge_threshold, 1);
    }

    #[test]
    fn chain_entry_prepends() {
        let store = MemStore::new();
        let mut tx = store.begin();
        let mut node = Node::new_leaf(0, &small_config());
        node.chain_entry(entry_with_hash(&mut tx, 1));
        node.chain_entry(entry_with_hash(&mut tx, 5)); // 5 & 3 == 1, same bucket
        assert_eq!(node.count, 2);
        let chain = &node.buckets()[1];
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].hash, 5);
        assert_eq!(chain[1].hash, 1);
    }

    #[test]
    fn stored_leaf_rehydrates_chained_entries() {
        let store = MemStore::new();
        let mut tx = store.begin();
        let mut node = Node::new_leaf(2, &small_config());
        for hash in [0u32, 1, 4, 5, 9] {
            node.chain_entry(entry_with_hash(&mut tx, mix(hash)));
        }

        let bytes = bincode::serialize(&node).unwrap();
        let back: Node = bincode::deserialize(&bytes).unwrap();

        assert!(back.is_leaf());
        assert_eq!(back.count, 5);
        assert_eq!(back.depth, 2);
        for (index, bucket) in back.buckets().iter().enumerate() {
            for entry in bucket {
                assert_eq!(bucket_index(entry.hash, 4), index);
            }
        }
    }

    #[test]
    fn stored_internal_round_trips_child_handles() {
        let mut node = Node::new_leaf(1, &small_config());
        node.state = NodeState::Internal {
            left: Ref::from_id(10),
            right: Ref::from_id(11),
        };
        node.parent = Some(Ref::from_id(5));

        let bytes = bincode::serialize(&node).unwrap();
        let back: Node = bincode::deserialize(&bytes).unwrap();

        assert!(!back.is_leaf());
        assert_eq!(back.children(), (Ref::from_id(10), Ref::from_id(11)));
        assert_eq!(back.parent, Some(Ref::from_id(5)));
    }

    #[test]
    #[should_panic(expected = "internal node has no bucket array")]
    fn internal_node_rejects_bucket_access() {
        let mut node = Node::new_leaf(0, &small_config());
        node.state = NodeState::Internal {
            left: Ref::from_id(1),
            right: Ref::from_id(2),
        };
        let _ = node.buckets();
    }

    #[test]
    #[should_panic(expected = "leaf node has no children")]
    fn leaf_node_rejects_child_access() {
        let node = Node::new_leaf(0, &small_config());
        let _ = node.children();
    }

    #[test]
    fn box_reuse_and_destruction_on_set_value() {
        use crate::store::Stored;

        let store = MemStore::new();
        let mut tx = store.begin();
        let mut entry = Entry::bind(
            &mut tx,
            7,
            &7u32,
            &Stored::Inline("first".to_string()),
        )
        .unwrap();
        assert!(entry.value_wrapped);
        let box_ref = entry.value;

        // plain -> plain reuses the box
        let old = entry
            .set_value(&mut tx, &Stored::Inline("second".to_string()))
            .unwrap();
        assert_eq!(old, Stored::Inline("first".to_string()));
        assert_eq!(entry.value, box_ref);

        // plain -> citizen destroys the box
        let citizen = tx.create_ref(&"managed".to_string()).unwrap();
        let old = entry
            .set_value(&mut tx, &Stored::<String>::Citizen(citizen))
            .unwrap();
        assert_eq!(old, Stored::Inline("second".to_string()));
        assert!(!entry.value_wrapped);
        assert!(tx.get::<Stored<String>>(box_ref).is_err());

        // citizen -> plain allocates a fresh box, citizen untouched
        entry
            .set_value(&mut tx, &Stored::Inline("third".to_string()))
            .unwrap();
        assert!(entry.value_wrapped);
        assert_ne!(entry.value, citizen);
        assert_eq!(tx.get::<String>(citizen).unwrap(), "managed");
    }
}
