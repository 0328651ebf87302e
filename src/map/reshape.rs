//! # Split/Merge Engine
//!
//! Structural reshaping of the prefix tree. Three operations live here:
//!
//! - **split**: partition a full leaf into two children one level down
//!   and turn the leaf into an internal router node, in place. The
//!   node's own handle never changes, so the parent needs no repair.
//! - **merge**: pull the entries of two sibling leaves back up into
//!   their parent and destroy the children.
//! - **ensure_depth**: pre-split an empty tree to the minimum depth
//!   implied by `min_concurrency`.
//!
//! ## Sibling Wiring
//!
//! The leaves form a doubly linked list in left-to-right trie order,
//! which is what makes iteration a linear sweep. A split replaces one
//! list element with two; a merge replaces two with one. In both cases
//! the outer neighbors' inward pointers are repaired, which is why the
//! operations dirty up to two extra leaves.
//!
//! `ensure_depth` splits a node *before* recursing into its children.
//! Splitting deeper levels first would wire siblings against nodes that
//! are about to stop being leaves, corrupting the list.
//!
//! ## Entry Movement
//!
//! Entries moved by a split or merge keep their key and value handles;
//! no boxes are created or destroyed. Insertion during reshaping skips
//! the split check - a split never recurses on the same call, and a
//! merge refuses to begin when the combined entries would immediately
//! split again.

use eyre::Result;
use tracing::debug;

use crate::config::MAX_DEPTH;
use crate::store::{Ref, Tx};

use super::node::{Bucket, Node, NodeState};

/// Splits the leaf at `node_ref` into two children one level down.
///
/// No-op when the node is already internal.
pub(crate) fn split(tx: &mut Tx<'_>, node_ref: Ref) -> Result<()> {
    let mut node: Node = tx.get(node_ref)?;
    if !node.is_leaf() {
        return Ok(());
    }
    assert!(
        node.depth < MAX_DEPTH,
        "leaf at the prefix width cannot split"
    );
    tx.mark_for_update(node_ref)?;

    let mut left = Node::new_leaf(node.depth + 1, &node.config);
    let mut right = Node::new_leaf(node.depth + 1, &node.config);

    // Route each entry by the first prefix bit this node has not yet
    // consumed: 1 goes left, 0 goes right.
    let buckets = std::mem::take(node.buckets_mut());
    for bucket in buckets {
        for entry in bucket {
            if (entry.hash << node.depth) >> 31 == 1 {
                left.chain_entry(entry);
            } else {
                right.chain_entry(entry);
            }
        }
    }
    node.count = 0;

    let left_ref = tx.create_ref(&left)?;
    let right_ref = tx.create_ref(&right)?;

    // The new children take this node's place in the leaf list.
    if let Some(neighbor_ref) = node.left_sibling {
        tx.mark_for_update(neighbor_ref)?;
        let mut neighbor: Node = tx.get(neighbor_ref)?;
        neighbor.right_sibling = Some(left_ref);
        tx.update(neighbor_ref, &neighbor)?;
    }
    if let Some(neighbor_ref) = node.right_sibling {
        tx.mark_for_update(neighbor_ref)?;
        let mut neighbor: Node = tx.get(neighbor_ref)?;
        neighbor.left_sibling = Some(right_ref);
        tx.update(neighbor_ref, &neighbor)?;
    }

    left.parent = Some(node_ref);
    left.left_sibling = node.left_sibling;
    left.right_sibling = Some(right_ref);
    right.parent = Some(node_ref);
    right.left_sibling = Some(left_ref);
    right.right_sibling = node.right_sibling;
    tx.update(left_ref, &left)?;
    tx.update(right_ref, &right)?;

    debug!(
        node = node_ref.id(),
        depth = node.depth,
        left = left_ref.id(),
        left_count = left.count,
        right = right_ref.id(),
        right_count = right.count,
        "split leaf"
    );

    node.state = NodeState::Internal {
        left: left_ref,
        right: right_ref,
    };
    node.left_sibling = None;
    node.right_sibling = None;
    tx.update(node_ref, &node)
}

/// Merges the two children of `parent_ref` back into it.
///
/// Declines silently when the node is not an internal parent of two
/// leaves, or when the combined entry count would put the merged leaf
/// within one split of splitting again.
pub(crate) fn merge(tx: &mut Tx<'_>, parent_ref: Ref) -> Result<()> {
    let mut parent: Node = tx.get(parent_ref)?;
    let NodeState::Internal { left, right } = parent.state else {
        return Ok(());
    };
    let left_node: Node = tx.get(left)?;
    let right_node: Node = tx.get(right)?;
    if !left_node.is_leaf() || !right_node.is_leaf() {
        return Ok(());
    }
    if (left_node.count + right_node.count) / 2 > parent.split_threshold {
        return Ok(());
    }
    tx.mark_for_update(parent_ref)?;

    // Rebuild the bucket array this node gave up when it split.
    parent.state = NodeState::Leaf {
        buckets: vec![Bucket::new(); parent.config.leaf_capacity],
    };
    parent.count = 0;
    for child in [&left_node, &right_node] {
        for bucket in child.buckets() {
            for entry in bucket {
                parent.chain_entry(entry.clone());
            }
        }
    }

    // This node takes the children's span in the leaf list.
    parent.left_sibling = left_node.left_sibling;
    parent.right_sibling = right_node.right_sibling;
    if let Some(neighbor_ref) = parent.left_sibling {
        tx.mark_for_update(neighbor_ref)?;
        let mut neighbor: Node = tx.get(neighbor_ref)?;
        neighbor.right_sibling = Some(parent_ref);
        tx.update(neighbor_ref, &neighbor)?;
    }
    if let Some(neighbor_ref) = parent.right_sibling {
        tx.mark_for_update(neighbor_ref)?;
        let mut neighbor: Node = tx.get(neighbor_ref)?;
        neighbor.left_sibling = Some(parent_ref);
        tx.update(neighbor_ref, &neighbor)?;
    }

    debug!(
        node = parent_ref.id(),
        depth = parent.depth,
        count = parent.count,
        "merged children"
    );

    tx.update(parent_ref, &parent)?;
    tx.remove_object(left)?;
    tx.remove_object(right)
}

/// Pre-splits the subtree under `node_ref` until every leaf sits at
/// `min_depth` or deeper. Splits this node before recursing so the leaf
/// list is wired level by level.
pub(crate) fn ensure_depth(tx: &mut Tx<'_>, node_ref: Ref, min_depth: u8) -> Result<()> {
    let node: Node = tx.get(node_ref)?;
    if node.depth >= min_depth {
        return Ok(());
    }
    split(tx, node_ref)?;
    let node: Node = tx.get(node_ref)?;
    let (left, right) = node.children();
    ensure_depth(tx, right, min_depth)?;
    ensure_depth(tx, left, min_depth)?;
    Ok(())
}

/// Destroys every entry box and every non-root node below `root_ref`,
/// then repairs the root to a fresh singleton leaf.
pub(crate) fn clear(tx: &mut Tx<'_>, root_ref: Ref) -> Result<()> {
    clear_node(tx, root_ref)?;

    let mut root: Node = tx.get(root_ref)?;
    root.state = NodeState::Leaf {
        buckets: vec![Bucket::new(); root.config.leaf_capacity],
    };
    root.count = 0;
    root.parent = None;
    root.left_sibling = None;
    root.right_sibling = None;
    tx.update(root_ref, &root)?;

    debug!(root = root_ref.id(), "cleared map");
    Ok(())
}

fn clear_node(tx: &mut Tx<'_>, node_ref: Ref) -> Result<()> {
    let node: Node = tx.get(node_ref)?;
    tx.mark_for_update(node_ref)?;
    match &node.state {
        NodeState::Leaf { buckets } => {
            for bucket in buckets {
                for entry in bucket {
                    entry.unmanage(tx)?;
                }
            }
        }
        NodeState::Internal { left, right } => {
            let (left, right) = (*left, *right);
            clear_node(tx, left)?;
            clear_node(tx, right)?;
            tx.remove_object(left)?;
            tx.remove_object(right)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::map::node::Entry;
    use crate::store::MemStore;

    fn small_config() -> MapConfig {
        MapConfig::new().leaf_capacity(4)
    }

    /// A stored leaf at depth 0 holding entries with the given hashes.
    fn stored_leaf(tx: &mut Tx<'_>, hashes: &[u32]) -> Ref {
        let mut node = Node::new_leaf(0, &small_config());
        for &h in hashes {
            let entry = Entry::bind(tx, h, &h, &h).unwrap();
            node.chain_entry(entry);
        }
        tx.create_ref(&node).unwrap()
    }

    #[test]
    fn split_partitions_by_the_top_prefix_bit() {
        let store = MemStore::new();
        let mut tx = store.begin();
        let root = stored_leaf(&mut tx, &[0x8000_0001, 0x8000_0002, 0x0000_0001, 0x0000_0002, 0x0000_0003]);

        split(&mut tx, root).unwrap();

        let node: Node = tx.get(root).unwrap();
        assert!(!node.is_leaf());
        assert_eq!(node.left_sibling, None);
        assert_eq!(node.right_sibling, None);

        let (left_ref, right_ref) = node.children();
        let left: Node = tx.get(left_ref).unwrap();
        let right: Node = tx.get(right_ref).unwrap();
        assert_eq!(left.count, 2, "left child owns the 1 prefix");
        assert_eq!(right.count, 3);
        assert_eq!(left.depth, 1);
        assert_eq!(right.depth, 1);
        assert_eq!(left.parent, Some(root));
        assert_eq!(right.parent, Some(root));
        assert_eq!(left.right_sibling, Some(right_ref));
        assert_eq!(right.left_sibling, Some(left_ref));
        assert_eq!(left.left_sibling, None);
        assert_eq!(right.right_sibling, None);
        for bucket in left.buckets() {
            for entry in bucket {
                assert_eq!(entry.hash >> 31, 1);
            }
        }
    }

    #[test]
    fn split_of_an_internal_node_is_a_no_op() {
        let store = MemStore::new();
        let mut tx = store.begin();
        let root = stored_leaf(&mut tx, &[1, 2]);
        split(&mut tx, root).unwrap();
        let children = tx.get::<Node>(root).unwrap().children();

        split(&mut tx, root).unwrap();
        assert_eq!(tx.get::<Node>(root).unwrap().children(), children);
    }

    #[test]
    fn merge_pulls_both_children_back_up() {
        let store = MemStore::new();
        let mut tx = store.begin();
        let root = stored_leaf(&mut tx, &[0x8000_0001, 0x0000_0001, 0x0000_0002]);
        split(&mut tx, root).unwrap();
        let (left_ref, right_ref) = tx.get::<Node>(root).unwrap().children();

        merge(&mut tx, root).unwrap();

        let node: Node = tx.get(root).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.count, 3);
        assert!(tx.get::<Node>(left_ref).is_err(), "child must be destroyed");
        assert!(tx.get::<Node>(right_ref).is_err());
    }

    #[test]
    fn merge_declines_when_a_child_is_internal() {
        let store = MemStore::new();
        let mut tx = store.begin();
        let root = stored_leaf(&mut tx, &[0x8000_0001]);
        split(&mut tx, root).unwrap();
        let (left_ref, _) = tx.get::<Node>(root).unwrap().children();
        split(&mut tx, left_ref).unwrap();

        merge(&mut tx, root).unwrap();
        assert!(!tx.get::<Node>(root).unwrap().is_leaf());
    }

    #[test]
    fn merge_declines_when_the_result_would_immediately_resplit() {
        let store = MemStore::new();
        let mut tx = store.begin();
        let hashes: Vec<u32> = (0..5)
            .map(|i| 0x8000_0000 | i)
            .chain((0..5).map(|i| i))
            .collect();
        let root = stored_leaf(&mut tx, &hashes);
        split(&mut tx, root).unwrap();

        merge(&mut tx, root).unwrap();
        assert!(!tx.get::<Node>(root).unwrap().is_leaf(), "merge must decline");
    }

    #[test]
    fn ensure_depth_builds_a_fully_wired_level() {
        let store = MemStore::new();
        let mut tx = store.begin();
        let root = stored_leaf(&mut tx, &[]);

        ensure_depth(&mut tx, root, 3).unwrap();

        // descend to the leftmost leaf, then walk the sibling list
        let mut node: Node = tx.get(root).unwrap();
        while !node.is_leaf() {
            let (left, _) = node.children();
            node = tx.get(left).unwrap();
        }
        assert_eq!(node.left_sibling, None);

        let mut leaves = 1;
        while let Some(next_ref) = node.right_sibling {
            node = tx.get(next_ref).unwrap();
            assert_eq!(node.depth, 3);
            leaves += 1;
        }
        assert_eq!(leaves, 8, "pre-split must produce a full leaf level");
    }
}
