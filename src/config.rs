//! # Construction Options
//!
//! A map is tuned at construction time and the parameters are inherited by
//! every node it ever creates:
//!
//! - **`min_concurrency`**: the minimum number of disjoint write
//!   operations the tree must support. The tree is pre-split at
//!   construction to `min_depth = ceil(log2(min_concurrency))`, so that
//!   many leaves exist before the first insert. Setting it high wastes
//!   space; setting it low causes conflicts until the map grows.
//! - **`split_factor`**: fraction of the leaf capacity at which a leaf
//!   splits into two children.
//! - **`merge_factor`**: fraction of the leaf capacity below which a leaf
//!   asks its parent to merge it with its sibling.
//! - **`leaf_capacity`**: bucket count of each leaf table. Must be a
//!   power of two - the bucket index is `hash & (capacity - 1)`.
//!
//! ## Merge Threshold Derivation
//!
//! Two derivations of the merge threshold exist in the wild and differ in
//! how eagerly the tree contracts:
//!
//! - [`MergeRule::MergeFactor`] (default): `merge_factor * capacity`,
//!   capped one below the split threshold.
//! - [`MergeRule::SplitFactor`]: `split_factor * capacity`, same cap. The
//!   cap does all the work here, so leaves merge as soon as they drop
//!   below `split_threshold - 1` entries.
//!
//! Both are capped at `split_threshold - 1` so that a freshly merged leaf
//! can never sit at or above its own split threshold.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default minimum number of parallel write operations.
pub const DEFAULT_MIN_CONCURRENCY: usize = 1;

/// Default fraction of the leaf capacity that triggers a split.
pub const DEFAULT_SPLIT_FACTOR: f32 = 1.0;

/// Default fraction of the leaf capacity that triggers a merge request.
pub const DEFAULT_MERGE_FACTOR: f32 = 0.25;

/// Default number of buckets per leaf table.
pub const DEFAULT_LEAF_CAPACITY: usize = 128;

/// Maximum trie depth; one level per hash bit.
pub const MAX_DEPTH: u8 = 32;

/// Which tuning factor the merge threshold is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeRule {
    /// Derive from `merge_factor`.
    #[default]
    MergeFactor,
    /// Derive from `split_factor`; the tree contracts eagerly.
    SplitFactor,
}

/// Tuning parameters, inherited from the root by every node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    pub min_concurrency: usize,
    pub split_factor: f32,
    pub merge_factor: f32,
    pub leaf_capacity: usize,
    pub merge_rule: MergeRule,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            min_concurrency: DEFAULT_MIN_CONCURRENCY,
            split_factor: DEFAULT_SPLIT_FACTOR,
            merge_factor: DEFAULT_MERGE_FACTOR,
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
            merge_rule: MergeRule::default(),
        }
    }
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_concurrency(mut self, n: usize) -> Self {
        self.min_concurrency = n;
        self
    }

    pub fn split_factor(mut self, f: f32) -> Self {
        self.split_factor = f;
        self
    }

    pub fn merge_factor(mut self, f: f32) -> Self {
        self.merge_factor = f;
        self
    }

    pub fn leaf_capacity(mut self, n: usize) -> Self {
        self.leaf_capacity = n;
        self
    }

    pub fn merge_rule(mut self, rule: MergeRule) -> Self {
        self.merge_rule = rule;
        self
    }

    /// Rejects parameter combinations that cannot produce a working tree.
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_concurrency == 0 {
            return Err(Error::InvalidArgument(format!(
                "minimum concurrency must be positive, got {}",
                self.min_concurrency
            )));
        }
        if self.split_factor <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "split factor must be positive, got {}",
                self.split_factor
            )));
        }
        if self.merge_factor < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "merge factor must not be negative, got {}",
                self.merge_factor
            )));
        }
        if self.merge_factor >= self.split_factor {
            return Err(Error::InvalidArgument(format!(
                "merge factor {} must be below split factor {}",
                self.merge_factor, self.split_factor
            )));
        }
        if self.leaf_capacity == 0 || !self.leaf_capacity.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "leaf capacity must be a power of two, got {}",
                self.leaf_capacity
            )));
        }
        if self.min_depth() > MAX_DEPTH {
            return Err(Error::InvalidArgument(format!(
                "minimum concurrency {} needs a deeper tree than {} levels",
                self.min_concurrency, MAX_DEPTH
            )));
        }
        Ok(())
    }

    /// Smallest depth whose leaf count covers `min_concurrency`.
    pub fn min_depth(&self) -> u8 {
        let mut depth = 0u8;
        while depth < 64 && (1u64 << depth) < self.min_concurrency as u64 {
            depth += 1;
        }
        depth
    }

    /// Entry count at which a leaf splits. Always at least 1.
    pub fn split_threshold(&self) -> usize {
        ((self.split_factor * self.leaf_capacity as f32) as usize).max(1)
    }

    /// Entry count below which a leaf requests a merge.
    pub fn merge_threshold(&self) -> usize {
        let factor = match self.merge_rule {
            MergeRule::MergeFactor => self.merge_factor,
            MergeRule::SplitFactor => self.split_factor,
        };
        ((factor * self.leaf_capacity as f32) as usize).min(self.split_threshold() - 1)
    }
}
