//! Key-space balancing over a prefix trie.
//!
//! The top [`PREFIX_BITS`] bits of every key address a leaf of a complete binary trie stored
//! as a flat array (root at id 1, children of node `i` at `2i` and `2i + 1`, leaves at
//! `PREFIX_COUNT + prefix`). A streaming histogram fills the leaf counts; merging sibling
//! subtrees bottom-up then yields the coarsest cover of the key space whose partitions all
//! stay under a record capacity, so each partition can later be finished in memory.

use std::cmp::Ordering;

use crate::radix;
use crate::Key;

/// Key bits that select a trie leaf.
pub const PREFIX_BITS: usize = 16;
/// Key bits below the prefix.
pub const SUFFIX_BITS: usize = crate::KEY_BYTES * 8 - PREFIX_BITS;
/// Number of distinct prefixes (trie leaves).
pub const PREFIX_COUNT: usize = 1 << PREFIX_BITS;
/// Number of distinct suffixes under one prefix.
pub const SUFFIX_COUNT: usize = 1 << SUFFIX_BITS;
/// Mask selecting the suffix bits of a key.
pub const SUFFIX_MASK: Key = (SUFFIX_COUNT - 1) as Key;

/// Flat trie size: internal nodes at `[1, PREFIX_COUNT)`, leaves above.
const TREE_NODES: usize = PREFIX_COUNT * 2;

/// Routing marker for trie nodes that are not partition boundaries.
const NO_PARTITION: u32 = u32::MAX;

/// Top prefix bits of a key.
pub fn prefix_of(key: Key) -> usize {
    return (key >> SUFFIX_BITS) as usize;
}

/// Low suffix bits of a key.
pub fn suffix_of(key: Key) -> usize {
    return (key & SUFFIX_MASK) as usize;
}

/// Trie leaf id of a prefix.
fn leaf_node(prefix: usize) -> usize {
    return PREFIX_COUNT + prefix;
}

/// Depth of a trie node, 0 at the root.
fn node_depth(node: usize) -> usize {
    debug_assert!(node >= 1);
    return (usize::BITS - 1 - node.leading_zeros()) as usize;
}

/// Orders trie node ids by the key ranges they cover.
///
/// Ids at different depths are not comparable numerically: each id is left-aligned to the
/// leaf depth first, which turns the comparison into ascending order of the first key a
/// node covers. Overlapping nodes (never both part of one cover) tie-break shallower first.
fn lexical_cmp(a: usize, b: usize) -> Ordering {
    let a_aligned = (a as u64) << (PREFIX_BITS - node_depth(a));
    let b_aligned = (b as u64) << (PREFIX_BITS - node_depth(b));
    return a_aligned
        .cmp(&b_aligned)
        .then_with(|| node_depth(a).cmp(&node_depth(b)));
}

/// Per-prefix record counts over the trie leaves.
pub struct PrefixHistogram {
    /// Counts for the whole trie; only the leaves are filled until a plan is built.
    counts: Box<[u64]>,
    /// Total number of recorded keys.
    total: u64,
}

impl PrefixHistogram {
    /// Creates an empty histogram.
    pub fn new() -> Self {
        return PrefixHistogram {
            counts: vec![0u64; TREE_NODES].into_boxed_slice(),
            total: 0,
        };
    }

    /// Records one key occurrence.
    pub fn record(&mut self, key: Key) {
        self.record_many(key, 1);
    }

    /// Records `count` occurrences of a key. Counters saturate instead of wrapping.
    pub fn record_many(&mut self, key: Key, count: u64) {
        let leaf = leaf_node(prefix_of(key));
        self.counts[leaf] = self.counts[leaf].saturating_add(count);
        self.total = self.total.saturating_add(count);
    }

    /// Records every key of a batch.
    pub fn record_all(&mut self, keys: &[Key]) {
        for &key in keys {
            self.record(key);
        }
    }

    /// Total number of recorded keys.
    pub fn total(&self) -> u64 {
        return self.total;
    }

    /// Builds the coarsest partition cover whose merged partitions all hold fewer than
    /// `capacity` keys.
    ///
    /// Parents are visited from the deepest level up, so a node becomes a merge candidate
    /// only after both of its children merged. A sibling pair merges iff both halves are
    /// still boundaries and their counts sum (checked) strictly below `capacity`; a
    /// saturated counter can never satisfy the bound and permanently stays a partition of
    /// its own. Leaves over capacity stay single-prefix partitions and are count-sorted.
    pub fn build_plan(mut self, capacity: u64) -> PartitionPlan {
        let mut boundary = vec![false; TREE_NODES].into_boxed_slice();
        for flag in boundary[PREFIX_COUNT..].iter_mut() {
            *flag = true;
        }

        for node in (1..PREFIX_COUNT).rev() {
            let left = node * 2;
            let right = node * 2 + 1;
            if !(boundary[left] && boundary[right]) {
                continue;
            }
            match self.counts[left].checked_add(self.counts[right]) {
                Some(sum) if sum < capacity => {
                    boundary[left] = false;
                    boundary[right] = false;
                    boundary[node] = true;
                    self.counts[node] = sum;
                }
                _ => {}
            }
        }

        return PartitionPlan::assemble(&self.counts, &boundary, self.total);
    }
}

impl Default for PrefixHistogram {
    fn default() -> Self {
        return PrefixHistogram::new();
    }
}

/// How a partition's records are finished during the merge phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    /// The partition is a single prefix; records are tallied by suffix and re-expanded.
    Count {
        /// Ordinal among the count partitions, indexing its suffix table.
        table: usize,
    },
    /// The partition spans several prefixes; records are staged in a scratch file and
    /// radix sorted over their undecided digits.
    Radix {
        /// Ordinal among the radix partitions, indexing its staging file.
        file: usize,
    },
}

/// One partition of the key space.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Trie node covering the partition's key range.
    pub node: usize,
    /// Expected number of records, from the histogram.
    pub count: u64,
    /// Finishing mode.
    pub kind: PartitionKind,
}

impl Partition {
    /// Trie depth of the partition node.
    pub fn depth(&self) -> usize {
        return node_depth(self.node);
    }

    /// First key covered by the partition.
    pub fn first_key(&self) -> Key {
        let depth = node_depth(self.node);
        let index = (self.node - (1 << depth)) as u64;
        return (index << (crate::KEY_BYTES * 8 - depth)) as Key;
    }

    /// Prefix value of a single-prefix partition.
    pub fn prefix(&self) -> usize {
        debug_assert_eq!(self.depth(), PREFIX_BITS);
        return self.node - PREFIX_COUNT;
    }

    /// Number of low radix digits left undecided by the partition's shared bit prefix.
    pub fn undecided_digits(&self) -> usize {
        let free_bits = crate::KEY_BYTES * 8 - self.depth();
        return (free_bits + radix::DIGIT_BITS - 1) / radix::DIGIT_BITS;
    }
}

/// Ordered partition cover of the whole key space.
#[derive(Debug)]
pub struct PartitionPlan {
    /// Partitions in ascending key order.
    partitions: Vec<Partition>,
    /// Trie-node id to partition ordinal, [`NO_PARTITION`] off the boundary.
    node_index: Box<[u32]>,
    /// Number of count partitions.
    count_partitions: usize,
    /// Number of radix partitions.
    radix_partitions: usize,
    /// Expected total number of records.
    total: u64,
}

impl PartitionPlan {
    fn assemble(counts: &[u64], boundary: &[bool], total: u64) -> Self {
        let mut nodes = Vec::from_iter((1..TREE_NODES).filter(|&node| boundary[node]));
        nodes.sort_unstable_by(|&a, &b| lexical_cmp(a, b));

        let mut node_index = vec![NO_PARTITION; TREE_NODES].into_boxed_slice();
        let mut partitions = Vec::with_capacity(nodes.len());
        let mut count_partitions = 0;
        let mut radix_partitions = 0;

        for node in nodes {
            let kind = if node_depth(node) == PREFIX_BITS {
                count_partitions += 1;
                PartitionKind::Count {
                    table: count_partitions - 1,
                }
            } else {
                radix_partitions += 1;
                PartitionKind::Radix {
                    file: radix_partitions - 1,
                }
            };
            node_index[node] = partitions.len() as u32;
            partitions.push(Partition {
                node,
                count: counts[node],
                kind,
            });
        }

        return PartitionPlan {
            partitions,
            node_index,
            count_partitions,
            radix_partitions,
            total,
        };
    }

    /// Partitions in ascending key order.
    pub fn partitions(&self) -> &[Partition] {
        return &self.partitions;
    }

    /// Number of count partitions.
    pub fn count_partitions(&self) -> usize {
        return self.count_partitions;
    }

    /// Number of radix partitions.
    pub fn radix_partitions(&self) -> usize {
        return self.radix_partitions;
    }

    /// Expected total number of records.
    pub fn total(&self) -> u64 {
        return self.total;
    }

    /// Ordinal of the partition covering `key`: its prefix leaf or the nearest boundary
    /// ancestor. The cover is total, so the walk always terminates.
    pub fn locate(&self, key: Key) -> usize {
        let mut node = leaf_node(prefix_of(key));
        loop {
            debug_assert!(node >= 1);
            let ordinal = self.node_index[node];
            if ordinal != NO_PARTITION {
                return ordinal as usize;
            }
            node >>= 1;
        }
    }
}
