//! Pointer-free index arithmetic for a k-ary hash tree.
//!
//! Node records are numbered so that growing the tree never moves an existing node:
//!
//! - A full tree of depth `d` occupies the indices `[0, tree_size(d))` and its root is `tree_size(d-1)`.
//! - The left-most child of a root is the root of the previous, one level shallower tree. It sits at
//!   `tree_size(d-2)` and its subtree fills `[0, tree_size(d-1))`, i.e. everything before the root.
//! - Every other subtree is laid out in pre-order: a node is followed by the subtree of its first child, then
//!   by that of its second child, and so on.
//!
//! For `k = 2` and depth 3 this gives:
//!
//! ```text
//!           3
//!         /   \
//!        1     4
//!       / \   / \
//!      0   2 5   6
//! ```
//!
//! Because the right-most leaf is the last retained node in pre-order, the slot right after it is free to hold
//! the root digest (see [`KaryTree::root_slot`]).

/// Arithmetic on a k-ary tree. Holds nothing but the branching factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KaryTree {
  k: u8,
}

impl KaryTree {
  pub fn new(k: u8) -> crate::Result<Self> {
    if k < 2 { Err(crate::Error::InvalidBranchingFactor(k as u32)) } else { Ok(KaryTree { k }) }
  }

  #[inline]
  pub fn k(&self) -> u8 {
    self.k
  }

  #[inline]
  fn width(&self) -> u64 {
    self.k as u64
  }

  /// Number of leaf nodes needed for `blocks` data blocks, `ceil(blocks / k)`.
  #[inline]
  pub fn leaf_count(&self, blocks: u64) -> u64 {
    blocks.div_ceil(self.width())
  }

  /// The minimum depth `d` such that a tree of depth `d` holds `leaves` leaf nodes, `1 + ceil(log_k(leaves))`.
  /// A tree of depth 1 is a single leaf that is also the root.
  pub fn depth(&self, leaves: u64) -> u8 {
    debug_assert!(leaves > 0, "a tree needs at least one leaf");
    if self.k.is_power_of_two() {
      1 + log2n_ceil(leaves, self.k.trailing_zeros())
    } else {
      // the floating-point estimate may be off by one for large values
      let estimate = ((leaves as f64).log10() / (self.k as f64).log10()).ceil();
      1 + self.ceil_log(leaves, estimate as u32)
    }
  }

  /// Smallest `e` with `k^e >= value`, starting the search from `estimate`.
  fn ceil_log(&self, value: u64, estimate: u32) -> u8 {
    let covers = |e: u32| self.width().checked_pow(e).is_none_or(|capacity| capacity >= value);
    let mut e = estimate.min(u64::BITS);
    while !covers(e) {
      e += 1;
    }
    while e > 0 && covers(e - 1) {
      e -= 1;
    }
    e as u8
  }

  /// Number of nodes in a full tree of the given depth, `Σ k^i` for `i ∈ [0, depth)`, or `None` if it does not
  /// fit in 64 bits.
  pub fn checked_tree_size(&self, depth: u8) -> Option<u64> {
    if self.k == 2 {
      // 2^depth - 1
      return if depth as u32 <= u64::BITS { Some(((1u128 << depth) - 1) as u64) } else { None };
    }
    (0..depth).try_fold(0u64, |size, _| size.checked_mul(self.width())?.checked_add(1))
  }

  /// Number of nodes in a full tree of the given depth.
  ///
  /// # Panics
  ///
  /// If the count overflows 64 bits. Operations check [`KaryTree::checked_tree_size`] for the deepest level
  /// before they start, so this never fires inside a traversal.
  pub fn tree_size(&self, depth: u8) -> u64 {
    match self.checked_tree_size(depth) {
      Some(size) => size,
      None => panic!("a {}-ary tree of depth {depth} has more than 2^64 nodes", self.k),
    }
  }

  /// Index of the root node of a tree of the given depth.
  #[inline]
  pub fn root_index(&self, depth: u8) -> u64 {
    debug_assert!(depth > 0);
    self.tree_size(depth - 1)
  }

  /// Number of data blocks covered by each child slot of a node at `depth`. Leaves (depth 1) cover one block per
  /// slot. Saturates at `u64::MAX` for the top levels of a tree over ~2^64 blocks.
  #[inline]
  pub fn blocks_per_child(&self, depth: u8) -> u64 {
    debug_assert!(depth > 0);
    self.width().saturating_pow(depth as u32 - 1)
  }

  /// Index of the `n`-th child of `parent`.
  ///
  /// `subtree_nodes` is the number of nodes under each child of `parent` (`tree_size(depth-1)` for a parent at
  /// `depth`) and `prev_subtree_nodes` the number under each grandchild (`tree_size(depth-2)`). The latter is only
  /// consulted when `parent` is a root, whose first child is the root of the previous, smaller tree.
  #[inline]
  pub fn child_index(&self, parent: u64, n: usize, subtree_nodes: u64, prev_subtree_nodes: u64) -> u64 {
    debug_assert!(n < self.k as usize);
    let n = n as u64;
    if parent == subtree_nodes {
      // 親がルートの場合: 左端の子は一段浅い木のルート
      match n {
        0 => prev_subtree_nodes,
        1 => parent + 1,
        _ => parent * n + 1,
      }
    } else {
      parent + 1 + n * subtree_nodes
    }
  }

  /// Index of the leaf node that holds the given block. Node indices do not depend on the total block count, so
  /// the walk starts from the root of the smallest tree containing `block` and peels off one child span per level.
  pub fn leaf_for_block(&self, block: u64) -> u64 {
    let depth = self.depth(block / self.width() + 1);
    let mut node = self.root_index(depth);
    let mut offset = block;
    for d in (2..=depth).rev() {
      let span = self.blocks_per_child(d);
      let position = offset / span;
      offset -= position * span;
      node = self.child_index(node, position as usize, self.tree_size(d - 1), self.tree_size(d - 2));
    }
    node
  }

  /// `(node, slot)` holding the root digest of a tree over `blocks` blocks: slot 0 of the record right after the
  /// last leaf.
  #[inline]
  pub fn root_slot(&self, blocks: u64) -> (u64, usize) {
    debug_assert!(blocks > 0);
    (self.leaf_for_block(blocks - 1) + 1, 0)
  }

  /// Byte length of a hash-store holding a tree over `blocks` blocks, up to and including the root digest, or
  /// `None` if it is not addressable with 64 bits.
  pub fn store_len(&self, blocks: u64, digest_size: usize) -> Option<u64> {
    let (node, slot) = self.root_slot(blocks);
    node.checked_mul(self.width())?.checked_add(slot as u64 + 1)?.checked_mul(digest_size as u64)
  }

  /// Checks that every node index and byte offset of a tree over `blocks` blocks fits in 64 bits and returns the
  /// tree's depth.
  pub fn checked_depth(&self, blocks: u64, digest_size: usize) -> crate::Result<u8> {
    if blocks == 0 {
      return Err(crate::Error::NoBlocks);
    }
    let depth = self.depth(self.leaf_count(blocks));
    match (self.checked_tree_size(depth), self.store_len(blocks, digest_size)) {
      (Some(_), Some(_)) => Ok(depth),
      _ => Err(crate::Error::TreeTooLarge { k: self.k, blocks }),
    }
  }
}

/// `ceil(log_{2^n}(value))` with integer operations only.
#[inline]
fn log2n_ceil(value: u64, n: u32) -> u8 {
  // ceil(log2(value)); 0 for value == 1
  let bits = u64::BITS - (value - 1).leading_zeros();
  bits.div_ceil(n) as u8
}
