//! Range-pruned, post-order traversal of a k-ary hash tree over an explicit stack.
//!
//! The walk starts at the root of the tree over `total` blocks and descends only into children whose block
//! coverage intersects the requested range. Blocks of a leaf are reported through [`Visitor::visit_leaf`]. When
//! every child of an internal node has been dispatched, [`Visitor::visit_node`] is called once for each child that
//! was descended into, left to right. The root itself is reported last through [`Visitor::visit_root`]. So a node
//! is always reported after everything below it, and hashing a node can rely on its slots being up to date.
//!
//! The stack never holds more than `depth` frames.

use std::ops::Range;

use bitvec::prelude::*;
use tracing::warn;

use crate::{Error, KaryTree, Result};

/// Callbacks of a tree walk. The first error returned stops the walk and is passed on to the caller of [`visit`].
pub trait Visitor {
  /// `block` belongs to the leaf `frame.node` and sits in its slot `position`.
  fn visit_leaf(&mut self, frame: &Frame, block: u64, position: usize) -> Result<()>;

  /// All of `frame.node`'s touched descendants have been visited. Its digest belongs in slot `frame.position` of
  /// `frame.parent`.
  fn visit_node(&mut self, frame: &Frame) -> Result<()>;

  /// Final callback for the root. `frame.parent` is the virtual record right after the last leaf, whose slot 0
  /// holds the root digest.
  fn visit_root(&mut self, frame: &Frame) -> Result<()> {
    self.visit_node(frame)
  }
}

/// One node on the traversal stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  pub node: u64,
  pub parent: u64,
  /// Slot of this node in its parent.
  pub position: usize,
  /// 1 for leaves.
  pub depth: u8,
  /// Blocks covered by this node, clipped to the total block count.
  pub blocks: Range<u64>,
  /// Intersection of `blocks` with the requested range.
  pub target: Range<u64>,
  /// Number of nodes under each child of this node.
  pub subtree_nodes: u64,
  /// Number of blocks under each child slot of this node.
  pub child_blocks: u64,
  progress: usize,
  touched: BitVec,
}

impl Frame {
  #[inline]
  pub fn is_leaf(&self) -> bool {
    self.depth == 1
  }

  /// Number of slots of this node that have a child (or, for a leaf, a block) behind them.
  #[inline]
  pub fn used_slots(&self) -> usize {
    (self.blocks.end - self.blocks.start).div_ceil(self.child_blocks) as usize
  }
}

/// Per-depth constants, `levels[d - 1]` for depth `d`.
#[derive(Debug, Clone, Copy)]
struct Level {
  subtree_nodes: u64,
  child_blocks: u64,
}

struct Walk<'a> {
  tree: &'a KaryTree,
  levels: Vec<Level>,
}

impl Walk<'_> {
  fn level(&self, depth: u8) -> Level {
    self.levels[depth as usize - 1]
  }

  /// Builds a frame without a touched set. [`Walk::descend`] adds one to internal nodes.
  fn frame(&self, node: u64, parent: u64, position: usize, depth: u8, blocks: Range<u64>, target: Range<u64>) -> Frame {
    let Level { subtree_nodes, child_blocks } = self.level(depth);
    let touched = BitVec::new();
    Frame { node, parent, position, depth, blocks, target, subtree_nodes, child_blocks, progress: 0, touched }
  }

  /// Blocks covered by the `n`-th child of `frame` and their intersection with its target, or `None` if the child
  /// lies entirely past the last block.
  fn span(frame: &Frame, n: usize) -> Option<(Range<u64>, Range<u64>)> {
    let start = frame.blocks.start.saturating_add((n as u64).saturating_mul(frame.child_blocks));
    if start >= frame.blocks.end {
      return None;
    }
    let end = start.saturating_add(frame.child_blocks).min(frame.blocks.end);
    let target = start.max(frame.target.start)..end.min(frame.target.end);
    Some((start..end, target))
  }

  fn child(&self, frame: &Frame, n: usize, blocks: Range<u64>, target: Range<u64>) -> Frame {
    let prev_subtree_nodes = self.level(frame.depth - 1).subtree_nodes;
    let node = self.tree.child_index(frame.node, n, frame.subtree_nodes, prev_subtree_nodes);
    self.frame(node, frame.node, n, frame.depth - 1, blocks, target)
  }

  /// The `n`-th child of `frame` ready to be pushed, or `None` if none of the requested blocks lie under it.
  fn descend(&self, frame: &Frame, n: usize) -> Option<Frame> {
    let (blocks, target) = Self::span(frame, n).filter(|(_, target)| !target.is_empty())?;
    let mut child = self.child(frame, n, blocks, target);
    if !child.is_leaf() {
      child.touched = bitvec![0; self.tree.k() as usize];
    }
    Some(child)
  }

  /// The `n`-th child of `frame` as reported to [`Visitor::visit_node`]. Only called for touched children.
  fn completed(&self, frame: &Frame, n: usize) -> Option<Frame> {
    let (blocks, target) = Self::span(frame, n)?;
    Some(self.child(frame, n, blocks, target))
  }
}

/// Walks the tree over `total` blocks, visiting the blocks `from..=to` and every node above them.
pub fn visit<V: Visitor + ?Sized>(tree: &KaryTree, visitor: &mut V, from: u64, to: u64, total: u64) -> Result<()> {
  if total == 0 {
    return Err(Error::NoBlocks);
  }
  if from > to || to >= total {
    return Err(Error::InvalidRange { from, to, blocks: total });
  }
  let depth = tree.depth(tree.leaf_count(total));
  if tree.checked_tree_size(depth).is_none() {
    return Err(Error::TreeTooLarge { k: tree.k(), blocks: total });
  }

  let levels = (1..=depth)
    .map(|d| Level { subtree_nodes: tree.tree_size(d - 1), child_blocks: tree.blocks_per_child(d) })
    .collect::<Vec<_>>();
  let walk = Walk { tree, levels };
  let (parent, position) = tree.root_slot(total);
  let root = walk.frame(tree.root_index(depth), parent, position, depth, 0..total, from..to + 1);

  let k = tree.k() as usize;
  let mut stack = Vec::with_capacity(depth as usize);
  let mut top = root.clone();
  if !top.is_leaf() {
    top.touched = bitvec![0; k];
  }
  stack.push(top);
  while let Some(mut frame) = stack.pop() {
    if frame.is_leaf() {
      if frame.blocks.end - frame.blocks.start != k as u64 {
        warn!("leaf {} covers blocks {:?}, not {k}", frame.node, frame.blocks);
      }
      for block in frame.target.clone() {
        visitor.visit_leaf(&frame, block, (block - frame.blocks.start) as usize)?;
      }
    } else if frame.progress == k {
      for n in frame.touched.iter_ones() {
        if let Some(child) = walk.completed(&frame, n) {
          visitor.visit_node(&child)?;
        }
      }
    } else {
      let n = frame.progress;
      frame.progress += 1;
      let child = walk.descend(&frame, n);
      if child.is_some() {
        frame.touched.set(n, true);
      }
      stack.push(frame);
      stack.extend(child);
    }
  }
  visitor.visit_root(&root)
}
