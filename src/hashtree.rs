//! Entry points of the hash tree: [`MerkleTree::update`], [`MerkleTree::verify`] and [`MerkleTree::truncate`]. Each
//! recomputes the tree shape from the current block count and runs a single walk of [`crate::visitor`] with its
//! own [`Visitor`](crate::Visitor) implementation.

use tracing::{info, warn};

use crate::{Algorithm, BlockSource, Config, Error, HashFunction, HashStore, KaryTree, Result, visit};

mod truncate;
mod update;
mod verify;

use truncate::Truncator;
use update::Updater;
use verify::Verifier;

/// Outcome of a successful operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
  /// Depth of the tree the operation walked.
  pub depth: u8,
  /// Number of blocks visited.
  pub blocks: u64,
  /// Number of node digests computed, including the root.
  pub nodes: u64,
  /// Root digest as stored after the operation.
  pub root: Vec<u8>,
}

impl Summary {
  pub fn root_hex(&self) -> String {
    hex::encode(&self.root)
  }
}

/// A k-ary hash tree over the blocks of `B`, persisted in `S` and hashed with `H`.
#[derive(Debug)]
pub struct MerkleTree<B, S, H = Algorithm> {
  tree: KaryTree,
  blocks: B,
  store: S,
  hasher: H,
}

impl<B: BlockSource, S: HashStore> MerkleTree<B, S, Algorithm> {
  pub fn with_config(config: &Config, blocks: B, store: S) -> Result<Self> {
    config.validate()?;
    if blocks.block_size() != config.block_size {
      return Err(Error::InvalidBlockSize(blocks.block_size()));
    }
    Self::new(config.k, blocks, store, config.algorithm)
  }
}

impl<B: BlockSource, S: HashStore, H: HashFunction> MerkleTree<B, S, H> {
  pub fn new(k: u8, blocks: B, store: S, hasher: H) -> Result<Self> {
    let tree = KaryTree::new(k)?;
    if blocks.block_size() == 0 {
      return Err(Error::InvalidBlockSize(0));
    }
    Ok(MerkleTree { tree, blocks, store, hasher })
  }

  pub fn tree(&self) -> &KaryTree {
    &self.tree
  }

  pub fn digest_size(&self) -> usize {
    self.hasher.digest_size()
  }

  pub fn block_count(&mut self) -> Result<u64> {
    self.blocks.block_count()
  }

  /// Byte length of the hash-store for a tree over `total` blocks.
  pub fn store_len(&self, total: u64) -> Result<u64> {
    if total == 0 {
      return Err(Error::NoBlocks);
    }
    self.tree.store_len(total, self.digest_size()).ok_or(Error::TreeTooLarge { k: self.tree.k(), blocks: total })
  }

  /// Validates the range against the current block count before anything is written.
  fn prologue(&mut self, from: u64, to: u64) -> Result<(u64, u8)> {
    let total = self.block_count()?;
    let depth = self.tree.checked_depth(total, self.digest_size())?;
    if from > to || to >= total {
      return Err(Error::InvalidRange { from, to, blocks: total });
    }
    Ok((total, depth))
  }

  /// Recomputes the digests of blocks `from..=to` and of every node above them. The hash-store is extended to fit
  /// the current block count but never shrunk: after the data shrinks, [`MerkleTree::truncate`] must drop the stale
  /// nodes.
  pub fn update(&mut self, from: u64, to: u64) -> Result<Summary> {
    let (total, depth) = self.prologue(from, to)?;
    info!("updating blocks {from}..={to} of {total} (k={}, depth={depth})", self.tree.k());
    let len = self.store_len(total)?;
    let current = self.store.len()?;
    if current < len {
      self.store.set_len(len)?;
    } else if current > len {
      warn!("hash-store holds {current} bytes, {total} blocks need {len}: stale nodes remain until it is truncated");
    }

    let mut updater = Updater::new(Context::new(&self.tree, &mut self.blocks, &mut self.store, &self.hasher));
    visit(&self.tree, &mut updater, from, to, total)?;
    let (blocks, nodes) = updater.counts();
    self.store.flush()?;
    self.finish("update", depth, blocks, nodes, total)
  }

  /// Checks the stored digests of blocks `from..=to` and of every node above them, failing on the first mismatch.
  /// Never writes to the hash-store.
  pub fn verify(&mut self, from: u64, to: u64) -> Result<Summary> {
    let (total, depth) = self.prologue(from, to)?;
    info!("verifying blocks {from}..={to} of {total} (k={}, depth={depth})", self.tree.k());

    let mut verifier = Verifier::new(Context::new(&self.tree, &mut self.blocks, &mut self.store, &self.hasher));
    visit(&self.tree, &mut verifier, from, to, total)?;
    let (blocks, nodes) = verifier.counts();
    self.finish("verify", depth, blocks, nodes, total)
  }

  /// Shrinks the tree so that `new_last` is its last block. The block source must already be cut down to
  /// `new_last + 1` blocks. Set `partial` when the new last block has been shortened and must be rehashed.
  ///
  /// Afterwards the hash-store is byte for byte what [`MerkleTree::update`] over the whole truncated data would
  /// produce on an empty store.
  pub fn truncate(&mut self, new_last: u64, partial: bool) -> Result<Summary> {
    let total = self.block_count()?;
    if new_last.checked_add(1) != Some(total) {
      return Err(Error::InvalidTruncation { new_last, blocks: total });
    }
    let (total, depth) = self.prologue(new_last, new_last)?;
    info!("truncating to {total} blocks (k={}, depth={depth}, partial={partial})", self.tree.k());

    let context = Context::new(&self.tree, &mut self.blocks, &mut self.store, &self.hasher);
    let mut truncator = Truncator::new(context, partial);
    visit(&self.tree, &mut truncator, new_last, new_last, total)?;
    let (blocks, nodes) = truncator.counts();
    self.store.flush()?;
    self.finish("truncate", depth, blocks, nodes, total)
  }

  /// Root digest of the tree over `total` blocks as currently stored. All zeroes if it was never written.
  pub fn root(&mut self, total: u64) -> Result<Vec<u8>> {
    self.tree.checked_depth(total, self.digest_size())?;
    let (node, slot) = self.tree.root_slot(total);
    let mut root = vec![0u8; self.digest_size()];
    let offset = slot_offset(&self.tree, node, slot, root.len());
    self.store.read_at(offset, &mut root)?;
    Ok(root)
  }

  fn finish(&mut self, op: &str, depth: u8, blocks: u64, nodes: u64, total: u64) -> Result<Summary> {
    let root = self.root(total)?;
    let summary = Summary { depth, blocks, nodes, root };
    info!("{op} finished: {blocks} blocks, {nodes} nodes, root {}", summary.root_hex());
    Ok(summary)
  }
}

/// Byte offset of slot `slot` of node `node`.
#[inline]
pub(crate) fn slot_offset(tree: &KaryTree, node: u64, slot: usize, digest_size: usize) -> u64 {
  (node * tree.k() as u64 + slot as u64) * digest_size as u64
}

/// Storage and scratch buffers shared by the visitors of a single operation.
pub(crate) struct Context<'a, B, S, H> {
  tree: &'a KaryTree,
  blocks: &'a mut B,
  store: &'a mut S,
  hasher: &'a H,
  block: Vec<u8>,
  record: Vec<u8>,
  digest: Vec<u8>,
  leaves: u64,
  nodes: u64,
}

impl<'a, B: BlockSource, S: HashStore, H: HashFunction> Context<'a, B, S, H> {
  fn new(tree: &'a KaryTree, blocks: &'a mut B, store: &'a mut S, hasher: &'a H) -> Self {
    let digest_size = hasher.digest_size();
    let block = vec![0u8; blocks.block_size()];
    let record = vec![0u8; digest_size * tree.k() as usize];
    let digest = vec![0u8; digest_size];
    Context { tree, blocks, store, hasher, block, record, digest, leaves: 0, nodes: 0 }
  }

  #[inline]
  fn k(&self) -> usize {
    self.tree.k() as usize
  }

  #[inline]
  fn digest_size(&self) -> usize {
    self.digest.len()
  }

  #[inline]
  fn slot_offset(&self, node: u64, slot: usize) -> u64 {
    slot_offset(self.tree, node, slot, self.digest_size())
  }

  fn counts(&self) -> (u64, u64) {
    (self.leaves, self.nodes)
  }

  /// Hashes data block `block` into `self.digest`.
  fn hash_block(&mut self, block: u64) -> Result<()> {
    self.blocks.read_block(block, &mut self.block)?;
    self.hasher.digest(&self.block, &mut self.digest);
    self.leaves += 1;
    Ok(())
  }

  /// Reads the `k` slots of `node` into `self.record` and hashes them into `self.digest`.
  fn hash_node(&mut self, node: u64) -> Result<()> {
    let offset = self.slot_offset(node, 0);
    self.store.read_at(offset, &mut self.record)?;
    self.hasher.digest(&self.record, &mut self.digest);
    self.nodes += 1;
    Ok(())
  }

  fn update_leaf(&mut self, node: u64, block: u64, position: usize) -> Result<u64> {
    self.hash_block(block)?;
    let offset = self.slot_offset(node, position);
    self.store.write_at(offset, &self.digest)?;
    Ok(offset)
  }

  /// Hashes `node` and stores the digest in slot `position` of `parent`.
  fn update_node(&mut self, node: u64, parent: u64, position: usize) -> Result<u64> {
    self.hash_node(node)?;
    let offset = self.slot_offset(parent, position);
    self.store.write_at(offset, &self.digest)?;
    Ok(offset)
  }

  /// Zero-fills slots `from..k` of `node`.
  fn clear_slots(&mut self, node: u64, from: usize) -> Result<()> {
    if from < self.k() {
      let zeros = vec![0u8; (self.k() - from) * self.digest_size()];
      let offset = self.slot_offset(node, from);
      self.store.write_at(offset, &zeros)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod test;
