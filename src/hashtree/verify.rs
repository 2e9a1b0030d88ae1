use tracing::{debug, error};

use super::Context;
use crate::{BlockSource, Error, Frame, HashFunction, HashStore, Result, Visitor};

/// Recomputes digests and compares them with the stored ones. Read-only.
pub(super) struct Verifier<'a, B, S, H> {
  context: Context<'a, B, S, H>,
  stored: Vec<u8>,
}

impl<'a, B: BlockSource, S: HashStore, H: HashFunction> Verifier<'a, B, S, H> {
  pub fn new(context: Context<'a, B, S, H>) -> Self {
    let stored = vec![0u8; context.digest_size()];
    Verifier { context, stored }
  }

  pub fn counts(&self) -> (u64, u64) {
    self.context.counts()
  }

  /// Whether the digest just computed equals the one stored at `offset`.
  fn matches(&mut self, offset: u64) -> Result<bool> {
    self.context.store.read_at(offset, &mut self.stored)?;
    Ok(self.stored == self.context.digest)
  }

  /// Slots of `frame.node` with nothing behind them must be zero. Expects the node record in `context.record`.
  fn check_padding(&self, frame: &Frame) -> Result<()> {
    let h = self.context.digest_size();
    for slot in frame.used_slots()..self.context.k() {
      if self.context.record[slot * h..(slot + 1) * h].iter().any(|b| *b != 0) {
        let offset = self.context.slot_offset(frame.node, slot);
        error!("node {}.{slot} @{offset} should be empty", frame.node);
        return Err(Error::NonZeroPadding { node: frame.node, slot, offset });
      }
    }
    Ok(())
  }
}

impl<B: BlockSource, S: HashStore, H: HashFunction> Visitor for Verifier<'_, B, S, H> {
  fn visit_leaf(&mut self, frame: &Frame, block: u64, position: usize) -> Result<()> {
    self.context.hash_block(block)?;
    let offset = self.context.slot_offset(frame.node, position);
    if !self.matches(offset)? {
      error!("block {block} does not match node {}.{position} @{offset}", frame.node);
      return Err(Error::BlockMismatch { block, node: frame.node, slot: position, offset });
    }
    debug!("block {block} = node {}.{position} @{offset}", frame.node);
    Ok(())
  }

  fn visit_node(&mut self, frame: &Frame) -> Result<()> {
    self.context.hash_node(frame.node)?;
    self.check_padding(frame)?;
    let offset = self.context.slot_offset(frame.parent, frame.position);
    if !self.matches(offset)? {
      error!("node {} does not match node {}.{} @{offset}", frame.node, frame.parent, frame.position);
      return Err(Error::NodeMismatch { node: frame.node, parent: frame.parent, slot: frame.position, offset });
    }
    debug!("node {} = node {}.{} @{offset}", frame.node, frame.parent, frame.position);
    Ok(())
  }
}
