use tracing::debug;

use super::Context;
use crate::{BlockSource, Frame, HashFunction, HashStore, Result, Visitor};

/// Walks the path from the root down to the new last block, dropping everything to the right of it.
pub(super) struct Truncator<'a, B, S, H> {
  context: Context<'a, B, S, H>,
  partial: bool,
}

impl<'a, B: BlockSource, S: HashStore, H: HashFunction> Truncator<'a, B, S, H> {
  pub fn new(context: Context<'a, B, S, H>, partial: bool) -> Self {
    Truncator { context, partial }
  }

  pub fn counts(&self) -> (u64, u64) {
    self.context.counts()
  }
}

impl<B: BlockSource, S: HashStore, H: HashFunction> Visitor for Truncator<'_, B, S, H> {
  fn visit_leaf(&mut self, frame: &Frame, block: u64, position: usize) -> Result<()> {
    if self.partial {
      let offset = self.context.update_leaf(frame.node, block, position)?;
      debug!("block {block} -> node {}.{position} @{offset}", frame.node);
    }
    self.context.clear_slots(frame.node, position + 1)
  }

  fn visit_node(&mut self, frame: &Frame) -> Result<()> {
    let offset = self.context.update_node(frame.node, frame.parent, frame.position)?;
    debug!("node {} -> node {}.{} @{offset}", frame.node, frame.parent, frame.position);
    self.context.clear_slots(frame.parent, frame.position + 1)
  }

  fn visit_root(&mut self, frame: &Frame) -> Result<()> {
    let offset = self.context.update_node(frame.node, frame.parent, frame.position)?;
    let len = self.context.slot_offset(frame.parent, frame.position + 1);
    debug!("root {} -> node {}.{} @{offset}, {len} bytes", frame.node, frame.parent, frame.position);
    self.context.store.set_len(len)
  }
}
