use tracing::debug;

use super::Context;
use crate::{BlockSource, Frame, HashFunction, HashStore, Result, Visitor};

/// Writes fresh digests for every visited block and node.
pub(super) struct Updater<'a, B, S, H> {
  context: Context<'a, B, S, H>,
}

impl<'a, B: BlockSource, S: HashStore, H: HashFunction> Updater<'a, B, S, H> {
  pub fn new(context: Context<'a, B, S, H>) -> Self {
    Updater { context }
  }

  pub fn counts(&self) -> (u64, u64) {
    self.context.counts()
  }
}

impl<B: BlockSource, S: HashStore, H: HashFunction> Visitor for Updater<'_, B, S, H> {
  fn visit_leaf(&mut self, frame: &Frame, block: u64, position: usize) -> Result<()> {
    let offset = self.context.update_leaf(frame.node, block, position)?;
    debug!("block {block} -> node {}.{position} @{offset}", frame.node);
    Ok(())
  }

  fn visit_node(&mut self, frame: &Frame) -> Result<()> {
    let offset = self.context.update_node(frame.node, frame.parent, frame.position)?;
    debug!("node {} -> node {}.{} @{offset}", frame.node, frame.parent, frame.position);
    Ok(())
  }
}
