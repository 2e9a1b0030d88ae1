//! A k-ary Merkle hash tree over the fixed-size blocks of a data file.
//!
//! The tree itself is persisted as a flat array of node records in a second file (the hash-store). Each node
//! owns `k` digest slots; node `i` occupies bytes `[H*k*i, H*k*(i+1))` where `H` is the digest size. Nodes are
//! never linked by pointers: every index is recomputed from `k`, the tree depth and the sibling position (see
//! [`formula`]), and every operation is a single range-pruned, post-order walk over an explicit stack (see
//! [`visitor`]).
//!
//! ```no_run
//! use merkle_file::{Algorithm, FileBlocks, FileHashStore, MerkleTree};
//!
//! let blocks = FileBlocks::open("data.bin", 4096)?;
//! let store = FileHashStore::create("data.bin.hashes")?;
//! let mut tree = MerkleTree::new(4, blocks, store, Algorithm::Blake3)?;
//! let total = tree.block_count()?;
//! tree.update(0, total - 1)?;
//! tree.verify(0, total - 1)?;
//! # Ok::<(), merkle_file::Error>(())
//! ```

use std::sync::PoisonError;

pub mod config;
pub mod formula;
pub mod hasher;
pub mod hashtree;
pub mod storage;
pub mod visitor;

pub use config::Config;
pub use formula::KaryTree;
pub use hasher::{Algorithm, HashFunction};
pub use hashtree::{MerkleTree, Summary};
pub use storage::{BlockSource, FileBlocks, FileHashStore, HashStore, MemoryBlocks, MemoryHashStore};
pub use visitor::{Frame, Visitor, visit};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error("block {block} hash does not match node {node}.{slot} at offset {offset}")]
  BlockMismatch { block: u64, node: u64, slot: usize, offset: u64 },

  #[error("node {node} hash does not match node {parent}.{slot} at offset {offset}")]
  NodeMismatch { node: u64, parent: u64, slot: usize, offset: u64 },

  #[error("node {node}.{slot} at offset {offset} expected zeroes")]
  NonZeroPadding { node: u64, slot: usize, offset: u64 },

  #[error("invalid block range {from}..={to} for {blocks} blocks")]
  InvalidRange { from: u64, to: u64, blocks: u64 },

  #[error("cannot truncate to last block {new_last} with {blocks} blocks in the source")]
  InvalidTruncation { new_last: u64, blocks: u64 },

  #[error("the block source is empty")]
  NoBlocks,

  #[error("invalid branching factor k={0}: must be at least 2")]
  InvalidBranchingFactor(u32),

  #[error("invalid block size {0}")]
  InvalidBlockSize(usize),

  #[error("hash tree with k={k} over {blocks} blocks exceeds 64-bit addressing")]
  TreeTooLarge { k: u8, blocks: u64 },

  #[error("storage lock poisoned")]
  Poisoned,
}

impl Error {
  /// Whether this error reports a hash that differs from the stored one, rather than a failure to compute it.
  pub fn is_integrity(&self) -> bool {
    matches!(self, Error::BlockMismatch { .. } | Error::NodeMismatch { .. } | Error::NonZeroPadding { .. })
  }
}

impl<T> From<PoisonError<T>> for Error {
  fn from(_: PoisonError<T>) -> Self {
    Error::Poisoned
  }
}

/// Deterministic pseudo-random sequence used to fill test and benchmark blocks.
pub fn splitmix64(x: u64) -> u64 {
  let mut z = x.wrapping_add(0x9e3779b97f4a7c15);
  z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
  z ^ (z >> 31)
}

/// Runs `f` with a subscriber that collects warnings and errors, returning them as plain text.
#[cfg(test)]
pub(crate) fn capture_warnings<R>(f: impl FnOnce() -> R) -> (R, String) {
  use std::sync::{Arc, Mutex};

  #[derive(Clone, Default)]
  struct Buffer(Arc<Mutex<Vec<u8>>>);

  impl std::io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  let buffer = Buffer::default();
  let writer = buffer.clone();
  let subscriber = tracing_subscriber::fmt()
    .with_writer(move || writer.clone())
    .with_max_level(tracing::Level::WARN)
    .with_ansi(false)
    .finish();
  let result = tracing::subscriber::with_default(subscriber, f);
  let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
  (result, logs)
}
