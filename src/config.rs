use crate::{Algorithm, Error, Result};

/// Branching factors accepted by the command line: powers of two, for which depth is computed with integer
/// arithmetic only.
pub const SUPPORTED_K: [u8; 7] = [2, 4, 8, 16, 32, 64, 128];

/// Parameters shared by every operation on the same hash-store. None of them are recorded in the store itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Branching factor, also the number of blocks per leaf.
  pub k: u8,
  /// Data block size in bytes.
  pub block_size: usize,
  pub algorithm: Algorithm,
}

impl Default for Config {
  fn default() -> Self {
    Config { k: 4, block_size: 4096, algorithm: Algorithm::Blake3 }
  }
}

impl Config {
  pub fn new(k: u8, block_size: usize, algorithm: Algorithm) -> Result<Self> {
    let config = Config { k, block_size, algorithm };
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.k < 2 {
      return Err(Error::InvalidBranchingFactor(self.k as u32));
    }
    if self.block_size == 0 {
      return Err(Error::InvalidBlockSize(self.block_size));
    }
    Ok(())
  }

  /// Whether `k` is one of [`SUPPORTED_K`].
  pub fn is_supported_k(k: u32) -> bool {
    SUPPORTED_K.iter().any(|s| *s as u32 == k)
  }
}
