use sha2::Digest;

/// Fixed-size digest used for both leaf and internal node hashes.
pub trait HashFunction {
  /// Digest length `H` in bytes. Constant for the lifetime of the hash function.
  fn digest_size(&self) -> usize;

  /// Writes the digest of `data` into `out`, which is exactly [`HashFunction::digest_size`] bytes long.
  fn digest(&self, data: &[u8], out: &mut [u8]);
}

/// Built-in hash functions. The choice is not recorded in the hash-store, so it must be supplied again for every
/// operation on the same store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Algorithm {
  #[default]
  Blake3,
  Sha256,
}

impl HashFunction for Algorithm {
  fn digest_size(&self) -> usize {
    match self {
      Algorithm::Blake3 => blake3::OUT_LEN,
      Algorithm::Sha256 => 32,
    }
  }

  fn digest(&self, data: &[u8], out: &mut [u8]) {
    match self {
      Algorithm::Blake3 => out.copy_from_slice(blake3::hash(data).as_bytes()),
      Algorithm::Sha256 => out.copy_from_slice(&sha2::Sha256::digest(data)),
    }
  }
}

impl std::fmt::Display for Algorithm {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      Algorithm::Blake3 => "blake3",
      Algorithm::Sha256 => "sha256",
    })
  }
}
