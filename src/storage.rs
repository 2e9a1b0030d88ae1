//! The two collaborators every tree operation works against: a read-only source of fixed-size data blocks and a
//! random-access byte store holding the node records. Each comes with a file backend and a shared in-memory one.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::{Error, Result};

/// Fixed-size blocks of the data being hashed. The last block may be short on the medium but is always presented
/// zero-padded to [`BlockSource::block_size`].
pub trait BlockSource {
  fn block_size(&self) -> usize;

  /// Number of blocks, `ceil(data length / block_size)`.
  fn block_count(&mut self) -> Result<u64>;

  /// Fills `buf` (exactly `block_size` bytes) with the content of `block`, zero-padding whatever lies past the end of
  /// the data, and returns the number of bytes actually read.
  fn read_block(&mut self, block: u64, buf: &mut [u8]) -> Result<usize>;
}

/// Random-access byte storage for node records. Reads past the end yield zeroes, writes past the end extend it.
pub trait HashStore {
  fn len(&mut self) -> Result<u64>;

  fn is_empty(&mut self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Truncates or zero-extends the store to exactly `len` bytes.
  fn set_len(&mut self, len: u64) -> Result<()>;

  fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

  fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

  /// Makes preceding writes durable.
  fn flush(&mut self) -> Result<()> {
    Ok(())
  }
}

fn check_block_size(block_size: usize) -> Result<usize> {
  if block_size == 0 { Err(Error::InvalidBlockSize(block_size)) } else { Ok(block_size) }
}

/// Reads until `buf` is full or the end of the reader is reached, zero-filling the rest.
fn read_padded<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
  let mut filled = 0;
  while filled < buf.len() {
    match r.read(&mut buf[filled..]) {
      Ok(0) => break,
      Ok(n) => filled += n,
      Err(e) if e.kind() == ErrorKind::Interrupted => continue,
      Err(e) => return Err(e.into()),
    }
  }
  buf[filled..].fill(0);
  Ok(filled)
}

/// Copies `data[offset..]` into `buf`, zero-filling whatever `data` does not cover.
fn copy_padded(data: &[u8], offset: u64, buf: &mut [u8]) -> usize {
  let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
  let n = (data.len() - start).min(buf.len());
  buf[..n].copy_from_slice(&data[start..start + n]);
  buf[n..].fill(0);
  n
}

fn memory_offset(offset: u64, len: usize) -> Result<usize> {
  usize::try_from(offset)
    .ok()
    .and_then(|start| start.checked_add(len))
    .ok_or_else(|| Error::Io(std::io::Error::new(ErrorKind::OutOfMemory, "offset exceeds address space")))
}

/// Data file opened read-only.
#[derive(Debug)]
pub struct FileBlocks {
  file: File,
  block_size: usize,
}

impl FileBlocks {
  pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
    let block_size = check_block_size(block_size)?;
    let file = File::open(path)?;
    Ok(FileBlocks { file, block_size })
  }

  /// Length of the data file in bytes.
  pub fn data_len(&self) -> Result<u64> {
    Ok(self.file.metadata()?.len())
  }
}

impl BlockSource for FileBlocks {
  fn block_size(&self) -> usize {
    self.block_size
  }

  fn block_count(&mut self) -> Result<u64> {
    Ok(self.data_len()?.div_ceil(self.block_size as u64))
  }

  fn read_block(&mut self, block: u64, buf: &mut [u8]) -> Result<usize> {
    debug_assert_eq!(self.block_size, buf.len());
    // past the end of the file a read yields nothing, so the block is all zeroes
    let offset = block.saturating_mul(self.block_size as u64);
    self.file.seek(SeekFrom::Start(offset))?;
    read_padded(&mut self.file, buf)
  }
}

/// Hash-store backed by a regular file. There is no header: the file is nothing but node records.
#[derive(Debug)]
pub struct FileHashStore {
  file: File,
}

impl FileHashStore {
  /// Opens the store for reading and writing, creating an empty one if it does not exist.
  pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
    let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
    Ok(FileHashStore { file })
  }

  /// Opens an existing store for reading and writing.
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    Ok(FileHashStore { file })
  }

  /// Opens an existing store for verification. Any write fails with an I/O error.
  pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
    let file = File::open(path)?;
    Ok(FileHashStore { file })
  }
}

impl HashStore for FileHashStore {
  fn len(&mut self) -> Result<u64> {
    Ok(self.file.metadata()?.len())
  }

  fn set_len(&mut self, len: u64) -> Result<()> {
    Ok(self.file.set_len(len)?)
  }

  fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
    self.file.seek(SeekFrom::Start(offset))?;
    read_padded(&mut self.file, buf)?;
    Ok(())
  }

  fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
    self.file.seek(SeekFrom::Start(offset))?;
    Ok(self.file.write_all(data)?)
  }

  fn flush(&mut self) -> Result<()> {
    self.file.flush()?;
    Ok(self.file.sync_data()?)
  }
}

/// In-memory data blocks. Clones share the same bytes, so a test can keep a handle to mutate or inspect them while
/// a tree owns another.
#[derive(Debug, Clone)]
pub struct MemoryBlocks {
  data: Arc<RwLock<Vec<u8>>>,
  block_size: usize,
}

impl MemoryBlocks {
  pub fn new(block_size: usize) -> Result<Self> {
    Self::with_bytes(Vec::new(), block_size)
  }

  pub fn with_bytes(data: Vec<u8>, block_size: usize) -> Result<Self> {
    let block_size = check_block_size(block_size)?;
    Ok(MemoryBlocks { data: Arc::new(RwLock::new(data)), block_size })
  }

  pub fn bytes(&self) -> Arc<RwLock<Vec<u8>>> {
    self.data.clone()
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.data.read()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  pub fn append(&self, bytes: &[u8]) -> Result<()> {
    self.data.write()?.extend_from_slice(bytes);
    Ok(())
  }

  /// Overwrites bytes starting at `offset`, which must lie within the current data.
  pub fn write_at(&self, offset: usize, bytes: &[u8]) -> Result<()> {
    let mut data = self.data.write()?;
    let end = offset.checked_add(bytes.len()).filter(|end| *end <= data.len()).ok_or_else(|| {
      Error::Io(std::io::Error::new(ErrorKind::UnexpectedEof, format!("write at {offset} beyond {}", data.len())))
    })?;
    data[offset..end].copy_from_slice(bytes);
    Ok(())
  }

  pub fn truncate(&self, len: usize) -> Result<()> {
    self.data.write()?.truncate(len);
    Ok(())
  }
}

impl BlockSource for MemoryBlocks {
  fn block_size(&self) -> usize {
    self.block_size
  }

  fn block_count(&mut self) -> Result<u64> {
    Ok((self.len()? as u64).div_ceil(self.block_size as u64))
  }

  fn read_block(&mut self, block: u64, buf: &mut [u8]) -> Result<usize> {
    debug_assert_eq!(self.block_size, buf.len());
    let offset = block.saturating_mul(self.block_size as u64);
    Ok(copy_padded(&self.data.read()?, offset, buf))
  }
}

/// In-memory hash-store. Clones share the same bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryHashStore {
  data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryHashStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn bytes(&self) -> Arc<RwLock<Vec<u8>>> {
    self.data.clone()
  }

  /// Snapshot of the current content.
  pub fn to_vec(&self) -> Result<Vec<u8>> {
    Ok(self.data.read()?.clone())
  }
}

impl HashStore for MemoryHashStore {
  fn len(&mut self) -> Result<u64> {
    Ok(self.data.read()?.len() as u64)
  }

  fn set_len(&mut self, len: u64) -> Result<()> {
    let len = memory_offset(len, 0)?;
    self.data.write()?.resize(len, 0);
    Ok(())
  }

  fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
    copy_padded(&self.data.read()?, offset, buf);
    Ok(())
  }

  fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
    let end = memory_offset(offset, data.len())?;
    let mut bytes = self.data.write()?;
    if bytes.len() < end {
      bytes.resize(end, 0);
    }
    bytes[end - data.len()..end].copy_from_slice(data);
    Ok(())
  }
}
