use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use merkle_file::config::SUPPORTED_K;
use merkle_file::{Algorithm, BlockSource, Config, Error, FileBlocks, FileHashStore, MerkleTree};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "merkle-file")]
#[command(about = "Maintain a k-ary hash tree over the blocks of a file")]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Hash the blocks in range (the whole file by default) into the hash-store, creating it if needed
  Write {
    #[command(flatten)]
    files: Files,
    #[arg(short, long, num_args = 2, value_names = ["FROM", "TO"])]
    range: Option<Vec<u64>>,
  },
  /// Check the blocks in range (the whole file by default) against the hash-store
  Verify {
    #[command(flatten)]
    files: Files,
    #[arg(short, long, num_args = 2, value_names = ["FROM", "TO"])]
    range: Option<Vec<u64>>,
  },
  /// Shrink the data file and its hash-store together
  Truncate {
    #[command(flatten)]
    files: Files,
    /// Keep blocks up to TO (FROM is ignored)
    #[arg(short, long, num_args = 2, value_names = ["FROM", "TO"], conflicts_with = "size", required_unless_present = "size")]
    range: Option<Vec<u64>>,
    /// New length of the data file in bytes
    #[arg(long)]
    size: Option<u64>,
  },
  /// Print the stored root digest in hex
  Root {
    #[command(flatten)]
    files: Files,
  },
}

#[derive(Args)]
struct Files {
  /// Data file
  data: PathBuf,
  /// Hash-store file
  hashes: PathBuf,
  /// Block size in bytes
  #[arg(short, long, default_value_t = Config::default().block_size)]
  block_size: usize,
  /// Branching factor
  #[arg(short = 'k', long = "branching", default_value_t = Config::default().k, value_parser = parse_k)]
  k: u8,
  #[arg(short, long, value_enum, default_value_t = Algorithm::Blake3)]
  algorithm: Algorithm,
  /// Log every block and node visited
  #[arg(short, long)]
  verbose: bool,
}

impl Files {
  fn config(&self) -> Result<Config, Failure> {
    Config::new(self.k, self.block_size, self.algorithm).map_err(Failure::Argument)
  }
}

fn parse_k(s: &str) -> Result<u8, String> {
  let k = s.parse::<u32>().map_err(|e| e.to_string())?;
  if Config::is_supported_k(k) { Ok(k as u8) } else { Err(format!("k must be one of {SUPPORTED_K:?}")) }
}

/// Reasons for a non-zero exit, one code each.
#[derive(Debug)]
enum Failure {
  DataOpen(Error),
  HashOpen(Error),
  Stat(Error),
  Argument(Error),
  Traversal(Error),
  DataTruncate(std::io::Error),
}

impl Failure {
  fn code(&self) -> u8 {
    match self {
      Failure::DataOpen(_) => 2,
      Failure::HashOpen(_) => 3,
      Failure::Stat(_) => 4,
      Failure::Argument(_) => 5,
      Failure::Traversal(_) => 6,
      Failure::DataTruncate(_) => 7,
    }
  }

  /// Classifies an error returned by a tree operation.
  fn from_operation(e: Error) -> Self {
    match e {
      Error::InvalidRange { .. }
      | Error::InvalidTruncation { .. }
      | Error::NoBlocks
      | Error::InvalidBranchingFactor(_)
      | Error::InvalidBlockSize(_)
      | Error::TreeTooLarge { .. } => Failure::Argument(e),
      _ => Failure::Traversal(e),
    }
  }
}

impl std::fmt::Display for Failure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Failure::DataOpen(e) => write!(f, "cannot open data file: {e}"),
      Failure::HashOpen(e) => write!(f, "cannot open hash file: {e}"),
      Failure::Stat(e) => write!(f, "cannot stat data file: {e}"),
      Failure::Argument(e) => write!(f, "{e}"),
      Failure::Traversal(e) => write!(f, "{e}"),
      Failure::DataTruncate(e) => write!(f, "cannot truncate data file: {e}"),
    }
  }
}

fn main() -> ExitCode {
  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(e) => {
      let usage = e.use_stderr();
      let _ = e.print();
      return if usage { ExitCode::from(1) } else { ExitCode::SUCCESS };
    }
  };

  let (op, files) = match &cli.command {
    Command::Write { files, .. } => ("write", files),
    Command::Verify { files, .. } => ("verify", files),
    Command::Truncate { files, .. } => ("truncate", files),
    Command::Root { files } => ("root", files),
  };
  init_tracing(files.verbose);

  let result = match &cli.command {
    Command::Write { files, range } => write(files, range.as_deref()),
    Command::Verify { files, range } => verify(files, range.as_deref()),
    Command::Truncate { files, range, size } => truncate(files, range.as_deref(), *size),
    Command::Root { files } => root(files),
  };
  match result {
    Ok(()) => {
      if op != "root" {
        println!("hash {op} successful");
      }
      ExitCode::SUCCESS
    }
    Err(failure) => {
      error!("hash {op} failed: {failure}");
      ExitCode::from(failure.code())
    }
  }
}

fn init_tracing(verbose: bool) {
  let level = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

/// Opens the data file and counts its blocks.
fn open_blocks(path: &Path, block_size: usize) -> Result<(FileBlocks, u64), Failure> {
  let mut blocks = FileBlocks::open(path, block_size).map_err(Failure::DataOpen)?;
  let total = blocks.block_count().map_err(Failure::Stat)?;
  Ok((blocks, total))
}

/// Inclusive block range from `-r FROM TO`, the whole file if absent.
fn block_range(range: Option<&[u64]>, total: u64) -> Result<(u64, u64), Failure> {
  let (from, to) = match (range, total.checked_sub(1)) {
    (Some(&[from, to]), _) => (from, to),
    (None, Some(last)) => (0, last),
    _ => return Err(Failure::Argument(Error::NoBlocks)),
  };
  if from > to || to >= total {
    return Err(Failure::Argument(Error::InvalidRange { from, to, blocks: total }));
  }
  Ok((from, to))
}

fn write(files: &Files, range: Option<&[u64]>) -> Result<(), Failure> {
  let config = files.config()?;
  let (blocks, total) = open_blocks(&files.data, config.block_size)?;
  let (from, to) = block_range(range, total)?;
  let store = FileHashStore::create(&files.hashes).map_err(Failure::HashOpen)?;
  let mut tree = MerkleTree::with_config(&config, blocks, store).map_err(Failure::Argument)?;
  tree.update(from, to).map_err(Failure::from_operation)?;
  Ok(())
}

fn verify(files: &Files, range: Option<&[u64]>) -> Result<(), Failure> {
  let config = files.config()?;
  let (blocks, total) = open_blocks(&files.data, config.block_size)?;
  let (from, to) = block_range(range, total)?;
  let store = FileHashStore::open_read_only(&files.hashes).map_err(Failure::HashOpen)?;
  let mut tree = MerkleTree::with_config(&config, blocks, store).map_err(Failure::Argument)?;
  tree.verify(from, to).map_err(Failure::from_operation)?;
  Ok(())
}

fn truncate(files: &Files, range: Option<&[u64]>, size: Option<u64>) -> Result<(), Failure> {
  let config = files.config()?;
  let block_size = config.block_size as u64;
  let (blocks, total) = open_blocks(&files.data, config.block_size)?;
  let len = blocks.data_len().map_err(Failure::Stat)?;
  drop(blocks);

  let (new_len, new_last, partial) = match (range, size) {
    (Some([_, to]), _) => (to.saturating_add(1).saturating_mul(block_size), *to, false),
    (_, Some(size)) if size > 0 => (size, size.div_ceil(block_size) - 1, size % block_size != 0),
    _ => return Err(Failure::Argument(Error::InvalidTruncation { new_last: 0, blocks: total })),
  };
  if new_len >= len {
    return Err(Failure::Argument(Error::InvalidTruncation { new_last, blocks: total }));
  }

  let store = FileHashStore::open(&files.hashes).map_err(Failure::HashOpen)?;
  let data = OpenOptions::new().write(true).open(&files.data).map_err(Failure::DataTruncate)?;
  data.set_len(new_len).map_err(Failure::DataTruncate)?;
  drop(data);

  let (blocks, _) = open_blocks(&files.data, config.block_size)?;
  let mut tree = MerkleTree::with_config(&config, blocks, store).map_err(Failure::Argument)?;
  tree.truncate(new_last, partial).map_err(Failure::from_operation)?;
  Ok(())
}

fn root(files: &Files) -> Result<(), Failure> {
  let config = files.config()?;
  let (blocks, total) = open_blocks(&files.data, config.block_size)?;
  let store = FileHashStore::open_read_only(&files.hashes).map_err(Failure::HashOpen)?;
  let mut tree = MerkleTree::with_config(&config, blocks, store).map_err(Failure::Argument)?;
  let root = tree.root(total).map_err(Failure::from_operation)?;
  println!("{}", hex::encode(root));
  Ok(())
}
