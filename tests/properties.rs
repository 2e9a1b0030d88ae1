use merkle_file::{Algorithm, Error, MemoryBlocks, MemoryHashStore, MerkleTree};
use proptest::prelude::*;

fn full_update(k: u8, block_size: usize, data: &[u8]) -> Vec<u8> {
  let store = MemoryHashStore::new();
  let blocks = MemoryBlocks::with_bytes(data.to_vec(), block_size).unwrap();
  let mut tree = MerkleTree::new(k, blocks, store.clone(), Algorithm::Blake3).unwrap();
  let total = tree.block_count().unwrap();
  tree.update(0, total - 1).unwrap();
  store.to_vec().unwrap()
}

type MemoryTree = MerkleTree<MemoryBlocks, MemoryHashStore>;

fn tree_over(k: u8, block_size: usize, data: &[u8]) -> (MemoryTree, MemoryBlocks, MemoryHashStore) {
  let blocks = MemoryBlocks::with_bytes(data.to_vec(), block_size).unwrap();
  let store = MemoryHashStore::new();
  (MerkleTree::new(k, blocks.clone(), store.clone(), Algorithm::Blake3).unwrap(), blocks, store)
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  #[test]
  fn update_then_verify_succeeds(
    k in 2u8..=9,
    block_size in 1usize..=16,
    data in proptest::collection::vec(any::<u8>(), 1..600),
  ) {
    let (mut tree, _, _) = tree_over(k, block_size, &data);
    let total = tree.block_count().unwrap();
    let written = tree.update(0, total - 1).unwrap();
    let verified = tree.verify(0, total - 1).unwrap();
    prop_assert_eq!(written, verified);
  }

  #[test]
  fn range_update_is_local_and_idempotent(
    k in 2u8..=6,
    data in proptest::collection::vec(any::<u8>(), 8..400),
    a in any::<prop::sample::Index>(),
    b in any::<prop::sample::Index>(),
    fill in any::<u8>(),
  ) {
    let block_size = 4;
    let (mut tree, blocks, store) = tree_over(k, block_size, &data);
    let total = tree.block_count().unwrap();
    tree.update(0, total - 1).unwrap();

    let (from, to) = {
      let (a, b) = (a.index(total as usize) as u64, b.index(total as usize) as u64);
      (a.min(b), a.max(b))
    };
    let start = from as usize * block_size;
    let end = ((to as usize + 1) * block_size).min(data.len());
    blocks.write_at(start, &vec![fill; end - start]).unwrap();

    // only the modified range fails verification
    if from > 0 {
      prop_assert!(tree.verify(0, from - 1).is_ok());
    }
    if to + 1 < total {
      prop_assert!(tree.verify(to + 1, total - 1).is_ok());
    }

    tree.update(from, to).unwrap();
    let after = store.to_vec().unwrap();
    let current = blocks.bytes().read().unwrap().clone();
    prop_assert_eq!(&full_update(k, block_size, &current), &after);

    tree.update(from, to).unwrap();
    prop_assert_eq!(after, store.to_vec().unwrap());
  }

  #[test]
  fn truncate_equals_full_update(
    k in 2u8..=6,
    block_size in 1usize..=8,
    data in proptest::collection::vec(any::<u8>(), 2..500),
    cut in any::<prop::sample::Index>(),
  ) {
    let (mut tree, blocks, store) = tree_over(k, block_size, &data);
    let total = tree.block_count().unwrap();
    tree.update(0, total - 1).unwrap();

    let new_len = 1 + cut.index(data.len() - 1);
    blocks.truncate(new_len).unwrap();
    let new_last = (new_len.div_ceil(block_size) - 1) as u64;
    tree.truncate(new_last, new_len % block_size != 0).unwrap();

    prop_assert_eq!(full_update(k, block_size, &data[..new_len]), store.to_vec().unwrap());
  }

  #[test]
  fn flipped_bit_is_reported_at_its_block(
    k in 2u8..=6,
    data in proptest::collection::vec(any::<u8>(), 1..300),
    at in any::<prop::sample::Index>(),
    bit in 0u8..8,
  ) {
    let block_size = 5;
    let (mut tree, blocks, _) = tree_over(k, block_size, &data);
    let total = tree.block_count().unwrap();
    tree.update(0, total - 1).unwrap();

    let offset = at.index(data.len());
    blocks.bytes().write().unwrap()[offset] ^= 1u8 << bit;
    match tree.verify(0, total - 1) {
      Err(Error::BlockMismatch { block, .. }) => prop_assert_eq!((offset / block_size) as u64, block),
      other => prop_assert!(false, "unexpected {:?}", other),
    }
  }
}
