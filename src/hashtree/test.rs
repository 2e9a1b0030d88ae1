use super::*;
use crate::{MemoryBlocks, MemoryHashStore, splitmix64};

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
  (0..len.div_ceil(8) as u64).flat_map(|i| splitmix64(seed ^ i).to_le_bytes()).take(len).collect()
}

type MemoryTree = MerkleTree<MemoryBlocks, MemoryHashStore>;

fn memory_tree(k: u8, block_size: usize, data: Vec<u8>) -> (MemoryTree, MemoryBlocks, MemoryHashStore) {
  let blocks = MemoryBlocks::with_bytes(data, block_size).unwrap();
  let store = MemoryHashStore::new();
  let tree = MerkleTree::new(k, blocks.clone(), store.clone(), Algorithm::Blake3).unwrap();
  (tree, blocks, store)
}

/// Hash-store content after a full update of `data` on an empty store.
fn fresh_store(k: u8, block_size: usize, data: Vec<u8>) -> Vec<u8> {
  let (mut tree, _, store) = memory_tree(k, block_size, data);
  let total = tree.block_count().unwrap();
  tree.update(0, total - 1).unwrap();
  store.to_vec().unwrap()
}

fn h(data: &[u8]) -> Vec<u8> {
  blake3::hash(data).as_bytes().to_vec()
}

#[test]
fn update_writes_expected_layout() {
  let data = random_bytes(16, 1);
  let (mut tree, _, store) = memory_tree(2, 4, data.clone());
  let summary = tree.update(0, 3).unwrap();

  let node0 = [h(&data[0..4]), h(&data[4..8])].concat();
  let node2 = [h(&data[8..12]), h(&data[12..16])].concat();
  let node1 = [h(&node0), h(&node2)].concat();
  let root = h(&node1);
  let expected = [node0, node1, node2, root.clone()].concat();
  assert_eq!(expected, store.to_vec().unwrap());
  assert_eq!(Summary { depth: 2, blocks: 4, nodes: 3, root: root.clone() }, summary);
  assert_eq!(root, tree.root(4).unwrap());
}

#[test]
fn single_leaf_tree_is_its_own_root() {
  let (mut tree, _, store) = memory_tree(4, 4, vec![1, 2, 3]);
  let summary = tree.update(0, 0).unwrap();

  let leaf = [h(&[1, 2, 3, 0]), vec![0u8; 3 * 32]].concat();
  let expected = [leaf.clone(), h(&leaf)].concat();
  assert_eq!(expected, store.to_vec().unwrap());
  assert_eq!(1, summary.depth);
  assert_eq!(1, summary.nodes);
  tree.verify(0, 0).unwrap();
}

#[test]
fn update_then_verify() {
  for k in [2u8, 3, 4, 16] {
    for total in [1u64, 2, 5, 16, 17, 38, 100] {
      let (mut tree, _, store) = memory_tree(k, 16, random_bytes(total as usize * 16 - 3, total));
      let summary = tree.update(0, total - 1).unwrap();
      assert_eq!(total, summary.blocks);
      assert_eq!(tree.tree().leaf_for_block(total - 1) + 1, summary.nodes, "k={k}, total={total}");
      assert_eq!(tree.store_len(total).unwrap(), store.to_vec().unwrap().len() as u64);
      assert_eq!(summary, tree.verify(0, total - 1).unwrap());
    }
  }
}

#[test]
fn verify_reports_corrupted_block() {
  let (mut tree, blocks, _) = memory_tree(4, 8, random_bytes(8 * 50, 2));
  tree.update(0, 49).unwrap();
  blocks.bytes().write().unwrap()[9 * 8 + 3] ^= 0xFF;

  match tree.verify(0, 49) {
    Err(Error::BlockMismatch { block, node, slot, offset }) => {
      assert_eq!(9, block);
      assert_eq!(tree.tree().leaf_for_block(9), node);
      assert_eq!(1, slot);
      assert_eq!((node * 4 + 1) * 32, offset);
    }
    other => panic!("unexpected {other:?}"),
  }
  // blocks outside the range are not looked at
  tree.verify(12, 49).unwrap();
  tree.verify(0, 7).unwrap();
}

#[test]
fn verify_reports_corrupted_root() {
  let (mut tree, _, store) = memory_tree(2, 8, random_bytes(8 * 8, 3));
  tree.update(0, 7).unwrap();
  let (node, slot) = tree.tree().root_slot(8);
  let offset = slot_offset(tree.tree(), node, slot, 32);
  store.bytes().write().unwrap()[offset as usize] ^= 1;

  match tree.verify(3, 3) {
    Err(Error::NodeMismatch { node, parent, slot, offset: at }) => {
      assert_eq!((3, 7, 0, offset), (node, parent, slot, at));
    }
    other => panic!("unexpected {other:?}"),
  }
}

#[test]
fn verify_reports_nonzero_padding() {
  // 5 blocks with k=4: the second leaf (node 2) only uses slot 0
  let (mut tree, _, store) = memory_tree(4, 8, random_bytes(8 * 5, 4));
  tree.update(0, 4).unwrap();
  store.bytes().write().unwrap()[(2 * 4 + 2) * 32 + 5] = 1;

  match tree.verify(4, 4) {
    Err(e @ Error::NonZeroPadding { .. }) => {
      assert!(e.is_integrity());
      assert!(matches!(e, Error::NonZeroPadding { node: 2, slot: 2, offset: 320 }));
    }
    other => panic!("unexpected {other:?}"),
  }
  // the first leaf is fully used and its path does not include node 2
  tree.verify(0, 3).unwrap();
}

#[test]
fn partial_update_matches_full_rebuild() {
  let (mut tree, blocks, store) = memory_tree(3, 8, random_bytes(8 * 40, 5));
  tree.update(0, 39).unwrap();
  blocks.write_at(8 * 21, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
  blocks.write_at(8 * 22, &[9]).unwrap();

  let before = store.to_vec().unwrap();
  let summary = tree.update(21, 22).unwrap();
  assert_eq!(2, summary.blocks);
  let after = store.to_vec().unwrap();
  assert_ne!(before, after);

  let data = blocks.bytes().read().unwrap().clone();
  assert_eq!(fresh_store(3, 8, data), after);
  tree.verify(0, 39).unwrap();

  // idempotent
  tree.update(21, 22).unwrap();
  assert_eq!(after, store.to_vec().unwrap());
}

#[test]
fn disjoint_updates_do_not_disturb_each_other() {
  for k in [2u8, 3, 4] {
    let (mut tree, _, _) = memory_tree(k, 8, random_bytes(8 * 30, 11));
    tree.update(0, 9).unwrap();
    tree.update(20, 29).unwrap();
    tree.verify(0, 9).unwrap();
    tree.verify(20, 29).unwrap();
  }
}

#[test]
fn growing_then_updating_everything_matches_full_rebuild() {
  let (mut tree, blocks, store) = memory_tree(2, 8, random_bytes(8 * 4, 6));
  tree.update(0, 3).unwrap();
  blocks.append(&random_bytes(8 * 5 + 1, 7)).unwrap();
  let summary = tree.update(0, 9).unwrap();
  assert_eq!(4, summary.depth);

  let data = blocks.bytes().read().unwrap().clone();
  assert_eq!(fresh_store(2, 8, data), store.to_vec().unwrap());
}

#[test]
fn truncate_matches_full_rebuild() {
  let block_size = 4;
  for k in [2u8, 3, 4] {
    for total in 1..=30u64 {
      let data = random_bytes(total as usize * block_size, total * 31 + k as u64);
      for new_total in 1..=total {
        // block aligned, then with a shortened last block
        for cut in [0usize, 1] {
          let new_len = new_total as usize * block_size - cut;
          if new_len == data.len() {
            continue;
          }
          let (mut tree, blocks, store) = memory_tree(k, block_size, data.clone());
          tree.update(0, total - 1).unwrap();
          blocks.truncate(new_len).unwrap();

          let summary = tree.truncate(new_total - 1, cut != 0).unwrap();
          let expected = fresh_store(k, block_size, data[..new_len].to_vec());
          assert_eq!(expected, store.to_vec().unwrap(), "k={k}, total={total}, new_len={new_len}");
          assert_eq!(expected[expected.len() - 32..], summary.root[..]);
          tree.verify(0, new_total - 1).unwrap();
        }
      }
    }
  }
}

#[test]
fn truncate_requires_truncated_source() {
  let (mut tree, _, store) = memory_tree(4, 8, random_bytes(8 * 20, 8));
  tree.update(0, 19).unwrap();
  let before = store.to_vec().unwrap();
  assert!(matches!(tree.truncate(9, false), Err(Error::InvalidTruncation { new_last: 9, blocks: 20 })));
  assert!(matches!(tree.truncate(20, false), Err(Error::InvalidTruncation { new_last: 20, blocks: 20 })));
  assert_eq!(before, store.to_vec().unwrap());
}

#[test]
fn update_after_shrinking_leaves_stale_nodes() {
  let data = random_bytes(9 * 8, 11);
  let (mut tree, blocks, store) = memory_tree(2, 8, data.clone());
  tree.update(0, 8).unwrap();

  blocks.truncate(5 * 8).unwrap();
  let (result, logs) = crate::capture_warnings(|| tree.update(0, 4));
  result.unwrap();
  assert!(logs.contains("stale nodes remain"), "{logs}");
  assert!(matches!(tree.verify(0, 4), Err(Error::NonZeroPadding { node: 5, slot: 1, offset: 352 })));

  tree.truncate(4, false).unwrap();
  tree.verify(0, 4).unwrap();
  assert_eq!(fresh_store(2, 8, data[..5 * 8].to_vec()), store.to_vec().unwrap());

  let (_, logs) = crate::capture_warnings(|| tree.update(0, 4).unwrap());
  assert!(logs.is_empty(), "{logs}");
}

#[test]
fn invalid_arguments_touch_nothing() {
  let (mut tree, _, store) = memory_tree(2, 8, random_bytes(8 * 8, 9));
  assert!(matches!(tree.update(3, 2), Err(Error::InvalidRange { from: 3, to: 2, blocks: 8 })));
  assert!(matches!(tree.update(0, 8), Err(Error::InvalidRange { from: 0, to: 8, blocks: 8 })));
  assert!(matches!(tree.verify(9, 9), Err(Error::InvalidRange { .. })));
  assert!(store.to_vec().unwrap().is_empty());

  let (mut tree, _, store) = memory_tree(2, 8, Vec::new());
  assert!(matches!(tree.update(0, 0), Err(Error::NoBlocks)));
  assert!(matches!(tree.root(0), Err(Error::NoBlocks)));
  assert!(store.to_vec().unwrap().is_empty());
}

#[test]
fn config_and_algorithm() {
  let blocks = MemoryBlocks::with_bytes(random_bytes(100, 10), 16).unwrap();
  let config = Config { k: 8, block_size: 32, algorithm: Algorithm::Sha256 };
  let result = MerkleTree::with_config(&config, blocks.clone(), MemoryHashStore::new());
  assert!(matches!(result, Err(Error::InvalidBlockSize(16))));
  let result = MerkleTree::new(1, blocks.clone(), MemoryHashStore::new(), Algorithm::Blake3);
  assert!(matches!(result, Err(Error::InvalidBranchingFactor(1))));

  let config = Config { block_size: 16, ..config };
  let mut sha = MerkleTree::with_config(&config, blocks.clone(), MemoryHashStore::new()).unwrap();
  let mut blake = MerkleTree::new(8, blocks, MemoryHashStore::new(), Algorithm::Blake3).unwrap();
  let a = sha.update(0, 6).unwrap();
  let b = blake.update(0, 6).unwrap();
  assert_eq!((a.depth, a.blocks, a.nodes), (b.depth, b.blocks, b.nodes));
  assert_ne!(a.root, b.root);
  assert_eq!(64, a.root_hex().len());
}
