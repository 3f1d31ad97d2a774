//! # Index End-to-End Scenarios
//!
//! Exercises the index the way an embedding application would, at a small
//! geometry that makes structural events cheap to provoke: 64-byte blocks,
//! 16 blocks, 8-byte keys and values. At this geometry every leaf holds two
//! pairs and every interior node two separators, so the third insert splits
//! the root and a handful more cascade splits through interior levels.
//!
//! Keys are 8-byte ASCII strings right-padded with NUL.

use oakdb::btree::PayloadKind;
use oakdb::{BTreeIndex, DisplayMode, IndexError, MemStore, MmapStore, Node, NodeType};

const BLOCKSIZE: usize = 64;
const NUM_BLOCKS: u32 = 16;
const KEYSIZE: u32 = 8;
const VALUESIZE: u32 = 8;

fn k(s: &str) -> [u8; 8] {
    assert!(s.len() <= 8);
    let mut key = [0u8; 8];
    key[..s.len()].copy_from_slice(s.as_bytes());
    key
}

fn fresh_store() -> MemStore {
    MemStore::new(BLOCKSIZE, NUM_BLOCKS)
}

fn numbered(i: u32) -> ([u8; 8], [u8; 8]) {
    (k(&format!("k{:03}", i)), k(&format!("v{:03}", i)))
}

/// Walk the subtree rooted at `block`, asserting that every separator key
/// bounds its children: all keys reachable through the pointer left of a
/// separator sort `<=` it, and all keys reachable through the pointer to
/// its right sort `>=` it. Returns the subtree's (min, max) key range.
fn check_separators(store: &mut MemStore, block: u32) -> (Vec<u8>, Vec<u8>) {
    let node = Node::read_from(store, block).unwrap();
    match node
        .payload_kind()
        .expect("traversal reached a non-tree block")
    {
        PayloadKind::Leaf => {
            assert!(node.numkeys() > 0, "empty leaf {block} in a grown tree");
            (
                node.key_at(0).unwrap().to_vec(),
                node.key_at(node.numkeys() - 1).unwrap().to_vec(),
            )
        }
        PayloadKind::Interior => {
            let n = node.numkeys();
            assert!(n > 0, "empty interior node {block}");

            let mut ranges = Vec::with_capacity(n + 1);
            for i in 0..=n {
                let child = node.ptr_at(i).unwrap();
                ranges.push(check_separators(store, child));
            }

            for i in 0..n {
                let separator = node.key_at(i).unwrap();
                let left_max = ranges[i].1.as_slice();
                let right_min = ranges[i + 1].0.as_slice();
                assert!(
                    left_max <= separator,
                    "block {block}: left subtree max {left_max:?} exceeds separator {separator:?}"
                );
                assert!(
                    right_min >= separator,
                    "block {block}: right subtree min {right_min:?} undercuts separator {separator:?}"
                );
            }

            (ranges[0].0.clone(), ranges[n].1.clone())
        }
    }
}

mod attach {
    use super::*;

    #[test]
    fn fresh_attach_is_sane_and_empty() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();

        // an empty leaf-shaped root is the legal empty tree
        index.sanity_check().unwrap();
        assert!(matches!(
            index.lookup(&k("any")),
            Err(IndexError::Nonexistent)
        ));
    }

    #[test]
    fn detach_then_attach_observes_same_state() {
        let mut store = fresh_store();
        let (root, free);
        {
            let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();
            for i in 0..5 {
                let (key, value) = numbered(i);
                index.insert(&key, &value).unwrap();
            }
            root = index.rootnode();
            free = index.freelist_head();
            assert_eq!(index.detach().unwrap(), 0);
        }

        let mut index = BTreeIndex::open(&mut store).unwrap();
        assert_eq!(index.rootnode(), root);
        assert_eq!(index.freelist_head(), free);
        for i in 0..5 {
            let (key, value) = numbered(i);
            assert_eq!(index.lookup(&key).unwrap(), value);
        }
    }

    #[test]
    fn attach_survives_a_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.oak");

        {
            let mut store = MmapStore::create(&path, BLOCKSIZE, NUM_BLOCKS).unwrap();
            let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();
            index.insert(&k("alpha"), &k("AAAA")).unwrap();
            index.insert(&k("beta"), &k("BBBB")).unwrap();
            index.detach().unwrap();
            store.sync().unwrap();
        }

        let mut store = MmapStore::open(&path, BLOCKSIZE).unwrap();
        let mut index = BTreeIndex::open(&mut store).unwrap();
        index.sanity_check().unwrap();
        assert_eq!(index.lookup(&k("alpha")).unwrap(), k("AAAA"));
        assert_eq!(index.lookup(&k("beta")).unwrap(), k("BBBB"));
    }
}

mod point_operations {
    use super::*;

    #[test]
    fn single_insert_then_lookup() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();

        index.insert(&k("alpha"), b"AAAAAAAA").unwrap();
        assert_eq!(index.lookup(&k("alpha")).unwrap(), b"AAAAAAAA");
        assert!(matches!(
            index.lookup(&k("beta")),
            Err(IndexError::Nonexistent)
        ));
    }

    #[test]
    fn update_changes_the_stored_value() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();

        index.insert(&k("alpha"), b"AAAAAAAA").unwrap();
        index.update(&k("alpha"), b"BBBBBBBB").unwrap();
        assert_eq!(index.lookup(&k("alpha")).unwrap(), b"BBBBBBBB");

        assert!(matches!(
            index.update(&k("ghost"), b"XXXXXXXX"),
            Err(IndexError::Nonexistent)
        ));
    }

    #[test]
    fn update_survives_splits() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();

        for i in 0..7 {
            let (key, value) = numbered(i);
            index.insert(&key, &value).unwrap();
        }
        index.update(&numbered(3).0, b"REWRITE!").unwrap();

        assert_eq!(index.lookup(&numbered(3).0).unwrap(), b"REWRITE!");
        for i in [0, 1, 2, 4, 5, 6] {
            let (key, value) = numbered(i);
            assert_eq!(index.lookup(&key).unwrap(), value);
        }
    }

    #[test]
    fn delete_is_unimplemented() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();
        index.insert(&k("alpha"), b"AAAAAAAA").unwrap();
        assert!(matches!(
            index.delete(&k("alpha")),
            Err(IndexError::Unimplemented)
        ));
        assert_eq!(index.lookup(&k("alpha")).unwrap(), b"AAAAAAAA");
    }
}

mod splits {
    use super::*;

    #[test]
    fn root_leaf_split_installs_a_new_root() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();

        // two pairs fill the leaf-shaped root at this geometry
        index.insert(&k("a"), &k("1")).unwrap();
        index.insert(&k("b"), &k("2")).unwrap();
        let old_root = index.rootnode();

        index.insert(&k("c"), &k("3")).unwrap();
        assert_ne!(index.rootnode(), old_root);
        index.sanity_check().unwrap();

        for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
            assert_eq!(index.lookup(&k(key)).unwrap(), k(value));
        }
    }

    #[test]
    fn every_insert_in_a_cascade_keeps_the_tree_sane() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();

        // nine ascending inserts drive a leaf split, an interior split,
        // and a full root split cascade at this geometry
        for i in 0..9 {
            let (key, value) = numbered(i);
            index.insert(&key, &value).unwrap();
            index.sanity_check().unwrap();
        }

        for i in 0..9 {
            let (key, value) = numbered(i);
            assert_eq!(index.lookup(&key).unwrap(), value);
        }
    }

    #[test]
    fn cascade_grows_the_tree_past_two_levels() {
        let mut store = fresh_store();
        let root_block;
        {
            let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();
            for i in 0..9 {
                let (key, value) = numbered(i);
                index.insert(&key, &value).unwrap();
            }
            root_block = index.rootnode();
            index.detach().unwrap();
        }

        // walk the leftmost spine: at least one interior level must sit
        // between the root and the leaves
        let root = Node::read_from(&mut store, root_block).unwrap();
        assert_eq!(root.node_type(), NodeType::Root);

        let mut block = root.ptr_at(0).unwrap();
        let mut interior_levels = 0;
        loop {
            let node = Node::read_from(&mut store, block).unwrap();
            match node.node_type() {
                NodeType::Interior => {
                    interior_levels += 1;
                    block = node.ptr_at(0).unwrap();
                }
                NodeType::Leaf => break,
                other => panic!("unexpected node type {other:?} on the spine"),
            }
        }
        assert!(interior_levels >= 1);
    }

    #[test]
    fn separators_bound_their_subtrees_after_a_cascade() {
        let mut store = fresh_store();
        let root_block;
        {
            let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();
            // enough ascending inserts to split leaves, an interior node,
            // and the root itself
            for i in 0..9 {
                let (key, value) = numbered(i);
                index.insert(&key, &value).unwrap();
            }
            root_block = index.rootnode();
            index.detach().unwrap();
        }

        let (min, max) = check_separators(&mut store, root_block);
        assert_eq!(min, numbered(0).0);
        assert_eq!(max, numbered(8).0);
    }

    #[test]
    fn separators_bound_their_subtrees_after_reverse_inserts() {
        let mut store = fresh_store();
        let root_block;
        {
            let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();
            for i in (0..8u32).rev() {
                let (key, value) = numbered(i);
                index.insert(&key, &value).unwrap();
            }
            root_block = index.rootnode();
            index.detach().unwrap();
        }

        let (min, max) = check_separators(&mut store, root_block);
        assert_eq!(min, numbered(0).0);
        assert_eq!(max, numbered(7).0);
    }

    #[test]
    fn reverse_order_inserts_stay_sorted() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();

        for i in (0..8u32).rev() {
            let (key, value) = numbered(i);
            index.insert(&key, &value).unwrap();
            index.sanity_check().unwrap();
        }

        let mut out = Vec::new();
        index.display(&mut out, DisplayMode::SortedKeyval).unwrap();
        let text = String::from_utf8(out).unwrap();
        let keys: Vec<&str> = text
            .lines()
            .map(|line| &line[1..line.find(',').unwrap()])
            .collect();

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.len(), 8);
    }
}

mod display {
    use super::*;

    #[test]
    fn sorted_keyval_is_ascending_after_shuffled_inserts() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();

        for key in ["mm", "cc", "ww", "aa", "qq", "ee", "jj"] {
            index.insert(&k(key), &k(key)).unwrap();
        }

        let mut out = Vec::new();
        index.display(&mut out, DisplayMode::SortedKeyval).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines,
            vec![
                "(aa,aa)",
                "(cc,cc)",
                "(ee,ee)",
                "(jj,jj)",
                "(mm,mm)",
                "(qq,qq)",
                "(ww,ww)"
            ]
        );
    }

    #[test]
    fn print_emits_a_well_formed_digraph() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();

        for i in 0..5 {
            let (key, value) = numbered(i);
            index.insert(&key, &value).unwrap();
        }

        let mut out = Vec::new();
        index.print(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("digraph tree {\n"));
        assert!(text.ends_with("}\n"));
        // every parent-child pointer appears as exactly one edge
        assert!(text.matches(" -> ").count() >= 3);
    }
}

mod exhaustion {
    use super::*;

    #[test]
    fn inserts_fail_with_no_space_once_the_free_list_drains() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();

        let mut inserted = Vec::new();
        let mut exhausted = false;
        for i in 0..100 {
            let (key, value) = numbered(i);
            match index.insert(&key, &value) {
                Ok(()) => inserted.push((key, value)),
                Err(IndexError::NoSpace) => {
                    exhausted = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(exhausted, "16 blocks cannot absorb 100 inserts");
        assert!(inserted.len() >= 5, "expected several inserts to land");

        // the failed insert must leave the tree fully intact
        index.sanity_check().unwrap();
        for (key, value) in &inserted {
            assert_eq!(index.lookup(key).unwrap(), *value);
        }
    }

    #[test]
    fn exhausted_tree_keeps_accepting_lookups_and_updates() {
        let mut store = fresh_store();
        let mut index = BTreeIndex::create(&mut store, KEYSIZE, VALUESIZE).unwrap();

        let mut last = None;
        for i in 0..100 {
            let (key, value) = numbered(i);
            if index.insert(&key, &value).is_err() {
                break;
            }
            last = Some(key);
        }
        let last = last.unwrap();

        index.update(&last, b"patched!").unwrap();
        assert_eq!(index.lookup(&last).unwrap(), b"patched!");
    }
}
