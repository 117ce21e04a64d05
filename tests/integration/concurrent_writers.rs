//! Multi-threaded writes against one open tree: handles are clones, every
//! thread hammers the same file, and the tree must come out ordered.

use std::collections::BTreeMap;
use std::sync::{Arc, Barrier};
use std::thread;

use bramble::{Node, PageOffset, Result, Tree, Value, VALUE_LEN};
use tempfile::tempdir;

fn val(n: u64) -> Value {
    let mut bytes = [0u8; VALUE_LEN];
    bytes[..8].copy_from_slice(&n.to_ne_bytes());
    Value(bytes)
}

fn new_tree(dir: &tempfile::TempDir) -> Result<Tree> {
    let path = dir.path().join("tree.bramble");
    Tree::create_empty_file(&path)?;
    Tree::open(&path)
}

/// Reads every key in leaf order through the public page walk: snapshot all
/// pages, descend the leftmost spine, then follow the right links.
fn leaf_chain(tree: &Tree) -> Result<Vec<u64>> {
    let mut pages = tree.pages()?;
    let mut by_offset: BTreeMap<PageOffset, Node> = BTreeMap::new();
    let mut root = None;
    while let Some(node) = pages.next()? {
        if root.is_none() {
            root = Some(node.offset());
        }
        by_offset.insert(node.offset(), node);
    }
    let mut at = root.expect("a tree always has a root page");
    while let Some(children) = by_offset[&at].children() {
        at = children[0];
    }
    let mut keys = Vec::new();
    let mut cursor = Some(at);
    while let Some(offset) = cursor {
        let node = &by_offset[&offset];
        keys.extend_from_slice(node.keys());
        cursor = node.right();
    }
    Ok(keys)
}

/// Two writers with disjoint key sets race across the first leaf split.
/// Whoever hits the full leaf second must recover over the split instead
/// of splitting again, so the totals are exact.
#[test]
fn disjoint_writers_agree_after_a_split() -> Result<()> {
    let dir = tempdir()?;
    let tree = new_tree(&dir)?;
    let barrier = Arc::new(Barrier::new(2));

    let mut handles = Vec::new();
    for parity in [0u64, 1] {
        let tree = tree.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            for key in (1..=130u64).filter(|k| k % 2 == parity) {
                tree.write(key, val(key))?;
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    for key in 1..=130u64 {
        assert_eq!(tree.read(key)?, Some(val(key)));
    }
    assert_eq!(tree.read(0)?, None);
    assert_eq!(tree.read(131)?, None);

    let stats = tree.stats();
    assert_eq!(stats.writes, 130);
    assert_eq!(stats.leaf_splits, 1, "130 keys force exactly one leaf split");
    assert_eq!(stats.root_splits, 1);
    assert_eq!(stats.internal_splits, 0);

    let mut pages = tree.pages()?;
    let root = pages.next()?.expect("a tree always has a root page");
    assert!(!root.is_leaf());
    assert_eq!(root.key_count(), 1);
    assert_eq!(root.children().expect("internal root").len(), 2);

    assert_eq!(leaf_chain(&tree)?, (1..=130).collect::<Vec<u64>>());
    Ok(())
}

/// Four striped writers and two readers share the tree while it grows
/// through dozens of splits. Readers may observe any prefix of the writes
/// but never a torn or misplaced value.
#[test]
fn striped_writers_with_concurrent_readers() -> Result<()> {
    const THREADS: u64 = 4;
    const SPAN: u64 = 2048;

    let dir = tempdir()?;
    let tree = new_tree(&dir)?;
    let barrier = Arc::new(Barrier::new(THREADS as usize + 2));

    let mut handles = Vec::new();
    for stripe in 0..THREADS {
        let tree = tree.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            for key in (0..SPAN).filter(|k| k % THREADS == stripe) {
                tree.write(key, val(key))?;
            }
            Ok(())
        }));
    }
    for _ in 0..2 {
        let tree = tree.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            for _ in 0..2 {
                for key in 0..SPAN {
                    if let Some(found) = tree.read(key)? {
                        assert_eq!(found, val(key), "key {key} read back a foreign value");
                    }
                }
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    for key in 0..SPAN {
        assert_eq!(tree.read(key)?, Some(val(key)));
    }
    assert_eq!(leaf_chain(&tree)?, (0..SPAN).collect::<Vec<u64>>());

    let stats = tree.stats();
    assert_eq!(stats.writes, SPAN);
    assert!(stats.leaf_splits >= 15, "2048 keys span at least 16 leaves");
    assert!(stats.root_splits >= 1);
    Ok(())
}
