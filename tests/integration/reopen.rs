//! Lifecycle coverage: what a tree looks like after closing and reopening
//! the backing file, and how opens react to files that are not trees.

use std::fs;

use bramble::{BrambleError, PagerOptions, Result, Tree, Value, VALUE_LEN};
use tempfile::tempdir;

fn val(n: u64) -> Value {
    let mut bytes = [0u8; VALUE_LEN];
    bytes[..8].copy_from_slice(&n.to_ne_bytes());
    Value(bytes)
}

#[test]
fn data_survives_a_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("tree.bramble");
    Tree::create_empty_file(&path)?;

    let tree = Tree::open(&path)?;
    for key in 1..=300u64 {
        tree.write(key, val(key))?;
    }
    assert!(tree.stats().leaf_splits >= 1, "300 keys do not fit in one leaf");
    drop(tree);

    let tree = Tree::open(&path)?;
    assert_eq!(tree.stats().writes, 0, "counters do not persist");
    for key in 1..=300u64 {
        assert_eq!(tree.read(key)?, Some(val(key)));
    }
    assert_eq!(tree.read(0)?, None);
    assert_eq!(tree.read(301)?, None);
    assert_eq!(tree.stats().reads, 302);
    Ok(())
}

#[test]
fn open_without_create_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing.bramble");
    let Err(err) = Tree::open(&path) else {
        panic!("opened a file that does not exist");
    };
    assert!(matches!(err, BrambleError::Io(_)), "unexpected error: {err}");
}

#[test]
fn open_rejects_files_that_are_not_trees() {
    let dir = tempdir().unwrap();

    let short = dir.path().join("short.bramble");
    fs::write(&short, b"ten bytes.").unwrap();
    let Err(err) = Tree::open(&short) else {
        panic!("opened a truncated file");
    };
    assert!(matches!(err, BrambleError::Corruption(_)), "unexpected error: {err}");

    let foreign = dir.path().join("foreign.bramble");
    fs::write(&foreign, vec![0xABu8; 4096]).unwrap();
    let Err(err) = Tree::open(&foreign) else {
        panic!("opened a file with a foreign header");
    };
    assert!(matches!(err, BrambleError::Corruption(_)), "unexpected error: {err}");
}

#[test]
fn create_truncates_an_existing_tree() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("tree.bramble");
    Tree::create_empty_file(&path)?;

    let tree = Tree::open(&path)?;
    for key in 1..=200u64 {
        tree.write(key, val(key))?;
    }
    drop(tree);

    Tree::create_empty_file(&path)?;
    let tree = Tree::open(&path)?;
    for key in 1..=200u64 {
        assert_eq!(tree.read(key)?, None);
    }
    tree.write(7, val(7))?;
    assert_eq!(tree.read(7)?, Some(val(7)));
    Ok(())
}

#[test]
fn synced_writes_survive_a_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("tree.bramble");
    Tree::create_empty_file(&path)?;

    let tree = Tree::open_with(&path, PagerOptions { sync_on_write: true })?;
    for key in 1..=150u64 {
        tree.write(key, val(key))?;
    }
    drop(tree);

    let tree = Tree::open(&path)?;
    for key in 1..=150u64 {
        assert_eq!(tree.read(key)?, Some(val(key)));
    }
    Ok(())
}
